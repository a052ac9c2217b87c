//! Ubicaciones en el código fuente.
//!
//! Cada token, nodo y error del compilador lleva consigo el rango de
//! posiciones que ocupa en su archivo de origen, de forma que un
//! diagnóstico pueda citar la línea exacta donde ocurrió.

use std::{
    cell::RefCell,
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    io::{self, BufRead, Lines},
    ops::Range,
    rc::Rc,
    vec,
};

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Un flujo de entrada, carácter por carácter.
pub trait InputStream: Iterator<Item = Result<(char, Location), io::Error>> {}

impl<I> InputStream for I where I: Iterator<Item = Result<(char, Location), io::Error>> {}

/// Un valor junto con la ubicación de la que proviene.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    pub fn val(&self) -> &T {
        &self.value
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// Separa la ubicación del valor.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T: Display> Display for Located<T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.location, self.value)
    }
}

impl<E: Error> Error for Located<E> {}

/// Rango semiabierto de posiciones dentro de un origen.
#[derive(Clone)]
pub struct Location {
    source: Rc<Source>,
    range: Range<Position>,
}

impl Location {
    /// Rango que inicia con `from` y termina con `to`. Ambas
    /// ubicaciones deben pertenecer al mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            range: from.range.start..to.range.end,
            source: from.source,
        }
    }

    pub fn start(&self) -> Position {
        self.range.start
    }

    pub fn end(&self) -> Position {
        self.range.end
    }

    /// Nombre del origen, usualmente una ruta.
    pub fn source_name(&self) -> &str {
        &self.source.name
    }

    /// Invoca a `callback` con el texto de la línea `line` del origen.
    ///
    /// Solo se conocen las líneas que el lexer ya leyó. Cualquier otra
    /// se presenta como vacía.
    pub fn with_line<F, R>(&self, line: u32, callback: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        let lines = self.source.lines.borrow();
        let text = (line as usize)
            .checked_sub(1)
            .and_then(|index| lines.get(index))
            .map_or("", String::as_str);

        callback(text)
    }

    fn point(source: &Rc<Source>, at: Position) -> Self {
        Location {
            source: Rc::clone(source),
            range: at..at.advance(),
        }
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let Range { start, end } = self.range;
        let single = end == start.advance() || end.line != start.line || end.column <= start.column;

        if single {
            write!(formatter, "{}:{}", self.source.name, start)
        } else {
            write!(formatter, "{}:[{}-{}]", self.source.name, start, end.back())
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, formatter)
    }
}

/// Línea y columna, ambas a partir de 1.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Columna siguiente en la misma línea.
    pub fn advance(self) -> Position {
        Position::new(self.line, self.column + 1)
    }

    /// Columna anterior, sin salir de la línea.
    pub fn back(self) -> Position {
        Position::new(self.line, self.column.saturating_sub(1).max(1))
    }

    /// Posición que sigue a `c`.
    fn after(self, c: char) -> Position {
        match c {
            '\n' => Position::new(self.line + 1, 1),
            '\t' => Position::new(self.line, 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP),
            _ => self.advance(),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::new(1, 1)
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Descompone una entrada en caracteres ubicados.
///
/// La ubicación retornada junto al flujo corresponde al primer
/// carácter. Cada carácter emitido viene acompañado de la ubicación del
/// carácter que le sigue, lo cual le permite al lexer cerrar un token
/// sin necesidad de lookahead. Toda línea termina en `'\n'`, incluso
/// la última.
pub fn consume<R, S>(reader: R, name: S) -> (Location, impl InputStream)
where
    R: BufRead,
    S: Into<String>,
{
    let source = Rc::new(Source {
        name: name.into(),
        lines: Default::default(),
    });

    let start = Location::point(&source, Position::default());
    let chars = Chars {
        source,
        lines: Some(reader.lines()),
        pending: Vec::new().into_iter(),
        position: Position::default(),
    };

    (start, chars)
}

/// Nombre del origen y las líneas leídas hasta el momento.
struct Source {
    name: String,
    lines: RefCell<Vec<String>>,
}

struct Chars<R> {
    source: Rc<Source>,
    lines: Option<Lines<R>>,
    pending: vec::IntoIter<char>,
    position: Position,
}

impl<R: BufRead> Iterator for Chars<R> {
    type Item = Result<(char, Location), io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(c) = self.pending.next() {
                self.position = self.position.after(c);
                return Some(Ok((c, Location::point(&self.source, self.position))));
            }

            // Un error de E/S termina el flujo
            match self.lines.as_mut()?.next() {
                Some(Ok(line)) => {
                    let mut chars: Vec<_> = line.chars().collect();
                    chars.push('\n');

                    self.source.lines.borrow_mut().push(line);
                    self.pending = chars.into_iter();
                }

                Some(Err(error)) => {
                    self.lines = None;
                    return Some(Err(error));
                }

                None => {
                    self.lines = None;
                    return None;
                }
            }
        }
    }
}
