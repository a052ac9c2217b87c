//! Análisis léxico.
//!
//! El lexer toma el flujo de caracteres producido por
//! [`crate::source::consume`] y lo agrupa en tokens, descartando espacios
//! y comentarios en el camino. Cada token conserva el rango de
//! posiciones que ocupa.
//!
//! Solo los identificadores guardan su texto. Las constantes enteras se
//! convierten a su valor durante el escaneo y el resto de tokens quedan
//! descritos por su variante.
//!
//! # Reglas
//! - Los identificadores empiezan con una letra o `_` y distinguen
//!   mayúsculas de minúsculas.
//! - `main` y `print` no son palabras clave, sino identificadores comunes.
//! - Los comentarios inician con `#` y terminan con la línea.
//! - El signo no forma parte de una constante entera: `-5` es la
//!   negación unaria de `5`.
//!
//! El primer error detiene el escaneo. Luego de emitirlo el iterador
//! queda agotado.

use crate::source::{InputStream, Located, Location};
use std::{
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Literal entero máximo.
const INT_MAX: i64 = i64::MAX;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Falla al leer el origen.
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter que no inicia ningún token.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Constante entera mayor que `i64::MAX`.
    #[error("Integer literal overflow, valid range is [0, {INT_MAX}]")]
    IntOverflow,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Rc<str>);

impl Identifier {
    pub fn new(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Unidad léxica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(i64),

    /// `=`
    Assign,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `!`
    Not,

    /// `<`
    Less,

    /// `<=`
    LessOrEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterOrEqual,

    /// `,`
    Comma,

    /// `:`
    Colon,

    /// `->`
    Arrow,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Divide,

    /// `(`
    OpenParen,

    /// `{`
    OpenCurly,

    /// `)`
    CloseParen,

    /// `}`
    CloseCurly,
}

impl Token {
    /// Determina si este token puede iniciar una expresión.
    pub fn starts_expr(&self) -> bool {
        use self::Keyword::{False, Nil, True};

        matches!(
            self,
            Token::Id(_)
                | Token::IntLiteral(_)
                | Token::Keyword(True | False | Nil)
                | Token::Minus
                | Token::Not
                | Token::OpenParen
        )
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            Assign => fmt.write_str("`=`"),
            Equal => fmt.write_str("`==`"),
            NotEqual => fmt.write_str("`!=`"),
            Not => fmt.write_str("`!`"),
            Less => fmt.write_str("`<`"),
            LessOrEqual => fmt.write_str("`<=`"),
            Greater => fmt.write_str("`>`"),
            GreaterOrEqual => fmt.write_str("`>=`"),
            Comma => fmt.write_str("`,`"),
            Colon => fmt.write_str("`:`"),
            Arrow => fmt.write_str("`->`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Divide => fmt.write_str("`/`"),
            OpenParen => fmt.write_str("`(`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseParen => fmt.write_str("`)`"),
            CloseCurly => fmt.write_str("`}`"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Import,
    If,
    Elif,
    Else,
    While,
    Return,
    Int,
    Bool,
    Nil,
    True,
    False,
    And,
    Or,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            Import => "import",
            If     => "if",
            Elif   => "elif",
            Else   => "else",
            While  => "while",
            Return => "return",
            Int    => "int",
            Bool   => "bool",
            Nil    => "nil",
            True   => "true",
            False  => "false",
            And    => "and",
            Or     => "or",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(&str, Keyword)] = &[
            ("import", Import),
            ("if",     If),
            ("elif",   Elif),
            ("else",   Else),
            ("while",  While),
            ("return", Return),
            ("int",    Int),
            ("bool",   Bool),
            ("nil",    Nil),
            ("true",   True),
            ("false",  False),
            ("and",    And),
            ("or",     Or),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Lexer dirigido por estados.
///
/// Cada paso observa el siguiente carácter sin consumirlo. Con base en
/// el estado actual y ese carácter se decide si el carácter forma parte
/// del token en curso o si el token ya terminó. Un token termina sin
/// consumir el carácter que lo delimita.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

enum State {
    /// Entre tokens.
    Start,

    /// Terminal, luego de un error.
    Error,

    /// El token ya está completo. Se emite en el siguiente paso, una vez
    /// consumido su último carácter.
    Complete(Token),

    /// Hasta el final de la línea.
    Comment,

    /// Primer carácter de un operador que admite un segundo: `->`,
    /// `<=`, `>=`, `==` o `!=`.
    Operator(char),

    /// Valor acumulado de una constante entera.
    Integer(i64),

    /// Identificador o palabra clave.
    Word(String),
}

impl<S: InputStream> Lexer<S> {
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Reduce la entrada completa a tokens, o bien al primer error.
    pub fn tokenize(self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        self.collect()
    }

    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use State::*;

        let mut last_accepted = self.start.clone();
        loop {
            let peeked = self.peek()?;
            if let Start = self.state {
                self.start = self.next.clone();
            }

            let token = match (&mut self.state, peeked) {
                (Error, _) | (Start, None) => return Ok(None),

                (Start, Some('#')) => {
                    self.state = Comment;
                    None
                }

                (Start, Some(c @ ('-' | '<' | '>' | '=' | '!'))) => {
                    self.state = Operator(c);
                    None
                }

                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string());
                    None
                }

                // El primer dígito lo acumula el estado `Integer`
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                (Start, Some(c)) if c.is_whitespace() => None,
                (Start, Some(c)) => {
                    let token = punctuation(c).ok_or(LexerError::BadChar(c))?;
                    self.state = Complete(token);
                    None
                }

                (Complete(token), _) => Some(std::mem::replace(token, Token::Plus)),

                (Operator('-'), Some('>')) => {
                    self.state = Complete(Token::Arrow);
                    None
                }

                (Operator(first @ ('<' | '>' | '=' | '!')), Some('=')) => {
                    let token = compound(*first);
                    self.state = Complete(token);
                    None
                }

                (Operator(first), _) => Some(operator(*first)),

                (Comment, Some('\n') | None) => {
                    self.state = Start;
                    None
                }

                (Comment, Some(_)) => None,

                (Integer(value), Some(digit)) if digit.is_ascii_digit() => {
                    let digit = i64::from(digit as u8 - b'0');
                    *value = value
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                        .ok_or(LexerError::IntOverflow)?;

                    None
                }

                (Integer(value), _) => Some(Token::IntLiteral(*value)),

                (Word(word), Some(c)) if is_word_char(c) => {
                    word.push(c);
                    None
                }

                (Word(word), _) => Some(match word.parse() {
                    Ok(keyword) => Token::Keyword(keyword),
                    Err(()) => Token::Id(Identifier::new(word)),
                }),
            };

            if let Some(token) = token {
                return Ok(Some((token, last_accepted)));
            }

            if let Some(Ok((_, following))) = self.source.next() {
                last_accepted = std::mem::replace(&mut self.next, following);
            }
        }
    }

    /// Observa el siguiente carácter sin consumirlo. Un error de E/S sí
    /// se consume.
    fn peek(&mut self) -> Result<Option<char>, LexerError> {
        match self.source.peek() {
            None => Ok(None),
            Some(Ok((c, _))) => Ok(Some(*c)),
            Some(Err(_)) => match self.source.next() {
                Some(Err(error)) => Err(error.into()),
                _ => unreachable!("peeked an I/O error"),
            },
        }
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, self.next.clone())))
            }
        }
    }
}

/// Tokens de un carácter que nunca se extienden.
fn punctuation(c: char) -> Option<Token> {
    let token = match c {
        ',' => Token::Comma,
        ':' => Token::Colon,
        '+' => Token::Plus,
        '*' => Token::Times,
        '/' => Token::Divide,
        '(' => Token::OpenParen,
        '{' => Token::OpenCurly,
        ')' => Token::CloseParen,
        '}' => Token::CloseCurly,
        _ => return None,
    };

    Some(token)
}

fn operator(first: char) -> Token {
    match first {
        '-' => Token::Minus,
        '<' => Token::Less,
        '>' => Token::Greater,
        '=' => Token::Assign,
        '!' => Token::Not,
        _ => unreachable!("`{}` does not start an operator", first),
    }
}

/// Operador de dos caracteres que termina en `=`.
fn compound(first: char) -> Token {
    match first {
        '<' => Token::LessOrEqual,
        '>' => Token::GreaterOrEqual,
        '=' => Token::Equal,
        '!' => Token::NotEqual,
        _ => unreachable!("`{}=` is not an operator", first),
    }
}

/// Carácter que puede continuar un identificador.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
