//! Errores de compilación y su presentación.

use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use thiserror::Error;

use crate::{
    codegen::CodegenError,
    driver::ModuleError,
    lex::LexerError,
    parse::ParserError,
    resolve::SemanticError,
    source::{Located, Location},
    typeck::TypeError,
};

/// Cualquier error que aborta la compilación de un programa.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] Located<LexerError>),

    #[error(transparent)]
    Parse(#[from] Located<ParserError>),

    #[error(transparent)]
    Semantic(#[from] Located<SemanticError>),

    #[error(transparent)]
    Type(#[from] Located<TypeError>),

    #[error(transparent)]
    Module(#[from] Located<ModuleError>),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

mod sealed {
    pub trait Sealed {}
}

/// Un error que posiblemente señala a una ubicación.
pub trait LocatedError: sealed::Sealed {
    fn error(&self) -> &dyn Error;
    fn location(&self) -> Option<&Location>;
}

/// Reporte de errores para humanos, con extractos del código fuente.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl From<CompileError> for Diagnostics {
    fn from(error: CompileError) -> Self {
        let kind = match &error {
            CompileError::Lex(_) => "Lexical error",
            CompileError::Parse(_) => "Syntax error",
            CompileError::Semantic(_) => "Semantic error",
            CompileError::Type(_) => "Type error",
            CompileError::Module(_) => "Module error",
            CompileError::Codegen(_) => "Internal compiler error",
            CompileError::SourceNotFound(_) | CompileError::Read { .. } => "error",
        };

        let diagnostics = match error {
            CompileError::Lex(error) => Diagnostics::from(error),
            CompileError::Parse(error) => Diagnostics::from(error),
            CompileError::Semantic(error) => Diagnostics::from(error),
            CompileError::Type(error) => Diagnostics::from(error),
            CompileError::Module(error) => Diagnostics::from(error),
            other => Diagnostics::from(Unlocated(other)),
        };

        diagnostics.kind(kind)
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.error())?;

            let mut cause = error.error().source();
            while let Some(inner) = cause {
                writeln!(fmt, "  caused by: {}", inner)?;
                cause = inner.source();
            }

            if let Some(location) = error.location() {
                excerpt(fmt, location)?;
            }

            writeln!(fmt)?;
        }

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

/// Muestra las líneas que abarca una ubicación y subraya su rango.
fn excerpt(fmt: &mut fmt::Formatter<'_>, location: &Location) -> fmt::Result {
    writeln!(fmt, " --> {}", location)?;

    let (start, end) = (location.start(), location.end());
    let digits = end.line().to_string().chars().count();
    writeln!(fmt, "{:digits$} |", "", digits = digits)?;

    for line_number in start.line()..=end.line() {
        location.with_line(line_number, |line| {
            writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)
        })?
    }

    // Un rango que termina en otra línea se subraya solo en la primera
    let last = if end.line() == start.line() {
        end.column().saturating_sub(1)
    } else {
        start.column()
    };

    let (from, to) = (start.column(), last.max(1));
    let min = from.min(to);
    let max = from.max(to);

    let skip = (min - 1) as usize;
    let highlight = (max - min + 1) as usize;

    writeln!(
        fmt,
        "{:digits$} | {:skip$}{:^<highlight$}",
        "",
        "",
        "",
        digits = digits,
        skip = skip,
        highlight = highlight
    )
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn error(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> Option<&Location> {
        Some(Located::location(self))
    }
}

/// Error sin ubicación en el código fuente.
struct Unlocated<E>(E);

impl<E: Error> sealed::Sealed for Unlocated<E> {}

impl<E: Error> LocatedError for Unlocated<E> {
    fn error(&self) -> &dyn Error {
        &self.0
    }

    fn location(&self) -> Option<&Location> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};
    use pretty_assertions::assert_eq;

    fn diagnose(text: &str) -> String {
        let (start, stream) = source::consume(text.as_bytes(), "test.tmd");
        let error: CompileError = match Lexer::new(start.clone(), stream).tokenize() {
            Err(error) => error.into(),
            Ok(tokens) => match parse::parse(tokens.iter(), start) {
                Err(error) => error.into(),
                Ok(ast) => ast.resolve(&[]).unwrap_err().into(),
            },
        };

        Diagnostics::from(error).to_string()
    }

    #[test]
    fn syntax_error_excerpt() {
        let expected = [
            "Syntax error: Expected `->`, found keyword `int` instead".to_owned(),
            " --> test.tmd:[1:10-1:12]".to_owned(),
            "  |".to_owned(),
            "1 | main: () int {".to_owned(),
            format!("  | {}^^^", " ".repeat(9)),
            String::new(),
            "Build failed with 1 error".to_owned(),
        ];

        let report = diagnose("main: () int {\n    return 0\n}\n");
        assert_eq!(report.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn semantic_error_excerpt() {
        let expected = [
            "Semantic error: Variable `y` is undefined".to_owned(),
            " --> test.tmd:2:12".to_owned(),
            "  |".to_owned(),
            "2 |     return y".to_owned(),
            format!("  | {}^", " ".repeat(11)),
            String::new(),
            "Build failed with 1 error".to_owned(),
        ];

        let report = diagnose("main: () -> int {\n    return y\n}\n");
        assert_eq!(report.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn lexical_error_kind() {
        let report = diagnose("main: () -> int { return $ }");
        assert!(report.starts_with("Lexical error: Bad character '$' in input stream\n"));
    }

    #[test]
    fn unlocated_errors() {
        let error = CompileError::SourceNotFound(PathBuf::from("missing.tmd"));
        assert_eq!(
            Diagnostics::from(error).to_string(),
            "error: Source file not found: missing.tmd\n\nBuild failed with 1 error\n"
        );
    }
}
