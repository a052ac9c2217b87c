//! Tipos del lenguaje.

use std::fmt::{self, Display};

use crate::parse;

/// Tipo estático.
///
/// Los tipos se comparan estructuralmente. No existen subtipos ni
/// conversiones implícitas.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Nil,
    Function(Vec<Type>, Box<Type>),
}

impl Type {
    /// Tipo de retorno, si se trata de una función.
    pub fn returns(&self) -> Option<&Type> {
        match self {
            Type::Function(_, returns) => Some(returns),
            _ => None,
        }
    }
}

impl From<parse::Type> for Type {
    fn from(typ: parse::Type) -> Self {
        match typ {
            parse::Type::Int => Type::Int,
            parse::Type::Bool => Type::Bool,
            parse::Type::Nil => Type::Nil,
        }
    }
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::Bool => fmt.write_str("bool"),
            Type::Nil => fmt.write_str("nil"),
            Type::Function(params, returns) => {
                fmt.write_str("(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        fmt.write_str(", ")?;
                    }

                    write!(fmt, "{}", param)?;
                }

                write!(fmt, ") -> {}", returns)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_types_compare_structurally() {
        let add = Type::Function(vec![Type::Int, Type::Int], Box::new(Type::Int));
        let same = Type::Function(vec![Type::Int, Type::Int], Box::new(Type::Int));
        let other = Type::Function(vec![Type::Int, Type::Bool], Box::new(Type::Int));

        assert_eq!(add, same);
        assert_ne!(add, other);
        assert_eq!(add.to_string(), "(int, int) -> int");
        assert_eq!(add.returns(), Some(&Type::Int));
        assert_eq!(Type::Bool.returns(), None);
    }
}
