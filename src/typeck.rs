//! Verificación de tipos.
//!
//! Opera sobre un módulo ya resuelto. Cada expresión recibe
//! exactamente un tipo, el cual se registra en una tabla indexada por
//! [`NodeId`]. No existen conversiones implícitas: `int`, `bool` y
//! `nil` son mutuamente incompatibles.

use thiserror::Error;

use crate::{
    parse::{Ast, BinOp, Node, NodeId, UnOp},
    resolve::{Builtin, Resolution, SymbolKind},
    source::{Located, Location},
    types::Type,
};

pub type Typed<T> = Result<T, Located<TypeError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Type mismatch: expected `{0}`, found `{1}`")]
    Mismatch(Type, Type),

    #[error("Values of type `{0}` cannot be compared")]
    NotComparable(Type),

    #[error("Function expects {expected} arguments, found {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("Only `int` and `bool` values can be printed, found `{0}`")]
    NotPrintable(Type),
}

/// Tipo de cada expresión de un módulo.
#[derive(Debug)]
pub struct Types(Vec<Option<Type>>);

impl Types {
    pub fn of(&self, node: NodeId) -> Option<&Type> {
        self.0.get(node.index()).and_then(Option::as_ref)
    }
}

/// Verifica tipos en todas las funciones del módulo.
pub fn check(ast: &Ast, resolution: &Resolution) -> Typed<Types> {
    let mut checker = Checker {
        ast,
        resolution,
        types: vec![None; ast.len()],
        returns: Type::Nil,
    };

    for (node, function) in ast.functions() {
        let symbol = match resolution.symbol_of(node) {
            Some(symbol) => resolution.table().symbol(symbol),
            None => unreachable!("function `{}` was not resolved", function.name.val()),
        };

        checker.returns = symbol.typ.returns().cloned().unwrap_or(Type::Nil);
        checker.statement(function.body)?;
    }

    Ok(Types(checker.types))
}

struct Checker<'a> {
    ast: &'a Ast,
    resolution: &'a Resolution,
    types: Vec<Option<Type>>,
    returns: Type,
}

impl Checker<'_> {
    fn statement(&mut self, id: NodeId) -> Typed<()> {
        let ast = self.ast;
        let located = ast.node(id);

        match located.val() {
            Node::Block(statements) => {
                for &statement in statements {
                    self.statement(statement)?;
                }
            }

            Node::VarDecl { of, value, .. } => {
                let declared = Type::from(*of.val());
                self.expect(&declared, *value)?;
            }

            Node::Assign { value, .. } => {
                let target = self.symbol_type(id);
                self.expect(&target, *value)?;
            }

            Node::If {
                condition,
                then,
                otherwise,
            } => {
                self.expect(&Type::Bool, *condition)?;
                self.statement(*then)?;
                if let Some(otherwise) = otherwise {
                    self.statement(*otherwise)?;
                }
            }

            Node::While { condition, body } => {
                self.expect(&Type::Bool, *condition)?;
                self.statement(*body)?;
            }

            Node::Return(Some(value)) => {
                let returns = self.returns.clone();
                self.expect(&returns, *value)?;
            }

            // `return` sin valor solo es válido en funciones `nil`
            Node::Return(None) if self.returns != Type::Nil => {
                let error = TypeError::Mismatch(self.returns.clone(), Type::Nil);
                return Err(Located::at(error, located.location().clone()));
            }

            Node::Return(None) => (),

            Node::ExprStatement(expr) => {
                self.expr(*expr)?;
            }

            _ => {
                self.expr(id)?;
            }
        }

        Ok(())
    }

    fn expr(&mut self, id: NodeId) -> Typed<Type> {
        let ast = self.ast;
        let located = ast.node(id);

        let typ = match located.val() {
            Node::IntLiteral(_) => Type::Int,
            Node::BoolLiteral(_) => Type::Bool,
            Node::NilLiteral => Type::Nil,
            Node::Identifier(_) => self.symbol_type(id),

            Node::Unary(UnOp::Negate, operand) => {
                self.expect(&Type::Int, *operand)?;
                Type::Int
            }

            Node::Unary(UnOp::Not, operand) => {
                self.expect(&Type::Bool, *operand)?;
                Type::Bool
            }

            Node::Binary(lhs, op, rhs) => self.binary(*lhs, *op, *rhs)?,
            Node::Call { args, .. } => self.call(id, args, located.location())?,

            _ => unreachable!("statement found in expression position"),
        };

        self.types[id.index()] = Some(typ.clone());
        Ok(typ)
    }

    fn binary(&mut self, lhs: NodeId, op: BinOp, rhs: NodeId) -> Typed<Type> {
        use BinOp::*;

        let typ = match op {
            Add | Sub | Mul | Div => {
                self.expect(&Type::Int, lhs)?;
                self.expect(&Type::Int, rhs)?;
                Type::Int
            }

            Less | LessOrEqual | Greater | GreaterOrEqual => {
                self.expect(&Type::Int, lhs)?;
                self.expect(&Type::Int, rhs)?;
                Type::Bool
            }

            And | Or => {
                self.expect(&Type::Bool, lhs)?;
                self.expect(&Type::Bool, rhs)?;
                Type::Bool
            }

            Equal | NotEqual => {
                let left = self.expr(lhs)?;
                if !matches!(left, Type::Int | Type::Bool) {
                    let location = self.ast.node(lhs).location().clone();
                    return Err(Located::at(TypeError::NotComparable(left), location));
                }

                self.expect(&left, rhs)?;
                Type::Bool
            }
        };

        Ok(typ)
    }

    fn call(&mut self, id: NodeId, args: &[NodeId], location: &Location) -> Typed<Type> {
        let resolution = self.resolution;
        let symbol = match resolution.symbol_of(id) {
            Some(symbol) => resolution.table().symbol(symbol),
            None => unreachable!("call was not resolved"),
        };

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                let error = TypeError::ArgumentCount {
                    expected,
                    found: args.len(),
                };

                Err(Located::at(error, location.clone()))
            }
        };

        match (&symbol.kind, &symbol.typ) {
            (SymbolKind::Builtin(Builtin::Print), _) => {
                arity(1)?;

                let typ = self.expr(args[0])?;
                if !matches!(typ, Type::Int | Type::Bool) {
                    let location = self.ast.node(args[0]).location().clone();
                    return Err(Located::at(TypeError::NotPrintable(typ), location));
                }

                Ok(Type::Nil)
            }

            (_, Type::Function(params, returns)) => {
                arity(params.len())?;
                for (param, &arg) in params.iter().zip(args) {
                    self.expect(param, arg)?;
                }

                Ok((**returns).clone())
            }

            _ => unreachable!("callee `{}` is not a function", symbol.name),
        }
    }

    fn expect(&mut self, expected: &Type, id: NodeId) -> Typed<()> {
        let found = self.expr(id)?;
        if found == *expected {
            Ok(())
        } else {
            let location = self.ast.node(id).location().clone();
            Err(Located::at(
                TypeError::Mismatch(expected.clone(), found),
                location,
            ))
        }
    }

    fn symbol_type(&self, id: NodeId) -> Type {
        match self.resolution.symbol_of(id) {
            Some(symbol) => self.resolution.table().symbol(symbol).typ.clone(),
            None => unreachable!("name was not resolved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};
    use indoc::indoc;

    fn check_str(text: &str) -> Typed<(Ast, Types)> {
        let (start, stream) = source::consume(text.as_bytes(), "test.tmd");
        let tokens = Lexer::new(start.clone(), stream).tokenize().unwrap();
        let ast = parse::parse(tokens.iter(), start).unwrap();
        let resolution = ast.resolve(&[]).unwrap();

        let types = check(&ast, &resolution)?;
        Ok((ast, types))
    }

    fn error(text: &str) -> String {
        check_str(text).unwrap_err().val().to_string()
    }

    fn in_main(body: &str) -> String {
        format!("main: () -> int {{ {} return 0 }}", body)
    }

    #[test]
    fn well_typed_program() {
        let (ast, types) = check_str(indoc! {"
            add: (a: int, b: int) -> int {
                return a + b
            }

            log: (flag: bool) -> nil {
                print(flag)
                return
            }

            main: () -> int {
                done: bool = false
                n: int = 0
                while !done and n <= 10 {
                    n = add(n, 1)
                    done = n == 10 or false
                }

                log(done != true)
                return -n
            }
        "})
        .unwrap();

        // Toda expresión queda tipada
        for id in ast.ids() {
            let is_expr = matches!(
                ast.node(id).val(),
                Node::Binary(..)
                    | Node::Unary(..)
                    | Node::Call { .. }
                    | Node::Identifier(_)
                    | Node::IntLiteral(_)
                    | Node::BoolLiteral(_)
                    | Node::NilLiteral
            );

            assert_eq!(is_expr, types.of(id).is_some());
        }

        let call = ast
            .ids()
            .find(|&id| match ast.node(id).val() {
                Node::Call { callee, .. } => callee.val().as_ref() == "log",
                _ => false,
            })
            .unwrap();

        assert_eq!(types.of(call), Some(&Type::Nil));
    }

    #[test]
    fn mismatched_declarations() {
        assert_eq!(
            error(&in_main("x: int = true")),
            "Type mismatch: expected `int`, found `bool`"
        );

        assert_eq!(
            error(&in_main("x: bool = nil")),
            "Type mismatch: expected `bool`, found `nil`"
        );

        assert_eq!(
            error(&in_main("x: int = 1 x = false")),
            "Type mismatch: expected `int`, found `bool`"
        );
    }

    #[test]
    fn operator_operands() {
        assert_eq!(
            error(&in_main("x: int = 1 + true")),
            "Type mismatch: expected `int`, found `bool`"
        );

        assert_eq!(
            error(&in_main("x: bool = 1 and true")),
            "Type mismatch: expected `bool`, found `int`"
        );

        assert_eq!(
            error(&in_main("x: int = -false")),
            "Type mismatch: expected `int`, found `bool`"
        );

        assert_eq!(
            error(&in_main("x: bool = !1")),
            "Type mismatch: expected `bool`, found `int`"
        );

        assert_eq!(
            error(&in_main("x: bool = 1 == true")),
            "Type mismatch: expected `int`, found `bool`"
        );

        assert_eq!(
            error(&in_main("x: bool = nil == nil")),
            "Values of type `nil` cannot be compared"
        );

        assert_eq!(
            error(&in_main("x: bool = true < false")),
            "Type mismatch: expected `int`, found `bool`"
        );
    }

    #[test]
    fn conditions_must_be_bool() {
        assert_eq!(
            error(&in_main("if 1 { }")),
            "Type mismatch: expected `bool`, found `int`"
        );

        assert_eq!(
            error(&in_main("while nil { }")),
            "Type mismatch: expected `bool`, found `nil`"
        );

        assert_eq!(
            error(&in_main("if true { } elif 0 { }")),
            "Type mismatch: expected `bool`, found `int`"
        );
    }

    #[test]
    fn calls() {
        let text = indoc! {"
            add: (a: int, b: int) -> int { return a + b }
            main: () -> int { return add(1) }
        "};

        assert_eq!(error(text), "Function expects 2 arguments, found 1");

        let text = indoc! {"
            add: (a: int, b: int) -> int { return a + b }
            main: () -> int { return add(1, false) }
        "};

        assert_eq!(error(text), "Type mismatch: expected `int`, found `bool`");

        let located = check_str(text).unwrap_err();
        assert_eq!(located.location().to_string(), "test.tmd:[2:33-2:37]");

        assert_eq!(
            error(&in_main("print(1, 2)")),
            "Function expects 1 arguments, found 2"
        );

        assert_eq!(
            error(&in_main("print(nil)")),
            "Only `int` and `bool` values can be printed, found `nil`"
        );

        assert_eq!(
            error(&in_main("x: int = print(1)")),
            "Type mismatch: expected `int`, found `nil`"
        );
    }

    #[test]
    fn return_types() {
        assert_eq!(
            error("main: () -> int { return true }"),
            "Type mismatch: expected `int`, found `bool`"
        );

        assert_eq!(
            error("main: () -> int { return }"),
            "Type mismatch: expected `int`, found `nil`"
        );

        assert!(check_str("f: () -> nil { return nil }").is_ok());
        assert!(check_str("f: () -> nil { return }").is_ok());

        // Las funciones pueden terminar sin `return`
        assert!(check_str("f: () -> int { }").is_ok());
    }
}
