//! Análisis sintáctico.
//!
//! El parser es de descenso recursivo y procesa un único módulo por
//! invocación. El árbol resultante se almacena en una arena de nodos
//! ([`Ast`]) direccionados por [`NodeId`]: cada nodo hijo es referido
//! exactamente por un padre, por lo cual la estructura sigue siendo
//! un árbol aunque no haya `Box` de por medio. Las fases posteriores
//! asocian información a cada nodo mediante tablas indexadas por
//! [`NodeId`].

use std::{fmt, iter::Peekable, marker::PhantomData};
use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

/// Identificador de un nodo dentro de su [`Ast`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Árbol sintáctico de un módulo.
#[derive(Debug)]
pub struct Ast {
    nodes: Vec<Located<Node>>,
    items: Vec<NodeId>,
    end: Location,
}

impl Ast {
    /// Obtiene un nodo.
    pub fn node(&self, id: NodeId) -> &Located<Node> {
        &self.nodes[id.index()]
    }

    /// Cantidad total de nodos en la arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Todos los identificadores de nodo, en orden de construcción.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Ítems de nivel superior, en orden de declaración.
    pub fn items(&self) -> &[NodeId] {
        &self.items
    }

    /// Nombres de módulos importados, en orden de declaración.
    pub fn imports(&self) -> impl Iterator<Item = &Located<Identifier>> {
        self.items
            .iter()
            .filter_map(move |&item| match self.node(item).val() {
                Node::Import(name) => Some(name),
                _ => None,
            })
    }

    /// Funciones de nivel superior, en orden de declaración.
    pub fn functions(&self) -> impl Iterator<Item = (NodeId, &Function)> {
        self.items
            .iter()
            .filter_map(move |&item| match self.node(item).val() {
                Node::Function(function) => Some((item, function)),
                _ => None,
            })
    }

    /// Ubicación del final del módulo.
    pub fn end(&self) -> &Location {
        &self.end
    }
}

#[derive(Debug)]
pub enum Node {
    Import(Located<Identifier>),
    Function(Function),

    Param {
        name: Located<Identifier>,
        of: Located<Type>,
    },

    Block(Vec<NodeId>),

    VarDecl {
        name: Located<Identifier>,
        of: Located<Type>,
        value: NodeId,
    },

    Assign {
        target: Located<Identifier>,
        value: NodeId,
    },

    If {
        condition: NodeId,
        then: NodeId,
        otherwise: Option<NodeId>,
    },

    While {
        condition: NodeId,
        body: NodeId,
    },

    Return(Option<NodeId>),
    ExprStatement(NodeId),
    Binary(NodeId, BinOp, NodeId),
    Unary(UnOp, NodeId),

    Call {
        callee: Located<Identifier>,
        args: Vec<NodeId>,
    },

    Identifier(Identifier),
    IntLiteral(i64),
    BoolLiteral(bool),
    NilLiteral,
}

#[derive(Debug)]
pub struct Function {
    pub name: Located<Identifier>,
    pub params: Vec<NodeId>,
    pub returns: Located<Type>,
    pub body: NodeId,
}

/// Anotación de tipo escrita en el código fuente.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Bool,
    Nil,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    /// Cantidad de niveles de precedencia binaria.
    const LEVELS: u32 = 6;

    fn from_token(token: &Token) -> Option<BinOp> {
        use BinOp::*;

        let op = match token {
            Token::Keyword(Keyword::Or) => Or,
            Token::Keyword(Keyword::And) => And,
            Token::Equal => Equal,
            Token::NotEqual => NotEqual,
            Token::Less => Less,
            Token::LessOrEqual => LessOrEqual,
            Token::Greater => Greater,
            Token::GreaterOrEqual => GreaterOrEqual,
            Token::Plus => Add,
            Token::Minus => Sub,
            Token::Times => Mul,
            Token::Divide => Div,
            _ => return None,
        };

        Some(op)
    }

    /// Nivel de precedencia, de menor a mayor.
    fn precedence(self) -> u32 {
        use BinOp::*;

        match self {
            Or => 0,
            And => 1,
            Equal | NotEqual => 2,
            Less | LessOrEqual | Greater | GreaterOrEqual => 3,
            Add | Sub => 4,
            Mul | Div => 5,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;

        let string = match self {
            Or => "or",
            And => "and",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            LessOrEqual => "<=",
            Greater => ">",
            GreaterOrEqual => ">=",
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
        };

        fmt.write_str(string)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Negate => fmt.write_str("-"),
            UnOp::Not => fmt.write_str("!"),
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier, found {0} instead")]
    ExpectedId(Token),

    #[error("Expected `import` or a function definition, found {0} instead")]
    ExpectedItem(Token),

    #[error("Expected a statement, found {0} instead")]
    ExpectedStatement(Token),

    #[error("Expected any of `int`, `bool`, `nil`, found {0} instead")]
    ExpectedType(Token),

    #[error("Expected an expression, found {0} instead")]
    ExpectedExpr(Token),

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

pub trait TokenStream<'a>: Iterator<Item = &'a Located<Token>> + Clone {}

impl<'a, I> TokenStream<'a> for I where I: Iterator<Item = &'a Located<Token>> + Clone {}

/// Construye el AST de un módulo.
///
/// `start` es la ubicación inicial del archivo, la cual se utiliza
/// para reportar errores en módulos vacíos o truncados.
pub fn parse<'a>(
    tokens: impl TokenStream<'a>,
    start: Location,
) -> Result<Ast, Located<ParserError>> {
    let mut parser = Parser {
        tokens: tokens.peekable(),
        last_known: start,
        nodes: Vec::new(),
        lifetime_hack: PhantomData,
    };

    parser.module()
}

struct Parser<'a, I: TokenStream<'a>> {
    tokens: Peekable<I>,
    last_known: Location,
    nodes: Vec<Located<Node>>,
    lifetime_hack: PhantomData<&'a ()>,
}

type Parse<T> = Result<T, Located<ParserError>>;

impl<'a, I: TokenStream<'a>> Parser<'a, I> {
    fn module(&mut self) -> Parse<Ast> {
        let mut items = Vec::new();
        while let Some(token) = self.peek() {
            let item = match token {
                Token::Keyword(Keyword::Import) => self.import()?,
                Token::Id(_) => self.function()?,

                _ => {
                    let found = self.next()?.into_inner();
                    return self.fail(ParserError::ExpectedItem(found));
                }
            };

            items.push(item);
        }

        Ok(Ast {
            nodes: std::mem::take(&mut self.nodes),
            items,
            end: self.last_known.clone(),
        })
    }

    fn import(&mut self) -> Parse<NodeId> {
        let start = self.here();
        self.keyword(Keyword::Import)?;
        let name = self.id()?;

        Ok(self.push(Node::Import(name), start))
    }

    fn function(&mut self) -> Parse<NodeId> {
        let start = self.here();
        let name = self.id()?;
        self.expect(Token::Colon)?;

        self.expect(Token::OpenParen)?;
        let params = if self.peek() == Some(&Token::CloseParen) {
            Vec::new()
        } else {
            self.comma_separated(Parser::parameter)?
        };
        self.expect(Token::CloseParen)?;

        self.expect(Token::Arrow)?;
        let returns = self.typ()?;
        let body = self.block()?;

        let function = Function {
            name,
            params,
            returns,
            body,
        };

        Ok(self.push(Node::Function(function), start))
    }

    fn parameter(&mut self) -> Parse<NodeId> {
        let start = self.here();
        let name = self.id()?;

        self.expect(Token::Colon)?;
        let of = self.typ()?;

        Ok(self.push(Node::Param { name, of }, start))
    }

    fn block(&mut self) -> Parse<NodeId> {
        let start = self.here();
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::CloseCurly) => {
                    self.next()?;
                    break;
                }

                Some(_) => statements.push(self.statement()?),
                None => return self.fail(ParserError::MissingToken(Token::CloseCurly)),
            }
        }

        Ok(self.push(Node::Block(statements), start))
    }

    fn statement(&mut self) -> Parse<NodeId> {
        match self.peek() {
            Some(Token::Keyword(Keyword::If)) => self.if_statement(),
            Some(Token::Keyword(Keyword::While)) => self.while_statement(),
            Some(Token::Keyword(Keyword::Return)) => self.return_statement(),
            Some(Token::OpenCurly) => self.block(),

            // Se requieren dos tokens de lookahead para distinguir
            // declaraciones, asignaciones y expresiones
            Some(Token::Id(_)) => match self.peek_second() {
                Some(Token::Colon) => self.var_decl(),
                Some(Token::Assign) => self.assignment(),
                _ => self.expr_statement(),
            },

            Some(token) if token.starts_expr() => self.expr_statement(),

            _ => {
                let found = self.next()?.into_inner();
                self.fail(ParserError::ExpectedStatement(found))
            }
        }
    }

    fn var_decl(&mut self) -> Parse<NodeId> {
        let start = self.here();
        let name = self.id()?;

        self.expect(Token::Colon)?;
        let of = self.typ()?;

        self.expect(Token::Assign)?;
        let value = self.expr()?;

        Ok(self.push(Node::VarDecl { name, of, value }, start))
    }

    fn assignment(&mut self) -> Parse<NodeId> {
        let start = self.here();
        let target = self.id()?;

        self.expect(Token::Assign)?;
        let value = self.expr()?;

        Ok(self.push(Node::Assign { target, value }, start))
    }

    /// `if` y cada `elif` subsecuente producen un nodo [`Node::If`].
    /// Una cadena de `elif` se representa como un `If` cuya rama
    /// alternativa es otro `If`.
    fn if_statement(&mut self) -> Parse<NodeId> {
        let start = self.here();
        self.next()?;

        let condition = self.expr()?;
        let then = self.block()?;

        let otherwise = match self.peek() {
            Some(Token::Keyword(Keyword::Elif)) => Some(self.if_statement()?),
            Some(Token::Keyword(Keyword::Else)) => {
                self.next()?;
                Some(self.block()?)
            }

            _ => None,
        };

        let node = Node::If {
            condition,
            then,
            otherwise,
        };

        Ok(self.push(node, start))
    }

    fn while_statement(&mut self) -> Parse<NodeId> {
        let start = self.here();
        self.keyword(Keyword::While)?;

        let condition = self.expr()?;
        let body = self.block()?;

        Ok(self.push(Node::While { condition, body }, start))
    }

    fn return_statement(&mut self) -> Parse<NodeId> {
        let start = self.here();
        self.keyword(Keyword::Return)?;

        let value = match self.peek() {
            Some(token) if token.starts_expr() => Some(self.expr()?),
            _ => None,
        };

        Ok(self.push(Node::Return(value), start))
    }

    fn expr_statement(&mut self) -> Parse<NodeId> {
        let start = self.here();
        let expr = self.expr()?;

        Ok(self.push(Node::ExprStatement(expr), start))
    }

    fn typ(&mut self) -> Parse<Located<Type>> {
        let (location, token) = self.next()?.split();
        let typ = match token {
            Token::Keyword(Keyword::Int) => Type::Int,
            Token::Keyword(Keyword::Bool) => Type::Bool,
            Token::Keyword(Keyword::Nil) => Type::Nil,

            found => return self.fail(ParserError::ExpectedType(found)),
        };

        Ok(Located::at(typ, location))
    }

    fn expr(&mut self) -> Parse<NodeId> {
        self.binary(0)
    }

    /// Operadores binarios por precedence climbing. Todos los
    /// niveles son asociativos a la izquierda.
    fn binary(&mut self, level: u32) -> Parse<NodeId> {
        if level == BinOp::LEVELS {
            return self.unary();
        }

        let start = self.here();
        let mut lhs = self.binary(level + 1)?;

        while let Some(op) = self
            .peek()
            .and_then(BinOp::from_token)
            .filter(|op| op.precedence() == level)
        {
            self.next()?;
            let rhs = self.binary(level + 1)?;
            lhs = self.push(Node::Binary(lhs, op, rhs), start.clone());
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Parse<NodeId> {
        let op = match self.peek() {
            Some(Token::Minus) => UnOp::Negate,
            Some(Token::Not) => UnOp::Not,
            _ => return self.primary(),
        };

        let start = self.here();
        self.next()?;

        let operand = self.unary()?;
        Ok(self.push(Node::Unary(op, operand), start))
    }

    fn primary(&mut self) -> Parse<NodeId> {
        let start = self.here();
        let (location, token) = self.next()?.split();

        let node = match token {
            Token::IntLiteral(integer) => Node::IntLiteral(integer),
            Token::Keyword(Keyword::True) => Node::BoolLiteral(true),
            Token::Keyword(Keyword::False) => Node::BoolLiteral(false),
            Token::Keyword(Keyword::Nil) => Node::NilLiteral,

            Token::Id(id) if self.peek() == Some(&Token::OpenParen) => {
                let callee = Located::at(id, location);
                let args = self.arguments()?;

                Node::Call { callee, args }
            }

            Token::Id(id) => Node::Identifier(id),

            Token::OpenParen => {
                let inner = self.expr()?;
                self.expect(Token::CloseParen)?;

                return Ok(inner);
            }

            found => return self.fail(ParserError::ExpectedExpr(found)),
        };

        Ok(self.push(node, start))
    }

    fn arguments(&mut self) -> Parse<Vec<NodeId>> {
        self.expect(Token::OpenParen)?;
        if self.peek() == Some(&Token::CloseParen) {
            self.next()?;
            return Ok(Vec::new());
        }

        let args = self.comma_separated(Parser::expr)?;
        self.expect(Token::CloseParen)?;

        Ok(args)
    }

    fn comma_separated<T, F>(&mut self, mut rule: F) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        let mut items = vec![rule(self)?];
        while self.peek() == Some(&Token::Comma) {
            self.next()?;
            items.push(rule(self)?);
        }

        Ok(items)
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            found => self.fail(ParserError::ExpectedId(found)),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        if self.peek().is_none() {
            return self.fail(ParserError::MissingToken(token));
        }

        match self.next()?.into_inner() {
            found if found == token => Ok(()),
            found => self.fail(ParserError::UnexpectedToken(token, found)),
        }
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token.clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn peek(&mut self) -> Option<&'a Token> {
        self.tokens.peek().map(|&token| token.val())
    }

    fn peek_second(&mut self) -> Option<&'a Token> {
        let mut lookahead = self.tokens.clone();
        lookahead.next();
        lookahead.next().map(|token| token.val())
    }

    /// Ubicación del siguiente token, o del último conocido si
    /// ya no quedan más.
    fn here(&mut self) -> Location {
        match self.tokens.peek() {
            Some(token) => token.location().clone(),
            None => self.last_known.clone(),
        }
    }

    /// Agrega un nodo a la arena, abarcando desde `start` hasta el
    /// último token consumido.
    fn push(&mut self, node: Node, start: Location) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let location = Location::span(start, &self.last_known);

        self.nodes.push(Located::at(node, location));
        id
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }
}
