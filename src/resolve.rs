//! Resolución de nombres.
//!
//! Se construye una cadena de ámbitos léxicos por cada función y se
//! enlaza cada uso de un identificador con exactamente un símbolo.
//! Tanto los ámbitos como los símbolos viven en arenas ([`SymbolTable`])
//! y se refieren entre sí por índices, por lo cual un ámbito conoce a
//! su padre sin poseerlo.
//!
//! La cadena de un módulo tiene la siguiente forma, de afuera hacia
//! adentro:
//!
//! 1. Ámbito de importaciones: funciones de módulos importados y
//!    funciones integradas como `print`.
//! 2. Ámbito del módulo: funciones de nivel superior. Todas se declaran
//!    antes de resolver cualquier cuerpo, por lo cual pueden referirse
//!    entre sí sin importar su orden.
//! 3. Ámbito de cada función: parámetros y declaraciones de nivel
//!    superior del cuerpo.
//! 4. Un ámbito hijo por cada bloque anidado.

use thiserror::Error;

use crate::{
    lex::Identifier,
    parse::{Ast, Node, NodeId},
    source::{Located, Location},
    types::Type,
};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Entrypoint not found, define `main: () -> int`")]
    NoMain,

    #[error("Variable `{0}` is undefined")]
    UndefinedVariable(Identifier),

    #[error("Function `{0}` is undefined")]
    UndefinedFunction(Identifier),

    #[error("Redefinition of `{0}` in the same scope")]
    DuplicateDeclaration(Identifier),

    #[error("Expected variable, found function `{0}`")]
    ExpectedVariable(Identifier),

    #[error("Expected function, found variable `{0}`")]
    ExpectedFunction(Identifier),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

/// Posición de un símbolo dentro del marco de pila de su función.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Builtin {
    Print,
}

impl Builtin {
    const ALL: &'static [(&'static str, Builtin)] = &[("print", Builtin::Print)];
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    /// Parámetro, con su índice posicional.
    Parameter(u32),
    Local,
    Function,
    Builtin(Builtin),
}

#[derive(Debug)]
pub struct Symbol {
    pub name: Identifier,
    pub declared: Option<Location>,
    pub typ: Type,
    pub scope: ScopeId,
    pub kind: SymbolKind,
    slot: Option<Slot>,
}

impl Symbol {
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, SymbolKind::Function | SymbolKind::Builtin(_))
    }

    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    names: Vec<(Identifier, SymbolId)>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0 as usize].parent
    }

    /// Busca un nombre desde `scope` hacia afuera. Gana la primera
    /// coincidencia.
    pub fn lookup(&self, scope: ScopeId, name: &Identifier) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(scope) = current {
            if let Some(symbol) = self.lookup_local(scope, name) {
                return Some(symbol);
            }

            current = self.parent(scope);
        }

        None
    }

    /// Busca un nombre únicamente en `scope`.
    pub fn lookup_local(&self, scope: ScopeId, name: &Identifier) -> Option<SymbolId> {
        self.scopes[scope.0 as usize]
            .names
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|&(_, symbol)| symbol)
    }

    /// Asigna una posición de pila a un símbolo. Esta es la única
    /// mutación permitida luego de su declaración.
    pub fn assign_slot(&mut self, id: SymbolId, slot: Slot) {
        self.symbols[id.0 as usize].slot = Some(slot);
    }

    fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            names: Vec::new(),
        });

        id
    }

    fn declare(
        &mut self,
        scope: ScopeId,
        name: &Identifier,
        declared: Option<Location>,
        typ: Type,
        kind: SymbolKind,
    ) -> Semantic<SymbolId> {
        if self.lookup_local(scope, name).is_some() {
            let location = declared.unwrap_or_else(|| unreachable!("duplicate builtin"));
            return Err(Located::at(
                SemanticError::DuplicateDeclaration(name.clone()),
                location,
            ));
        }

        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.clone(),
            declared,
            typ,
            scope,
            kind,
            slot: None,
        });

        self.scopes[scope.0 as usize].names.push((name.clone(), id));
        Ok(id)
    }
}

/// Función visible para otros módulos.
#[derive(Clone, Debug)]
pub struct Export {
    pub name: Located<Identifier>,
    pub typ: Type,
}

/// Resultado de resolver un módulo.
#[derive(Debug)]
pub struct Resolution {
    table: SymbolTable,
    bindings: Vec<Option<SymbolId>>,
    module_scope: ScopeId,
}

impl Resolution {
    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut SymbolTable {
        &mut self.table
    }

    /// Símbolo declarado o referido por un nodo.
    ///
    /// Las declaraciones (funciones, parámetros, variables) se enlazan
    /// con el símbolo que introducen; los usos (identificadores,
    /// asignaciones, llamadas) con el símbolo al que refieren.
    pub fn symbol_of(&self, node: NodeId) -> Option<SymbolId> {
        self.bindings.get(node.index()).copied().flatten()
    }

    /// Funciones de nivel superior del módulo, en orden de declaración.
    pub fn exports(&self, ast: &Ast) -> Vec<Export> {
        ast.functions()
            .filter_map(|(node, function)| {
                let symbol = self.symbol_of(node)?;
                Some(Export {
                    name: function.name.clone(),
                    typ: self.table.symbol(symbol).typ.clone(),
                })
            })
            .collect()
    }

    /// Verifica que exista un punto de entrada `main: () -> int`.
    pub fn require_main(&self, ast: &Ast) -> Semantic<()> {
        let main = Identifier::new("main");
        let expected = Type::Function(Vec::new(), Box::new(Type::Int));

        match self.table.lookup_local(self.module_scope, &main) {
            Some(symbol) if self.table.symbol(symbol).typ == expected => Ok(()),

            Some(symbol) => {
                let location = self.table.symbol(symbol).declared.clone();
                let location = location.unwrap_or_else(|| ast.end().clone());
                Err(Located::at(SemanticError::NoMain, location))
            }

            None => Err(Located::at(SemanticError::NoMain, ast.end().clone())),
        }
    }
}

impl Ast {
    /// Resuelve todos los nombres del módulo.
    ///
    /// `imports` son las funciones exportadas por los módulos que este
    /// importa directamente.
    pub fn resolve(&self, imports: &[Export]) -> Semantic<Resolution> {
        let mut table = SymbolTable::default();

        let import_scope = table.new_scope(None);
        for &(name, builtin) in Builtin::ALL {
            let typ = Type::Function(Vec::new(), Box::new(Type::Nil));
            let kind = SymbolKind::Builtin(builtin);
            table.declare(import_scope, &Identifier::new(name), None, typ, kind)?;
        }

        for export in imports {
            let (location, name) = export.name.clone().split();
            let typ = export.typ.clone();
            table.declare(import_scope, &name, Some(location), typ, SymbolKind::Function)?;
        }

        let module_scope = table.new_scope(Some(import_scope));
        let mut resolver = Resolver {
            ast: self,
            table,
            bindings: vec![None; self.len()],
        };

        // Primero se declaran todas las funciones, luego se resuelven
        // sus cuerpos
        for (node, function) in self.functions() {
            let name = function.name.val();
            if resolver.table.lookup_local(import_scope, name).is_some() {
                return Err(Located::at(
                    SemanticError::DuplicateDeclaration(name.clone()),
                    function.name.location().clone(),
                ));
            }

            let params = function
                .params
                .iter()
                .map(|&param| match self.node(param).val() {
                    Node::Param { of, .. } => Type::from(*of.val()),
                    _ => unreachable!("function parameter is not a Param node"),
                })
                .collect();

            let typ = Type::Function(params, Box::new(Type::from(*function.returns.val())));
            let location = Some(function.name.location().clone());

            let symbol =
                resolver
                    .table
                    .declare(module_scope, name, location, typ, SymbolKind::Function)?;

            resolver.bind(node, symbol);
        }

        for (_, function) in self.functions() {
            let scope = resolver.table.new_scope(Some(module_scope));
            for (index, &param) in function.params.iter().enumerate() {
                let (name, of) = match self.node(param).val() {
                    Node::Param { name, of } => (name, of),
                    _ => unreachable!("function parameter is not a Param node"),
                };

                let kind = SymbolKind::Parameter(index as u32);
                let location = Some(name.location().clone());
                let symbol =
                    resolver
                        .table
                        .declare(scope, name.val(), location, Type::from(*of.val()), kind)?;

                resolver.bind(param, symbol);
            }

            // El bloque del cuerpo comparte ámbito con los parámetros
            match self.node(function.body).val() {
                Node::Block(statements) => {
                    for &statement in statements {
                        resolver.statement(statement, scope)?;
                    }
                }

                _ => unreachable!("function body is not a block"),
            }
        }

        Ok(Resolution {
            table: resolver.table,
            bindings: resolver.bindings,
            module_scope,
        })
    }
}

struct Resolver<'a> {
    ast: &'a Ast,
    table: SymbolTable,
    bindings: Vec<Option<SymbolId>>,
}

impl Resolver<'_> {
    fn statement(&mut self, id: NodeId, scope: ScopeId) -> Semantic<()> {
        let ast = self.ast;
        match ast.node(id).val() {
            Node::Block(statements) => {
                let inner = self.table.new_scope(Some(scope));
                for &statement in statements {
                    self.statement(statement, inner)?;
                }
            }

            Node::VarDecl { name, of, value } => {
                // El valor inicial se resuelve antes de que el nombre
                // declarado sea visible
                self.expr(*value, scope)?;

                let location = Some(name.location().clone());
                let symbol = self.table.declare(
                    scope,
                    name.val(),
                    location,
                    Type::from(*of.val()),
                    SymbolKind::Local,
                )?;

                self.bind(id, symbol);
            }

            Node::Assign { target, value } => {
                self.expr(*value, scope)?;

                let symbol = self.variable(target, scope)?;
                self.bind(id, symbol);
            }

            Node::If {
                condition,
                then,
                otherwise,
            } => {
                self.expr(*condition, scope)?;
                self.statement(*then, scope)?;
                if let Some(otherwise) = otherwise {
                    self.statement(*otherwise, scope)?;
                }
            }

            Node::While { condition, body } => {
                self.expr(*condition, scope)?;
                self.statement(*body, scope)?;
            }

            Node::Return(value) => {
                if let Some(value) = value {
                    self.expr(*value, scope)?;
                }
            }

            Node::ExprStatement(expr) => self.expr(*expr, scope)?,

            Node::Import(_) | Node::Function(_) | Node::Param { .. } => {
                unreachable!("item found in statement position")
            }

            _ => self.expr(id, scope)?,
        }

        Ok(())
    }

    fn expr(&mut self, id: NodeId, scope: ScopeId) -> Semantic<()> {
        let ast = self.ast;
        let located = ast.node(id);
        match located.val() {
            Node::Identifier(name) => {
                let name = Located::at(name.clone(), located.location().clone());
                let symbol = self.variable(&name, scope)?;
                self.bind(id, symbol);
            }

            Node::Call { callee, args } => {
                let symbol = self.function(callee, scope)?;
                self.bind(id, symbol);

                for &arg in args {
                    self.expr(arg, scope)?;
                }
            }

            Node::Binary(lhs, _, rhs) => {
                self.expr(*lhs, scope)?;
                self.expr(*rhs, scope)?;
            }

            Node::Unary(_, operand) => self.expr(*operand, scope)?,

            Node::IntLiteral(_) | Node::BoolLiteral(_) | Node::NilLiteral => (),

            _ => unreachable!("statement found in expression position"),
        }

        Ok(())
    }

    fn variable(&self, name: &Located<Identifier>, scope: ScopeId) -> Semantic<SymbolId> {
        let id = name.val();
        match self.table.lookup(scope, id) {
            Some(symbol) if self.table.symbol(symbol).is_callable() => Err(Located::at(
                SemanticError::ExpectedVariable(id.clone()),
                name.location().clone(),
            )),

            Some(symbol) => Ok(symbol),
            None => Err(Located::at(
                SemanticError::UndefinedVariable(id.clone()),
                name.location().clone(),
            )),
        }
    }

    fn function(&self, name: &Located<Identifier>, scope: ScopeId) -> Semantic<SymbolId> {
        let id = name.val();
        match self.table.lookup(scope, id) {
            Some(symbol) if self.table.symbol(symbol).is_callable() => Ok(symbol),

            Some(_) => Err(Located::at(
                SemanticError::ExpectedFunction(id.clone()),
                name.location().clone(),
            )),

            None => Err(Located::at(
                SemanticError::UndefinedFunction(id.clone()),
                name.location().clone(),
            )),
        }
    }

    fn bind(&mut self, node: NodeId, symbol: SymbolId) {
        self.bindings[node.index()] = Some(symbol);
    }
}
