use std::io::Write;

use crate::{
    parse::{BinOp, Function, Node, NodeId, UnOp},
    resolve::{Builtin, Slot, Symbol, SymbolKind},
    types::Type,
};

use super::{
    frame::{argument_address, slot_address, Frame},
    label_symbol, mangle, CodegenError, Context, Emission, Label,
};

// Esta es una arquitectura de 64 bits
pub const VALUE_SIZE: u32 = 8;

const PRINT_INT: &str = ".Lprint.int";
const PRINT_TRUE: &str = ".Lprint.true";
const PRINT_FALSE: &str = ".Lprint.false";

pub fn emit_function<W: Write>(
    cx: &mut Context<'_, W>,
    function: &Function,
    frame: Frame,
) -> Emission<()> {
    let emitter = FunctionEmitter {
        cx,
        name: mangle(function.name.val()),
        frame,
        next_label: 0,
    };

    emitter.write_asm(function)
}

/// Cadenas de formato que utiliza `print`.
pub fn emit_print_strings<W: Write>(cx: &mut Context<'_, W>) -> Emission<()> {
    let output = cx.output();
    writeln!(output, "\n\t.section .rodata")?;
    writeln!(output, "{}:\n\t.asciz \"%ld\\n\"", PRINT_INT)?;
    writeln!(output, "{}:\n\t.asciz \"true\\n\"", PRINT_TRUE)?;
    writeln!(output, "{}:\n\t.asciz \"false\\n\"", PRINT_FALSE)?;

    Ok(())
}

struct FunctionEmitter<'c, 'a, W> {
    cx: &'c mut Context<'a, W>,
    name: String,
    frame: Frame,
    next_label: u32,
}

impl<'a, W: Write> FunctionEmitter<'_, 'a, W> {
    fn write_asm(mut self, function: &Function) -> Emission<()> {
        let name = self.name.clone();
        writeln!(
            self.output(),
            "\n\t.globl\t{0}\n\t.type\t{0}, @function\n{0}:",
            name
        )?;

        let epilogue = self.new_label();

        // Prólogo, crea un stack frame
        emit!(self, "pushq", "%rbp")?;
        emit!(self, "movq", "%rsp, %rbp")?;

        let size = self.frame.size();
        if size > 0 {
            emit!(self, "subq", "$0x{:x}, %rsp", size)?;
        }

        // Los argumentos se copian a las posiciones de sus parámetros
        let params = self.frame.params();
        for index in 0..params {
            let from = argument_address(index, params);
            let to = slot_address(Slot(index));

            emit!(self, "movq", "{}, %rax", from)?;
            emit!(self, "movq", "%rax, {}", to)?;
        }

        self.statement(function.body, epilogue)?;

        // Una función que termina sin `return` retorna 0
        emit!(self, "xorl", "%eax, %eax")?;
        self.emit_label(epilogue)?;

        // Epílogo, revierte al estado justo antes de la llamada
        emit!(self, "movq", "%rbp, %rsp")?;
        emit!(self, "popq", "%rbp")?;
        emit!(self, "ret")?;

        Ok(())
    }

    fn statement(&mut self, id: NodeId, epilogue: Label) -> Emission<()> {
        let ast = self.cx.ast;
        match ast.node(id).val() {
            Node::Block(statements) => {
                for &statement in statements {
                    self.statement(statement, epilogue)?;
                }
            }

            Node::VarDecl { value, .. } | Node::Assign { value, .. } => {
                self.expr(*value)?;

                let address = self.address_of(id)?;
                emit!(self, "popq", "{}", address)?;
            }

            Node::If {
                condition,
                then,
                otherwise,
            } => {
                let otherwise_label = self.new_label();
                self.condition(*condition, otherwise_label)?;
                self.statement(*then, epilogue)?;

                match otherwise {
                    Some(otherwise) => {
                        let end = self.new_label();
                        self.jump(end)?;

                        self.emit_label(otherwise_label)?;
                        self.statement(*otherwise, epilogue)?;
                        self.emit_label(end)?;
                    }

                    None => self.emit_label(otherwise_label)?,
                }
            }

            Node::While { condition, body } => {
                let start = self.new_label();
                let exit = self.new_label();

                self.emit_label(start)?;
                self.condition(*condition, exit)?;
                self.statement(*body, epilogue)?;
                self.jump(start)?;
                self.emit_label(exit)?;
            }

            Node::Return(value) => {
                match value {
                    Some(value) => {
                        self.expr(*value)?;
                        emit!(self, "popq", "%rax")?;
                    }

                    None => emit!(self, "xorl", "%eax, %eax")?,
                }

                self.jump(epilogue)?;
            }

            Node::ExprStatement(expr) => {
                // El valor se descarta
                self.expr(*expr)?;
                emit!(self, "addq", "$0x{:x}, %rsp", VALUE_SIZE)?;
            }

            _ => unreachable!("expression found in statement position"),
        }

        Ok(())
    }

    /// Evalúa una condición y salta a `otherwise` si es falsa.
    fn condition(&mut self, condition: NodeId, otherwise: Label) -> Emission<()> {
        self.expr(condition)?;

        emit!(self, "popq", "%rax")?;
        emit!(self, "testq", "%rax, %rax")?;

        let target = label_symbol(&self.name, otherwise);
        emit!(self, "jz", "{}", target)?;

        Ok(())
    }

    fn expr(&mut self, id: NodeId) -> Emission<()> {
        let ast = self.cx.ast;
        match ast.node(id).val() {
            Node::IntLiteral(value) => match i32::try_from(*value) {
                Ok(value) => emit!(self, "pushq", "${}", value)?,

                // `push` solo acepta inmediatos de 32 bits
                Err(_) => {
                    emit!(self, "movabsq", "${}, %rax", value)?;
                    emit!(self, "pushq", "%rax")?;
                }
            },

            Node::BoolLiteral(value) => emit!(self, "pushq", "${}", *value as i32)?,
            Node::NilLiteral => emit!(self, "pushq", "$0")?,

            Node::Identifier(_) => {
                let address = self.address_of(id)?;
                emit!(self, "pushq", "{}", address)?;
            }

            Node::Unary(op, operand) => {
                self.expr(*operand)?;
                emit!(self, "popq", "%rax")?;

                match op {
                    UnOp::Negate => emit!(self, "negq", "%rax")?,
                    UnOp::Not => emit!(self, "xorq", "$1, %rax")?,
                }

                emit!(self, "pushq", "%rax")?;
            }

            Node::Binary(lhs, op @ (BinOp::And | BinOp::Or), rhs) => {
                self.short_circuit(*lhs, *op, *rhs)?
            }

            Node::Binary(lhs, op, rhs) => {
                self.expr(*lhs)?;
                self.expr(*rhs)?;

                emit!(self, "popq", "%rcx")?;
                emit!(self, "popq", "%rax")?;
                self.arithmetic(*op)?;
                emit!(self, "pushq", "%rax")?;
            }

            Node::Call { args, .. } => self.call(id, args)?,

            _ => unreachable!("statement found in expression position"),
        }

        Ok(())
    }

    /// Aplica un operador binario sobre `%rax` y `%rcx`, dejando el
    /// resultado en `%rax`.
    fn arithmetic(&mut self, op: BinOp) -> Emission<()> {
        use BinOp::*;

        let set = match op {
            Add => "addq",
            Sub => "subq",
            Mul => "imulq",

            // Una división entre cero termina el proceso con SIGFPE
            Div => {
                emit!(self, "cqto")?;
                emit!(self, "idivq", "%rcx")?;
                return Ok(());
            }

            And | Or => unreachable!("logical operators short-circuit"),

            comparison => {
                let set = match comparison {
                    Equal => "sete",
                    NotEqual => "setne",
                    Less => "setl",
                    LessOrEqual => "setle",
                    Greater => "setg",
                    _ => "setge",
                };

                emit!(self, "cmpq", "%rcx, %rax")?;
                emit!(self, set, "%al")?;
                emit!(self, "movzbq", "%al, %rax")?;
                return Ok(());
            }
        };

        emit!(self, set, "%rcx, %rax")?;
        Ok(())
    }

    /// El operando derecho solo se evalúa si el izquierdo no determina
    /// el resultado.
    fn short_circuit(&mut self, lhs: NodeId, op: BinOp, rhs: NodeId) -> Emission<()> {
        let decided = self.new_label();
        let end = self.new_label();

        let (jump, result) = match op {
            BinOp::And => ("jz", 0),
            _ => ("jnz", 1),
        };

        self.expr(lhs)?;
        emit!(self, "popq", "%rax")?;
        emit!(self, "testq", "%rax, %rax")?;

        let target = label_symbol(&self.name, decided);
        emit!(self, jump, "{}", target)?;

        self.expr(rhs)?;
        self.jump(end)?;

        self.emit_label(decided)?;
        emit!(self, "pushq", "${}", result)?;
        self.emit_label(end)?;

        Ok(())
    }

    fn call(&mut self, id: NodeId, args: &[NodeId]) -> Emission<()> {
        let symbol = self.symbol_of(id)?;
        if let SymbolKind::Builtin(Builtin::Print) = symbol.kind {
            return self.print(args[0]);
        }

        let target = mangle(&symbol.name);
        for &arg in args {
            self.expr(arg)?;
        }

        emit!(self, "call", "{}", target)?;
        if !args.is_empty() {
            let size = args.len() as u32 * VALUE_SIZE;
            emit!(self, "addq", "$0x{:x}, %rsp", size)?;
        }

        emit!(self, "pushq", "%rax")?;
        Ok(())
    }

    /// `print` es la única llamada que sigue System V, ya que invoca
    /// a `printf`. La pila se alinea a 16 bytes alrededor de la
    /// llamada y `%rbx`, preservado por el llamado, guarda el valor
    /// previo de `%rsp`.
    fn print(&mut self, arg: NodeId) -> Emission<()> {
        let typ = self
            .cx
            .types
            .of(arg)
            .ok_or(CodegenError::Untyped(arg))?
            .clone();

        self.cx.uses_print = true;

        self.expr(arg)?;
        emit!(self, "popq", "%rsi")?;

        match typ {
            Type::Bool => {
                emit!(self, "leaq", "{}(%rip), %rdi", PRINT_TRUE)?;
                emit!(self, "leaq", "{}(%rip), %rax", PRINT_FALSE)?;
                emit!(self, "testq", "%rsi, %rsi")?;
                emit!(self, "cmovz", "%rax, %rdi")?;
            }

            _ => emit!(self, "leaq", "{}(%rip), %rdi", PRINT_INT)?,
        }

        emit!(self, "pushq", "%rbx")?;
        emit!(self, "movq", "%rsp, %rbx")?;
        emit!(self, "andq", "$-16, %rsp")?;
        emit!(self, "xorl", "%eax, %eax")?;
        emit!(self, "call", "printf@PLT")?;
        emit!(self, "movq", "%rbx, %rsp")?;
        emit!(self, "popq", "%rbx")?;

        // `print` retorna `nil`
        emit!(self, "pushq", "$0")?;
        Ok(())
    }

    fn symbol_of(&self, id: NodeId) -> Emission<&'a Symbol> {
        let resolution = self.cx.resolution;
        let symbol = resolution
            .symbol_of(id)
            .ok_or(CodegenError::Unbound(id))?;

        Ok(resolution.table().symbol(symbol))
    }

    fn address_of(&self, id: NodeId) -> Emission<String> {
        let symbol = self.symbol_of(id)?;
        match symbol.slot() {
            Some(slot) => Ok(slot_address(slot)),
            None => Err(CodegenError::Unallocated(symbol.name.clone())),
        }
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn emit_label(&mut self, label: Label) -> Emission<()> {
        let symbol = label_symbol(&self.name, label);
        writeln!(self.output(), "\t{}:", symbol)?;
        Ok(())
    }

    fn jump(&mut self, label: Label) -> Emission<()> {
        let target = label_symbol(&self.name, label);
        emit!(self, "jmp", "{}", target)?;
        Ok(())
    }

    fn output(&mut self) -> &mut W {
        self.cx.output()
    }
}
