//! Generación de código.
//!
//! Traduce un módulo verificado a ensamblador x86-64 en sintaxis
//! AT&T para GNU `as`. La generación es una máquina de pila: cada
//! expresión deja exactamente un valor de 64 bits en la pila de
//! hardware y cada sentencia deja la pila como la encontró.
//!
//! # Convención de llamada
//! Propia del lenguaje y distinta de System V. El llamador apila los
//! argumentos de izquierda a derecha, invoca con `call`, retira sus
//! argumentos y recibe el valor de retorno en `%rax`. El llamado crea
//! un marco con `%rbp` y copia sus argumentos a posiciones propias.
//! Solo las llamadas a la biblioteca de C (`printf`, para `print`)
//! respetan System V.

use std::io::{self, Write};
use thiserror::Error;

use crate::{
    lex::Identifier,
    parse::{Ast, NodeId},
    resolve::Resolution,
    typeck::Types,
};

mod frame;
mod x86_64;

pub use frame::Frame;

pub type Emission<T> = Result<T, CodegenError>;

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Symbol `{0}` reached code generation without a stack slot")]
    Unallocated(Identifier),

    #[error("Node {0:?} reached code generation without a symbol")]
    Unbound(NodeId),

    #[error("Node {0:?} reached code generation without a type")]
    Untyped(NodeId),
}

/// Etiqueta local a una función.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(u32);

/// Estado de emisión de un módulo.
pub struct Context<'a, W> {
    output: &'a mut W,
    ast: &'a Ast,
    resolution: &'a Resolution,
    types: &'a Types,
    uses_print: bool,
}

impl<W: Write> Context<'_, W> {
    pub fn output(&mut self) -> &mut W {
        self.output
    }
}

/// Emite el listado completo de un módulo.
///
/// Si `entry` es verdadero se emite además el símbolo `main` que
/// espera el runtime de C, el cual salta a la función `main` del
/// programa. El código de salida del proceso es entonces el valor
/// de retorno de esa función.
pub fn emit<W: Write>(
    ast: &Ast,
    resolution: &mut Resolution,
    types: &Types,
    entry: bool,
    output: &mut W,
) -> Emission<()> {
    // Los marcos se disponen antes de emitir, ya que requieren
    // mutar la tabla de símbolos
    let frames: Vec<_> = ast
        .functions()
        .map(|(_, function)| Frame::allocate(ast, function, resolution))
        .collect();

    let mut cx = Context {
        output,
        ast,
        resolution,
        types,
        uses_print: false,
    };

    writeln!(cx.output(), "\t.text")?;

    for ((_, function), frame) in ast.functions().zip(frames) {
        x86_64::emit_function(&mut cx, function, frame)?;
    }

    if entry {
        let main = mangle(&Identifier::new("main"));
        writeln!(cx.output(), "\n\t.globl\tmain\n\t.type\tmain, @function\nmain:")?;
        emit!(cx, "jmp", "{}", main)?;
    }

    if cx.uses_print {
        x86_64::emit_print_strings(&mut cx)?;
    }

    writeln!(cx.output(), "\n\t.section .note.GNU-stack,\"\",@progbits")?;
    Ok(())
}

/// Nombre de enlazado de una función del programa.
///
/// El prefijo evita colisiones con símbolos de la biblioteca de C,
/// como `main`, `printf` o `exit`.
pub fn mangle(name: &Identifier) -> String {
    format!("tama_{}", name)
}

fn label_symbol(function: &str, Label(label): Label) -> String {
    format!(".L{}.{}", function, label)
}
