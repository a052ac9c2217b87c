//! Compilador para el lenguaje tmd.
//!
//! # Front end
//! Cada módulo deriva de un único archivo de código fuente. Este
//! archivo se somete primero a análisis léxico en [`lex`], de lo cual
//! se obtiene un flujo de tokens. El flujo de tokens se dispone en un
//! AST por medio de análisis sintáctico en [`parse`]. Sobre el árbol
//! se resuelven nombres en [`resolve`] y se verifican tipos en
//! [`typeck`], con lo cual concluyen las fases delanteras.
//!
//! # Back end
//! [`codegen`] traduce cada módulo verificado a ensamblador x86-64
//! para Linux. Ensamblado y enlazado se delegan a la toolchain del
//! sistema en [`link`].
//!
//! # Programas de varios módulos
//! [`driver`] sigue las importaciones entre archivos, compila cada
//! módulo una única vez y produce una unidad de ensamblador por
//! módulo. Los errores de cualquier fase se reúnen en
//! [`error::CompileError`] y se presentan con [`error::Diagnostics`].

#[macro_use]
mod macros;

pub mod codegen;
pub mod driver;
pub mod error;
pub mod lex;
pub mod link;
pub mod parse;
pub mod resolve;
pub mod source;
pub mod typeck;
pub mod types;
