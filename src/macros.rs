/// Escribe una instrucción en la salida de `$cx`.
///
/// Los operandos se dan como un formato literal y sus argumentos. El
/// opcode se rellena hasta la columna de operandos para que el listado
/// quede alineado.
macro_rules! emit {
    ($cx:expr, $opcode:expr) => {
        writeln!($cx.output(), "\t{}", $opcode)
    };

    ($cx:expr, $opcode:expr, $operands:literal $(, $arg:expr)* $(,)?) => {
        writeln!($cx.output(), concat!("\t{:8}", $operands), $opcode $(, $arg)*)
    };
}
