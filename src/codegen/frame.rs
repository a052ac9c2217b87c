use log::trace;

use crate::{
    parse::{Ast, Function, Node, NodeId},
    resolve::{Resolution, Slot},
};

use super::x86_64::VALUE_SIZE;

/// Disposición del marco de pila de una función.
///
/// Los parámetros ocupan las primeras posiciones, en orden. Le siguen
/// las variables locales en el orden en que aparecen en el cuerpo. Una
/// variable que sombrea a otra recibe su propia posición, nunca se
/// reutiliza la de la variable sombreada.
#[derive(Debug)]
pub struct Frame {
    params: u32,
    slots: u32,
}

impl Frame {
    /// Asigna posiciones a todos los símbolos de una función.
    pub fn allocate(ast: &Ast, function: &Function, resolution: &mut Resolution) -> Frame {
        let mut frame = Frame {
            params: function.params.len() as u32,
            slots: 0,
        };

        for &param in &function.params {
            frame.assign(param, resolution);
        }

        frame.walk(ast, function.body, resolution);
        trace!(
            "frame of `{}`: {} params, {} slots, {} bytes",
            function.name.val(),
            frame.params,
            frame.slots,
            frame.size()
        );

        frame
    }

    pub fn params(&self) -> u32 {
        self.params
    }

    /// Bytes a reservar bajo `%rbp`, alineados a 16.
    pub fn size(&self) -> u32 {
        (self.slots + self.slots % 2) * VALUE_SIZE
    }

    fn walk(&mut self, ast: &Ast, id: NodeId, resolution: &mut Resolution) {
        match ast.node(id).val() {
            Node::Block(statements) => {
                for &statement in statements {
                    self.walk(ast, statement, resolution);
                }
            }

            Node::VarDecl { .. } => self.assign(id, resolution),

            Node::If {
                then, otherwise, ..
            } => {
                self.walk(ast, *then, resolution);
                if let Some(otherwise) = otherwise {
                    self.walk(ast, *otherwise, resolution);
                }
            }

            Node::While { body, .. } => self.walk(ast, *body, resolution),

            _ => (),
        }
    }

    fn assign(&mut self, node: NodeId, resolution: &mut Resolution) {
        if let Some(symbol) = resolution.symbol_of(node) {
            resolution.table_mut().assign_slot(symbol, Slot(self.slots));
            self.slots += 1;
        }
    }
}

/// Dirección relativa a `%rbp` de una posición del marco.
pub fn slot_address(Slot(slot): Slot) -> String {
    let offset = (slot + 1) * VALUE_SIZE;
    format!("-0x{:x}(%rbp)", offset)
}

/// Dirección relativa a `%rbp` del argumento `index` de `count`, tal
/// como lo dejó el llamador.
pub fn argument_address(index: u32, count: u32) -> String {
    // Dirección de retorno y `%rbp` guardado
    let offset = 2 * VALUE_SIZE + (count - 1 - index) * VALUE_SIZE;
    format!("0x{:x}(%rbp)", offset)
}
