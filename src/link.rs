//! Construcción de ejecutables.
//!
//! Una vez que se ha emitido código ensamblador, cada unidad debe ser
//! ensamblada a un objeto y el conjunto de objetos enlazado contra la
//! biblioteca de C para producir un binario ejecutable. Ambas
//! operaciones se delegan a un driver de toolchain externo, `gcc` por
//! defecto.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
};

use bitflags::bitflags;
use log::{debug, info};
use thiserror::Error;

bitflags! {
    /// Opciones a aplicar durante el enlazado.
    pub struct LinkOptions: u32 {
        /// Remover símbolos de depuración del ejecutable final.
        const STRIP = 0x01;
    }
}

/// Un error de ensamblado o enlazado.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LinkerError {
    /// Ocurrió un evento de error de E/S durante la invocación
    /// de comandos externos.
    #[error("I/O error")]
    Io(#[from] io::Error),

    /// No fue posible iniciar el driver de toolchain.
    #[error("Failed to execute `{0}`")]
    Spawn(String, #[source] io::Error),

    /// El ensamblador inició su ejecución, pero falló en ensamblar.
    #[error("Assembler exited with status code {0:?}")]
    AssemblerFailed(ExitStatus),

    /// El enlazador inició su ejecución, pero falló en enlazar.
    #[error("Linker exited with status code {0:?}")]
    Failed(ExitStatus),
}

/// Driver de toolchain compatible con la línea de comandos de `gcc`.
#[derive(Clone, Debug)]
pub struct Toolchain {
    command: String,
}

impl Toolchain {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Toolchain {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Verifica que el driver pueda ejecutarse.
    pub fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn spawn_error(&self) -> impl FnOnce(io::Error) -> LinkerError + '_ {
        move |error| LinkerError::Spawn(self.command.clone(), error)
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain::new("gcc")
    }
}

/// Instancia del ensamblador para un objeto definido.
///
/// El código ensamblador se envía por pipe al stdin del proceso, por
/// lo cual no es necesario que exista un archivo `.s`.
pub struct Assembler {
    child: Child,
    stdin: BufWriter<ChildStdin>,
}

impl Assembler {
    /// Inicia una instancia del ensamblador que escribirá el objeto
    /// resultante en `object`.
    pub fn spawn<O>(toolchain: &Toolchain, object: &O) -> Result<Self, LinkerError>
    where
        O: AsRef<Path>,
    {
        let mut command = Command::new(toolchain.command());
        command
            .args(["-c", "-xassembler", "-", "-o"])
            .arg(object.as_ref())
            .stdin(Stdio::piped());

        debug!("Assembling: {:?}", command);

        let mut child = command.spawn().map_err(toolchain.spawn_error())?;
        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "assembler stdin is not piped")
        })?;

        Ok(Assembler {
            child,
            stdin: BufWriter::new(stdin),
        })
    }

    /// Obtiene la entrada estándar del proceso que espera recibir ensamblador.
    pub fn stdin(&mut self) -> &mut BufWriter<ChildStdin> {
        &mut self.stdin
    }

    /// Indica el fin del flujo de código y espera al ensamblador.
    pub fn finish(self) -> Result<(), LinkerError> {
        let Assembler {
            mut child,
            mut stdin,
        } = self;

        // Si el ensamblador falló antes de leer todo, su estado de
        // salida es más informativo que el error de escritura
        let flushed = stdin.flush();
        drop(stdin);

        let status = child.wait()?;
        if !status.success() {
            return Err(LinkerError::AssemblerFailed(status));
        }

        flushed?;
        Ok(())
    }
}

/// Enlazador de objetos a un ejecutable.
pub struct Linker<'a> {
    toolchain: &'a Toolchain,
    options: LinkOptions,
}

impl<'a> Linker<'a> {
    pub fn new(toolchain: &'a Toolchain, options: LinkOptions) -> Self {
        Linker { toolchain, options }
    }

    /// Enlaza `objects` y escribe el ejecutable en `output`.
    ///
    /// Nunca queda un ejecutable en `output` si el enlazado falla,
    /// incluso uno que existiera previamente.
    pub fn link<O>(&self, objects: &[PathBuf], output: &O) -> Result<(), LinkerError>
    where
        O: AsRef<Path>,
    {
        let output = output.as_ref();
        remove_stale(output)?;

        let mut command = Command::new(self.toolchain.command());
        command.arg("-o").arg(output).args(objects);

        if self.options.contains(LinkOptions::STRIP) {
            command.arg("-s");
        }

        debug!("Linking: {:?}", command);

        let status = command.status().map_err(self.toolchain.spawn_error())?;
        if status.success() {
            info!("Linked {}", output.display());
            Ok(())
        } else {
            remove_stale(output)?;
            Err(LinkerError::Failed(status))
        }
    }
}

/// Elimina `path` si existe.
pub fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_toolchain() {
        let toolchain = Toolchain::new("tama-test-no-such-cc");
        assert!(!toolchain.is_available());

        let object = std::env::temp_dir().join("tama-missing-toolchain.o");
        match Assembler::spawn(&toolchain, &object) {
            Err(LinkerError::Spawn(command, _)) => assert_eq!(command, "tama-test-no-such-cc"),
            _ => panic!("expected a spawn failure"),
        }
    }

    #[test]
    fn failed_link_leaves_no_output() {
        let dir = std::env::temp_dir().join(format!("tama-link-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let output = dir.join("stale.exe");
        fs::write(&output, b"stale").unwrap();

        let toolchain = Toolchain::new("tama-test-no-such-cc");
        let result = Linker::new(&toolchain, LinkOptions::STRIP).link(&[], &output);

        assert!(matches!(result, Err(LinkerError::Spawn(..))));
        assert!(!output.exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
