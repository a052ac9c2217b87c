//! Orquestación de módulos.
//!
//! Un programa se compone de un módulo de entrada, los módulos que
//! este importa (transitivamente) y archivos adicionales indicados en
//! la línea de comandos. Cada módulo atraviesa el front end por
//! separado y produce su propia unidad de ensamblador. Un módulo que
//! es alcanzable por varios caminos de importación se compila una
//! única vez.
//!
//! # Importaciones
//! `import x` compila `<directorio del importador>/x.tmd` antes de
//! resolver al importador, y agrega las funciones de nivel superior de
//! `x` a los nombres visibles de este. Esto ocurre a un solo nivel: lo
//! que `x` importa no es visible para quien importa a `x`.

use std::{
    collections::HashMap,
    ffi::OsStr,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use thiserror::Error;

use crate::{
    codegen,
    error::CompileError,
    lex::{Identifier, Lexer},
    link::{self, Assembler, LinkOptions, Linker, LinkerError, Toolchain},
    parse::{self, Ast},
    resolve::{Resolution, SemanticError},
    source::{self, Located},
    typeck::{self, Types},
};

/// Extensión de archivos de código fuente.
pub const EXTENSION: &str = "tmd";

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module `{0}` not found, expected it at {path}", path = .1.display())]
    ModuleNotFound(Identifier, PathBuf),

    #[error("Cyclic import: {0}")]
    CyclicImport(String),
}

/// Origen de código fuente.
pub trait Loader {
    /// Lee un archivo. `Ok(None)` indica que no existe.
    fn load(&self, path: &Path) -> io::Result<Option<String>>;

    /// Forma canónica de una ruta, utilizada para reconocer un mismo
    /// módulo alcanzado por rutas distintas.
    fn canonical(&self, path: &Path) -> PathBuf {
        path.to_owned()
    }
}

/// Lee código fuente del sistema de archivos.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileSystem;

impl Loader for FileSystem {
    fn load(&self, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn canonical(&self, path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| path.to_owned())
    }
}

/// Archivos en memoria, principalmente para pruebas.
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    files: HashMap<PathBuf, String>,
}

impl InMemory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with<P, S>(mut self, path: P, text: S) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        self.insert(path, text);
        self
    }

    pub fn insert<P, S>(&mut self, path: P, text: S)
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        self.files.insert(path.into(), text.into());
    }
}

impl Loader for InMemory {
    fn load(&self, path: &Path) -> io::Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }
}

/// Ensamblador generado para un módulo.
#[derive(Clone, Debug)]
pub struct Unit {
    /// Nombre único entre todas las unidades del programa, se utiliza
    /// para nombrar archivos `.s` y `.o`.
    pub name: String,
    pub path: PathBuf,
    pub assembly: String,
}

/// Compila un programa completo hasta ensamblador.
///
/// Las unidades se retornan en orden de finalización: cada módulo
/// aparece después de todos los que importa.
pub fn compile<L: Loader>(
    loader: &L,
    entry: &Path,
    additional: &[PathBuf],
) -> Result<Vec<Unit>, CompileError> {
    let mut driver = Driver {
        loader,
        modules: Vec::new(),
        loaded: HashMap::new(),
        in_progress: Vec::new(),
        defined: HashMap::new(),
    };

    let entry = driver.module(entry, None)?;
    {
        let module = &driver.modules[entry];
        module.resolution.require_main(&module.ast)?;
    }

    for path in additional {
        driver.module(path, None)?;
    }

    driver.generate(entry)
}

/// Opciones de construcción del ejecutable.
#[derive(Clone, Debug)]
pub struct Options {
    /// Ruta del ejecutable.
    pub output: PathBuf,

    /// Directorio donde se escriben archivos `.s` y `.o`.
    pub artifacts: PathBuf,

    /// Detenerse luego de escribir los archivos `.s`.
    pub assemble_only: bool,

    pub link: LinkOptions,
    pub toolchain: Toolchain,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            output: PathBuf::from("out.exe"),
            artifacts: PathBuf::from("."),
            assemble_only: false,
            link: LinkOptions::empty(),
            toolchain: Toolchain::default(),
        }
    }
}

/// Elimina el ejecutable de una construcción anterior, si existe.
pub fn discard_output(options: &Options) -> io::Result<()> {
    link::remove_stale(&options.output)
}

/// Escribe, ensambla y enlaza las unidades de un programa.
///
/// El ejecutable previo se elimina antes de ensamblar, por lo que un
/// fallo en cualquier etapa deja `options.output` ausente.
pub fn build(units: &[Unit], options: &Options) -> Result<(), LinkerError> {
    discard_output(options)?;
    let mut objects = Vec::with_capacity(units.len());

    for unit in units {
        let listing = options.artifacts.join(format!("{}.s", unit.name));
        fs::write(&listing, &unit.assembly)?;
        debug!("Wrote {}", listing.display());

        if options.assemble_only {
            continue;
        }

        let object = options.artifacts.join(format!("{}.o", unit.name));
        let mut assembler = Assembler::spawn(&options.toolchain, &object)?;
        assembler.stdin().write_all(unit.assembly.as_bytes())?;
        assembler.finish()?;

        objects.push(object);
    }

    if !options.assemble_only {
        info!("Linking {} units into {}", objects.len(), options.output.display());
        Linker::new(&options.toolchain, options.link).link(&objects, &options.output)?;
    }

    Ok(())
}

struct Module {
    name: String,
    path: PathBuf,
    ast: Ast,
    resolution: Resolution,
    types: Types,
}

struct Driver<'l, L> {
    loader: &'l L,
    modules: Vec<Module>,
    loaded: HashMap<PathBuf, usize>,
    in_progress: Vec<PathBuf>,
    defined: HashMap<Identifier, PathBuf>,
}

impl<L: Loader> Driver<'_, L> {
    /// Compila un módulo y todo lo que este importa, retornando su
    /// índice en `self.modules`.
    fn module(
        &mut self,
        path: &Path,
        import: Option<&Located<Identifier>>,
    ) -> Result<usize, CompileError> {
        let canonical = self.loader.canonical(path);
        if let Some(&index) = self.loaded.get(&canonical) {
            return Ok(index);
        }

        if let Some(position) = self.in_progress.iter().position(|open| *open == canonical) {
            let chain: Vec<_> = self.in_progress[position..]
                .iter()
                .chain(std::iter::once(&canonical))
                .map(|path| module_name(path))
                .collect();

            let error = ModuleError::CyclicImport(chain.join(" -> "));
            return Err(located(error, import).into());
        }

        let text = match self.loader.load(path) {
            Ok(Some(text)) => text,
            Ok(None) => {
                return Err(match import {
                    Some(import) => {
                        let name = import.val().clone();
                        let error = ModuleError::ModuleNotFound(name, path.to_owned());
                        Located::at(error, import.location().clone()).into()
                    }

                    None => CompileError::SourceNotFound(path.to_owned()),
                })
            }

            Err(source) => {
                return Err(CompileError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        info!("Compiling {}", path.display());
        self.in_progress.push(canonical.clone());

        let (start, stream) = source::consume(text.as_bytes(), path.display().to_string());
        let tokens = Lexer::new(start.clone(), stream).tokenize()?;
        let ast = parse::parse(tokens.iter(), start)?;

        let directory = path.parent().unwrap_or_else(|| Path::new(""));
        let mut imports = Vec::new();

        for name in ast.imports() {
            let target = directory.join(format!("{}.{}", name.val(), EXTENSION));
            debug!("{} imports {}", path.display(), target.display());

            let index = self.module(&target, Some(name))?;
            let module = &self.modules[index];
            imports.extend(module.resolution.exports(&module.ast));
        }

        let resolution = ast.resolve(&imports)?;
        let types = typeck::check(&ast, &resolution)?;

        // Los nombres de enlazado son globales al programa
        for export in resolution.exports(&ast) {
            let name = export.name.val();
            if self.defined.contains_key(name) {
                let error = SemanticError::DuplicateDeclaration(name.clone());
                return Err(Located::at(error, export.name.location().clone()).into());
            }

            self.defined.insert(name.clone(), path.to_owned());
        }

        self.in_progress.pop();

        let index = self.modules.len();
        self.modules.push(Module {
            name: module_name(path),
            path: path.to_owned(),
            ast,
            resolution,
            types,
        });

        self.loaded.insert(canonical, index);
        Ok(index)
    }

    fn generate(mut self, entry: usize) -> Result<Vec<Unit>, CompileError> {
        let mut taken: HashMap<String, usize> = HashMap::new();
        let mut units = Vec::with_capacity(self.modules.len());

        for (index, module) in self.modules.iter_mut().enumerate() {
            let mut assembly = Vec::new();
            codegen::emit(
                &module.ast,
                &mut module.resolution,
                &module.types,
                index == entry,
                &mut assembly,
            )?;

            // Dos módulos en directorios distintos pueden compartir nombre
            let count = taken.entry(module.name.clone()).or_insert(0);
            let name = match *count {
                0 => module.name.clone(),
                n => format!("{}_{}", module.name, n),
            };

            *count += 1;

            debug!("Generated unit `{}` for {}", name, module.path.display());
            units.push(Unit {
                name,
                path: module.path.clone(),
                assembly: String::from_utf8_lossy(&assembly).into_owned(),
            });
        }

        Ok(units)
    }
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("module")
        .to_owned()
}

fn located(error: ModuleError, import: Option<&Located<Identifier>>) -> Located<ModuleError> {
    match import {
        Some(import) => Located::at(error, import.location().clone()),

        // Un ciclo siempre se detecta al seguir una importación
        None => unreachable!("cycle detected without an import"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn module_error(result: Result<Vec<Unit>, CompileError>) -> ModuleError {
        match result {
            Err(CompileError::Module(error)) => error.into_inner(),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("compilation succeeded"),
        }
    }

    #[test]
    fn shared_imports_compile_once() {
        let loader = InMemory::new()
            .with("main.tmd", "import a\nimport b\nmain: () -> int { return fa() + fb() }")
            .with("a.tmd", "import util\nfa: () -> int { return one() }")
            .with("b.tmd", "import util\nfb: () -> int { return one() }")
            .with("util.tmd", "one: () -> int { return 1 }");

        let units = compile(&loader, Path::new("main.tmd"), &[]).unwrap();
        let names: Vec<_> = units.iter().map(|unit| unit.name.as_str()).collect();

        assert_eq!(names, vec!["util", "a", "b", "main"]);
        assert!(units[3].assembly.contains("\t.globl\tmain\n"));
        assert!(!units[0].assembly.contains("\t.globl\tmain\n"));
    }

    #[test]
    fn imports_are_relative_to_the_importer() {
        let loader = InMemory::new()
            .with("src/main.tmd", "import lib\nmain: () -> int { return f() }")
            .with("src/lib.tmd", "f: () -> int { return 0 }");

        let units = compile(&loader, Path::new("src/main.tmd"), &[]).unwrap();
        assert_eq!(units[0].path, PathBuf::from("src/lib.tmd"));
    }

    #[test]
    fn missing_module() {
        let loader = InMemory::new().with("main.tmd", "import nope\nmain: () -> int { return 0 }");

        let error = compile(&loader, Path::new("main.tmd"), &[]);
        match module_error(error) {
            ModuleError::ModuleNotFound(name, path) => {
                assert_eq!(name.as_ref(), "nope");
                assert_eq!(path, PathBuf::from("nope.tmd"));
            }

            other => panic!("unexpected error: {}", other),
        }

        let missing = compile(&loader, Path::new("other.tmd"), &[]);
        assert!(matches!(missing, Err(CompileError::SourceNotFound(_))));
    }

    #[test]
    fn cyclic_imports() {
        let loader = InMemory::new()
            .with("main.tmd", "import a\nmain: () -> int { return 0 }")
            .with("a.tmd", "import b\nfa: () -> int { return 0 }")
            .with("b.tmd", "import a\nfb: () -> int { return 0 }");

        let error = compile(&loader, Path::new("main.tmd"), &[]);
        match module_error(error) {
            ModuleError::CyclicImport(chain) => assert_eq!(chain, "a -> b -> a"),
            other => panic!("unexpected error: {}", other),
        }

        let loader = InMemory::new().with("main.tmd", "import main\nmain: () -> int { return 0 }");
        let error = compile(&loader, Path::new("main.tmd"), &[]);
        assert!(matches!(module_error(error), ModuleError::CyclicImport(_)));
    }

    #[test]
    fn imports_are_not_transitive() {
        let loader = InMemory::new()
            .with("main.tmd", "import a\nmain: () -> int { return deep() }")
            .with("a.tmd", "import b\nshallow: () -> int { return deep() }")
            .with("b.tmd", "deep: () -> int { return 7 }");

        match compile(&loader, Path::new("main.tmd"), &[]) {
            Err(CompileError::Semantic(error)) => {
                assert!(matches!(error.val(), SemanticError::UndefinedFunction(_)));
                assert_eq!(error.location().source_name(), "main.tmd");
            }

            _ => panic!("expected an undefined function"),
        }
    }

    #[test]
    fn function_names_are_global() {
        let loader = InMemory::new()
            .with("main.tmd", "main: () -> int { return 0 }")
            .with("extra.tmd", "helper: () -> int { return 1 }")
            .with("other.tmd", "helper: () -> int { return 2 }");

        let additional = [PathBuf::from("extra.tmd"), PathBuf::from("other.tmd")];
        match compile(&loader, Path::new("main.tmd"), &additional) {
            Err(CompileError::Semantic(error)) => {
                assert!(matches!(error.val(), SemanticError::DuplicateDeclaration(_)));
                assert_eq!(error.location().source_name(), "other.tmd");
            }

            _ => panic!("expected a duplicate declaration"),
        }
    }

    #[test]
    fn entry_requires_main() {
        let loader = InMemory::new()
            .with("main.tmd", "start: () -> int { return 0 }")
            .with("lib.tmd", "helper: () -> int { return 1 }");

        let result = compile(&loader, Path::new("main.tmd"), &[]);
        assert!(matches!(result, Err(CompileError::Semantic(_))));

        // Los archivos adicionales no requieren `main`
        let loader = loader.with("main.tmd", "main: () -> int { return 0 }");
        let units = compile(&loader, Path::new("main.tmd"), &[PathBuf::from("lib.tmd")]).unwrap();
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn same_stem_gets_distinct_units() {
        let loader = InMemory::new()
            .with("main.tmd", "import util\nmain: () -> int { return f() }")
            .with("util.tmd", "f: () -> int { return 0 }")
            .with("other/util.tmd", "g: () -> int { return 0 }");

        let additional = [PathBuf::from("other/util.tmd")];
        let units = compile(&loader, Path::new("main.tmd"), &additional).unwrap();
        let names: Vec<_> = units.iter().map(|unit| unit.name.as_str()).collect();

        assert_eq!(names, vec!["util", "main", "util_1"]);
    }

    #[test]
    fn errors_point_at_their_module() {
        let loader = InMemory::new()
            .with("main.tmd", "import lib\nmain: () -> int { return 0 }")
            .with("lib.tmd", indoc! {"
                broken: () -> int {
                    return true
                }
            "});

        match compile(&loader, Path::new("main.tmd"), &[]) {
            Err(CompileError::Type(error)) => {
                assert_eq!(error.location().to_string(), "lib.tmd:[2:12-2:15]");
            }

            _ => panic!("expected a type error"),
        }
    }
}
