//! Programas completos, construidos con la toolchain del sistema y
//! ejecutados. Estas pruebas se omiten si no hay `gcc` disponible o si
//! el anfitrión no es x86-64 Linux.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{self, Command, Output},
};

use indoc::indoc;
use pretty_assertions::assert_eq;

use tama::{
    driver::{self, InMemory, Options},
    link::{LinkerError, Toolchain},
};

struct Scratch(PathBuf);

impl Scratch {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("tama-run-{}-{}", process::id(), name));
        fs::create_dir_all(&dir).unwrap();

        Scratch(dir)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn toolchain() -> Option<Toolchain> {
    let toolchain = Toolchain::default();
    if cfg!(all(target_arch = "x86_64", target_os = "linux")) && toolchain.is_available() {
        Some(toolchain)
    } else {
        eprintln!("skipping: no x86-64 Linux toolchain available");
        None
    }
}

/// Construye y ejecuta un programa. `files` debe incluir `main.tmd`.
fn run_files(name: &str, files: &[(&str, &str)], additional: &[&str]) -> Option<Output> {
    let toolchain = toolchain()?;
    let scratch = Scratch::new(name);

    let mut loader = InMemory::new();
    for (path, text) in files {
        loader.insert(*path, *text);
    }

    let additional: Vec<_> = additional.iter().map(PathBuf::from).collect();
    let units = driver::compile(&loader, Path::new("main.tmd"), &additional)
        .unwrap_or_else(|error| panic!("{}", tama::error::Diagnostics::from(error)));

    let options = Options {
        output: scratch.0.join("out.exe"),
        artifacts: scratch.0.clone(),
        toolchain,
        ..Default::default()
    };

    driver::build(&units, &options).unwrap();
    for unit in &units {
        assert!(scratch.0.join(format!("{}.s", unit.name)).exists());
        assert!(scratch.0.join(format!("{}.o", unit.name)).exists());
    }

    Some(Command::new(&options.output).output().unwrap())
}

fn run(name: &str, text: &str) -> Option<Output> {
    run_files(name, &[("main.tmd", text)], &[])
}

fn exit_code(name: &str, text: &str) -> Option<i32> {
    run(name, text).map(|output| output.status.code().expect("killed by a signal"))
}

fn returning(name: &str, expr: &str) -> Option<i32> {
    exit_code(name, &format!("main: () -> int {{ return {} }}", expr))
}

#[test]
fn exit_code_is_main_result() {
    for n in 0..=127 {
        match returning(&format!("exit-{}", n), &n.to_string()) {
            Some(code) => assert_eq!(code, n),
            None => return,
        }
    }
}

#[test]
fn exit_code_is_truncated() {
    if let Some(code) = returning("truncated", "256 + 7") {
        assert_eq!(code, 7);
    }
}

#[test]
fn arithmetic_precedence() {
    if let Some(code) = returning("precedence-a", "10 + 16 / 2 - 3 * 6") {
        assert_eq!(code, 0);
    }

    if let Some(code) = returning("precedence-b", "1 + 2 / 1 - 3 * 1") {
        assert_eq!(code, 0);
    }

    if let Some(code) = returning("division", "17 / 5 * 10 + (0 - 17) / 5 + 3") {
        assert_eq!(code, 30);
    }
}

#[test]
fn comparisons() {
    let text = indoc! {"
        bit: (x: bool) -> int {
            if x { return 1 }
            return 0
        }

        main: () -> int {
            return bit(5 < 10) + 2 * bit(10 < 5) + 4 * bit(5 <= 5)
                + 8 * bit(10 >= 5) + 16 * bit(0 == 0) + 32 * bit(0 != 0)
                + 64 * bit(true == true)
        }
    "};

    if let Some(code) = exit_code("comparisons", text) {
        assert_eq!(code, 1 + 4 + 8 + 16 + 64);
    }
}

#[test]
fn logical_truth_tables() {
    let text = indoc! {"
        bit: (x: bool) -> int {
            if x { return 1 }
            return 0
        }

        main: () -> int {
            ands: int = bit(false and false) + 2 * bit(false and true)
                + 4 * bit(true and false) + 8 * bit(true and true)

            ors: int = bit(false or false) + 2 * bit(false or true)
                + 4 * bit(true or false) + 8 * bit(true or true)

            if bit(!false) + 2 * bit(!true) != 1 {
                return 255
            }

            return ands + 16 * ors
        }
    "};

    if let Some(code) = exit_code("truth-tables", text) {
        assert_eq!(code, 8 + 16 * (2 + 4 + 8));
    }
}

#[test]
fn short_circuit_skips_side_effects() {
    let text = indoc! {"
        loud: (value: bool) -> bool {
            print(value)
            return value
        }

        main: () -> int {
            a: bool = false and loud(true)
            b: bool = true or loud(false)
            c: bool = true and loud(true)
            d: bool = false or loud(false)
            return 0
        }
    "};

    if let Some(output) = run("short-circuit", text) {
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "true\nfalse\n");
    }
}

#[test]
fn scoping() {
    let shadow = indoc! {"
        main: () -> int {
            x: int = 1
            {
                x: int = 2
                return x
            }
        }
    "};

    let assign_outer = indoc! {"
        main: () -> int {
            x: int = 1
            { x = 2 }
            return x
        }
    "};

    let assign_shadow = indoc! {"
        main: () -> int {
            x: int = 1
            {
                x: int = 2
                x = 3
            }

            return x
        }
    "};

    if let Some(code) = exit_code("scope-shadow", shadow) {
        assert_eq!(code, 2);
    }

    if let Some(code) = exit_code("scope-assign-outer", assign_outer) {
        assert_eq!(code, 2);
    }

    if let Some(code) = exit_code("scope-assign-shadow", assign_shadow) {
        assert_eq!(code, 1);
    }
}

#[test]
fn calls() {
    let text = indoc! {"
        add: (a: int, b: int) -> int {
            return a + b
        }

        main: () -> int {
            return add(-10, 10)
        }
    "};

    if let Some(code) = exit_code("add", text) {
        assert_eq!(code, 0);
    }

    let text = indoc! {"
        sub: (a: int, b: int, c: int) -> int {
            return a - b - c
        }

        fib: (n: int) -> int {
            if n < 2 { return n }
            return fib(n - 1) + fib(n - 2)
        }

        main: () -> int {
            return fib(10) + sub(10, 3, 2)
        }
    "};

    if let Some(code) = exit_code("recursion", text) {
        assert_eq!(code, 55 + 5);
    }
}

#[test]
fn loops() {
    let text = indoc! {"
        main: () -> int {
            x: int = 0
            iterations: int = 0
            while x < 10 {
                x = x + 1
                iterations = iterations + 1
            }

            never: int = 0
            while false {
                never = never + 1
            }

            return iterations + never
        }
    "};

    if let Some(code) = exit_code("while", text) {
        assert_eq!(code, 10);
    }
}

#[test]
fn conditionals() {
    let text = indoc! {"
        classify: (n: int) -> int {
            if n < 0 {
                return 1
            } elif n == 0 {
                return 2
            } else {
                return 3
            }
        }

        main: () -> int {
            return classify(-5) * 100 + classify(0) * 10 + classify(7) - 100
        }
    "};

    if let Some(code) = exit_code("conditionals", text) {
        assert_eq!(code, 23);
    }
}

#[test]
fn print_values() {
    let text = indoc! {"
        main: () -> int {
            print(-5)
            print(9223372036854775807)
            print(1 < 2)
            print(!true)
            return 0
        }
    "};

    if let Some(output) = run("print", text) {
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "-5\n9223372036854775807\ntrue\nfalse\n"
        );
    }
}

#[test]
fn imported_functions() {
    let files = [
        ("main.tmd", "import math\nmain: () -> int { return add(40, 2) }"),
        ("math.tmd", "add: (a: int, b: int) -> int { return a + b }"),
        ("extra.tmd", "unused: () -> nil { print(1) }"),
    ];

    if let Some(output) = run_files("import", &files, &["extra.tmd"]) {
        assert_eq!(output.status.code(), Some(42));
        assert!(output.stdout.is_empty());
    }
}

#[test]
fn division_by_zero_traps() {
    let text = indoc! {"
        zero: () -> int { return 0 }
        main: () -> int { return 1 / zero() }
    "};

    if let Some(output) = run("div-zero", text) {
        assert!(!output.status.success());
    }
}

#[test]
fn failed_assembly_leaves_no_executable() {
    let toolchain = match toolchain() {
        Some(toolchain) => toolchain,
        None => return,
    };

    let scratch = Scratch::new("bad-asm");
    let output = scratch.0.join("out.exe");
    fs::write(&output, b"stale").unwrap();

    let loader = InMemory::new().with("main.tmd", "main: () -> int { return 0 }");
    let mut units = driver::compile(&loader, Path::new("main.tmd"), &[]).unwrap();
    units[0].assembly.push_str("\tbogus_instruction %rax\n");

    let options = Options {
        output: output.clone(),
        artifacts: scratch.0.clone(),
        toolchain,
        ..Default::default()
    };

    let result = driver::build(&units, &options);
    assert!(matches!(result, Err(LinkerError::AssemblerFailed(_))));
    assert!(!output.exists());
}

#[test]
fn object_files_are_deterministic() {
    let toolchain = match toolchain() {
        Some(toolchain) => toolchain,
        None => return,
    };

    let files = [
        ("main.tmd", "import math\nmain: () -> int { return add(40, 2) }"),
        ("math.tmd", "add: (a: int, b: int) -> int { return a + b }"),
    ];

    let mut loader = InMemory::new();
    for (path, text) in files {
        loader.insert(path, text);
    }

    let objects: Vec<_> = ["deterministic-a", "deterministic-b"]
        .iter()
        .map(|name| {
            let scratch = Scratch::new(name);
            let units = driver::compile(&loader, Path::new("main.tmd"), &[]).unwrap();
            let options = Options {
                output: scratch.0.join("out.exe"),
                artifacts: scratch.0.clone(),
                toolchain: toolchain.clone(),
                ..Default::default()
            };

            driver::build(&units, &options).unwrap();
            ["main.o", "math.o"].map(|object| fs::read(scratch.0.join(object)).unwrap())
        })
        .collect();

    assert!(objects[0] == objects[1], "object files differ between builds");
}

#[test]
fn failed_build_leaves_no_executable() {
    let toolchain = match toolchain() {
        Some(toolchain) => toolchain,
        None => return,
    };

    let scratch = Scratch::new("stale");
    let output = scratch.0.join("out.exe");
    fs::write(&output, b"stale").unwrap();

    // Un módulo de biblioteca sin `main` no puede enlazarse solo
    let loader = InMemory::new().with("main.tmd", "main: () -> int { return 0 }");
    let mut units = driver::compile(&loader, Path::new("main.tmd"), &[]).unwrap();
    units[0].assembly = units[0].assembly.replace("\t.globl\tmain\n", "");
    units[0].assembly = units[0].assembly.replace("\t.type\tmain, @function\n", "");
    units[0].assembly = units[0].assembly.replace("\nmain:", "\nnot_main:");

    let options = Options {
        output: output.clone(),
        artifacts: scratch.0.clone(),
        toolchain,
        ..Default::default()
    };

    assert!(driver::build(&units, &options).is_err());
    assert!(!output.exists());
}
