//! Punto de entrada.
//!
//! Expone una CLI sobre [`tama::driver`]: compila un programa, escribe
//! un listado `.s` y un objeto `.o` por módulo y enlaza el ejecutable.

use std::{path::PathBuf, process};

use anyhow::{self, Context};
use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use log::LevelFilter;

use tama::{
    driver::{self, FileSystem, Options},
    error::Diagnostics,
    link::{LinkOptions, Toolchain},
};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("tama")
        .version(crate_version!())
        .about("Compiler for the tmd language")
        .arg(
            Arg::new("files")
                .value_name("FILE")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf))
                .help("Entry module, followed by additional modules to link"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .default_value("out.exe")
                .value_parser(value_parser!(PathBuf))
                .help("Executable path"),
        )
        .arg(
            Arg::new("asm")
                .short('S')
                .action(ArgAction::SetTrue)
                .help("Generate assembly instead of linking"),
        )
        .arg(
            Arg::new("strip")
                .short('s')
                .long("strip")
                .action(ArgAction::SetTrue)
                .help("Strip executables"),
        )
        .arg(
            Arg::new("cc")
                .long("cc")
                .value_name("COMMAND")
                .default_value("gcc")
                .help("Assembler and linker driver"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Increase log verbosity"),
        )
        .get_matches();

    let level = match args.get_count("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // RUST_LOG tiene prioridad sobre -v
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    // Se extraen argumentos necesarios
    let mut files = args.get_many::<PathBuf>("files").unwrap().cloned();
    let entry = files.next().unwrap();
    let additional: Vec<_> = files.collect();

    let mut link = LinkOptions::empty();
    if args.get_flag("strip") {
        link |= LinkOptions::STRIP;
    }

    let options = Options {
        output: args.get_one::<PathBuf>("output").unwrap().clone(),
        assemble_only: args.get_flag("asm"),
        link,
        toolchain: Toolchain::new(args.get_one::<String>("cc").unwrap().as_str()),
        ..Default::default()
    };

    let units = match driver::compile(&FileSystem, &entry, &additional) {
        Ok(units) => units,
        Err(error) => {
            eprint!("{}", Diagnostics::from(error));
            driver::discard_output(&options)
                .with_context(|| format!("Failed to remove {}", options.output.display()))?;

            process::exit(1);
        }
    };

    driver::build(&units, &options)
        .with_context(|| format!("Failed to generate executable: {}", options.output.display()))?;

    Ok(())
}
