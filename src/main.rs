use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use pyc_patcher::header::Validation;
use pyc_patcher::BackendKind;

/// Inspect the code objects of a pyc file and patch their bytecode.
#[derive(Parser)]
#[command(name = "pyc-patcher")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all code objects in the pyc file as name:size
    List {
        /// The Python magic number
        #[arg(long)]
        magic: u16,

        #[arg(long, value_enum)]
        backend: BackendArg,

        /// The path to the .pyc file
        pycfile: PathBuf,
    },

    /// Write a copy of the pyc file with new bytecode for one code object
    Build {
        /// The Python magic number
        #[arg(long)]
        magic: u16,

        #[arg(long, value_enum)]
        backend: BackendArg,

        /// The zero based index of the code object, as printed by `list`
        #[arg(long, allow_negative_numbers = true)]
        index: i64,

        /// The path to the .pyc file
        pycfile: PathBuf,

        /// The output file path
        outfile: PathBuf,

        /// The new bytecode as a hex string
        hex_bytes: String,
    },

    /// Show the header of a pyc file and the backend suited to it
    Inspect {
        /// The path to the .pyc file
        pycfile: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    /// Cross-version decoder selected by the magic number
    #[value(alias = "xdis")]
    Generic,
    /// Decoder for the host format only
    Native,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Generic => BackendKind::Generic,
            BackendArg::Native => BackendKind::Native,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::List {
            magic,
            backend,
            pycfile,
        } => {
            let backend = BackendKind::from(backend).create();
            let entries = pyc_patcher::list_code_objects(&pycfile, magic, &*backend)
                .with_context(|| format!("failed to list {}", pycfile.display()))?;

            let mut stdout = io::stdout().lock();
            for entry in entries {
                writeln!(stdout, "{entry}")?;
            }
        }
        Commands::Build {
            magic,
            backend,
            index,
            pycfile,
            outfile,
            hex_bytes,
        } => {
            let backend = BackendKind::from(backend).create();
            pyc_patcher::build_pyc(&pycfile, &outfile, magic, &*backend, index, &hex_bytes)
                .with_context(|| format!("failed to build {}", outfile.display()))?;
        }
        Commands::Inspect { pycfile } => {
            let inspection = pyc_patcher::inspect_pyc(&pycfile)
                .with_context(|| format!("failed to inspect {}", pycfile.display()))?;
            let header = inspection.header;

            println!("magic: {}", header.magic);
            match inspection.version {
                Some(version) => println!("python: {version}"),
                None => println!("python: unknown"),
            }
            println!("flags: {:?}", header.flags);
            match header.validation {
                Validation::Timestamp { mtime, source_size } => {
                    println!("mtime: {mtime}");
                    println!("source size: {source_size}");
                }
                Validation::Hash(hash) => println!("source hash: {hash:016x}"),
            }
            println!("backend: {}", inspection.recommended);
        }
    }

    Ok(())
}
