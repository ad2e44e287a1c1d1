use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::{io::Write, path::PathBuf};
use tracing_subscriber::prelude::*;

use ledger_ahead::{
    expired,
    files::{self, FileKind},
    recon::{self, ReconcileConfig},
    reconcile::Console,
    settings::Settings,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file, defaults to config.json in the user's config directory.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile new entries against expected transactions.
    Recon {
        /// File of newly extracted entries.
        new_entries: PathBuf,
        /// Expected Transactions Ledgers.
        #[arg(required = true)]
        ledgers: Vec<PathBuf>,
        /// Where to write updated entries, defaults to overwriting NEW_ENTRIES.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Leave reconciled expected transactions on their ledgers.
        #[arg(short, long)]
        keep: bool,
        /// Latest entries first.
        #[arg(short, long)]
        reverse: bool,
    },
    /// Move, remove or keep expected transactions dated before today.
    Exp {
        /// Expected Transactions Ledgers.
        #[arg(required = true)]
        ledgers: Vec<PathBuf>,
    },
    /// Create a new, empty, file of the given kind (x, rx or rx_def).
    Make {
        kind: FileKind,
        #[arg(short, long, value_name = "DIR")]
        dirpath: Option<PathBuf>,
        #[arg(short, long, value_name = "NAME")]
        filename: Option<String>,
    },
    /// Append the entries of one file to a ledger.
    Inject { injection: PathBuf, ledger: PathBuf },
    /// Show where settings are read from.
    Config {
        /// Print the default settings instead.
        #[arg(long)]
        default: bool,
    },
}

fn get_rust_log(verbose: u8) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .into()
    })
}

fn execute(cli: Cli) -> Result<()> {
    if let Commands::Config { default: true } = cli.command {
        println!("{}", Settings::default().to_json()?);
        return Ok(());
    }

    let settings = Settings::resolve(cli.config.as_deref())?;
    let mut out = settings.print_to();

    match cli.command {
        Commands::Recon {
            new_entries,
            ledgers,
            output,
            keep,
            reverse,
        } => {
            let config = ReconcileConfig {
                new_entries,
                ledgers,
                remove: !keep,
                output,
                ascending: !reverse,
            };
            let mut console = Console::new(&settings);
            let summary = recon::run(&config, &settings, &mut console)?;
            writeln!(out, "{}", summary)?;
        }
        Commands::Exp { ledgers } => {
            let today = chrono::Local::now().date_naive();
            let mut console = Console::new(&settings);
            let administered = expired::run(&ledgers, &settings, today, &mut console)?;
            writeln!(out, "{}", administered)?;
        }
        Commands::Make {
            kind,
            dirpath,
            filename,
        } => {
            let path =
                files::create_file(kind, dirpath.as_deref(), filename.as_deref(), &settings)?;
            writeln!(out, "{}", path.display())?;
        }
        Commands::Inject { injection, ledger } => {
            files::inject(&injection, &ledger, &settings)?;
        }
        Commands::Config { .. } => {
            match cli.config.or_else(Settings::default_path) {
                Some(path) => writeln!(out, "{}", path.display())?,
                None => writeln!(out, "no configuration directory")?,
            }
            writeln!(out, "{}", settings.to_json()?)?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(get_rust_log(cli.verbose)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = execute(cli) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
