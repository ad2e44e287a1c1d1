use std::path::{Path, PathBuf};

use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Parse error on line {line}: '{text}'")]
    Parse { line: usize, text: String },
    #[error("Transaction dated {date} has multiple postings to '{account}'")]
    DuplicatePosting { date: chrono::NaiveDate, account: String },
    #[error("Transaction dated {date} has {missing} postings without amounts")]
    Unbalanced { date: chrono::NaiveDate, missing: usize },
    #[error("Unable to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0:?} does not have a '.{1}' extension")]
    NotBeancount(PathBuf, String),
    #[error("{0:?} is not a path to an existing file")]
    Missing(PathBuf),
    #[error("{0:?} is not a ledger-ahead file, expected one of the titles:\n{1}")]
    UnknownTitle(PathBuf, String),
    #[error(
        "{0:?} does not represent an Expected Transactions Ledger file. \
         It is a definitions file, \
         which might have been passed by mistake"
    )]
    NotLedgerFile(PathBuf),
    #[error("'{0}' is not a valid file key, expected one of x, rx, rx_def")]
    UnknownKey(String),
    #[error("{0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("{count} transaction(s) to remove are not on the ledger {path:?}")]
    NotInLedger { path: PathBuf, count: usize },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Unable to read settings from {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings in {path:?}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a single file could not be written.
#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("new content would not parse")]
    Invalid(#[from] LedgerError),
    #[error("new content parses to {found} transactions, expected {expected}")]
    CountMismatch { expected: usize, found: usize },
}

/// A write (or overwrite) failed and every file touched so far was reverted
/// on a best-effort basis. `reverted` only lists files whose revert worked.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WriteError {
    pub path: PathBuf,
    pub reverted: Vec<PathBuf>,
    pub overwrite: bool,
    message: String,
    pub source: WriteFailure,
}

impl WriteError {
    pub fn new(path: &Path, reverted: Vec<PathBuf>, overwrite: bool, source: WriteFailure) -> Self {
        let insert = if overwrite { "overwrite" } else { "write to" };
        let mut message = format!("An error occurred when attempting to {} {:?}.", insert, path);
        if !reverted.is_empty() {
            message += &format!(
                " The following files have been reverted to their most recent saved content:\n{}",
                reverted.iter().map(|p| p.display()).join("\n")
            );
        }

        Self {
            path: path.to_owned(),
            reverted,
            overwrite,
            message,
            source,
        }
    }
}
