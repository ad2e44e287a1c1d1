use std::{
    fmt::Display,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use itertools::Itertools;
use tracing::info;

use crate::{
    errors::FileError,
    model::{LedgerFile, Transaction, TAG_RX, TAG_X},
    print::render_transactions,
    settings::Settings,
};

/// First line of files written by extraction and reconciliation.
pub const EXTRACTION_HEADER: &str = ";; -*- mode: beancount -*-\n";

/// The kinds of file that hold expected transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Expected Transactions Ledger, `x`.
    Expected,
    /// Regular Expected Transactions Ledger, `rx`.
    Regular,
    /// Regular Expected Transaction Definitions, `rx_def`.
    Definitions,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [FileKind::Expected, FileKind::Regular, FileKind::Definitions];

    pub fn key(&self) -> &'static str {
        match self {
            FileKind::Expected => "x",
            FileKind::Regular => "rx",
            FileKind::Definitions => "rx_def",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            FileKind::Expected => "Expected Transactions Ledger",
            FileKind::Regular => "Regular Expected Transactions Ledger",
            FileKind::Definitions => "Regular Expected Transaction Definitions",
        }
    }

    pub fn plugin(&self) -> Option<&'static str> {
        match self {
            FileKind::Expected => None,
            FileKind::Regular | FileKind::Definitions => Some("rx_txn_plugin"),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Expected => TAG_X,
            FileKind::Regular | FileKind::Definitions => TAG_RX,
        }
    }

    fn comment(&self) -> &'static str {
        match self {
            FileKind::Expected => "Enter expected transactions after this line...",
            FileKind::Regular => "Transactions should not be manually added to this file.",
            FileKind::Definitions => {
                "All accounts referenced by definitions should be defined on the main ledger.\n\
                 Enter definitions after this line..."
            }
        }
    }

    fn post_comment(&self) -> Option<&'static str> {
        match self {
            FileKind::Expected => Some("...enter expected transactions before this line."),
            FileKind::Regular => None,
            FileKind::Definitions => Some("...enter definitions before this line."),
        }
    }

    /// Ledgers hold expected transactions that can be reconciled,
    /// definitions only describe how to generate them.
    pub fn is_ledger(&self) -> bool {
        !matches!(self, FileKind::Definitions)
    }

    pub fn from_title(title: &str) -> Option<FileKind> {
        Self::ALL.into_iter().find(|kind| kind.title() == title)
    }

    pub fn header_footer(&self) -> (String, String) {
        let mut header = format!("option \"title\" \"{}\"\n", self.title());
        if let Some(plugin) = self.plugin() {
            header += &format!("plugin \"{}\"\n", plugin);
        }
        header += &format!("pushtag #{}\n", self.tag());
        for line in self.comment().lines() {
            header += &format!(";; {}\n", line);
        }

        let mut footer = String::new();
        if let Some(post_comment) = self.post_comment() {
            for line in post_comment.lines() {
                footer += &format!(";; {}\n", line);
            }
        }
        footer += &format!("poptag #{}\n", self.tag());

        (header, footer)
    }

    /// Complete file content around already rendered transactions.
    pub fn compose_content(&self, transactions: &str) -> String {
        let (header, footer) = self.header_footer();
        format!("{}\n\n{}\n\n{}", header, transactions, footer)
    }
}

impl FromStr for FileKind {
    type Err = FileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.key() == key)
            .ok_or_else(|| FileError::UnknownKey(s.to_owned()))
    }
}

impl Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.key())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FileError + '_ {
    move |source| FileError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Absolute path, with the configured extension added when there is none.
pub fn unverified_path(path: &Path, settings: &Settings) -> Result<PathBuf, FileError> {
    let path = std::env::current_dir().map_err(io_error(path))?.join(path);
    if path.extension().is_none() {
        return Ok(path.with_extension(&settings.extension));
    }
    Ok(path)
}

pub fn verify_path(path: &Path, settings: &Settings) -> Result<(), FileError> {
    if path.extension().and_then(|e| e.to_str()) != Some(settings.extension.as_str()) {
        return Err(FileError::NotBeancount(path.to_owned(), settings.extension.clone()));
    }
    if !path.is_file() {
        return Err(FileError::Missing(path.to_owned()));
    }
    Ok(())
}

pub fn verified_path(path: &Path, settings: &Settings) -> Result<PathBuf, FileError> {
    let path = unverified_path(path, settings)?;
    verify_path(&path, settings)?;
    Ok(path)
}

fn kind_of(path: &Path, file: &LedgerFile) -> Result<FileKind, FileError> {
    file.option("title")
        .and_then(FileKind::from_title)
        .ok_or_else(|| {
            FileError::UnknownTitle(
                path.to_owned(),
                FileKind::ALL.iter().map(|kind| kind.title()).join("\n"),
            )
        })
}

pub fn verified_kind(path: &Path) -> Result<FileKind, FileError> {
    kind_of(path, &LedgerFile::parse(path)?)
}

pub fn verified_ledger_kind(path: &Path) -> Result<FileKind, FileError> {
    match verified_kind(path)? {
        kind if kind.is_ledger() => Ok(kind),
        _ => Err(FileError::NotLedgerFile(path.to_owned())),
    }
}

/// An Expected Transactions Ledger as loaded for reconciliation.
#[derive(Debug)]
pub struct ExpectedLedger {
    pub path: PathBuf,
    pub kind: FileKind,
    pub transactions: Vec<Transaction>,
}

impl ExpectedLedger {
    pub fn open(path: &Path, settings: &Settings) -> Result<Self, FileError> {
        let path = verified_path(path, settings)?;
        let file = LedgerFile::parse(&path)?;
        let kind = kind_of(&path, &file)?;
        if !kind.is_ledger() {
            return Err(FileError::NotLedgerFile(path));
        }
        let transactions = file.transactions()?;

        Ok(Self {
            path,
            kind,
            transactions,
        })
    }

    /// New content for this ledger without `remove`, one occurrence each,
    /// along with the number of transactions it retains. Comments added by
    /// hand are not kept.
    pub fn pruned_content(&self, remove: &[&Transaction]) -> Result<(String, usize), FileError> {
        let mut retained = self.transactions.iter().collect_vec();
        let mut missing = 0;
        for tx in remove {
            match retained.iter().position(|kept| kept == tx) {
                Some(at) => {
                    retained.remove(at);
                }
                None => missing += 1,
            }
        }

        if missing > 0 {
            return Err(FileError::NotInLedger {
                path: self.path.clone(),
                count: missing,
            });
        }

        Ok((self.content_with(retained.iter().copied()), retained.len()))
    }

    /// Complete content for this ledger holding `transactions`, earliest
    /// first.
    pub fn content_with<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> String {
        let mut transactions = transactions.into_iter().collect_vec();
        transactions.sort_by_key(|tx| tx.date);
        self.kind.compose_content(&render_transactions(transactions))
    }
}

/// Creates a new, empty, file of `kind` and returns its path. Never
/// overwrites.
pub fn create_file(
    kind: FileKind,
    dir: Option<&Path>,
    name: Option<&str>,
    settings: &Settings,
) -> Result<PathBuf, FileError> {
    let dir = std::env::current_dir()
        .map_err(io_error(Path::new(".")))?
        .join(dir.unwrap_or_else(|| Path::new(".")));
    if !dir.is_dir() {
        return Err(FileError::NotADirectory(dir));
    }

    let path = dir
        .join(name.unwrap_or(kind.key()))
        .with_extension(&settings.extension);
    if path.exists() {
        return Err(FileError::AlreadyExists(path));
    }

    let (header, footer) = kind.header_footer();
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_error(&path))?;
    file.write_all(format!("{}\n\n{}", header, footer).as_bytes())
        .map_err(io_error(&path))?;

    info!("created {:?}", path);

    Ok(path)
}

/// Appends the content of `injection`, less any extraction header, to the end
/// of `ledger`.
pub fn inject(injection: &Path, ledger: &Path, settings: &Settings) -> Result<(), FileError> {
    let injection = verified_path(injection, settings)?;
    let content = std::fs::read_to_string(&injection).map_err(io_error(&injection))?;
    let content = content.strip_prefix(EXTRACTION_HEADER).unwrap_or(&content);

    let ledger = verified_path(ledger, settings)?;
    let mut file = OpenOptions::new()
        .append(true)
        .open(&ledger)
        .map_err(io_error(&ledger))?;
    file.write_all(format!("\n{}", content).as_bytes())
        .map_err(io_error(&ledger))?;

    info!("injected {:?} into {:?}", injection, ledger);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;

    #[test]
    fn test_file_kind_keys() {
        assert_eq!("x".parse::<FileKind>().unwrap(), FileKind::Expected);
        assert_eq!("RX".parse::<FileKind>().unwrap(), FileKind::Regular);
        assert_eq!("rx_def".parse::<FileKind>().unwrap(), FileKind::Definitions);
        assert!(matches!(
            "y".parse::<FileKind>(),
            Err(FileError::UnknownKey(key)) if key == "y"
        ));
        assert_eq!(FileKind::Definitions.to_string(), "rx_def");
    }

    #[test]
    fn test_header_footer() {
        let (header, footer) = FileKind::Expected.header_footer();
        assert_eq!(
            header,
            "option \"title\" \"Expected Transactions Ledger\"\n\
             pushtag #x_txn\n\
             ;; Enter expected transactions after this line...\n"
        );
        assert_eq!(
            footer,
            ";; ...enter expected transactions before this line.\npoptag #x_txn\n"
        );

        let (header, footer) = FileKind::Regular.header_footer();
        assert!(header.contains("plugin \"rx_txn_plugin\"\npushtag #rx_txn\n"));
        assert_eq!(footer, "poptag #rx_txn\n");

        let (header, _) = FileKind::Definitions.header_footer();
        assert!(header.ends_with(
            ";; All accounts referenced by definitions should be defined on the main ledger.\n\
             ;; Enter definitions after this line...\n"
        ));
    }

    #[test]
    fn test_create_file() -> Result<()> {
        let settings = Settings::default();
        let dir = tempfile::tempdir()?;

        let path = create_file(FileKind::Expected, Some(dir.path()), None, &settings)?;
        assert_eq!(path, dir.path().join("x.beancount"));
        assert_eq!(verified_ledger_kind(&path)?, FileKind::Expected);
        assert!(LedgerFile::parse(&path)?.transactions()?.is_empty());

        assert!(matches!(
            create_file(FileKind::Expected, Some(dir.path()), None, &settings),
            Err(FileError::AlreadyExists(_))
        ));

        let path = create_file(FileKind::Definitions, Some(dir.path()), Some("defs"), &settings)?;
        assert_eq!(verified_kind(&path)?, FileKind::Definitions);
        assert!(matches!(
            verified_ledger_kind(&path),
            Err(FileError::NotLedgerFile(_))
        ));

        assert!(matches!(
            create_file(FileKind::Regular, Some(&dir.path().join("nope")), None, &settings),
            Err(FileError::NotADirectory(_))
        ));

        Ok(())
    }

    #[test]
    fn test_create_file_with_dotted_extension_setting() -> Result<()> {
        let settings: Settings = serde_json::from_str(r#"{ "extension": ".bean" }"#)?;
        let dir = tempfile::tempdir()?;

        let path = create_file(FileKind::Regular, Some(dir.path()), None, &settings)?;

        assert_eq!(path, dir.path().join("rx.bean"));
        assert_eq!(verified_path(&dir.path().join("rx"), &settings)?, path);

        Ok(())
    }

    #[test]
    fn test_paths() -> Result<()> {
        let settings = Settings::default();
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("ledger.beancount"), "")?;
        fs::write(dir.path().join("notes.txt"), "")?;

        assert_eq!(
            unverified_path(&dir.path().join("x"), &settings)?,
            dir.path().join("x.beancount")
        );
        assert_eq!(
            verified_path(&dir.path().join("ledger"), &settings)?,
            dir.path().join("ledger.beancount")
        );
        assert!(matches!(
            verified_path(&dir.path().join("missing"), &settings),
            Err(FileError::Missing(_))
        ));
        assert!(matches!(
            verified_path(&dir.path().join("notes.txt"), &settings),
            Err(FileError::NotBeancount(_, _))
        ));
        assert!(matches!(
            verified_kind(&dir.path().join("ledger.beancount")),
            Err(FileError::UnknownTitle(_, _))
        ));

        Ok(())
    }

    #[test]
    fn test_pruned_content() -> Result<()> {
        let settings = Settings::default();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("x.beancount");
        fs::write(
            &path,
            FileKind::Expected.compose_content(
                r#"2022-10-05 * "EDISON" "Electricity"
  Assets:Checking  -65.00 USD
  Expenses:Electricity

2022-10-10 * "RENT" ""
  Assets:Checking  -800.00 USD
  Expenses:Rent
"#,
            ),
        )?;

        let ledger = ExpectedLedger::open(&path, &settings)?;
        assert_eq!(ledger.kind, FileKind::Expected);
        assert_eq!(ledger.transactions.len(), 2);
        assert!(ledger.transactions.iter().all(|tx| tx.is_expected()));

        let (content, retained) = ledger.pruned_content(&[&ledger.transactions[0]])?;
        assert_eq!(retained, 1);
        let reloaded = LedgerFile::parse_str(&content)?.transactions()?;
        assert_eq!(reloaded, vec![ledger.transactions[1].clone()]);
        assert!(content.starts_with("option \"title\" \"Expected Transactions Ledger\"\n"));
        assert!(content.ends_with("poptag #x_txn\n"));

        let foreign = Transaction::new(ledger.transactions[0].date, None, "not here");
        assert!(matches!(
            ledger.pruned_content(&[&foreign]),
            Err(FileError::NotInLedger { count: 1, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_open_rejects_definitions() -> Result<()> {
        let settings = Settings::default();
        let dir = tempfile::tempdir()?;
        let path = create_file(FileKind::Definitions, Some(dir.path()), None, &settings)?;

        assert!(matches!(
            ExpectedLedger::open(&path, &settings),
            Err(FileError::NotLedgerFile(_))
        ));

        Ok(())
    }

    #[test]
    fn test_inject() -> Result<()> {
        let settings = Settings::default();
        let dir = tempfile::tempdir()?;
        let ledger = dir.path().join("main.beancount");
        let injection = dir.path().join("new.beancount");
        fs::write(&ledger, "2022-01-01 open Assets:Checking\n")?;
        fs::write(
            &injection,
            format!(
                "{}\n2022-10-05 * \"EDISON\" \"\"\n  \
                 Assets:Checking  -65.00 USD\n  \
                 Expenses:Electricity\n",
                EXTRACTION_HEADER
            ),
        )?;

        inject(&injection, &dir.path().join("main"), &settings)?;

        let content = fs::read_to_string(&ledger)?;
        assert_eq!(
            content,
            "2022-01-01 open Assets:Checking\n\n\n\
             2022-10-05 * \"EDISON\" \"\"\n  \
             Assets:Checking  -65.00 USD\n  \
             Expenses:Electricity\n"
        );
        assert_eq!(LedgerFile::parse(&ledger)?.transactions()?.len(), 1);

        Ok(())
    }
}
