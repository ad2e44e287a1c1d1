use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::errors::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintStream {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Assets,
    Liabilities,
    Equity,
    Income,
    Expenses,
}

/// Account root names and output preferences. Resolved once by the binary
/// and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Settings {
    pub name_assets: String,
    pub name_liabilities: String,
    pub name_equity: String,
    pub name_income: String,
    pub name_expenses: String,
    pub print_stream: PrintStream,
    /// Without the leading `.`, one given in the file is dropped.
    #[serde(deserialize_with = "extension_without_dot")]
    pub extension: String,
}

fn extension_without_dot<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let extension = String::deserialize(deserializer)?;
    Ok(extension.trim_start_matches('.').to_owned())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name_assets: "Assets".into(),
            name_liabilities: "Liabilities".into(),
            name_equity: "Equity".into(),
            name_income: "Income".into(),
            name_expenses: "Expenses".into(),
            print_stream: PrintStream::Stdout,
            extension: "beancount".into(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings, SettingsError> {
        let file = File::open(path).map_err(|source| SettingsError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_reader(file).map_err(|source| SettingsError::Json {
            path: path.to_owned(),
            source,
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ledger-ahead").join("config.json"))
    }

    /// An explicit path must exist, the default location is optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Settings, SettingsError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => {
                    debug!("settings from {:?}", path);
                    Self::load(&path)
                }
                _ => Ok(Settings::default()),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn account_type(&self, account: &str) -> Option<AccountType> {
        let root = account.split(':').next()?;
        [
            (&self.name_assets, AccountType::Assets),
            (&self.name_liabilities, AccountType::Liabilities),
            (&self.name_equity, AccountType::Equity),
            (&self.name_income, AccountType::Income),
            (&self.name_expenses, AccountType::Expenses),
        ]
        .into_iter()
        .find(|(name, _)| name.as_str() == root)
        .map(|(_, kind)| kind)
    }

    /// Only Assets and Liabilities count as balance sheet accounts here.
    pub fn is_balance_sheet_account(&self, account: &str) -> bool {
        matches!(
            self.account_type(account),
            Some(AccountType::Assets | AccountType::Liabilities)
        )
    }

    pub fn print_to(&self) -> Box<dyn Write> {
        match self.print_stream {
            PrintStream::Stdout => Box::new(std::io::stdout()),
            PrintStream::Stderr => Box::new(std::io::stderr()),
        }
    }
}
