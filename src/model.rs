use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use itertools::Itertools;
use tracing::info;

pub use crate::errors::LedgerError;

pub const TAG_X: &str = "x_txn";
pub const TAG_RX: &str = "rx_txn";
/// Tags that mark a transaction as expected.
pub const TAGS_X: [&str; 2] = [TAG_X, TAG_RX];

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Amount {
    pub number: BigDecimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: BigDecimal, currency: &str) -> Self {
        Self {
            number,
            currency: currency.to_owned(),
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&format!("{} {}", self.number, self.currency))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum MetaValue {
    String(String),
    Number(BigDecimal),
    Date(NaiveDate),
    Bool(bool),
    Symbol(String),
}

pub type Meta = BTreeMap<String, MetaValue>;

#[derive(Debug, PartialEq, Clone)]
pub struct Posting {
    pub flag: Option<char>,
    pub account: String,
    pub units: Option<Amount>,
    pub price: Option<Amount>,
    pub meta: Meta,
    /// Units were filled in by automatic balancing rather than declared.
    pub interpolated: bool,
}

impl Posting {
    pub fn new(account: &str, units: Option<Amount>) -> Self {
        Self {
            flag: None,
            account: account.to_owned(),
            units,
            price: None,
            meta: Meta::new(),
            interpolated: false,
        }
    }

    pub fn with_meta(self, key: &str, value: MetaValue) -> Self {
        let mut meta = self.meta;
        meta.insert(key.to_owned(), value);
        Self { meta, ..self }
    }

    pub fn with_price(self, price: Amount) -> Self {
        Self {
            price: Some(price),
            ..self
        }
    }

    /// The amount this posting contributes to the transaction's balance.
    pub fn weight(&self) -> Option<Amount> {
        let units = self.units.as_ref()?;
        match &self.price {
            Some(price) => Some(Amount::new(&units.number * &price.number, &price.currency)),
            None => Some(units.clone()),
        }
    }

    /// Copy with any interpolated units removed.
    pub fn declared(&self) -> Self {
        if self.interpolated {
            Self {
                units: None,
                interpolated: false,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Transaction {
    pub date: NaiveDate,
    pub flag: char,
    pub payee: Option<String>,
    pub narration: String,
    pub tags: BTreeSet<String>,
    pub links: BTreeSet<String>,
    pub meta: Meta,
    pub postings: Vec<Posting>,
}

impl Transaction {
    pub fn new(date: NaiveDate, payee: Option<&str>, narration: &str) -> Self {
        Self {
            date,
            flag: '*',
            payee: payee.map(|p| p.to_owned()),
            narration: narration.to_owned(),
            tags: BTreeSet::new(),
            links: BTreeSet::new(),
            meta: Meta::new(),
            postings: Vec::new(),
        }
    }

    pub fn with_tag(self, tag: &str) -> Self {
        let mut tags = self.tags;
        tags.insert(tag.to_owned());
        Self { tags, ..self }
    }

    pub fn with_meta(self, key: &str, value: MetaValue) -> Self {
        let mut meta = self.meta;
        meta.insert(key.to_owned(), value);
        Self { meta, ..self }
    }

    pub fn with_posting(self, posting: Posting) -> Self {
        let mut postings = self.postings;
        postings.push(posting);
        Self { postings, ..self }
    }

    pub fn without_tags<'a>(self, remove: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tags = self.tags;
        for tag in remove {
            tags.remove(tag);
        }
        Self { tags, ..self }
    }

    pub fn payee_str(&self) -> &str {
        self.payee.as_deref().unwrap_or("")
    }

    pub fn is_expected(&self) -> bool {
        TAGS_X.iter().any(|t| self.tags.contains(*t))
    }

    pub fn accounts(&self) -> BTreeSet<&str> {
        self.postings.iter().map(|p| p.account.as_str()).collect()
    }

    pub fn duplicate_account(&self) -> Option<&str> {
        self.postings
            .iter()
            .map(|p| p.account.as_str())
            .duplicates()
            .next()
    }

    /// Panics if the transaction has more than one posting to `account`,
    /// loading rejects such transactions so this is a broken invariant.
    pub fn posting_to(&self, account: &str) -> Option<&Posting> {
        let mut postings = self.postings.iter().filter(|p| p.account == account);
        let posting = postings.next();
        if postings.next().is_some() {
            panic!(
                "Transaction cannot have multiple postings to the same account, \
                 {} '{}' has multiple postings to '{}'",
                self.date,
                self.payee_str(),
                account
            );
        }
        posting
    }

    pub fn units_for(&self, account: &str) -> Option<&Amount> {
        self.posting_to(account).and_then(|p| p.units.as_ref())
    }

    /// Copy with every interpolated posting amount removed.
    pub fn reverse_automatic_balancing(&self) -> Self {
        Self {
            postings: self.postings.iter().map(Posting::declared).collect_vec(),
            ..self.clone()
        }
    }

    /// Fills in a single posting without units from the weights of the
    /// others, when those are all in one currency.
    pub(crate) fn into_balanced(self) -> Result<Self, LedgerError> {
        let missing = self.postings.iter().filter(|p| p.units.is_none()).count();
        match missing {
            0 => Ok(self),
            1 => {
                let weights = self.postings.iter().filter_map(Posting::weight).collect_vec();
                let currencies = weights.iter().map(|w| w.currency.as_str()).unique().collect_vec();
                let currency = match currencies.as_slice() {
                    [currency] => currency.to_string(),
                    _ => return Ok(self),
                };
                let total: BigDecimal = weights.into_iter().map(|w| w.number).sum();

                let postings = self
                    .postings
                    .into_iter()
                    .map(|p| match p.units {
                        None => Posting {
                            units: Some(Amount::new(-total.clone(), &currency)),
                            interpolated: true,
                            ..p
                        },
                        Some(_) => p,
                    })
                    .collect_vec();

                Ok(Self { postings, ..self })
            }
            missing => Err(LedgerError::Unbalanced {
                date: self.date,
                missing,
            }),
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.postings
            .iter()
            .filter_map(Posting::weight)
            .into_group_map_by(|w| w.currency.clone())
            .into_values()
            .all(|weights| weights.into_iter().map(|w| w.number).sum::<BigDecimal>().is_zero())
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum DirectiveKind {
    Open {
        account: String,
        currencies: Vec<String>,
    },
    Close {
        account: String,
    },
    Balance {
        account: String,
        amount: Amount,
    },
    Price {
        currency: String,
        amount: Amount,
    },
    Commodity {
        currency: String,
    },
    Note {
        account: String,
        comment: String,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct Directive {
    pub date: NaiveDate,
    pub meta: Meta,
    pub kind: DirectiveKind,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Entry {
    Transaction(Transaction),
    Directive(Directive),
}

impl Entry {
    pub fn date(&self) -> NaiveDate {
        match self {
            Entry::Transaction(tx) => tx.date,
            Entry::Directive(d) => d.date,
        }
    }

    /// Opens come first on a given day, closes last, balances are asserted
    /// at the start of the day.
    fn type_rank(&self) -> u8 {
        match self {
            Entry::Directive(Directive {
                kind: DirectiveKind::Open { .. },
                ..
            }) => 0,
            Entry::Directive(Directive {
                kind: DirectiveKind::Balance { .. },
                ..
            }) => 1,
            Entry::Directive(Directive {
                kind: DirectiveKind::Close { .. },
                ..
            }) => 3,
            _ => 2,
        }
    }

    pub fn sort_key(&self) -> (NaiveDate, u8) {
        (self.date(), self.type_rank())
    }

    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            Entry::Transaction(tx) => Some(tx),
            _ => None,
        }
    }
}

/// Stable sort into canonical order, equal keys keep their relative order in
/// both directions.
pub fn sort_entries(entries: &mut [Entry], ascending: bool) {
    if ascending {
        entries.sort_by_key(|e| e.sort_key());
    } else {
        entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    }
}

pub fn separate_transactions(entries: Vec<Entry>) -> (Vec<Transaction>, Vec<Entry>) {
    let mut txs = Vec::new();
    let mut others = Vec::new();
    for entry in entries {
        match entry {
            Entry::Transaction(tx) => txs.push(tx),
            other => others.push(other),
        }
    }
    (txs, others)
}

#[derive(Debug, PartialEq, Clone)]
pub enum Node {
    Comment(String),
    Heading(String),
    EmptyLine,
    Option(String, String),
    Plugin(String, Option<String>),
    Include(String),
    PushTag(String),
    PopTag(String),
    Entry(Entry),
}

#[derive(Debug)]
pub struct LedgerFile {
    nodes: Vec<Node>,
}

impl LedgerFile {
    pub fn parse(path: &Path) -> Result<Self, LedgerError> {
        info!("parsing {:?}", path);

        let data = std::fs::read_to_string(path).map_err(|source| LedgerError::Io {
            path: path.to_owned(),
            source,
        })?;
        let nodes = crate::parsing::parse_str(&data)?;

        Ok(LedgerFile { nodes })
    }

    pub fn parse_str(data: &str) -> Result<Self, LedgerError> {
        Ok(LedgerFile {
            nodes: crate::parsing::parse_str(data)?,
        })
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.nodes.iter().find_map(|node| match node {
            Node::Option(key, value) if key == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Entries as the ledger defines them, with pushed tags applied, single
    /// missing amounts interpolated and in canonical order.
    pub fn entries(&self) -> Result<Vec<Entry>, LedgerError> {
        let mut pushed: Vec<&str> = Vec::new();
        let mut entries = Vec::new();

        for node in self.nodes.iter() {
            match node {
                Node::PushTag(tag) => pushed.push(tag),
                Node::PopTag(tag) => {
                    if let Some(position) = pushed.iter().rposition(|t| *t == tag.as_str()) {
                        pushed.remove(position);
                    }
                }
                Node::Entry(Entry::Transaction(tx)) => {
                    if let Some(account) = tx.duplicate_account() {
                        return Err(LedgerError::DuplicatePosting {
                            date: tx.date,
                            account: account.to_owned(),
                        });
                    }
                    let tx = pushed
                        .iter()
                        .fold(tx.clone(), |tx, tag| tx.with_tag(tag))
                        .into_balanced()?;
                    entries.push(Entry::Transaction(tx));
                }
                Node::Entry(entry) => entries.push(entry.clone()),
                _ => {}
            }
        }

        sort_entries(&mut entries, true);

        Ok(entries)
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(separate_transactions(self.entries()?).0)
    }
}
