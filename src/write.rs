use std::{
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{info, span, warn, Level};

use crate::{
    errors::{WriteError, WriteFailure},
    model::{Entry, Node},
    parsing::parse_str,
};

/// New content for one file.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub content: String,
    /// When set, the content must parse to exactly this many transactions
    /// before it's written. Amounts aren't interpolated, a transaction may
    /// leave several postings without units.
    pub transactions: Option<usize>,
}

impl FileUpdate {
    pub fn new(path: &Path, content: String) -> Self {
        Self {
            path: path.to_owned(),
            content,
            transactions: None,
        }
    }

    pub fn expecting(self, transactions: usize) -> Self {
        Self {
            transactions: Some(transactions),
            ..self
        }
    }

    fn validate(&self) -> Result<(), WriteFailure> {
        if let Some(expected) = self.transactions {
            let found = parse_str(&self.content)?
                .iter()
                .filter(|node| matches!(node, Node::Entry(Entry::Transaction(_))))
                .count();
            if found != expected {
                return Err(WriteFailure::CountMismatch { expected, found });
            }
        }
        Ok(())
    }

    fn apply(&self) -> Result<(), WriteFailure> {
        self.validate()?;
        std::fs::write(&self.path, &self.content)?;

        info!("wrote {:?}", self.path);

        Ok(())
    }
}

/// Content of a path before it was touched, `None` when there was no file.
#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    content: Option<String>,
}

impl Snapshot {
    fn take(path: &Path) -> std::io::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            path: path.to_owned(),
            content,
        })
    }

    fn restore(&self) -> std::io::Result<()> {
        match &self.content {
            Some(content) => std::fs::write(&self.path, content),
            None => match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            },
        }
    }
}

fn revert(attempted: &[Snapshot]) -> Vec<PathBuf> {
    attempted
        .iter()
        .filter(|snapshot| match snapshot.restore() {
            Ok(()) => true,
            Err(e) => {
                warn!("unable to revert {:?}: {}", snapshot.path, e);
                false
            }
        })
        .map(|snapshot| snapshot.path.clone())
        .collect()
}

/// Writes every update, in order, or none of them. When an update fails
/// validation or can't be written every file attempted so far, the failing
/// one included, goes back to how it was.
pub fn commit(updates: &[FileUpdate]) -> Result<(), WriteError> {
    let span = span!(Level::INFO, "commit");
    let _enter = span.enter();

    let mut snapshots = Vec::with_capacity(updates.len());
    for update in updates {
        match Snapshot::take(&update.path) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                return Err(WriteError::new(
                    &update.path,
                    Vec::new(),
                    update.path.exists(),
                    e.into(),
                ))
            }
        }
    }

    for (index, update) in updates.iter().enumerate() {
        if let Err(failure) = update.apply() {
            let overwrite = snapshots[index].content.is_some();
            let reverted = revert(&snapshots[..=index]);
            return Err(WriteError::new(&update.path, reverted, overwrite, failure));
        }
    }

    Ok(())
}

/// A ledger to rewrite without the expected transactions that reconciled.
#[derive(Debug, Clone)]
pub struct Pruning {
    pub update: FileUpdate,
    pub removed: usize,
}

/// Everything a reconciliation needs written.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub reconciled: usize,
    pub pruned: Vec<Pruning>,
    pub output: FileUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub reconciled: usize,
    pub output: PathBuf,
    pub removed: Vec<(PathBuf, usize)>,
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} incoming transactions have been reconciled against expected transactions.\n\
             Updated transactions have been output to '{}'.",
            self.reconciled,
            self.output.display()
        )?;
        for (path, removed) in self.removed.iter() {
            write!(
                f,
                "\n{} transactions have been removed from ledger {}.",
                removed,
                path.display()
            )?;
        }
        Ok(())
    }
}

/// Ledgers are pruned before the output is written.
pub fn apply_reconciliation(plan: ReconcilePlan) -> Result<Summary, WriteError> {
    let removed = plan
        .pruned
        .iter()
        .map(|pruning| (pruning.update.path.clone(), pruning.removed))
        .collect();
    let output = plan.output.path.clone();

    let mut updates: Vec<FileUpdate> = plan.pruned.into_iter().map(|p| p.update).collect();
    updates.push(plan.output);

    commit(&updates)?;

    Ok(Summary {
        reconciled: plan.reconciled,
        output,
        removed,
    })
}
