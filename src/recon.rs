use std::path::PathBuf;

use anyhow::Result;
use itertools::Itertools;
use tracing::{info, span, Level};

use crate::{
    files::{unverified_path, verified_path, ExpectedLedger, EXTRACTION_HEADER},
    model::{separate_transactions, sort_entries, Entry, LedgerFile, Transaction},
    print::render_entries,
    reconcile::{reconcile, Operator},
    settings::Settings,
    write::{apply_reconciliation, FileUpdate, Pruning, ReconcilePlan, Summary},
};

/// What `recon` was asked to do.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Extraction output holding only new entries.
    pub new_entries: PathBuf,
    /// Expected Transactions Ledgers to reconcile against.
    pub ledgers: Vec<PathBuf>,
    /// Strike reconciled expected transactions from their ledgers.
    pub remove: bool,
    /// Defaults to overwriting `new_entries`.
    pub output: Option<PathBuf>,
    pub ascending: bool,
}

/// Loads everything, asks the operator about every plausible match and
/// works out what each file should end up containing. Nothing is written.
pub fn plan(
    config: &ReconcileConfig,
    settings: &Settings,
    operator: &mut dyn Operator,
) -> Result<ReconcilePlan> {
    let span = span!(Level::INFO, "plan");
    let _enter = span.enter();

    let input = verified_path(&config.new_entries, settings)?;
    let (actual, others) = separate_transactions(LedgerFile::parse(&input)?.entries()?);

    let ledgers: Vec<ExpectedLedger> = config
        .ledgers
        .iter()
        .map(|path| ExpectedLedger::open(path, settings))
        .collect::<Result<_, _>>()?;

    let owners = ledgers
        .iter()
        .enumerate()
        .flat_map(|(index, ledger)| std::iter::repeat(index).take(ledger.transactions.len()))
        .collect_vec();
    let expected = ledgers
        .iter()
        .flat_map(|ledger| ledger.transactions.iter().cloned())
        .collect_vec();

    info!(
        expected = expected.len(),
        incoming = actual.len(),
        "loaded {} ledgers",
        ledgers.len()
    );

    let reconciliation = reconcile(&expected, actual, settings, operator)?;

    let mut entries = reconciliation
        .updated_transactions()
        .into_iter()
        .map(Entry::Transaction)
        .chain(others)
        .collect_vec();
    sort_entries(&mut entries, config.ascending);
    let transactions = entries.iter().filter_map(Entry::as_transaction).count();

    let output_path = match &config.output {
        Some(path) => unverified_path(path, settings)?,
        None => input,
    };
    let output = FileUpdate::new(
        &output_path,
        format!("{}\n{}", EXTRACTION_HEADER, render_entries(&entries)),
    )
    .expecting(transactions);

    let mut pruned = Vec::new();
    if config.remove {
        for (index, ledger) in ledgers.iter().enumerate() {
            let remove: Vec<&Transaction> = reconciliation
                .matched_expected()
                .filter(|x| owners[*x] == index)
                .map(|x| &expected[x])
                .collect();
            if remove.is_empty() {
                continue;
            }

            let (content, retained) = ledger.pruned_content(&remove)?;
            pruned.push(Pruning {
                update: FileUpdate::new(&ledger.path, content).expecting(retained),
                removed: remove.len(),
            });
        }
    }

    Ok(ReconcilePlan {
        reconciled: reconciliation.matches.len(),
        pruned,
        output,
    })
}

pub fn run(
    config: &ReconcileConfig,
    settings: &Settings,
    operator: &mut dyn Operator,
) -> Result<Summary> {
    let plan = plan(config, settings, operator)?;

    Ok(apply_reconciliation(plan)?)
}
