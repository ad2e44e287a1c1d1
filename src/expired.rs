use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use itertools::Itertools;
use regex::Regex;
use tracing::{debug, info, span, Level};

use crate::{
    files::ExpectedLedger,
    model::Transaction,
    print::render_transaction,
    reconcile::{answer, response_is_valid_number, Operator, SEPARATOR_LINE},
    settings::Settings,
    write::{commit, FileUpdate},
};

pub const DATE_FORMATS: &str = "(YYYY-MM-DD or MM-DD or DD)";

const DATE_FORMAT_PATTERNS: [&str; 3] = [
    r"^\d{4}-\d{1,2}-\d{1,2}$",
    r"^\d{1,2}-\d{1,2}$",
    r"^\d{1,2}$",
];

/// True for `YYYY-MM-DD`, `MM-DD` and `DD` shapes, whether or not the date
/// exists.
pub fn is_valid_date_format(response: &str) -> bool {
    DATE_FORMAT_PATTERNS
        .iter()
        .any(|pattern| Regex::new(pattern).map_or(false, |re| re.is_match(response)))
}

/// Year, month and day for a response. A missing month or year is the
/// earliest that puts the date on or after `today`.
fn date_parts(response: &str, today: NaiveDate) -> Option<(i32, u32, u32)> {
    let parts: Vec<u32> = response
        .split('-')
        .map(|part| part.parse().ok())
        .collect::<Option<_>>()?;
    let day = *parts.last()?;

    if let [year, month, _] = parts.as_slice() {
        return Some((i32::try_from(*year).ok()?, *month, day));
    }

    let month = match parts.as_slice() {
        [month, _] => *month,
        _ if day >= today.day() => today.month(),
        _ => today.month() % 12 + 1,
    };
    let year = if month == today.month() {
        if day >= today.day() {
            today.year()
        } else {
            today.year() + 1
        }
    } else if month > today.month() {
        today.year()
    } else {
        today.year() + 1
    };

    Some((year, month, day))
}

pub fn date_from_response(response: &str, today: NaiveDate) -> Option<NaiveDate> {
    if !is_valid_date_format(response) {
        return None;
    }
    let (year, month, day) = date_parts(response, today)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn new_date(operator: &mut dyn Operator, today: NaiveDate) -> Result<NaiveDate> {
    let mut response = answer(operator, &format!("Enter a new date {}: ", DATE_FORMATS))?;
    loop {
        let problem = match date_from_response(&response, today) {
            Some(date) if date >= today => return Ok(date),
            Some(_) => format!("does not represent a date >= {}", today),
            None => "does not represent a valid date".to_owned(),
        };
        response = answer(
            operator,
            &format!(
                "'{}' {}.\nPlease enter a valid date {}: ",
                response, problem, DATE_FORMATS
            ),
        )?;
    }
}

/// What the operator wants done with one expired transaction, `None` to
/// remove it.
fn administer(
    operator: &mut dyn Operator,
    tx: &Transaction,
    ledger: &Path,
    today: NaiveDate,
) -> Result<Option<Transaction>> {
    let tomorrow = today + Duration::days(1);
    let name = ledger
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    operator.present(&format!(
        "{}The following transaction has expired.\n\n{}\n\
         0 Move transaction forwards to tomorrow ({}).\n\
         1 Move transaction forwards to another date.\n\
         2 Remove transaction from ledger {}.\n\
         3 Leave transaction as is.",
        SEPARATOR_LINE,
        render_transaction(tx).trim_end(),
        tomorrow,
        name
    ))?;

    let mut response = answer(operator, "Choose one of the above options, [0-3]:")?;
    while !response_is_valid_number(&response, 3) {
        response = answer(
            operator,
            &format!("'{}' is not valid input, please try again, [0-3]: ", response),
        )?;
    }

    let date = match response.parse::<usize>()? {
        0 => tomorrow,
        1 => new_date(operator, today)?,
        2 => return Ok(None),
        _ => return Ok(Some(tx.clone())),
    };

    Ok(Some(Transaction {
        date,
        ..tx.clone()
    }))
}

/// Outcome of administering expired transactions.
#[derive(Debug, Clone, PartialEq)]
pub enum Administered {
    /// None of these ledgers had anything dated before today.
    NothingExpired(Vec<PathBuf>),
    Untouched,
    /// Ledgers rewritten.
    Updated(Vec<PathBuf>),
}

fn paths_list(paths: &[PathBuf]) -> String {
    paths.iter().map(|path| path.display()).join("\n")
}

impl Display for Administered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Administered::NothingExpired(paths) => write!(
                f,
                "There are no expired transactions on any of the following ledgers:\n{}",
                paths_list(paths)
            ),
            Administered::Untouched => write!(
                f,
                "\nYou have not chosen to modify any expired transactions.\n\
                 No ledger has been altered."
            ),
            Administered::Updated(paths) => write!(
                f,
                "\nThe following ledgers have been updated:\n{}",
                paths_list(paths)
            ),
        }
    }
}

/// Offers every transaction dated before `today` on `ledgers` to the
/// operator to move forwards, remove or leave. Ledgers where anything
/// changed are rewritten together, earliest transaction first.
pub fn run(
    ledgers: &[PathBuf],
    settings: &Settings,
    today: NaiveDate,
    operator: &mut dyn Operator,
) -> Result<Administered> {
    let span = span!(Level::INFO, "expired");
    let _enter = span.enter();

    let ledgers: Vec<ExpectedLedger> = ledgers
        .iter()
        .map(|path| ExpectedLedger::open(path, settings))
        .collect::<Result<_, _>>()?;

    let mut any_expired = false;
    let mut updates = Vec::new();
    for ledger in ledgers.iter() {
        let mut kept = Vec::new();
        let mut changed = false;
        for tx in ledger.transactions.iter() {
            if tx.date >= today {
                kept.push(tx.clone());
                continue;
            }
            any_expired = true;
            let administered = administer(operator, tx, &ledger.path, today)?;
            debug!(
                "expired {} '{}' -> {:?}",
                tx.date,
                tx.payee_str(),
                administered.as_ref().map(|tx| tx.date)
            );
            changed |= administered.as_ref() != Some(tx);
            kept.extend(administered);
        }

        if changed {
            updates.push(
                FileUpdate::new(&ledger.path, ledger.content_with(&kept)).expecting(kept.len()),
            );
        }
    }

    if !any_expired {
        return Ok(Administered::NothingExpired(
            ledgers.into_iter().map(|ledger| ledger.path).collect(),
        ));
    }
    if updates.is_empty() {
        return Ok(Administered::Untouched);
    }

    commit(&updates)?;

    info!("{} ledgers updated", updates.len());

    Ok(Administered::Updated(
        updates.into_iter().map(|update| update.path).collect(),
    ))
}
