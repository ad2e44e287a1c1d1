use std::{collections::VecDeque, io::Write};

use anyhow::{bail, Result};
use dialoguer::{theme::ColorfulTheme, Input};
use itertools::Itertools;
use tracing::{debug, info, span, Level};

use crate::{
    matching::Matcher, merge::merge, model::Transaction, print::render_transaction,
    settings::Settings,
};

pub const SEPARATOR_LINE: &str =
    "-----------------------------------------------------------------------------\n";

const CONFIRM_SINGLE: &str = "Do you want to match the above transactions? y/n: ";

/// Whoever confirms matches. Every question blocks until answered.
pub trait Operator {
    fn present(&mut self, text: &str) -> Result<()>;

    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Operator at a terminal.
pub struct Console {
    theme: ColorfulTheme,
    out: Box<dyn Write>,
}

impl Console {
    pub fn new(settings: &Settings) -> Self {
        Self {
            theme: ColorfulTheme::default(),
            out: settings.print_to(),
        }
    }
}

impl Operator for Console {
    fn present(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()?;
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        Ok(Input::<String>::with_theme(&self.theme)
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()?)
    }
}

/// Replays canned responses, keeping everything shown and asked.
#[derive(Debug, Default)]
pub struct Scripted {
    responses: VecDeque<String>,
    transcript: Vec<String>,
}

impl Scripted {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Responses not yet given.
    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl Operator for Scripted {
    fn present(&mut self, text: &str) -> Result<()> {
        self.transcript.push(text.to_owned());
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.transcript.push(question.to_owned());
        match self.responses.pop_front() {
            Some(response) => Ok(response),
            None => bail!("No response for '{}'", question),
        }
    }
}

pub(crate) fn answer(operator: &mut dyn Operator, question: &str) -> Result<String> {
    Ok(operator.ask(question)?.trim().to_lowercase())
}

/// True if `response` is an integer in `0..=max_value`.
pub fn response_is_valid_number(response: &str, max_value: usize) -> bool {
    matches!(response.parse::<usize>(), Ok(value) if value <= max_value)
}

fn confirm_single(
    operator: &mut dyn Operator,
    expected: &Transaction,
    candidate: &Transaction,
) -> Result<bool> {
    operator.present(&format!(
        "{}Expected Transaction:\n{}\nIncoming Transaction:\n{}",
        SEPARATOR_LINE,
        render_transaction(expected).trim_end(),
        render_transaction(candidate).trim_end()
    ))?;

    let mut response = answer(operator, CONFIRM_SINGLE)?;
    loop {
        match response.as_str() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => {
                response = answer(
                    operator,
                    &format!("{} is not valid input, please try again, y/n: ", response),
                )?
            }
        }
    }
}

fn choose(
    operator: &mut dyn Operator,
    expected: &Transaction,
    candidates: &[&Transaction],
) -> Result<Option<usize>> {
    operator.present(&format!(
        "{}Expected Transaction:\n{}\n\nIncoming Transactions:\n",
        SEPARATOR_LINE,
        render_transaction(expected).trim_end()
    ))?;
    for (i, candidate) in candidates.iter().enumerate() {
        operator.present(&format!("{}\n{}", i, render_transaction(candidate).trim_end()))?;
    }

    let max_value = candidates.len() - 1;
    let options = format!("[0-{}]/n", max_value);
    let mut response = answer(
        operator,
        &format!(
            "Which of the above incoming transactions do you wish to match \
             with the expected transaction, or 'n' for None, {}:",
            options
        ),
    )?;
    loop {
        if response == "n" {
            return Ok(None);
        }
        if response_is_valid_number(&response, max_value) {
            return Ok(response.parse().ok());
        }
        response = answer(
            operator,
            &format!("{} is not valid input, please try again {}: ", response, options),
        )?;
    }
}

/// An expected transaction paired with the actual transaction it cleared as.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Index into the expected transactions given to [`reconcile`].
    pub expected: usize,
    pub actual: Transaction,
    pub merged: Transaction,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciliation {
    /// In the order the expected transactions were processed.
    pub matches: Vec<Match>,
    /// Actual transactions nothing matched, in their input order.
    pub unmatched: Vec<Transaction>,
}

impl Reconciliation {
    /// Merged transactions, most recently matched first, then the unmatched.
    pub fn updated_transactions(&self) -> Vec<Transaction> {
        self.matches
            .iter()
            .rev()
            .map(|m| m.merged.clone())
            .chain(self.unmatched.iter().cloned())
            .collect_vec()
    }

    pub fn matched_expected(&self) -> impl Iterator<Item = usize> + '_ {
        self.matches.iter().map(|m| m.expected)
    }
}

/// Offers each expected transaction, in order, the actual transactions that
/// plausibly correspond and lets the operator decide. A matched actual
/// transaction can't be claimed by a later expected one.
pub fn reconcile(
    expected: &[Transaction],
    actual: Vec<Transaction>,
    settings: &Settings,
    operator: &mut dyn Operator,
) -> Result<Reconciliation> {
    let span = span!(Level::INFO, "reconcile");
    let _enter = span.enter();

    let matcher = Matcher::new(settings);
    let mut pool = (0..actual.len()).collect_vec();
    let mut chosen = Vec::new();

    for (index, x) in expected.iter().enumerate() {
        let remaining = pool.iter().map(|&i| &actual[i]).collect_vec();
        let candidates = matcher.resolve(&remaining, x);
        debug!(candidates = candidates.len(), "expected {} '{}'", x.date, x.payee_str());

        let choice = match candidates.as_slice() {
            [] => continue,
            [single] => confirm_single(operator, x, single)?.then_some(*single),
            many => choose(operator, x, many)?.map(|i| many[i]),
        };

        if let Some(tx) = choice {
            if let Some(at) = remaining.iter().position(|r| std::ptr::eq(*r, tx)) {
                chosen.push((index, pool.remove(at)));
            }
        }
    }

    let mut actual = actual.into_iter().map(Some).collect_vec();
    let matches = chosen
        .into_iter()
        .filter_map(|(x, a)| {
            let tx = actual[a].take()?;
            Some(Match {
                expected: x,
                merged: merge(&expected[x], &tx),
                actual: tx,
            })
        })
        .collect_vec();
    let unmatched = actual.into_iter().flatten().collect_vec();

    info!(
        "{} of {} expected transactions reconciled",
        matches.len(),
        expected.len()
    );

    Ok(Reconciliation { matches, unmatched })
}
