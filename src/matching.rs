use std::{cmp::Reverse, collections::BTreeSet};

use bigdecimal::{BigDecimal, One, Zero};
use itertools::Itertools;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::{model::Transaction, settings::Settings};

/// Candidates must be dated within this many days of the expected date.
pub const DATE_WINDOW_DAYS: i64 = 5;

/// Relative amount difference tolerated when no payee matches, 2%.
pub fn amount_margin() -> BigDecimal {
    BigDecimal::from(2) / BigDecimal::from(100)
}

fn days_apart(a: &Transaction, b: &Transaction) -> i64 {
    (a.date - b.date).num_days().abs()
}

pub fn close_by_date<'p>(
    pool: &[&'p Transaction],
    expected: &Transaction,
    window_days: i64,
) -> Vec<&'p Transaction> {
    pool.iter()
        .copied()
        .filter(|tx| days_apart(tx, expected) <= window_days)
        .collect_vec()
}

/// Case insensitive search for any word of an expected payee. Never matches
/// when the payee has no words.
#[derive(Debug, Clone)]
pub struct PayeePattern(Option<Regex>);

impl PayeePattern {
    pub fn is_match(&self, payee: &str) -> bool {
        self.0.as_ref().map_or(false, |re| re.is_match(payee))
    }
}

pub fn payee_pattern(expected: &Transaction) -> PayeePattern {
    let words = expected
        .payee_str()
        .split(' ')
        .filter(|word| !word.is_empty())
        .map(regex::escape)
        .collect_vec();

    if words.is_empty() {
        return PayeePattern(None);
    }

    PayeePattern(
        RegexBuilder::new(&words.join("|"))
            .case_insensitive(true)
            .build()
            .ok(),
    )
}

pub fn payee_candidates<'p>(
    candidates: &[&'p Transaction],
    expected: &Transaction,
) -> Vec<&'p Transaction> {
    let pattern = payee_pattern(expected);
    candidates
        .iter()
        .copied()
        .filter(|tx| pattern.is_match(tx.payee_str()))
        .collect_vec()
}

/// Difference of `b` relative to the larger magnitude, 1 when the signs differ.
fn relative_difference(a: &BigDecimal, b: &BigDecimal) -> BigDecimal {
    if a * b < BigDecimal::zero() {
        return BigDecimal::one();
    }
    let denominator = a.abs().max(b.abs());
    if denominator.is_zero() {
        return BigDecimal::zero();
    }
    (a - b).abs() / denominator
}

fn common_accounts(a: &Transaction, b: &Transaction) -> usize {
    a.accounts().intersection(&b.accounts()).count()
}

pub struct Matcher<'s> {
    settings: &'s Settings,
}

impl<'s> Matcher<'s> {
    pub fn new(settings: &'s Settings) -> Self {
        Self { settings }
    }

    fn balance_sheet_accounts<'t>(&self, tx: &'t Transaction) -> BTreeSet<&'t str> {
        tx.accounts()
            .into_iter()
            .filter(|account| self.settings.is_balance_sheet_account(account))
            .collect()
    }

    pub fn accounts_overlap(&self, a: &Transaction, b: &Transaction) -> bool {
        !self
            .balance_sheet_accounts(a)
            .is_disjoint(&self.balance_sheet_accounts(b))
    }

    pub fn basic_candidates<'p>(
        &self,
        pool: &[&'p Transaction],
        expected: &Transaction,
    ) -> Vec<&'p Transaction> {
        close_by_date(pool, expected, DATE_WINDOW_DAYS)
            .into_iter()
            .filter(|tx| self.accounts_overlap(tx, expected))
            .collect_vec()
    }

    /// Mean relative difference of the amounts posted to the balance sheet
    /// accounts both transactions share, in [0, 1].
    pub fn amount_difference(&self, a: &Transaction, b: &Transaction) -> BigDecimal {
        let common = self
            .balance_sheet_accounts(a)
            .intersection(&self.balance_sheet_accounts(b))
            .copied()
            .collect_vec();

        let mut differences = Vec::new();
        for account in common {
            let (Some(units_a), Some(units_b)) = (a.units_for(account), b.units_for(account)) else {
                continue;
            };
            if units_a.currency != units_b.currency {
                continue;
            }
            let difference = relative_difference(&units_a.number, &units_b.number);
            if difference.is_one() {
                return difference;
            }
            differences.push(difference);
        }

        if differences.is_empty() {
            return BigDecimal::one();
        }

        let count = BigDecimal::from(differences.len() as u64);
        (differences.into_iter().sum::<BigDecimal>() / count).abs()
    }

    fn sort_by_date<'p>(
        &self,
        mut candidates: Vec<&'p Transaction>,
        expected: &Transaction,
    ) -> Vec<&'p Transaction> {
        candidates.sort_by_key(|tx| {
            (
                days_apart(tx, expected),
                Reverse(common_accounts(tx, expected)),
            )
        });
        candidates
    }

    /// Candidates for `expected` in the order they should be offered. An
    /// empty result means nothing in the pool plausibly corresponds.
    pub fn resolve<'p>(
        &self,
        pool: &[&'p Transaction],
        expected: &Transaction,
    ) -> Vec<&'p Transaction> {
        let basic = self.basic_candidates(pool, expected);
        if basic.is_empty() {
            return Vec::new();
        }

        let by_payee = payee_candidates(&basic, expected);
        debug!(
            basic = basic.len(),
            payee = by_payee.len(),
            "candidates for {} '{}'",
            expected.date,
            expected.payee_str()
        );

        match by_payee.len() {
            0 => {
                let margin = amount_margin();
                let close = basic
                    .into_iter()
                    .filter(|tx| self.amount_difference(expected, tx) <= margin)
                    .collect_vec();
                self.sort_by_date(close, expected)
            }
            1 => by_payee,
            _ => {
                let mut sorted = self.sort_by_date(by_payee, expected);
                let closest = sorted[0];
                if self.amount_difference(closest, expected).is_zero() {
                    let days = days_apart(closest, expected);
                    sorted
                        .into_iter()
                        .filter(|tx| {
                            days_apart(tx, expected) == days
                                && self.amount_difference(tx, expected).is_zero()
                        })
                        .collect_vec()
                } else {
                    sorted.sort_by_key(|tx| self.amount_difference(expected, tx));
                    sorted
                }
            }
        }
    }
}
