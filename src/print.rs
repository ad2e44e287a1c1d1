use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use crate::model::*;

const ACCOUNT_WIDTH: usize = 48;
const UNITS_WIDTH: usize = 16;

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Display for MetaValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::String(value) => f.pad(&quoted(value)),
            MetaValue::Number(value) => f.pad(&value.to_string()),
            MetaValue::Date(value) => f.pad(&value.format("%Y-%m-%d").to_string()),
            MetaValue::Bool(true) => f.pad("TRUE"),
            MetaValue::Bool(false) => f.pad("FALSE"),
            MetaValue::Symbol(value) => f.pad(value),
        }
    }
}

fn write_meta(f: &mut Formatter<'_>, meta: &Meta, indent: &str) -> fmt::Result {
    for (key, value) in meta.iter() {
        writeln!(f, "{}{}: {}", indent, key, value)?;
    }
    Ok(())
}

impl Display for Posting {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "  ")?;
        if let Some(flag) = self.flag {
            write!(f, "{} ", flag)?;
        }
        match (&self.units, self.interpolated) {
            (Some(units), false) => {
                write!(
                    f,
                    "{:account_width$} {:>units_width$}",
                    self.account,
                    units,
                    account_width = ACCOUNT_WIDTH,
                    units_width = UNITS_WIDTH
                )?;
                if let Some(price) = &self.price {
                    write!(f, " @ {}", price)?;
                }
            }
            _ => write!(f, "{}", self.account)?,
        }
        writeln!(f)?;

        write_meta(f, &self.meta, "    ")
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date.format("%Y-%m-%d"), self.flag)?;
        if let Some(payee) = &self.payee {
            write!(f, " {}", quoted(payee))?;
        }
        write!(f, " {}", quoted(&self.narration))?;
        for tag in self.tags.iter() {
            write!(f, " #{}", tag)?;
        }
        for link in self.links.iter() {
            write!(f, " ^{}", link)?;
        }
        writeln!(f)?;

        write_meta(f, &self.meta, "  ")?;

        for posting in self.postings.iter() {
            write!(f, "{}", posting)?;
        }

        Ok(())
    }
}

impl Display for Directive {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.date.format("%Y-%m-%d"))?;
        match &self.kind {
            DirectiveKind::Open {
                account,
                currencies,
            } => {
                write!(f, "open {}", account)?;
                if !currencies.is_empty() {
                    write!(f, " {}", currencies.join(","))?;
                }
            }
            DirectiveKind::Close { account } => write!(f, "close {}", account)?,
            DirectiveKind::Balance { account, amount } => {
                write!(f, "balance {}  {}", account, amount)?
            }
            DirectiveKind::Price { currency, amount } => {
                write!(f, "price {}  {}", currency, amount)?
            }
            DirectiveKind::Commodity { currency } => write!(f, "commodity {}", currency)?,
            DirectiveKind::Note { account, comment } => {
                write!(f, "note {} {}", account, quoted(comment))?
            }
        }
        writeln!(f)?;

        write_meta(f, &self.meta, "  ")
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Transaction(tx) => tx.fmt(f),
            Entry::Directive(directive) => directive.fmt(f),
        }
    }
}

/// Copy of a transaction as it should be written to a file: interpolated
/// units removed, a default `roll` dropped from regular expected
/// transactions, and no expected-transaction tags.
pub fn prepare(tx: &Transaction) -> Transaction {
    let mut prepared = tx.reverse_automatic_balancing();
    if prepared.tags.contains(TAG_RX) && prepared.meta.get("roll") == Some(&MetaValue::Bool(true)) {
        prepared.meta.remove("roll");
    }
    prepared.without_tags(TAGS_X)
}

pub fn render_entry(entry: &Entry) -> String {
    match entry {
        Entry::Transaction(tx) => prepare(tx).to_string(),
        Entry::Directive(directive) => directive.to_string(),
    }
}

pub fn render_transaction(tx: &Transaction) -> String {
    prepare(tx).to_string()
}

/// Entries separated by an empty line.
pub fn render_entries(entries: &[Entry]) -> String {
    entries.iter().map(render_entry).join("\n")
}

pub fn render_transactions<'a>(txs: impl IntoIterator<Item = &'a Transaction>) -> String {
    txs.into_iter().map(render_transaction).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::parse_str;
    use anyhow::Result;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn transactions(text: &str) -> Result<Vec<Transaction>> {
        Ok(LedgerFile::parse_str(text)?.transactions()?)
    }

    #[test]
    fn test_round_trip_declared_transaction() -> Result<()> {
        let text = r#"2022-10-05 ! "EDISON" "Electricity, \"monthly\"" #bills #home ^inv-1
  source: "bank"
  Assets:US:BofA:Checking  -65.00 USD
    statement: 2022-10-31
  Expenses:Home:Electricity  65.00 USD
  ! Assets:Euro  0 EUR @ 1.10 USD
"#;
        let nodes = parse_str(text)?;
        let rendered = nodes
            .iter()
            .filter_map(|node| match node {
                Node::Entry(entry) => Some(render_entry(entry)),
                _ => None,
            })
            .join("\n");

        assert_eq!(parse_str(&rendered)?, nodes);

        Ok(())
    }

    #[test]
    fn test_render_omits_interpolated_units() -> Result<()> {
        let txs = transactions(
            "2022-10-05 * \"EDISON\"\n  Assets:Checking  -65.00 USD\n  Expenses:Electricity\n",
        )?;
        let rendered = render_transaction(&txs[0]);

        assert!(rendered.contains("-65.00 USD"));
        assert!(rendered.ends_with("  Expenses:Electricity\n"));

        Ok(())
    }

    #[test]
    fn test_prepare_removes_reserved_tags_and_default_roll() {
        let date = NaiveDate::from_ymd_opt(2022, 10, 5).unwrap();
        let tx = Transaction::new(date, Some("Rent"), "")
            .with_tag(TAG_RX)
            .with_tag("home")
            .with_meta("roll", MetaValue::Bool(true))
            .with_meta("freq", MetaValue::String("m".into()));

        let prepared = prepare(&tx);
        assert_eq!(prepared.tags.iter().collect_vec(), vec!["home"]);
        assert_eq!(prepared.meta.get("roll"), None);
        assert!(prepared.meta.contains_key("freq"));

        let rolled_off = prepare(&tx.with_meta("roll", MetaValue::Bool(false)));
        assert_eq!(rolled_off.meta.get("roll"), Some(&MetaValue::Bool(false)));
    }

    #[test]
    fn test_prepare_keeps_roll_on_plain_expected() {
        let date = NaiveDate::from_ymd_opt(2022, 10, 5).unwrap();
        let tx = Transaction::new(date, None, "")
            .with_tag(TAG_X)
            .with_meta("roll", MetaValue::Bool(true));

        let prepared = prepare(&tx);
        assert!(prepared.tags.is_empty());
        assert_eq!(prepared.meta.get("roll"), Some(&MetaValue::Bool(true)));
    }

    #[test]
    fn test_render_entries_separates_with_empty_line() -> Result<()> {
        let date = NaiveDate::from_ymd_opt(2022, 10, 5).unwrap();
        let entries = vec![
            Entry::Directive(Directive {
                date,
                meta: Meta::new(),
                kind: DirectiveKind::Balance {
                    account: "Assets:Checking".into(),
                    amount: Amount::new(BigDecimal::from_str("10.00")?, "USD"),
                },
            }),
            Entry::Transaction(Transaction::new(date, None, "Coffee")),
        ];

        assert_eq!(
            render_entries(&entries),
            "2022-10-05 balance Assets:Checking  10.00 USD\n\n2022-10-05 * \"Coffee\"\n"
        );

        Ok(())
    }
}
