use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use itertools::Itertools;
use ledger_ahead::{
    errors::{FileError, WriteError},
    files::{create_file, verified_ledger_kind, FileKind, EXTRACTION_HEADER},
    model::{Directive, DirectiveKind, Entry, LedgerFile, MetaValue, Node},
    parsing::parse_str,
    recon::{run, ReconcileConfig},
    reconcile::Scripted,
    settings::Settings,
};

const NEW_ENTRIES: &str = r#"2022-10-01 open Assets:Checking

2022-10-06 * "SOUTHERN EDISON" ""
  Assets:Checking  -65.00 USD
  Expenses:Electricity

2022-10-07 * "CAFE" ""
  Assets:Checking  -4.00 USD
  Expenses:Food

2022-10-08 * "METRO TRANSIT" ""
  Assets:Checking  -30.00 USD
  Expenses:Transport
"#;

const EXPECTED: &str = r#"2022-10-05 * "EDISON" "Electricity"
  contract: "A-113"
  Assets:Checking  -65.00 USD
  Expenses:Electricity

2022-11-01 * "RENT" "November"
  Assets:Checking  -800.00 USD
  Expenses:Rent
"#;

const REGULAR: &str = r#"2022-10-08 * "Metro" "Monthly pass"
  freq: "m"
  Assets:Checking  -30.00 USD
  Expenses:Transport

2022-11-08 * "Metro" "Monthly pass"
  freq: "m"
  Assets:Checking  -30.00 USD
  Expenses:Transport
"#;

struct Fixture {
    new_entries: PathBuf,
    x: PathBuf,
    rx: PathBuf,
}

impl Fixture {
    fn create(dir: &Path) -> Result<Self> {
        let fixture = Self {
            new_entries: dir.join("new.beancount"),
            x: dir.join("x.beancount"),
            rx: dir.join("rx.beancount"),
        };
        fs::write(&fixture.new_entries, format!("{}\n{}", EXTRACTION_HEADER, NEW_ENTRIES))?;
        fs::write(&fixture.x, FileKind::Expected.compose_content(EXPECTED))?;
        fs::write(&fixture.rx, FileKind::Regular.compose_content(REGULAR))?;
        Ok(fixture)
    }

    fn config(&self, output: Option<PathBuf>) -> ReconcileConfig {
        ReconcileConfig {
            new_entries: self.new_entries.clone(),
            ledgers: vec![self.x.clone(), self.rx.clone()],
            remove: true,
            output,
            ascending: true,
        }
    }
}

fn payees(path: &Path) -> Result<Vec<String>> {
    Ok(LedgerFile::parse(path)?
        .transactions()?
        .into_iter()
        .map(|tx| tx.payee_str().to_owned())
        .collect_vec())
}

#[test]
fn test_reconcile_updates_output_and_prunes_ledgers() -> Result<()> {
    let settings = Settings::default();
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::create(dir.path())?;
    let mut operator = Scripted::new(["y", "y"]);

    let summary = run(
        &fixture.config(Some(dir.path().join("out"))),
        &settings,
        &mut operator,
    )?;

    assert_eq!(operator.remaining(), 0);
    assert_eq!(summary.reconciled, 2);
    assert_eq!(summary.output, dir.path().join("out.beancount"));
    assert_eq!(
        summary.removed,
        vec![(fixture.x.clone(), 1), (fixture.rx.clone(), 1)]
    );

    let content = fs::read_to_string(&summary.output)?;
    assert!(content.starts_with(&format!("{}\n", EXTRACTION_HEADER)));

    let entries = LedgerFile::parse(&summary.output)?.entries()?;
    assert_eq!(entries.len(), 4);
    assert!(matches!(entries[0], Entry::Directive(_)));

    let txs = entries.iter().filter_map(Entry::as_transaction).collect_vec();
    assert_eq!(
        txs.iter()
            .map(|tx| (tx.payee_str(), tx.narration.as_str()))
            .collect_vec(),
        vec![
            ("SOUTHERN EDISON", "Electricity"),
            ("CAFE", ""),
            ("METRO TRANSIT", "Monthly pass"),
        ]
    );
    assert_eq!(txs[0].meta.get("contract"), Some(&MetaValue::String("A-113".into())));
    assert!(!txs[2].meta.contains_key("freq"));
    assert!(txs.iter().all(|tx| tx.tags.is_empty()));

    assert_eq!(payees(&fixture.x)?, vec!["RENT"]);
    assert_eq!(payees(&fixture.rx)?, vec!["Metro"]);
    assert_eq!(verified_ledger_kind(&fixture.x)?, FileKind::Expected);
    assert_eq!(verified_ledger_kind(&fixture.rx)?, FileKind::Regular);

    assert_eq!(
        fs::read_to_string(&fixture.new_entries)?,
        format!("{}\n{}", EXTRACTION_HEADER, NEW_ENTRIES)
    );

    Ok(())
}

#[test]
fn test_keep_and_reverse_overwrite_new_entries() -> Result<()> {
    let settings = Settings::default();
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::create(dir.path())?;
    let x_before = fs::read_to_string(&fixture.x)?;
    let rx_before = fs::read_to_string(&fixture.rx)?;

    let config = ReconcileConfig {
        remove: false,
        ascending: false,
        ..fixture.config(None)
    };
    let summary = run(&config, &settings, &mut Scripted::new(["y", "n"]))?;

    assert_eq!(summary.reconciled, 1);
    assert_eq!(summary.output, fixture.new_entries);
    assert!(summary.removed.is_empty());
    assert_eq!(fs::read_to_string(&fixture.x)?, x_before);
    assert_eq!(fs::read_to_string(&fixture.rx)?, rx_before);

    let content = fs::read_to_string(&fixture.new_entries)?;
    let first = content
        .lines()
        .find(|line| line.starts_with("2022"))
        .unwrap_or_default();
    assert!(first.starts_with("2022-10-08 * \"METRO TRANSIT\""));
    assert!(content.trim_end().ends_with("open Assets:Checking"));

    Ok(())
}

#[test]
fn test_failed_output_reverts_pruned_ledgers() -> Result<()> {
    let settings = Settings::default();
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::create(dir.path())?;
    let x_before = fs::read_to_string(&fixture.x)?;
    let rx_before = fs::read_to_string(&fixture.rx)?;
    let unreachable = dir.path().join("missing").join("out.beancount");

    let err = run(
        &fixture.config(Some(unreachable.clone())),
        &settings,
        &mut Scripted::new(["y", "y"]),
    )
    .unwrap_err();

    let err = err.downcast_ref::<WriteError>().unwrap();
    assert_eq!(err.path, unreachable);
    assert!(!err.overwrite);
    assert!(err.reverted.contains(&fixture.x));
    assert!(err.reverted.contains(&fixture.rx));

    assert_eq!(fs::read_to_string(&fixture.x)?, x_before);
    assert_eq!(fs::read_to_string(&fixture.rx)?, rx_before);
    assert!(!unreachable.exists());

    Ok(())
}

#[test]
fn test_definitions_are_not_a_ledger() -> Result<()> {
    let settings = Settings::default();
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::create(dir.path())?;
    let definitions = create_file(FileKind::Definitions, Some(dir.path()), None, &settings)?;

    let config = ReconcileConfig {
        ledgers: vec![fixture.x.clone(), definitions],
        ..fixture.config(None)
    };
    let mut operator = Scripted::default();
    let err = run(&config, &settings, &mut operator).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<FileError>(),
        Some(FileError::NotLedgerFile(_))
    ));
    assert!(operator.transcript().is_empty());

    Ok(())
}

const EXTRACTION: &str = r#"
**** /home/me/statements/checking.csv

2022-10-01 balance Assets:Checking  1000.00 USD

2022-10-06 * "SOUTHERN EDISON" ""
  Assets:Checking  -65.00 USD
  Expenses:Electricity

2022-10-08 * "METRO TRANSIT" ""
  Assets:Checking  -30.00 USD
  Expenses:Transport

2022-10-09 balance Assets:Checking  905.00 USD
"#;

#[test]
fn test_reconcile_extraction_with_headings_and_balances() -> Result<()> {
    let settings = Settings::default();
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::create(dir.path())?;
    fs::write(
        &fixture.new_entries,
        format!("{}{}", EXTRACTION_HEADER, EXTRACTION),
    )?;
    let mut operator = Scripted::new(["y", "y"]);

    let summary = run(&fixture.config(None), &settings, &mut operator)?;

    assert_eq!(operator.remaining(), 0);
    assert_eq!(summary.reconciled, 2);
    assert_eq!(summary.output, fixture.new_entries);

    let entries = LedgerFile::parse(&summary.output)?.entries()?;
    let balances = entries
        .iter()
        .filter(|entry| {
            matches!(
                entry,
                Entry::Directive(Directive {
                    kind: DirectiveKind::Balance { .. },
                    ..
                })
            )
        })
        .count();
    assert_eq!(balances, 2);
    assert_eq!(
        entries
            .iter()
            .filter_map(Entry::as_transaction)
            .map(|tx| (tx.payee_str(), tx.narration.as_str()))
            .collect_vec(),
        vec![
            ("SOUTHERN EDISON", "Electricity"),
            ("METRO TRANSIT", "Monthly pass"),
        ]
    );

    assert_eq!(payees(&fixture.x)?, vec!["RENT"]);
    assert_eq!(payees(&fixture.rx)?, vec!["Metro"]);

    Ok(())
}

#[test]
fn test_reconcile_writes_merge_left_without_units() -> Result<()> {
    let settings = Settings::default();
    let dir = tempfile::tempdir()?;
    let fixture = Fixture::create(dir.path())?;
    fs::write(
        &fixture.new_entries,
        format!(
            "{}\n{}",
            EXTRACTION_HEADER,
            r#"2022-10-06 * "SOUTHERN EDISON" ""
  Assets:Checking  -65.00 USD
  Expenses:Uncategorized
"#
        ),
    )?;
    let config = ReconcileConfig {
        ledgers: vec![fixture.x.clone()],
        ..fixture.config(Some(dir.path().join("out.beancount")))
    };

    let summary = run(&config, &settings, &mut Scripted::new(["y"]))?;

    assert_eq!(summary.reconciled, 1);
    assert_eq!(summary.removed, vec![(fixture.x.clone(), 1)]);

    let content = fs::read_to_string(&summary.output)?;
    let merged = parse_str(&content)?
        .into_iter()
        .filter_map(|node| match node {
            Node::Entry(Entry::Transaction(tx)) => Some(tx),
            _ => None,
        })
        .collect_vec();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].narration, "Electricity");
    assert_eq!(
        merged[0]
            .postings
            .iter()
            .map(|p| (p.account.as_str(), p.units.is_some()))
            .collect_vec(),
        vec![
            ("Assets:Checking", true),
            ("Expenses:Uncategorized", false),
            ("Expenses:Electricity", false),
        ]
    );
    assert!(LedgerFile::parse(&summary.output)?.transactions().is_err());
    assert_eq!(payees(&fixture.x)?, vec!["RENT"]);

    Ok(())
}
