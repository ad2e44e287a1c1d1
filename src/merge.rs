use crate::model::{Meta, MetaValue, Transaction, TAGS_X};

/// Scheduling controls of expected transactions, never carried over.
pub const RESERVED_META: [&str; 3] = ["final", "roll", "freq"];

fn fill_meta<'a>(target: &mut Meta, source: impl IntoIterator<Item = (&'a String, &'a MetaValue)>) {
    for (key, value) in source {
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

/// Fold what only the expected transaction knows into the actual one. The
/// actual transaction stays authoritative: its date, flag, payee, postings
/// and declared amounts are kept, gaps are filled from `expected`.
///
/// Interpolated amounts on either side are treated as absent.
pub fn merge(expected: &Transaction, actual: &Transaction) -> Transaction {
    let expected = expected.reverse_automatic_balancing();
    let mut merged = actual.reverse_automatic_balancing();

    if merged.narration.is_empty() {
        merged.narration = expected.narration.clone();
    }

    merged.tags.extend(
        expected
            .tags
            .iter()
            .filter(|tag| !TAGS_X.contains(&tag.as_str()))
            .cloned(),
    );

    fill_meta(
        &mut merged.meta,
        expected
            .meta
            .iter()
            .filter(|(key, _)| !RESERVED_META.contains(&key.as_str())),
    );

    for posting in expected.postings.iter() {
        match merged
            .postings
            .iter_mut()
            .find(|existing| existing.account == posting.account)
        {
            Some(existing) => {
                fill_meta(&mut existing.meta, posting.meta.iter());
                if existing.units.is_none() {
                    existing.units = posting.units.clone();
                }
            }
            None => merged.postings.push(posting.clone()),
        }
    }

    merged
}
