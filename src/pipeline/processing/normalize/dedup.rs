use std::collections::HashMap;

use tracing::{debug, warn};

/// A canonical record with an identity and a measure of completeness
pub trait Keyed {
    fn key(&self) -> &str;

    /// Number of non-empty fields, identity excluded
    fn filled_fields(&self) -> usize;
}

/// Keep one record per key. A later duplicate replaces the kept record only when it
/// has strictly more non-empty fields; the kept record stays at the first position.
/// Returns the records and how many were dropped.
pub fn dedup_by_key<T: Keyed>(records: Vec<T>) -> (Vec<T>, usize) {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        match index.get(record.key()) {
            Some(&position) => {
                dropped += 1;
                let (existing, incoming) = (kept[position].filled_fields(), record.filled_fields());
                warn!(
                    key = record.key(),
                    kept_fields = existing.max(incoming),
                    dropped_fields = existing.min(incoming),
                    "Duplicate record id"
                );
                if incoming > existing {
                    kept[position] = record;
                }
            }
            None => {
                index.insert(record.key().to_string(), kept.len());
                kept.push(record);
            }
        }
    }
    (kept, dropped)
}

/// Fold records sharing a key into the first one with `merge`.
/// Returns the records and how many were folded away.
pub fn merge_by_key<T: Keyed>(records: Vec<T>, merge: impl Fn(&mut T, T)) -> (Vec<T>, usize) {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::with_capacity(records.len());
    let mut merged = 0;

    for record in records {
        match index.get(record.key()) {
            Some(&position) => {
                debug!(key = record.key(), "Merging repeated record");
                merge(&mut kept[position], record);
                merged += 1;
            }
            None => {
                index.insert(record.key().to_string(), kept.len());
                kept.push(record);
            }
        }
    }
    (kept, merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: &'static str,
        values: Vec<&'static str>,
    }

    impl Keyed for Row {
        fn key(&self) -> &str {
            self.id
        }

        fn filled_fields(&self) -> usize {
            self.values.iter().filter(|v| !v.is_empty()).count()
        }
    }

    fn row(id: &'static str, values: &[&'static str]) -> Row {
        Row {
            id,
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_more_complete_duplicate_wins_in_place() {
        let (rows, dropped) = dedup_by_key(vec![
            row("1", &["a", ""]),
            row("2", &["b"]),
            row("1", &["a", "c"]),
        ]);
        assert_eq!(dropped, 1);
        assert_eq!(rows, vec![row("1", &["a", "c"]), row("2", &["b"])]);
    }

    #[test]
    fn test_tie_keeps_the_earlier_record() {
        let (rows, dropped) = dedup_by_key(vec![row("1", &["first"]), row("1", &["second"])]);
        assert_eq!(dropped, 1);
        assert_eq!(rows, vec![row("1", &["first"])]);
    }

    #[test]
    fn test_merge_folds_into_first() {
        let (rows, merged) = merge_by_key(
            vec![row("h", &["x"]), row("g", &[]), row("h", &["y"])],
            |kept, other| kept.values.extend(other.values),
        );
        assert_eq!(merged, 1);
        assert_eq!(rows[0], row("h", &["x", "y"]));
    }
}
