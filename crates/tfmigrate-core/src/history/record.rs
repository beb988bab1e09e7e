//! In-memory history ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A single applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Migration type (`state` or `multi_state`).
    pub migration_type: String,
    /// Migration name as declared in the migration file.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl Record {
    /// Create a new record.
    pub fn new(
        migration_type: impl Into<String>,
        name: impl Into<String>,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            migration_type: migration_type.into(),
            name: name.into(),
            applied_at,
        }
    }
}

/// Applied migrations keyed by migration file name.
///
/// Keys are file names, not paths, so moving the migration directory keeps
/// the history valid. Only successfully applied migrations are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    records: BTreeMap<String, Record>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a record.
    pub fn add(&mut self, id: impl Into<String>, record: Record) {
        self.records.insert(id.into(), record);
    }

    /// Remove a record, returning it if it existed.
    pub fn delete(&mut self, id: &str) -> Option<Record> {
        self.records.remove(id)
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the history has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether a migration has been recorded.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Look up a record.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Iterate records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.records.iter()
    }
}

impl FromIterator<(String, Record)> for History {
    fn from_iter<T: IntoIterator<Item = (String, Record)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(name: &str) -> Record {
        Record::new("state", name, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_add_overwrites() {
        let mut history = History::new();
        history.add("20201109000001_foo.toml", record("foo"));
        history.add("20201109000001_foo.toml", record("bar"));

        assert_eq!(history.len(), 1);
        assert_eq!(history.get("20201109000001_foo.toml").unwrap().name, "bar");
    }

    #[test]
    fn test_delete_and_clear() {
        let mut history = History::new();
        history.add("a.toml", record("a"));
        history.add("b.toml", record("b"));

        assert!(history.delete("a.toml").is_some());
        assert!(history.delete("a.toml").is_none());
        assert!(!history.contains("a.toml"));
        assert!(history.contains("b.toml"));

        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_iter_is_sorted() {
        let history: History = ["c.toml", "a.toml", "b.toml"]
            .into_iter()
            .map(|id| (id.to_string(), record(id)))
            .collect();

        let keys: Vec<&str> = history.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a.toml", "b.toml", "c.toml"]);
    }
}
