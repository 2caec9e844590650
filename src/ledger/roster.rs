use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The ledger column that represents today
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerColumn {
    /// 1-indexed worksheet column
    pub column_index: u32,
    /// Day label found under the day number (e.g. "M", "T"); may be empty
    pub day_code: String,
    /// Day of month the column was resolved for
    pub day_of_month: u32,
}

/// One learner row in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub identity: String,
    pub external_id: String,
    /// 1-indexed worksheet row
    pub row_index: u32,
}

/// Learners loaded from the ledger, in sheet order, indexed by identity.
///
/// Identities are unique: the first row carrying an identity owns it.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    by_identity: HashMap<String, usize>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Returns false (and keeps the existing entry) when the
    /// identity is already present.
    pub fn insert(&mut self, entry: RosterEntry) -> bool {
        if self.by_identity.contains_key(&entry.identity) {
            return false;
        }
        self.by_identity
            .insert(entry.identity.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn get(&self, identity: &str) -> Option<&RosterEntry> {
        self.by_identity
            .get(identity)
            .map(|&index| &self.entries[index])
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.iter()
    }
}

impl FromIterator<RosterEntry> for Roster {
    fn from_iter<I: IntoIterator<Item = RosterEntry>>(iter: I) -> Self {
        let mut roster = Roster::new();
        for entry in iter {
            roster.insert(entry);
        }
        roster
    }
}

/// Presence marks found in today's column at load time. Frozen afterwards.
#[derive(Debug, Clone, Default)]
pub struct HistoricalMarks {
    marks: HashMap<String, bool>,
}

impl HistoricalMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, identity: &str, present: bool) {
        self.marks.insert(identity.to_string(), present);
    }

    pub fn is_marked(&self, identity: &str) -> bool {
        self.marks.get(identity).copied().unwrap_or(false)
    }

    /// Number of identities already marked present
    pub fn present_count(&self) -> usize {
        self.marks.values().filter(|&&present| present).count()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, bool)> for HistoricalMarks {
    fn from_iter<I: IntoIterator<Item = (&'a str, bool)>>(iter: I) -> Self {
        let mut marks = HistoricalMarks::new();
        for (identity, present) in iter {
            marks.record(identity, present);
        }
        marks
    }
}

/// Everything a load produces besides the document itself
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub column: Option<LedgerColumn>,
    pub roster: Roster,
    pub marks: HistoricalMarks,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(identity: &str, row: u32) -> RosterEntry {
        RosterEntry {
            identity: identity.to_string(),
            external_id: row.to_string(),
            row_index: row,
        }
    }

    #[test]
    fn test_roster_first_identity_wins() {
        let mut roster = Roster::new();
        assert!(roster.insert(entry("Alice", 13)));
        assert!(roster.insert(entry("Bob", 14)));
        assert!(!roster.insert(entry("Alice", 20)));

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get("Alice").unwrap().row_index, 13);
        assert!(roster.get("Carol").is_none());
        let order: Vec<_> = roster.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(order, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_marks_present_count() {
        let marks: HistoricalMarks = [("Alice", false), ("Bob", true)].into_iter().collect();
        assert_eq!(marks.present_count(), 1);
        assert!(marks.is_marked("Bob"));
        assert!(!marks.is_marked("Alice"));
        assert!(!marks.is_marked("Unknown"));
    }
}
