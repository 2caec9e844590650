use crate::ledger::{HistoricalMarks, Roster};
use crate::session::{AttendanceCounters, ScanEvent};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// Where a present mark came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkSource {
    Ledger,
    Session,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterRow {
    pub external_id: String,
    pub identity: String,
    pub status: AttendanceStatus,
    pub source: Option<MarkSource>,
    pub scanned_at: Option<DateTime<Local>>,
}

/// Per-learner attendance for the day, in roster order
#[derive(Debug, Clone, Serialize)]
pub struct RosterReport {
    pub rows: Vec<RosterRow>,
    pub counters: AttendanceCounters,
}

impl RosterReport {
    pub fn build(roster: &Roster, marks: &HistoricalMarks, log: &[ScanEvent]) -> Self {
        let scanned: HashMap<&str, &ScanEvent> =
            log.iter().map(|e| (e.identity.as_str(), e)).collect();

        let rows: Vec<RosterRow> = roster
            .iter()
            .map(|entry| {
                let scan = scanned.get(entry.identity.as_str());
                let source = if marks.is_marked(&entry.identity) {
                    Some(MarkSource::Ledger)
                } else if scan.is_some() {
                    Some(MarkSource::Session)
                } else {
                    None
                };

                RosterRow {
                    external_id: entry.external_id.clone(),
                    identity: entry.identity.clone(),
                    status: if source.is_some() {
                        AttendanceStatus::Present
                    } else {
                        AttendanceStatus::Absent
                    },
                    source,
                    scanned_at: scan.map(|e| DateTime::<Local>::from(e.timestamp)),
                }
            })
            .collect();

        let present = rows
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count();
        let counters = AttendanceCounters {
            present,
            absent: rows.len() - present,
            total: rows.len(),
        };

        Self { rows, counters }
    }

    /// Fixed-width text table followed by the counters
    pub fn to_table(&self) -> String {
        let id_width = self
            .rows
            .iter()
            .map(|r| r.external_id.chars().count())
            .max()
            .unwrap_or(0)
            .max(2);
        let name_width = self
            .rows
            .iter()
            .map(|r| r.identity.chars().count())
            .max()
            .unwrap_or(0)
            .max(4);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<name_width$}  {:<7}  {:<7}  SCANNED",
            "ID", "NAME", "STATUS", "SOURCE"
        );

        for row in &self.rows {
            let status = match row.status {
                AttendanceStatus::Present => "present",
                AttendanceStatus::Absent => "absent",
            };
            let source = match row.source {
                Some(MarkSource::Ledger) => "ledger",
                Some(MarkSource::Session) => "session",
                None => "-",
            };
            let scanned = row
                .scanned_at
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());

            let _ = writeln!(
                out,
                "{:<id_width$}  {:<name_width$}  {:<7}  {:<7}  {}",
                row.external_id, row.identity, status, source, scanned
            );
        }

        let _ = writeln!(
            out,
            "\nPresent: {}  Absent: {}  Total: {}",
            self.counters.present, self.counters.absent, self.counters.total
        );
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RosterEntry;
    use std::time::SystemTime;

    fn sample() -> RosterReport {
        let roster: Roster = ["Alice", "Bob", "Carol"]
            .iter()
            .enumerate()
            .map(|(i, name)| RosterEntry {
                identity: name.to_string(),
                external_id: format!("10{}", i),
                row_index: 13 + i as u32,
            })
            .collect();
        let marks: HistoricalMarks = [("Alice", false), ("Bob", true), ("Carol", false)]
            .into_iter()
            .collect();
        let log = vec![ScanEvent {
            identity: "Alice".to_string(),
            timestamp: SystemTime::now(),
        }];

        RosterReport::build(&roster, &marks, &log)
    }

    #[test]
    fn test_report_statuses() {
        let report = sample();

        assert_eq!(report.rows[0].source, Some(MarkSource::Session));
        assert!(report.rows[0].scanned_at.is_some());
        assert_eq!(report.rows[1].source, Some(MarkSource::Ledger));
        assert_eq!(report.rows[2].status, AttendanceStatus::Absent);
        assert_eq!(
            report.counters,
            AttendanceCounters {
                present: 2,
                absent: 1,
                total: 3
            }
        );
    }

    #[test]
    fn test_report_table_and_json() {
        let report = sample();

        let table = report.to_table();
        assert!(table.lines().next().unwrap().starts_with("ID"));
        assert!(table.contains("Carol"));
        assert!(table.contains("Present: 2  Absent: 1  Total: 3"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["rows"][1]["status"], "Present");
        assert_eq!(json["rows"][1]["source"], "Ledger");
        assert_eq!(json["counters"]["total"], 3);
    }
}
