use crate::ledger::{HistoricalMarks, IdentityValidator, Roster};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// An accepted scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub identity: String,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Payload does not look like an identity
    Invalid,
    NotOnRoster,
}

/// Result of running one payload through the dedup gates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Ignored(IgnoreReason),
    /// Already marked present in the ledger before the session started
    HistoricalDuplicate,
    /// Already accepted earlier in this session
    SessionDuplicate,
    /// Same identity as the last accepted scan, inside the cooldown window
    CooldownSuppressed,
    Accepted(ScanEvent),
}

impl ScanOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ScanOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttendanceCounters {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

/// Last accepted identity and when it was accepted
#[derive(Debug)]
struct Cooldown {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Cooldown {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    fn suppresses(&self, identity: &str, now: Instant) -> bool {
        match &self.last {
            Some((last, at)) => last == identity && now.saturating_duration_since(*at) < self.window,
            None => false,
        }
    }

    fn record(&mut self, identity: &str, now: Instant) {
        self.last = Some((identity.to_string(), now));
    }
}

/// Everything the scanner consults or mutates for one session.
///
/// Owned by a single task; nothing here is shared across threads except the
/// read-only roster.
pub struct SessionState {
    roster: Arc<Roster>,
    marks: HistoricalMarks,
    log: Vec<ScanEvent>,
    seen: HashSet<String>,
    cooldown: Cooldown,
    validator: Arc<dyn IdentityValidator>,
}

impl SessionState {
    pub fn new(
        roster: Arc<Roster>,
        marks: HistoricalMarks,
        validator: Arc<dyn IdentityValidator>,
        cooldown: Duration,
    ) -> Self {
        Self {
            roster,
            marks,
            log: Vec::new(),
            seen: HashSet::new(),
            cooldown: Cooldown::new(cooldown),
            validator,
        }
    }

    /// Run a decoded payload through validation, roster lookup and the dedup gates.
    ///
    /// Gates are checked in order: historical, session, cooldown. Only an
    /// accepted scan changes state.
    pub fn evaluate(&mut self, payload: &str, now: Instant) -> ScanOutcome {
        let identity = payload.trim();

        if !self.validator.is_valid(identity) {
            return ScanOutcome::Ignored(IgnoreReason::Invalid);
        }
        if !self.roster.contains(identity) {
            return ScanOutcome::Ignored(IgnoreReason::NotOnRoster);
        }

        if self.marks.is_marked(identity) {
            return ScanOutcome::HistoricalDuplicate;
        }
        if self.seen.contains(identity) {
            return ScanOutcome::SessionDuplicate;
        }
        // Shadowed by the session gate: anything reaching here was never accepted
        if self.cooldown.suppresses(identity, now) {
            return ScanOutcome::CooldownSuppressed;
        }

        let event = ScanEvent {
            identity: identity.to_string(),
            timestamp: SystemTime::now(),
        };
        self.seen.insert(event.identity.clone());
        self.log.push(event.clone());
        self.cooldown.record(identity, now);

        ScanOutcome::Accepted(event)
    }

    /// Present counts ledger marks plus this session's scans, persisted or not
    pub fn counters(&self) -> AttendanceCounters {
        let total = self.roster.len();
        let present = self.marks.present_count() + self.log.len();

        AttendanceCounters {
            present,
            absent: total.saturating_sub(present),
            total,
        }
    }

    pub fn scan_log(&self) -> &[ScanEvent] {
        &self.log
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn marks(&self) -> &HistoricalMarks {
        &self.marks
    }

    pub fn is_present(&self, identity: &str) -> bool {
        self.marks.is_marked(identity) || self.seen.contains(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_window() {
        let start = Instant::now();
        let mut cooldown = Cooldown::new(Duration::from_secs(1));
        assert!(!cooldown.suppresses("Alice", start));

        cooldown.record("Alice", start);
        assert!(cooldown.suppresses("Alice", start + Duration::from_millis(200)));
        assert!(!cooldown.suppresses("Bob", start + Duration::from_millis(200)));
        assert!(!cooldown.suppresses("Alice", start + Duration::from_secs(1)));

        cooldown.record("Bob", start + Duration::from_millis(300));
        assert!(!cooldown.suppresses("Alice", start + Duration::from_millis(400)));
    }
}
