//! Append-only event log shown in the UI.
//!
//! Every lifecycle event gets one timestamped human-readable line. Entries
//! are also forwarded to the `log` sink, so the terminal and the page tell
//! the same story. The page polls with a cursor, so the log is served
//! incrementally and never mutated in place.

use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line with the current local time.
    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{message}");

        let entry = LogEntry {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            message,
        };
        self.entries.lock().unwrap().push(entry);
    }

    /// Entries from `since` on, plus the cursor to pass next time.
    pub fn entries_since(&self, since: usize) -> (usize, Vec<LogEntry>) {
        let entries = self.entries.lock().unwrap();
        let start = since.min(entries.len());
        (entries.len(), entries[start..].to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entries_are_appended_in_order() {
        let log = EventLog::new();
        log.append("first");
        log.append("second");

        let (next, entries) = log.entries_since(0);
        assert_eq!(next, 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn cursor_skips_already_seen_entries() {
        let log = EventLog::new();
        log.append("first");
        let (next, _) = log.entries_since(0);

        log.append("second");
        let (next, entries) = log.entries_since(next);
        assert_eq!(next, 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "second");
    }

    #[test]
    fn cursor_past_the_end_returns_nothing() {
        let log = EventLog::new();
        log.append("only");
        let (next, entries) = log.entries_since(10);
        assert_eq!(next, 1);
        assert!(entries.is_empty());
    }
}
