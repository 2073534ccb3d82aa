use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogClass {
    Info,
    Success,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Exploit,
}

impl LogClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Exploit => "exploit",
        }
    }
}

/// One entry of the backend's cumulative log for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence_index: u64,
    pub class: LogClass,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogEntry {
    pub fn new(sequence_index: u64, class: LogClass, text: impl Into<String>) -> Self {
        Self {
            sequence_index,
            class,
            timestamp: Utc::now(),
            text: text.into(),
        }
    }
}

/// Explicit session status a backend may attach to a log response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Running,
    Completed,
    Failed,
}

/// One poll response: the full ordered log so far, never an increment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    pub entries: Vec<LogEntry>,
    pub status: Option<RemoteStatus>,
}

impl LogSnapshot {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self { entries, status: None }
    }

    pub fn with_status(mut self, status: RemoteStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LineSource {
    /// Position of the entry in the backend's cumulative list
    Backend { sequence_index: u64 },
    /// Optimistic local echo of an operator command
    Echo,
}

/// A line of the displayed buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub source: LineSource,
    pub class: LogClass,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogLine {
    pub fn from_backend(sequence_index: u64, entry: &LogEntry) -> Self {
        Self {
            source: LineSource::Backend { sequence_index },
            class: entry.class,
            timestamp: entry.timestamp,
            text: entry.text.clone(),
        }
    }

    pub fn echo(command: &str) -> Self {
        Self {
            source: LineSource::Echo,
            class: LogClass::Info,
            timestamp: Utc::now(),
            text: format!("> {}", command),
        }
    }

    pub fn is_echo(&self) -> bool {
        self.source == LineSource::Echo
    }
}

/// The un-rendered tail of a cumulative response.
#[derive(Debug)]
pub struct LogDelta<'a> {
    /// Cursor position before the advance
    pub start: usize,
    pub entries: &'a [LogEntry],
}

impl LogDelta<'_> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delta entries paired with their sequence index in the cumulative list.
    pub fn indexed(&self) -> impl Iterator<Item = (u64, &LogEntry)> + '_ {
        self.entries.iter()
            .enumerate()
            .map(move |(i, e)| ((self.start + i) as u64, e))
    }
}

/// Count of backend entries already rendered. Never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    position: usize,
}

impl LogCursor {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Consume `server[position..]` and move the cursor to `server.len()`.
    ///
    /// A response shorter than what was already consumed yields an empty
    /// delta and leaves the cursor where it is.
    pub fn advance<'a>(&mut self, server: &'a [LogEntry]) -> LogDelta<'a> {
        let start = self.position;
        if server.len() <= start {
            return LogDelta { start, entries: &[] };
        }
        self.position = server.len();
        LogDelta { start, entries: &server[start..] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<LogEntry> {
        (0..n).map(|i| LogEntry::new(i as u64, LogClass::Info, format!("log{}", i))).collect()
    }

    #[test]
    fn test_advance_consumes_only_tail() {
        let mut cursor = LogCursor::default();
        let l1 = entries(1);
        let l2 = entries(2);

        let d1 = cursor.advance(&l1);
        assert_eq!(d1.entries.len(), 1);
        assert_eq!(cursor.position(), 1);

        let d2 = cursor.advance(&l2);
        assert_eq!(d2.start, 1);
        assert_eq!(d2.entries[0].text, "log1");
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_repeated_response_yields_nothing() {
        let mut cursor = LogCursor::default();
        let l = entries(3);
        cursor.advance(&l);
        assert!(cursor.advance(&l).is_empty());
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_shorter_response_never_rewinds() {
        let mut cursor = LogCursor::default();
        cursor.advance(&entries(5));
        let shorter = entries(2);
        let delta = cursor.advance(&shorter);
        assert!(delta.is_empty());
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn test_indexed_uses_cumulative_positions() {
        let mut cursor = LogCursor::default();
        cursor.advance(&entries(2));
        let l = entries(4);
        let delta = cursor.advance(&l);
        let idx: Vec<u64> = delta.indexed().map(|(i, _)| i).collect();
        assert_eq!(idx, vec![2, 3]);
    }

    #[test]
    fn test_echo_line_format() {
        let line = LogLine::echo("whoami");
        assert_eq!(line.text, "> whoami");
        assert_eq!(line.class, LogClass::Info);
        assert!(line.is_echo());
    }

    #[test]
    fn test_warn_alias() {
        let class: LogClass = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(class, LogClass::Warning);
    }
}
