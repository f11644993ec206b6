use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Venue,
    Event,
    Book,
    Checkout,
    Pay,
    Fail,
    Cancel,
    CancelEvent,
    Reschedule,
    Sweep,
}

/// One line of an operator command file.
///
/// `at` sets the replay clock before the command runs. The meaning of the
/// remaining columns depends on `command`; unused ones are left empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub at: DateTime<Utc>,
    pub command: CommandKind,
    #[serde(default)]
    pub user: Option<u64>,
    #[serde(rename = "ref", default)]
    pub label: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
}

/// Reads commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<CommandRecord>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes commands.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BookingError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HEADER: &str = "at,command,user,ref,target,amount,start";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "{HEADER}\n\
             2026-03-02T10:00:00Z, venue, , cafe, Cafe Babel, 12,\n\
             2026-03-02T10:05:00Z, event, 1, spanish, cafe, 1500, 2026-03-04T18:00:00Z\n\
             2026-03-02T10:10:00Z, cancel-event, 1, , spanish, ,"
        );
        let results: Vec<Result<CommandRecord>> =
            CommandReader::new(data.as_bytes()).commands().collect();

        assert_eq!(results.len(), 3);
        let venue = results[0].as_ref().unwrap();
        assert_eq!(venue.command, CommandKind::Venue);
        assert_eq!(venue.user, None);
        assert_eq!(venue.label.as_deref(), Some("cafe"));
        assert_eq!(venue.amount, Some(12));

        let event = results[1].as_ref().unwrap();
        assert_eq!(event.user, Some(1));
        assert_eq!(
            event.start,
            Some(Utc.with_ymd_and_hms(2026, 3, 4, 18, 0, 0).unwrap())
        );

        let cancel = results[2].as_ref().unwrap();
        assert_eq!(cancel.command, CommandKind::CancelEvent);
        assert_eq!(cancel.label, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = format!("{HEADER}\n2026-03-02T10:00:00Z, teleport, 1, x, , ,");
        let results: Vec<Result<CommandRecord>> =
            CommandReader::new(data.as_bytes()).commands().collect();

        assert!(matches!(results[0], Err(BookingError::CsvError(_))));
    }
}
