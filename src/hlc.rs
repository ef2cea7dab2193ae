//! Hybrid Logical Clock timestamps
//!
//! An HLC combines a wall-clock instant (millisecond precision) with a
//! logical counter and the id of the node that issued it. The canonical
//! text form is
//!
//! ```text
//! 2024-05-01T10:00:00.000Z-0000-node-id
//! ```
//!
//! which sorts lexically in the same order as the parsed values. Parsing is
//! lenient: bare RFC 3339 instants, naive `YYYY-MM-DD HH:MM:SS` instants and
//! a space in place of the `T` separator are all accepted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use parking_lot::Mutex;
use thiserror::Error;

/// Largest remote lead over the local wall clock that `receive` accepts
pub const MAX_DRIFT_MS: i64 = 60_000;

/// Length of `YYYY-MM-DDTHH:MM:SS`; no counter separator can appear before it
const DATETIME_PREFIX_LEN: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HlcError {
    #[error("invalid HLC timestamp: {0:?}")]
    Invalid(String),

    #[error("HLC counter overflow at {0}")]
    CounterOverflow(String),

    #[error("remote clock is {drift_ms}ms ahead (max {max_ms}ms)")]
    ClockDrift { drift_ms: i64, max_ms: i64 },
}

/// A parsed HLC timestamp, ordered by `(instant, counter, node)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hlc {
    instant: DateTime<Utc>,
    counter: u16,
    node: String,
}

impl Hlc {
    pub fn new(instant: DateTime<Utc>, counter: u16, node: impl Into<String>) -> Self {
        Self {
            instant: instant.trunc_subsecs(3),
            counter,
            node: node.into(),
        }
    }

    /// Parse any accepted timestamp spelling
    pub fn parse(raw: &str) -> Result<Self, HlcError> {
        let s = raw.trim();

        if let Some(instant) = parse_instant(s) {
            return Ok(Self::new(instant, 0, ""));
        }

        for (idx, _) in s.match_indices('-') {
            if idx < DATETIME_PREFIX_LEN {
                continue;
            }
            let Some(instant) = parse_instant(&s[..idx]) else {
                continue;
            };
            let tail = &s[idx + 1..];
            let (counter, node) = tail.split_once('-').unwrap_or((tail, ""));
            if counter.len() != 4 || !counter.chars().all(|c| c.is_ascii_hexdigit()) {
                continue;
            }
            if let Ok(counter) = u16::from_str_radix(counter, 16) {
                return Ok(Self::new(instant, counter, node));
            }
        }

        Err(HlcError::Invalid(raw.to_string()))
    }

    /// Canonical, lexically sortable form of a raw timestamp.
    ///
    /// Unparseable input is returned unchanged.
    pub fn sort_key(raw: &str) -> String {
        Self::parse(raw)
            .map(|hlc| hlc.to_string())
            .unwrap_or_else(|_| raw.to_string())
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04X}-{}",
            self.instant.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.counter,
            self.node
        )
    }
}

impl FromStr for Hlc {
    type Err = HlcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.replacen(' ', "T", 1);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Per-node clock issuing strictly increasing HLC timestamps
pub struct HlcClock {
    node: String,
    last: Mutex<Hlc>,
}

impl HlcClock {
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            last: Mutex::new(Hlc::new(DateTime::<Utc>::UNIX_EPOCH, 0, node.clone())),
            node,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Issue a timestamp for a local event
    pub fn now(&self) -> Result<Hlc, HlcError> {
        self.now_at(Utc::now())
    }

    /// Fold a remote timestamp into the local clock
    pub fn receive(&self, remote: &Hlc) -> Result<Hlc, HlcError> {
        self.receive_at(remote, Utc::now())
    }

    fn now_at(&self, wall: DateTime<Utc>) -> Result<Hlc, HlcError> {
        let wall = wall.trunc_subsecs(3);
        let mut last = self.last.lock();

        let next = if wall > last.instant {
            Hlc::new(wall, 0, self.node.clone())
        } else {
            let counter = next_counter(&last, last.counter)?;
            Hlc::new(last.instant, counter, self.node.clone())
        };

        *last = next.clone();
        Ok(next)
    }

    fn receive_at(&self, remote: &Hlc, wall: DateTime<Utc>) -> Result<Hlc, HlcError> {
        let wall = wall.trunc_subsecs(3);
        let drift_ms = (remote.instant - wall).num_milliseconds();
        if drift_ms > MAX_DRIFT_MS {
            return Err(HlcError::ClockDrift {
                drift_ms,
                max_ms: MAX_DRIFT_MS,
            });
        }

        let mut last = self.last.lock();
        let instant = wall.max(last.instant).max(remote.instant);

        let counter = if instant == last.instant && instant == remote.instant {
            next_counter(&last, last.counter.max(remote.counter))?
        } else if instant == last.instant {
            next_counter(&last, last.counter)?
        } else if instant == remote.instant {
            next_counter(remote, remote.counter)?
        } else {
            0
        };

        let next = Hlc::new(instant, counter, self.node.clone());
        *last = next.clone();
        Ok(next)
    }
}

fn next_counter(at: &Hlc, counter: u16) -> Result<u16, HlcError> {
    counter
        .checked_add(1)
        .ok_or_else(|| HlcError::CounterOverflow(at.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_canonical() {
        let hlc = Hlc::parse("2024-05-01T10:00:00.123Z-001A-node-1").unwrap();
        assert_eq!(hlc.instant(), ts("2024-05-01T10:00:00.123Z"));
        assert_eq!(hlc.counter(), 0x1A);
        assert_eq!(hlc.node(), "node-1");
        assert_eq!(hlc.to_string(), "2024-05-01T10:00:00.123Z-001A-node-1");
    }

    #[test]
    fn test_parse_space_separator() {
        let spaced = Hlc::parse("2024-05-01 10:00:00.000Z").unwrap();
        let canonical = Hlc::parse("2024-05-01T10:00:00.000Z").unwrap();
        assert_eq!(spaced, canonical);

        let naive = Hlc::parse("2024-05-01 10:00:00").unwrap();
        assert_eq!(naive, canonical);
    }

    #[test]
    fn test_parse_offset_with_counter() {
        let hlc = Hlc::parse("2024-05-01T10:00:00-05:00-0002-abc").unwrap();
        assert_eq!(hlc.instant(), ts("2024-05-01T15:00:00Z"));
        assert_eq!(hlc.counter(), 2);
        assert_eq!(hlc.node(), "abc");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(Hlc::parse("yesterday"), Err(HlcError::Invalid(_))));
        assert!(Hlc::parse("").is_err());
    }

    #[test]
    fn test_ordering() {
        let a = Hlc::parse("2024-05-01T10:00:00.000Z-0000-a").unwrap();
        let b = Hlc::parse("2024-05-01T10:00:00.000Z-0001-a").unwrap();
        let c = Hlc::parse("2024-05-01T10:00:00.001Z-0000-a").unwrap();
        let d = Hlc::parse("2024-05-01T10:00:00.001Z-0000-b").unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert!(a.to_string() < b.to_string());
        assert!(b.to_string() < c.to_string());
    }

    #[test]
    fn test_sort_key() {
        assert_eq!(
            Hlc::sort_key("2024-05-01 10:00:00.000Z"),
            "2024-05-01T10:00:00.000Z-0000-"
        );
        assert_eq!(Hlc::sort_key("not a time"), "not a time");
    }

    #[test]
    fn test_clock_monotonic_within_same_millisecond() {
        let clock = HlcClock::new("server");
        let wall = ts("2024-05-01T10:00:00Z");

        let first = clock.now_at(wall).unwrap();
        let second = clock.now_at(wall).unwrap();
        let behind = clock.now_at(ts("2024-05-01T09:00:00Z")).unwrap();

        assert_eq!(first.counter(), 0);
        assert_eq!(second.counter(), 1);
        assert!(second > first);
        assert!(behind > second);
        assert_eq!(behind.node(), "server");
    }

    #[test]
    fn test_clock_receive_advances_past_remote() {
        let clock = HlcClock::new("server");
        let wall = ts("2024-05-01T10:00:00Z");
        let remote = Hlc::new(ts("2024-05-01T10:00:30Z"), 7, "client");

        let merged = clock.receive_at(&remote, wall).unwrap();
        assert_eq!(merged.instant(), remote.instant());
        assert_eq!(merged.counter(), 8);

        let next = clock.now_at(wall).unwrap();
        assert!(next > remote);
    }

    #[test]
    fn test_clock_rejects_drift() {
        let clock = HlcClock::new("server");
        let wall = ts("2024-05-01T10:00:00Z");
        let remote = Hlc::new(ts("2024-05-01T10:05:00Z"), 0, "client");

        assert!(matches!(
            clock.receive_at(&remote, wall),
            Err(HlcError::ClockDrift { .. })
        ));
    }

    #[test]
    fn test_counter_overflow() {
        let clock = HlcClock::new("server");
        let wall = ts("2024-05-01T10:00:00Z");
        let remote = Hlc::new(wall, u16::MAX, "client");

        assert!(matches!(
            clock.receive_at(&remote, wall),
            Err(HlcError::CounterOverflow(_))
        ));
    }
}
