use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::FrameError;

/// A configured time budget, or the "no timeout" sentinel.
///
/// Textual form: `infinite`, `250ms`, `5s`, `2m`. A bare number is seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeout {
    /// Wait forever.
    #[default]
    Infinite,
    /// Give up after the duration.
    After(Duration),
}

impl Timeout {
    /// Shorthand for [`Timeout::After`] in seconds.
    pub const fn secs(secs: u64) -> Self {
        Timeout::After(Duration::from_secs(secs))
    }

    /// Shorthand for [`Timeout::After`] in milliseconds.
    pub const fn millis(millis: u64) -> Self {
        Timeout::After(Duration::from_millis(millis))
    }

    /// The finite budget, if any.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(duration) => Some(*duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

/// Error returned when a timeout string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timeout '{input}': {reason}")]
pub struct ParseTimeoutError {
    input: String,
    reason: &'static str,
}

impl FromStr for Timeout {
    type Err = ParseTimeoutError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseTimeoutError {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(err("must not be empty"));
        }
        if trimmed.eq_ignore_ascii_case("infinite") || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Timeout::Infinite);
        }

        let (number, scale_ms) = if let Some(num) = trimmed.strip_suffix("ms") {
            (num, 1)
        } else if let Some(num) = trimmed.strip_suffix('s') {
            (num, 1_000)
        } else if let Some(num) = trimmed.strip_suffix('m') {
            (num, 60_000)
        } else {
            (trimmed, 1_000)
        };

        let value: u64 = number.trim().parse().map_err(|_| err("not a number"))?;
        if value == 0 {
            return Err(err("must be greater than zero (use 'infinite' for no timeout)"));
        }
        let millis = value
            .checked_mul(scale_ms)
            .ok_or_else(|| err("out of range"))?;
        Ok(Timeout::After(Duration::from_millis(millis)))
    }
}

impl TryFrom<String> for Timeout {
    type Error = ParseTimeoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeout> for String {
    fn from(timeout: Timeout) -> Self {
        timeout.to_string()
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Infinite => f.write_str("infinite"),
            Timeout::After(duration) => {
                let millis = duration.as_millis();
                if millis % 1_000 != 0 {
                    write!(f, "{millis}ms")
                } else if millis % 60_000 == 0 {
                    write!(f, "{}m", millis / 60_000)
                } else {
                    write!(f, "{}s", millis / 1_000)
                }
            }
        }
    }
}

/// The deadline elapsed before the operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {0:?} elapsed")]
pub struct Elapsed(pub Duration);

impl From<Elapsed> for FrameError {
    fn from(elapsed: Elapsed) -> Self {
        FrameError::TimedOut(elapsed.0)
    }
}

/// A point in time computed once per logical operation.
///
/// Every suspension point of the operation (connect, write, read, pool
/// borrow) waits against the same deadline, so the steps together never
/// exceed the original budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Option<Duration>,
}

impl Deadline {
    /// Start the clock for `timeout` now.
    pub fn new(timeout: Timeout) -> Self {
        match timeout {
            Timeout::Infinite => Self::never(),
            Timeout::After(duration) => Self::after(duration),
        }
    }

    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(duration),
            budget: Some(duration),
        }
    }

    /// A deadline that never elapses.
    pub const fn never() -> Self {
        Self {
            at: None,
            budget: None,
        }
    }

    /// The original budget, `None` for [`Deadline::never`].
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.at, other.at) {
            (None, _) => other,
            (_, None) => self,
            (Some(a), Some(b)) if b < a => other,
            _ => self,
        }
    }

    /// Drive `fut` until it completes or the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        match self.at {
            None => Ok(fut.await),
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| Elapsed(self.budget.unwrap_or_default())),
        }
    }
}

impl From<Timeout> for Deadline {
    fn from(timeout: Timeout) -> Self {
        Deadline::new(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_units() {
        assert_eq!("250ms".parse::<Timeout>().unwrap(), Timeout::millis(250));
        assert_eq!("5s".parse::<Timeout>().unwrap(), Timeout::secs(5));
        assert_eq!("2m".parse::<Timeout>().unwrap(), Timeout::secs(120));
        assert_eq!("3".parse::<Timeout>().unwrap(), Timeout::secs(3));
        assert_eq!("infinite".parse::<Timeout>().unwrap(), Timeout::Infinite);
        assert_eq!("None".parse::<Timeout>().unwrap(), Timeout::Infinite);
    }

    #[test]
    fn parse_timeout_rejects_invalid_values() {
        assert!("0s".parse::<Timeout>().is_err());
        assert!("".parse::<Timeout>().is_err());
        assert!("soon".parse::<Timeout>().is_err());
        assert!("-5s".parse::<Timeout>().is_err());
    }

    #[test]
    fn display_uses_largest_exact_unit() {
        assert_eq!(Timeout::millis(1500).to_string(), "1500ms");
        assert_eq!(Timeout::secs(30).to_string(), "30s");
        assert_eq!(Timeout::secs(180).to_string(), "3m");
        assert_eq!(Timeout::Infinite.to_string(), "infinite");
    }

    #[test]
    fn serde_uses_text_form() {
        let json = serde_json::to_string(&Timeout::millis(750)).unwrap();
        assert_eq!(json, "\"750ms\"");
        let back: Timeout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Timeout::millis(750));
        assert!(serde_json::from_str::<Timeout>("\"nope\"").is_err());
    }

    #[test]
    fn never_deadline_has_no_budget() {
        let deadline = Deadline::new(Timeout::Infinite);
        assert!(deadline.budget().is_none());
        assert!(deadline.remaining().is_none());
        assert!(!deadline.is_expired());
    }

    #[test]
    fn min_picks_earliest() {
        let short = Deadline::after(Duration::from_millis(10));
        let long = Deadline::after(Duration::from_secs(10));
        assert_eq!(short.min(long), short);
        assert_eq!(long.min(short), short);
        assert_eq!(Deadline::never().min(long), long);
        assert_eq!(long.min(Deadline::never()), long);
    }

    #[tokio::test]
    async fn run_reports_elapsed_budget() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result = deadline
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Elapsed(Duration::from_millis(20))));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn run_completes_within_budget() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = deadline.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert!(deadline.remaining().unwrap() <= Duration::from_secs(5));
    }
}
