use chrono::{Months, NaiveDate};
use core::fmt::{Display, Formatter};
use ohno::app_err;
use serde::{Deserialize, Serialize};

/// An inclusive range of calendar days that activity must fall into.
///
/// When a run has no window, all-time activity is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    /// Create a window, rejecting one that ends before it starts.
    pub fn new(start: NaiveDate, end: NaiveDate) -> crate::Result<Self> {
        if end < start {
            return Err(app_err!("time window ends ({end}) before it starts ({start})"));
        }

        Ok(Self { start, end })
    }

    /// The window covering the last `months` months up to and including `today`.
    pub fn last_months(months: u32, today: NaiveDate) -> crate::Result<Self> {
        let start = today
            .checked_sub_months(Months::new(months))
            .ok_or_else(|| app_err!("a window of {months} months reaches before the supported date range"))?;

        Ok(Self { start, end: today })
    }

    /// Search qualifier restricting results to items created within the window.
    #[must_use]
    pub fn search_qualifier(&self) -> String {
        format!("created:{}..{}", self.start, self.end)
    }

    /// Lower bound for listings that take an ISO 8601 timestamp.
    #[must_use]
    pub fn since(&self) -> String {
        format!("{}T00:00:00Z", self.start)
    }

    /// Upper bound for listings that take an ISO 8601 timestamp.
    #[must_use]
    pub fn until(&self) -> String {
        format!("{}T23:59:59Z", self.end)
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// How a run's window is configured.
///
/// A relative setting is anchored on the day a pair starts fetching. The dates it resolves to
/// are kept in the pair's checkpoint, so a pair resumed on a later day keeps its original
/// dates and a finished pair stays finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSetting {
    #[default]
    AllTime,
    LastMonths(u32),
    Fixed(TimeWindow),
}

impl WindowSetting {
    /// The dates this setting covers when anchored on `today`.
    pub fn resolve(self, today: NaiveDate) -> crate::Result<Option<TimeWindow>> {
        match self {
            Self::AllTime => Ok(None),
            Self::LastMonths(months) => TimeWindow::last_months(months, today).map(Some),
            Self::Fixed(window) => Ok(Some(window)),
        }
    }
}

impl Display for WindowSetting {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AllTime => write!(f, "all time"),
            Self::LastMonths(months) => write!(f, "last {months} month(s)"),
            Self::Fixed(window) => write!(f, "{window}"),
        }
    }
}
