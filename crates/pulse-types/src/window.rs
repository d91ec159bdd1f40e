use chrono::{
    DateTime, Days, FixedOffset, Months, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use thiserror::Error;

/// Hours west of UTC used for every stored and reported timestamp.
pub const INCIDENT_OFFSET_HOURS: i32 = 7;

/// Error returned for an unusable ingestion window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window must cover at least one day")]
    EmptyWindow,
    #[error("window start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("window of {days} days ending {end} underflows the calendar")]
    OutOfRange { end: NaiveDate, days: u32 },
    #[error("{year}-{month:02} is not a calendar month")]
    InvalidMonth { year: i32, month: u32 },
}

/// The fixed UTC-7 offset.
pub fn incident_offset() -> FixedOffset {
    FixedOffset::west_opt(INCIDENT_OFFSET_HOURS * 3600).expect("UTC-7 is a valid fixed offset")
}

pub fn to_incident_time<Tz: TimeZone>(value: DateTime<Tz>) -> DateTime<FixedOffset> {
    value.with_timezone(&incident_offset())
}

/// Parses an RFC 3339 timestamp from the API (often `Z`-suffixed) into the incident offset.
pub fn parse_api_timestamp(value: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    Ok(to_incident_time(DateTime::parse_from_rfc3339(value.trim())?))
}

/// Canonical text form: second precision with an explicit `-07:00` suffix.
///
/// The first ten characters are the incident-offset calendar date, which the
/// storage layer relies on for date-range scans.
pub fn timestamp_to_text(value: DateTime<FixedOffset>) -> String {
    to_incident_time(value).to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn today() -> NaiveDate {
    to_incident_time(Utc::now()).date_naive()
}

fn at_local_time(date: NaiveDate, time: NaiveTime) -> DateTime<FixedOffset> {
    date.and_time(time)
        .and_local_timezone(incident_offset())
        .single()
        .expect("fixed offsets map local times uniquely")
}

fn start_of_day(date: NaiveDate) -> DateTime<FixedOffset> {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("00:00:00 is a valid time of day");
    at_local_time(date, midnight)
}

/// Inclusive range of incident-offset calendar days to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl IngestWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// `days` calendar days ending on (and including) `end`.
    pub fn ending_on(end: NaiveDate, days: u32) -> Result<Self, WindowError> {
        if days == 0 {
            return Err(WindowError::EmptyWindow);
        }
        let start = end
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or(WindowError::OutOfRange { end, days })?;
        Ok(Self { start, end })
    }

    pub fn last_days(days: u32) -> Result<Self, WindowError> {
        Self::ending_on(today(), days)
    }

    /// Every day of one calendar month.
    pub fn month(year: i32, month: u32) -> Result<Self, WindowError> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(WindowError::InvalidMonth { year, month })?;
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .ok_or(WindowError::InvalidMonth { year, month })?;
        Ok(Self { start, end })
    }

    /// Start of the first day, 00:00:00 at UTC-7.
    pub fn since(&self) -> DateTime<FixedOffset> {
        start_of_day(self.start)
    }

    /// Exclusive upper bound: 00:00:00 at UTC-7 on the day after the last day.
    pub fn until(&self) -> DateTime<FixedOffset> {
        match self.end.succ_opt() {
            Some(next) => start_of_day(next),
            None => at_local_time(
                self.end,
                NaiveTime::from_hms_opt(23, 59, 59).expect("23:59:59 is a valid time of day"),
            ),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn day_count(&self) -> u32 {
        let days = (self.end - self.start).num_days() + 1;
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    /// Every day in the window, oldest first.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take_while(|day| *day <= self.end).collect()
    }
}
