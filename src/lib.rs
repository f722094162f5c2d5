//! A six-field cron trigger calculator.
//!
//! A [`CronExpression`] is parsed from the classic `sec min hour day-of-month
//! month day-of-week` form, carries a time zone, and computes the next
//! wall-clock instant at which the schedule fires.
//!
//! # Example
//! ```
//! use nextfire::CronExpression;
//! use chrono::{TimeZone, Utc};
//!
//! // noon every weekday
//! let cron = CronExpression::new("0 0 12 * * MON-FRI").unwrap();
//!
//! let saturday = Utc.with_ymd_and_hms(2021, 6, 5, 8, 30, 0).unwrap();
//! assert_eq!(
//!     cron.next_after(saturday).unwrap(),
//!     Utc.with_ymd_and_hms(2021, 6, 7, 12, 0, 0).unwrap()
//! );
//! ```

pub mod parse;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::str::FromStr;

pub use crate::parse::{CronParseError, Field, FieldSpec};

/// Years the next-execution search may roll forward before the schedule is
/// declared unsatisfiable. Four years is enough to reach the next leap day.
const HORIZON_YEARS: i32 = 4;

/// An error returned when a next execution time cannot be computed.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression is well formed but matches no calendar date within the
    /// search horizon, e.g. `0 0 0 31 6 *` (June 31st).
    #[error("cron expression {0:?} does not match any time within {HORIZON_YEARS} years")]
    Unsatisfiable(String),
}

/// The execution history a scheduler hands to the trigger when asking for the
/// next fire time. All fields are optional; an empty context means the task
/// has never run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerContext {
    /// The instant at which the task was last scheduled to fire.
    pub last_scheduled_execution: Option<DateTime<Utc>>,
    /// The instant at which the task actually started.
    pub last_actual_execution: Option<DateTime<Utc>>,
    /// The instant at which the task last finished.
    pub last_completion: Option<DateTime<Utc>>,
}

impl TriggerContext {
    /// The reference instant for a next-fire computation: the last completion
    /// time, clamped up to the last scheduled time in case the clock jumped
    /// backwards between trigger and completion, or now for a fresh task.
    fn reference(&self) -> DateTime<Utc> {
        match self.last_completion {
            Some(completed) => match self.last_scheduled_execution {
                Some(scheduled) if completed < scheduled => scheduled,
                _ => completed,
            },
            None => Utc::now(),
        }
    }
}

/// An immutable, compiled cron schedule.
///
/// Holds one [`FieldSpec`] bit set per field plus the time zone the wall-clock
/// fields are interpreted in. Values are cheap to clone and safe to share
/// across threads; each [`next_after`](CronExpression::next_after) call works
/// on its own transient cursor.
///
/// Equality is defined over the compiled bit sets and the time zone, not the
/// source text, so syntactically different but semantically identical
/// expressions compare equal:
///
/// ```
/// use nextfire::CronExpression;
///
/// let listed: CronExpression = "57,59 * * * * *".parse().unwrap();
/// let stepped: CronExpression = "57/2 * * * * *".parse().unwrap();
/// assert_eq!(listed, stepped);
/// ```
#[derive(Debug, Clone)]
pub struct CronExpression {
    seconds: FieldSpec,
    minutes: FieldSpec,
    hours: FieldSpec,
    days_of_month: FieldSpec,
    months: FieldSpec,
    days_of_week: FieldSpec,
    timezone: Tz,
    source: String,
}

impl FromStr for CronExpression {
    type Err = CronParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for CronExpression {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.seconds == other.seconds
            && self.minutes == other.minutes
            && self.hours == other.hours
            && self.days_of_month == other.days_of_month
            && self.months == other.months
            && self.days_of_week == other.days_of_week
            && self.timezone == other.timezone
    }
}

impl Eq for CronExpression {}

impl Hash for CronExpression {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seconds.hash(state);
        self.minutes.hash(state);
        self.hours.hash(state);
        self.days_of_month.hash(state);
        self.months.hash(state);
        self.days_of_week.hash(state);
        self.timezone.hash(state);
    }
}

impl CronExpression {
    /// Parses a six-field cron expression evaluated in UTC.
    pub fn new(expression: &str) -> Result<Self, CronParseError> {
        Self::with_timezone(expression, Tz::UTC)
    }

    /// Parses a six-field cron expression whose wall-clock fields are
    /// interpreted in the given time zone.
    pub fn with_timezone(expression: &str, timezone: Tz) -> Result<Self, CronParseError> {
        let [seconds, minutes, hours, days_of_month, months, days_of_week] =
            parse::parse_fields(expression)?;
        Ok(Self {
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            timezone,
            source: expression.split_whitespace().collect::<Vec<_>>().join(" "),
        })
    }

    /// The time zone the schedule's wall-clock fields are interpreted in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The source text, with whitespace between fields collapsed.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns whether the schedule matches the given instant, evaluated on
    /// the wall clock in the schedule's time zone.
    ///
    /// # Example
    /// ```
    /// use nextfire::CronExpression;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let cron: CronExpression = "30 */10 * * OCT MON".parse().unwrap();
    /// assert!(cron.contains(Utc.with_ymd_and_hms(2020, 10, 19, 0, 30, 30).unwrap()));
    /// assert!(!cron.contains(Utc.with_ymd_and_hms(2020, 10, 19, 0, 30, 31).unwrap()));
    /// ```
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.timezone).naive_local();
        self.seconds.contains(local.second())
            && self.minutes.contains(local.minute())
            && self.hours.contains(local.hour())
            && self.months.contains(local.month())
            && self.day_matches(local.date())
    }

    /// Returns whether the date satisfies the day-of-month/day-of-week
    /// disjunction: an unrestricted field defers to the other, and if both are
    /// restricted the day matches when either does, as in classic Unix cron.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.days_of_month.is_all(), self.days_of_week.is_all()) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }

    /// Returns whether no calendar day can ever satisfy the day-of-month and
    /// month sets together, e.g. day 31 with only 30-day months. Detecting
    /// this up front keeps [`next_after`](CronExpression::next_after) from
    /// scanning the full horizon for a match that cannot exist.
    fn never_fires(&self) -> bool {
        if !self.days_of_week.is_all() || self.days_of_month.is_all() {
            return false;
        }

        const THIRTY_ONE_DAY_MONTHS: u64 =
            1 << 1 | 1 << 3 | 1 << 5 | 1 << 7 | 1 << 8 | 1 << 10 | 1 << 12;
        const THIRTY_DAY_MONTHS: u64 = 1 << 4 | 1 << 6 | 1 << 9 | 1 << 11;

        let longest = if self.months.bits() & THIRTY_ONE_DAY_MONTHS != 0 {
            31
        } else if self.months.bits() & THIRTY_DAY_MONTHS != 0 {
            30
        } else {
            // February reaches 29 on leap years
            29
        };

        self.days_of_month.first() > longest
    }

    /// Computes the earliest instant strictly after `reference` (rounded up to
    /// the next whole second) at which the schedule fires.
    ///
    /// # Example
    /// ```
    /// use nextfire::CronExpression;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let cron: CronExpression = "0 0 0 29 2 *".parse().unwrap();
    /// let reference = Utc.with_ymd_and_hms(2007, 2, 10, 9, 0, 0).unwrap();
    /// assert_eq!(
    ///     cron.next_after(reference).unwrap(),
    ///     Utc.with_ymd_and_hms(2008, 2, 29, 0, 0, 0).unwrap()
    /// );
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Unsatisfiable`] if no matching wall-clock time
    /// exists within the next [`HORIZON_YEARS`] years, as for `0 0 0 31 6 *`.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        if self.never_fires() {
            return Err(self.unsatisfiable());
        }

        // The cursor lives in wall-clock field space and is only resolved back
        // to an instant once every field is satisfied.
        let mut cursor = self
            .timezone
            .from_utc_datetime(&reference.naive_utc())
            .naive_local()
            .with_nanosecond(0)
            .expect("zero is a valid nanosecond value")
            + Duration::seconds(1);
        let horizon_year = cursor.year() + HORIZON_YEARS;

        // Fixed-point rollover: scan second -> minute -> hour -> day -> month,
        // and whenever a field moves, reset the finer fields and restart the
        // scan. A pass that leaves every field untouched found the match.
        loop {
            if cursor.year() > horizon_year {
                return Err(self.unsatisfiable());
            }

            let time = cursor.time();

            match self.seconds.next_from(time.second()) {
                Some(next) if next == time.second() => {}
                Some(next) => {
                    cursor = cursor
                        .with_second(next)
                        .expect("next second is a valid second value");
                    continue;
                }
                None => {
                    cursor = self.start_of_next_minute(cursor)?;
                    continue;
                }
            }

            match self.minutes.next_from(time.minute()) {
                Some(next) if next == time.minute() => {}
                Some(next) => {
                    cursor = cursor
                        .date()
                        .and_hms_opt(time.hour(), next, 0)
                        .expect("next minute is a valid minute value");
                    continue;
                }
                None => {
                    cursor = self.start_of_next_hour(cursor)?;
                    continue;
                }
            }

            match self.hours.next_from(time.hour()) {
                Some(next) if next == time.hour() => {}
                Some(next) => {
                    cursor = cursor
                        .date()
                        .and_hms_opt(next, 0, 0)
                        .expect("next hour is a valid hour value");
                    continue;
                }
                None => {
                    cursor = self.start_of_next_day(cursor.date())?;
                    continue;
                }
            }

            // Day candidates advance through NaiveDate, so month lengths and
            // leap years are enforced by the calendar itself.
            if !self.day_matches(cursor.date()) {
                cursor = self.start_of_next_day(cursor.date())?;
                continue;
            }

            match self.months.next_from(cursor.month()) {
                Some(next) if next == cursor.month() => {}
                Some(next) => {
                    cursor = first_of_month(cursor.year(), next).and_time(NaiveTime::MIN);
                    continue;
                }
                None => {
                    cursor = first_of_month(cursor.year() + 1, 1).and_time(NaiveTime::MIN);
                    continue;
                }
            }

            match self.resolve_local(cursor, reference) {
                Some(resolved) => return Ok(resolved.with_timezone(&Utc)),
                // The matched wall-clock time falls in a spring-forward gap
                // and has no instant. Resume the search one second later; a
                // schedule pinned entirely inside the gap rolls over to the
                // next day it exists.
                None => cursor += Duration::seconds(1),
            }
        }
    }

    /// Computes the next execution time from a scheduler-supplied context.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Unsatisfiable`] under the same conditions as
    /// [`next_after`](CronExpression::next_after).
    pub fn next_execution_time(
        &self,
        context: &TriggerContext,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(context.reference())
    }

    /// Creates a fused iterator over the fire times strictly after `start`.
    ///
    /// # Example
    /// ```
    /// use nextfire::CronExpression;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let cron: CronExpression = "0 */10 * * * *".parse().unwrap();
    /// let start = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
    /// let times: Vec<_> = cron.iter_after(start).take(3).collect();
    /// assert_eq!(times[0], Utc.with_ymd_and_hms(1970, 1, 1, 0, 10, 0).unwrap());
    /// assert_eq!(times[2], Utc.with_ymd_and_hms(1970, 1, 1, 0, 30, 0).unwrap());
    /// ```
    pub fn iter_after(self, start: DateTime<Utc>) -> Occurrences {
        Occurrences {
            cron: self,
            cursor: Some(start),
        }
    }

    /// Maps a satisfied wall-clock cursor to an absolute instant in the
    /// schedule's zone. An ambiguous time during a fall-back transition
    /// resolves to the earlier offset unless that instant would not be
    /// strictly after the reference; a time inside a spring-forward gap has no
    /// instant at all.
    fn resolve_local(&self, cursor: NaiveDateTime, reference: DateTime<Utc>) -> Option<DateTime<Tz>> {
        match self.timezone.from_local_datetime(&cursor) {
            LocalResult::Single(instant) => Some(instant),
            LocalResult::Ambiguous(earlier, later) => {
                if earlier.with_timezone(&Utc) > reference {
                    Some(earlier)
                } else {
                    Some(later)
                }
            }
            LocalResult::None => None,
        }
    }

    fn start_of_next_minute(&self, cursor: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
        cursor
            .with_second(0)
            .expect("zero is a valid second value")
            .checked_add_signed(Duration::minutes(1))
            .ok_or_else(|| self.unsatisfiable())
    }

    fn start_of_next_hour(&self, cursor: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
        cursor
            .date()
            .and_hms_opt(cursor.hour(), 0, 0)
            .expect("current hour is a valid hour value")
            .checked_add_signed(Duration::hours(1))
            .ok_or_else(|| self.unsatisfiable())
    }

    fn start_of_next_day(&self, date: NaiveDate) -> Result<NaiveDateTime, ScheduleError> {
        date.succ_opt()
            .map(|next| next.and_time(NaiveTime::MIN))
            .ok_or_else(|| self.unsatisfiable())
    }

    fn unsatisfiable(&self) -> ScheduleError {
        ScheduleError::Unsatisfiable(self.source.clone())
    }
}

/// The first day of the given month, carrying into later years as needed.
fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("the first of a month is a valid date")
}

/// An iterator over successive fire times, created with
/// [`CronExpression::iter_after`]. Ends when the schedule has no further
/// matches within the search horizon.
#[derive(Debug, Clone)]
pub struct Occurrences {
    cron: CronExpression,
    cursor: Option<DateTime<Utc>>,
}

impl Occurrences {
    /// Returns the underlying cron expression.
    pub fn cron(&self) -> &CronExpression {
        &self.cron
    }
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor?;
        match self.cron.next_after(cursor) {
            Ok(next) => {
                self.cursor = Some(next);
                Some(next)
            }
            Err(ScheduleError::Unsatisfiable(_)) => {
                self.cursor = None;
                None
            }
        }
    }
}

impl FusedIterator for Occurrences {}
