//! Parsing of six-field cron expressions into per-field value sets.
//!
//! Each whitespace-delimited field is parsed independently into a [`FieldSpec`]
//! bit set. The token grammar per field is `*`, a single value, a range `a-b`,
//! a step `a/n`, `a-b/n` or `*/n`, and comma-separated lists of those. Months
//! and days of the week additionally accept case-insensitive three-letter
//! names, and the day fields accept a lone `?` as an alias for `*`.

use std::fmt::{self, Display, Formatter};

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1},
    combinator::{map, map_res, opt},
    IResult,
};
use thiserror::Error;

/// One of the six positional fields of a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    /// The smallest legal value for this field.
    pub const fn min(self) -> u32 {
        match self {
            Field::Second | Field::Minute | Field::Hour | Field::DayOfWeek => 0,
            Field::DayOfMonth | Field::Month => 1,
        }
    }

    /// The largest legal value for this field. Day of the week admits a raw 7,
    /// which [`FieldSpec::parse`] folds back onto Sunday (0).
    pub const fn max(self) -> u32 {
        match self {
            Field::Second | Field::Minute => 59,
            Field::Hour => 23,
            Field::DayOfMonth => 31,
            Field::Month => 12,
            Field::DayOfWeek => 7,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Field::Second => "second",
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    const fn accepts_question_mark(self) -> bool {
        matches!(self, Field::DayOfMonth | Field::DayOfWeek)
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error returned when a cron expression fails to parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronParseError {
    /// The expression does not split into exactly six fields.
    #[error("expected 6 whitespace-separated cron fields, found {0}")]
    FieldCount(usize),
    /// A token does not fit the field grammar.
    #[error("malformed {field} field: {text:?}")]
    Malformed { field: Field, text: String },
    /// A value lies outside the field's legal range.
    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: Field,
        value: u32,
        min: u32,
        max: u32,
    },
    /// A range's lower bound exceeds its upper bound.
    #[error("descending {field} range {start}-{end}")]
    DescendingRange { field: Field, start: u32, end: u32 },
    /// A step divisor of zero.
    #[error("step in {field} field must be positive")]
    ZeroStep { field: Field },
}

/// The set of values a single cron field accepts, one bit per value.
///
/// Bit `v` set means the field matches the value `v`: seconds and minutes use
/// bits 0-59, hours 0-23, days of the month 1-31, months 1-12, and days of the
/// week 0-6 with 0 meaning Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    field: Field,
    bits: u64,
}

impl FieldSpec {
    /// Parses one cron field into its value set.
    pub fn parse(field: Field, text: &str) -> Result<Self, CronParseError> {
        // Quartz-style "no constraint" marker, same as '*'. Only valid as the
        // entire field, not as a list member.
        if text == "?" {
            return if field.accepts_question_mark() {
                Ok(Self {
                    field,
                    bits: all_bits(field),
                })
            } else {
                Err(CronParseError::Malformed {
                    field,
                    text: text.to_string(),
                })
            };
        }

        let mut bits = 0u64;
        for token in text.split(',') {
            bits |= token_bits(field, token)?;
        }
        if field == Field::DayOfWeek {
            // 7 is an alias for Sunday
            if bits & (1 << 7) != 0 {
                bits = (bits | 1) & !(1 << 7);
            }
        }
        Ok(Self { field, bits })
    }

    /// The field this set belongs to.
    pub fn field(&self) -> Field {
        self.field
    }

    /// Returns whether the set contains `value`.
    #[inline]
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits >> value & 1 == 1
    }

    /// The smallest value in the set. The set is never empty: every grammar
    /// token contributes at least its start value.
    #[inline]
    pub fn first(&self) -> u32 {
        self.bits.trailing_zeros()
    }

    /// The smallest value in the set at or above `value`, if any.
    #[inline]
    pub fn next_from(&self, value: u32) -> Option<u32> {
        // clear the values we're already past, then count trailing zeros
        // to find the first set bit
        let bottom_cleared = (self.bits >> value) << value;
        if bottom_cleared != 0 {
            Some(bottom_cleared.trailing_zeros())
        } else {
            None
        }
    }

    /// Returns whether the set accepts every legal value for its field, i.e.
    /// the field is unrestricted.
    #[inline]
    pub fn is_all(&self) -> bool {
        self.bits == all_bits(self.field)
    }

    #[inline]
    pub(crate) fn bits(&self) -> u64 {
        self.bits
    }
}

impl Display for FieldSpec {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_all() {
            return f.write_str("*");
        }
        let mut values = (0..64).filter(|&v| self.contains(v));
        if let Some(first) = values.next() {
            write!(f, "{}", first)?;
        }
        for value in values {
            write!(f, ",{}", value)?;
        }
        Ok(())
    }
}

/// Splits an expression on whitespace and parses the six fields positionally.
pub(crate) fn parse_fields(expression: &str) -> Result<[FieldSpec; 6], CronParseError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(CronParseError::FieldCount(fields.len()));
    }
    Ok([
        FieldSpec::parse(Field::Second, fields[0])?,
        FieldSpec::parse(Field::Minute, fields[1])?,
        FieldSpec::parse(Field::Hour, fields[2])?,
        FieldSpec::parse(Field::DayOfMonth, fields[3])?,
        FieldSpec::parse(Field::Month, fields[4])?,
        FieldSpec::parse(Field::DayOfWeek, fields[5])?,
    ])
}

fn all_bits(field: Field) -> u64 {
    // day-of-week raw max is 7, but the canonical set runs 0-6
    let max = match field {
        Field::DayOfWeek => 6,
        _ => field.max(),
    };
    range_bits(field.min(), max, 1)
}

fn range_bits(start: u32, end: u32, step: u32) -> u64 {
    (start..=end)
        .step_by(step as usize)
        .fold(0, |bits, value| bits | 1 << value)
}

/// One comma-separated token of a field, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawToken {
    All,
    AllStep(u32),
    One(u32),
    Range(u32, u32),
    Step(u32, u32),
    RangeStep(u32, u32, u32),
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse)(input)
}

fn month_name(input: &str) -> IResult<&str, u32> {
    alt((
        map(tag_no_case("JAN"), |_| 1),
        map(tag_no_case("FEB"), |_| 2),
        map(tag_no_case("MAR"), |_| 3),
        map(tag_no_case("APR"), |_| 4),
        map(tag_no_case("MAY"), |_| 5),
        map(tag_no_case("JUN"), |_| 6),
        map(tag_no_case("JUL"), |_| 7),
        map(tag_no_case("AUG"), |_| 8),
        map(tag_no_case("SEP"), |_| 9),
        map(tag_no_case("OCT"), |_| 10),
        map(tag_no_case("NOV"), |_| 11),
        map(tag_no_case("DEC"), |_| 12),
    ))(input)
}

fn day_name(input: &str) -> IResult<&str, u32> {
    alt((
        map(tag_no_case("SUN"), |_| 0),
        map(tag_no_case("MON"), |_| 1),
        map(tag_no_case("TUE"), |_| 2),
        map(tag_no_case("WED"), |_| 3),
        map(tag_no_case("THU"), |_| 4),
        map(tag_no_case("FRI"), |_| 5),
        map(tag_no_case("SAT"), |_| 6),
    ))(input)
}

fn value(field: Field) -> impl Fn(&str) -> IResult<&str, u32> {
    move |input| match field {
        Field::Month => alt((number, month_name))(input),
        Field::DayOfWeek => alt((number, day_name))(input),
        _ => number(input),
    }
}

/// Parses a single token: `*`, `*/n`, a value, a range, or a step.
fn raw_token(field: Field) -> impl Fn(&str) -> IResult<&str, RawToken> {
    move |input: &str| {
        let (input, star) = opt(char('*'))(input)?;
        if star.is_some() {
            return match opt(char('/'))(input)? {
                (input, Some(_)) => map(number, RawToken::AllStep)(input),
                (input, None) => Ok((input, RawToken::All)),
            };
        }
        let (input, start) = value(field)(input)?;
        match opt(alt((char('/'), char('-'))))(input)? {
            (input, Some('/')) => map(number, |step| RawToken::Step(start, step))(input),
            (input, Some('-')) => {
                let (input, end) = value(field)(input)?;
                match opt(char('/'))(input)? {
                    (input, Some(_)) => {
                        map(number, |step| RawToken::RangeStep(start, end, step))(input)
                    }
                    (input, None) => Ok((input, RawToken::Range(start, end))),
                }
            }
            (input, _) => Ok((input, RawToken::One(start))),
        }
    }
}

fn token_bits(field: Field, token: &str) -> Result<u64, CronParseError> {
    let malformed = || CronParseError::Malformed {
        field,
        text: token.to_string(),
    };

    let (rest, raw) = raw_token(field)(token).map_err(|_| malformed())?;
    if !rest.is_empty() {
        return Err(malformed());
    }

    let (min, max) = (field.min(), field.max());
    let check = |value: u32| {
        if value < min || value > max {
            Err(CronParseError::OutOfRange {
                field,
                value,
                min,
                max,
            })
        } else {
            Ok(value)
        }
    };
    let check_step = |step: u32| {
        if step == 0 {
            Err(CronParseError::ZeroStep { field })
        } else {
            Ok(step)
        }
    };
    let check_range = |start: u32, end: u32| {
        let start = check(start)?;
        let end = check(end)?;
        if start > end {
            Err(CronParseError::DescendingRange { field, start, end })
        } else {
            Ok((start, end))
        }
    };

    Ok(match raw {
        RawToken::All => all_bits(field),
        RawToken::AllStep(step) => range_bits(min, max, check_step(step)?),
        RawToken::One(value) => 1 << check(value)?,
        RawToken::Step(start, step) => range_bits(check(start)?, max, check_step(step)?),
        RawToken::Range(start, end) => {
            let (start, end) = check_range(start, end)?;
            range_bits(start, end, 1)
        }
        RawToken::RangeStep(start, end, step) => {
            let (start, end) = check_range(start, end)?;
            range_bits(start, end, check_step(step)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(field: Field, text: &str) -> FieldSpec {
        FieldSpec::parse(field, text).expect("field should parse")
    }

    fn values(spec: FieldSpec) -> Vec<u32> {
        (0..64).filter(|&v| spec.contains(v)).collect()
    }

    #[test]
    fn star_covers_every_legal_value() {
        assert_eq!(
            values(spec(Field::Second, "*")),
            (0..=59).collect::<Vec<_>>()
        );
        assert_eq!(values(spec(Field::Hour, "*")), (0..=23).collect::<Vec<_>>());
        assert_eq!(
            values(spec(Field::DayOfMonth, "*")),
            (1..=31).collect::<Vec<_>>()
        );
        assert_eq!(
            values(spec(Field::Month, "*")),
            (1..=12).collect::<Vec<_>>()
        );
        assert_eq!(
            values(spec(Field::DayOfWeek, "*")),
            (0..=6).collect::<Vec<_>>()
        );
    }

    #[test]
    fn single_values_and_lists() {
        assert_eq!(values(spec(Field::Minute, "30")), vec![30]);
        assert_eq!(values(spec(Field::Minute, "3,1,2")), vec![1, 2, 3]);
        // a list unions its tokens
        let list = spec(Field::Second, "10,20,30");
        for single in &["10", "20", "30"] {
            let single = spec(Field::Second, single);
            assert_eq!(single.bits() & list.bits(), single.bits());
        }
    }

    #[test]
    fn ranges() {
        assert_eq!(values(spec(Field::Hour, "8-11")), vec![8, 9, 10, 11]);
        assert_eq!(values(spec(Field::Hour, "8-8")), vec![8]);
    }

    #[test]
    fn steps() {
        assert_eq!(values(spec(Field::Minute, "*/15")), vec![0, 15, 30, 45]);
        assert_eq!(values(spec(Field::Minute, "57/2")), vec![57, 59]);
        assert_eq!(values(spec(Field::Hour, "0-10/3")), vec![0, 3, 6, 9]);
        assert_eq!(values(spec(Field::Month, "1/3")), vec![1, 4, 7, 10]);
    }

    #[test]
    fn month_names_resolve_case_insensitively() {
        assert_eq!(values(spec(Field::Month, "JAN")), vec![1]);
        assert_eq!(values(spec(Field::Month, "dec")), vec![12]);
        assert_eq!(values(spec(Field::Month, "Jun-Sep")), vec![6, 7, 8, 9]);
    }

    #[test]
    fn day_names_resolve_case_insensitively() {
        assert_eq!(values(spec(Field::DayOfWeek, "SUN")), vec![0]);
        assert_eq!(
            values(spec(Field::DayOfWeek, "mon-fri")),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(values(spec(Field::DayOfWeek, "sat")), vec![6]);
    }

    #[test]
    fn day_of_week_seven_folds_to_sunday() {
        assert_eq!(values(spec(Field::DayOfWeek, "7")), vec![0]);
        assert_eq!(values(spec(Field::DayOfWeek, "5-7")), vec![0, 5, 6]);
        assert_eq!(spec(Field::DayOfWeek, "7"), spec(Field::DayOfWeek, "0"));
    }

    #[test]
    fn question_mark_is_all_for_day_fields_only() {
        assert!(spec(Field::DayOfMonth, "?").is_all());
        assert!(spec(Field::DayOfWeek, "?").is_all());
        assert_eq!(
            FieldSpec::parse(Field::Minute, "?"),
            Err(CronParseError::Malformed {
                field: Field::Minute,
                text: "?".to_string()
            })
        );
    }

    #[test]
    fn question_mark_is_rejected_inside_a_list() {
        // a lone '?' means unconstrained; mixed into a list it would silently
        // widen the field, so it only parses as the whole field
        for text in &["1,?", "?,1", "?-3", "?/2"] {
            match FieldSpec::parse(Field::DayOfWeek, text) {
                Err(CronParseError::Malformed { field, .. }) => {
                    assert_eq!(field, Field::DayOfWeek)
                }
                other => panic!("{:?} should be malformed, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn enumerated_full_range_is_unrestricted() {
        assert!(spec(Field::Hour, "0-23").is_all());
        assert!(spec(Field::DayOfWeek, "0-7").is_all());
        assert!(!spec(Field::Hour, "0-22").is_all());
    }

    #[test]
    fn next_from_reports_exhaustion() {
        let minutes = spec(Field::Minute, "10,20");
        assert_eq!(minutes.first(), 10);
        assert_eq!(minutes.next_from(0), Some(10));
        assert_eq!(minutes.next_from(10), Some(10));
        assert_eq!(minutes.next_from(11), Some(20));
        assert_eq!(minutes.next_from(21), None);
    }

    #[test]
    fn out_of_range_values_name_the_field() {
        assert_eq!(
            FieldSpec::parse(Field::Second, "60"),
            Err(CronParseError::OutOfRange {
                field: Field::Second,
                value: 60,
                min: 0,
                max: 59
            })
        );
        assert_eq!(
            FieldSpec::parse(Field::Month, "0"),
            Err(CronParseError::OutOfRange {
                field: Field::Month,
                value: 0,
                min: 1,
                max: 12
            })
        );
        assert_eq!(
            FieldSpec::parse(Field::DayOfMonth, "1-32"),
            Err(CronParseError::OutOfRange {
                field: Field::DayOfMonth,
                value: 32,
                min: 1,
                max: 31
            })
        );
    }

    #[test]
    fn descending_ranges_are_rejected() {
        assert_eq!(
            FieldSpec::parse(Field::Hour, "11-8"),
            Err(CronParseError::DescendingRange {
                field: Field::Hour,
                start: 11,
                end: 8
            })
        );
    }

    #[test]
    fn zero_steps_are_rejected() {
        assert_eq!(
            FieldSpec::parse(Field::Minute, "*/0"),
            Err(CronParseError::ZeroStep {
                field: Field::Minute
            })
        );
        assert_eq!(
            FieldSpec::parse(Field::Minute, "5-30/0"),
            Err(CronParseError::ZeroStep {
                field: Field::Minute
            })
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for text in &["", "-", "1-", "/5", "1//2", "*-5", "MONDAY", "JANUARY", "x"] {
            match FieldSpec::parse(Field::DayOfWeek, text) {
                Err(CronParseError::Malformed { field, .. }) => {
                    assert_eq!(field, Field::DayOfWeek)
                }
                other => panic!("{:?} should be malformed, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn field_count_is_checked() {
        assert_eq!(
            parse_fields("* * * * *"),
            Err(CronParseError::FieldCount(5))
        );
        assert_eq!(parse_fields(""), Err(CronParseError::FieldCount(0)));
        assert!(parse_fields("  *  * *   * * *  ").is_ok());
    }
}
