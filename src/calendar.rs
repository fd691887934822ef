//! CF calendars and time units.
//!
//! Model time axes are stored as offsets ("days since 0001-01-01 00:00:00")
//! in calendars that `chrono` does not cover, such as the 365-day "noleap"
//! calendar most ocean models run with. This module converts those offsets
//! to calendar dates, which is only needed to group time steps by month.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{NaiveTime, Timelike};

use crate::error::{PpError, PpResult};

static UNITS_REGEX: OnceLock<regex::Regex> = OnceLock::new();

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Largest day number (in either direction) converted to a date, about three
/// billion years.
const MAX_DAY_NUMBER: i64 = 1 << 40;
const CUMULATIVE_DAYS: [i64; 13] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];
const CUMULATIVE_DAYS_LEAP: [i64; 13] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335, 366];

/// The CF calendars a model time axis may use.
///
/// "standard" and "gregorian" are treated as proleptic Gregorian; model
/// output never crosses the 1582 switch from the Julian calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    /// 365 days every year ("noleap", "365_day")
    NoLeap,
    /// 366 days every year ("all_leap", "366_day")
    AllLeap,
    /// Twelve 30 day months ("360_day")
    Day360,
    /// Leap year every 4 years ("julian")
    Julian,
    /// "standard", "gregorian", "proleptic_gregorian"
    Gregorian,
}

impl FromStr for Calendar {
    type Err = PpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noleap" | "no_leap" | "365_day" => Ok(Self::NoLeap),
            "all_leap" | "366_day" => Ok(Self::AllLeap),
            "360_day" => Ok(Self::Day360),
            "julian" => Ok(Self::Julian),
            "standard" | "gregorian" | "proleptic_gregorian" => Ok(Self::Gregorian),
            _ => Err(PpError::calendar(format!("unknown calendar '{s}'"))),
        }
    }
}

impl Display for Calendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
            Calendar::Julian => "julian",
            Calendar::Gregorian => "proleptic_gregorian",
        };
        write!(f, "{s}")
    }
}

impl Calendar {
    pub fn is_leap(&self, year: i64) -> bool {
        match self {
            Calendar::NoLeap | Calendar::Day360 => false,
            Calendar::AllLeap => true,
            Calendar::Julian => year.rem_euclid(4) == 0,
            Calendar::Gregorian => {
                year.rem_euclid(4) == 0 && (year.rem_euclid(100) != 0 || year.rem_euclid(400) == 0)
            }
        }
    }

    /// Number of days in `month` (1-based) of `year`.
    pub fn days_in_month(&self, year: i64, month: u32) -> PpResult<u32> {
        check_month(month)?;
        let m = month as usize;
        let ndays = match self {
            Calendar::Day360 => 30,
            _ if self.is_leap(year) => CUMULATIVE_DAYS_LEAP[m] - CUMULATIVE_DAYS_LEAP[m - 1],
            _ => CUMULATIVE_DAYS[m] - CUMULATIVE_DAYS[m - 1],
        };
        Ok(ndays as u32)
    }

    /// Days from 0000-01-01 to the first day of `year`.
    fn days_before_year(&self, year: i64) -> i64 {
        match self {
            Calendar::NoLeap => 365 * year,
            Calendar::AllLeap => 366 * year,
            Calendar::Day360 => 360 * year,
            Calendar::Julian => 365 * year + (year + 3).div_euclid(4),
            Calendar::Gregorian => {
                365 * year + (year + 3).div_euclid(4) - (year + 99).div_euclid(100)
                    + (year + 399).div_euclid(400)
            }
        }
    }

    fn days_before_month(&self, year: i64, month: u32) -> i64 {
        let m = (month - 1) as usize;
        match self {
            Calendar::Day360 => 30 * m as i64,
            _ if self.is_leap(year) => CUMULATIVE_DAYS_LEAP[m],
            _ => CUMULATIVE_DAYS[m],
        }
    }

    fn mean_year_length(&self) -> f64 {
        match self {
            Calendar::NoLeap => 365.0,
            Calendar::AllLeap => 366.0,
            Calendar::Day360 => 360.0,
            Calendar::Julian => 365.25,
            Calendar::Gregorian => 365.2425,
        }
    }

    /// Days between 0000-01-01 and the given date.
    pub fn day_number(&self, year: i64, month: u32, day: u32) -> PpResult<i64> {
        let ndays = self.days_in_month(year, month)?;
        if day < 1 || day > ndays {
            return Err(PpError::calendar(format!(
                "day {day} is not valid for month {month} of year {year} in the {self} calendar"
            )));
        }
        Ok(self.days_before_year(year) + self.days_before_month(year, month) + (day - 1) as i64)
    }

    /// Inverse of [`Calendar::day_number`]: (year, month, day).
    ///
    /// Day numbers beyond about three billion years either side of year 0
    /// are a [`PpError::Calendar`].
    pub fn date_from_day_number(&self, day_number: i64) -> PpResult<(i64, u32, u32)> {
        if day_number.unsigned_abs() > MAX_DAY_NUMBER.unsigned_abs() {
            return Err(PpError::calendar(format!(
                "day number {day_number} is outside the supported range of +/-{MAX_DAY_NUMBER}"
            )));
        }

        let mut year = (day_number as f64 / self.mean_year_length()).floor() as i64;
        while self.days_before_year(year) > day_number {
            year -= 1;
        }
        while self.days_before_year(year + 1) <= day_number {
            year += 1;
        }

        let doy = day_number - self.days_before_year(year);
        let mut month = 1;
        while month < 12 && self.days_before_month(year, month + 1) <= doy {
            month += 1;
        }
        let day = doy - self.days_before_month(year, month) + 1;
        Ok((year, month, day as u32))
    }
}

/// A date and time of day in some [`Calendar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarDate {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    /// Seconds since midnight
    pub seconds: f64,
}

impl CalendarDate {
    pub fn new(year: i64, month: u32, day: u32) -> Self {
        Self { year, month, day, seconds: 0.0 }
    }

    pub fn with_seconds(mut self, seconds: f64) -> Self {
        self.seconds = seconds;
        self
    }
}

impl Display for CalendarDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.seconds.round() as u32;
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year,
            self.month,
            self.day,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

/// Unit of a time offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    /// Length of one of this unit in days.
    pub fn in_days(&self) -> f64 {
        match self {
            TimeUnit::Days => 1.0,
            TimeUnit::Hours => 1.0 / 24.0,
            TimeUnit::Minutes => 1.0 / 1440.0,
            TimeUnit::Seconds => 1.0 / SECONDS_PER_DAY,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = PpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => Ok(Self::Days),
            "hours" | "hour" | "hrs" | "hr" | "h" => Ok(Self::Hours),
            "minutes" | "minute" | "mins" | "min" => Ok(Self::Minutes),
            "seconds" | "second" | "secs" | "sec" | "s" => Ok(Self::Seconds),
            _ => Err(PpError::calendar(format!("unknown time unit '{s}'"))),
        }
    }
}

/// Parsed CF time units ("<unit> since <reference date>") together with the
/// calendar, which is everything needed to turn a stored offset into a date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub reference: CalendarDate,
    pub calendar: Calendar,
}

impl TimeUnits {
    /// Parse a units string such as "days since 0001-01-01 00:00:00".
    pub fn parse(units: &str, calendar: Calendar) -> PpResult<Self> {
        let re = UNITS_REGEX.get_or_init(|| {
            regex::Regex::new(
                r"^\s*(?<unit>\w+)\s+since\s+(?<year>-?\d+)-(?<month>\d{1,2})-(?<day>\d{1,2})(?:[T\s]+(?<time>\d{1,2}:\d{1,2}(?::\d{1,2}(?:\.\d*)?)?))?",
            )
            .expect("Could not compile time units regex")
        });

        let caps = re.captures(units).ok_or_else(|| {
            PpError::calendar(format!("'{units}' is not of the form '<unit> since <date>'"))
        })?;

        let unit = TimeUnit::from_str(&caps["unit"])?;
        let year: i64 = caps["year"]
            .parse()
            .map_err(|e| PpError::calendar(format!("bad reference year in '{units}': {e}")))?;
        let month: u32 = caps["month"]
            .parse()
            .map_err(|e| PpError::calendar(format!("bad reference month in '{units}': {e}")))?;
        let day: u32 = caps["day"]
            .parse()
            .map_err(|e| PpError::calendar(format!("bad reference day in '{units}': {e}")))?;
        // Validates the date in this calendar (e.g. Feb 30 only exists in 360_day)
        calendar.day_number(year, month, day)?;

        let seconds = match caps.name("time") {
            Some(m) => parse_time_of_day(m.as_str())?,
            None => 0.0,
        };

        Ok(Self {
            unit,
            reference: CalendarDate::new(year, month, day).with_seconds(seconds),
            calendar,
        })
    }

    /// Convert a stored offset to days since the reference date.
    pub fn to_days(&self, value: f64) -> f64 {
        value * self.unit.in_days()
    }

    /// Convert a length of time in days to this unit.
    pub fn from_days(&self, days: f64) -> f64 {
        days / self.unit.in_days()
    }

    /// Convert a stored offset to a calendar date.
    ///
    /// Non-finite offsets, and offsets too large to be a date (such as a
    /// 1e20 fill value), are a [`PpError::Calendar`].
    pub fn decode(&self, value: f64) -> PpResult<CalendarDate> {
        let reference = self.reference_day_number() as f64 + self.reference.seconds / SECONDS_PER_DAY;
        let total = reference + self.to_days(value);
        if !total.is_finite() || total.abs() >= MAX_DAY_NUMBER as f64 {
            return Err(PpError::calendar(format!(
                "time value {value} cannot be converted to a date in the {} calendar",
                self.calendar
            )));
        }
        let mut day_number = total.floor() as i64;
        // Round to the millisecond so that e.g. 31.0 days is exactly midnight
        let mut millis = ((total - day_number as f64) * SECONDS_PER_DAY * 1000.0).round();
        if millis >= SECONDS_PER_DAY * 1000.0 {
            day_number += 1;
            millis = 0.0;
        }

        let (year, month, day) = self.calendar.date_from_day_number(day_number)?;
        Ok(CalendarDate::new(year, month, day).with_seconds(millis / 1000.0))
    }

    fn reference_day_number(&self) -> i64 {
        // Checked when parsed
        self.calendar
            .day_number(self.reference.year, self.reference.month, self.reference.day)
            .unwrap_or_default()
    }
}

fn parse_time_of_day(s: &str) -> PpResult<f64> {
    let time = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| PpError::calendar(format!("could not parse time of day '{s}': {e}")))?;
    Ok(time.num_seconds_from_midnight() as f64 + time.nanosecond() as f64 * 1e-9)
}

fn check_month(month: u32) -> PpResult<()> {
    if !(1..=12).contains(&month) {
        return Err(PpError::calendar(format!("month must be between 1 and 12, got {month}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::Datelike;
    use rstest::rstest;

    fn units(s: &str, cal: Calendar) -> TimeUnits {
        TimeUnits::parse(s, cal).unwrap()
    }

    #[rstest]
    #[case(Calendar::NoLeap, 2000, 2, 28)]
    #[case(Calendar::Gregorian, 2000, 2, 29)]
    #[case(Calendar::Gregorian, 1900, 2, 28)]
    #[case(Calendar::Julian, 1900, 2, 29)]
    #[case(Calendar::AllLeap, 2001, 2, 29)]
    #[case(Calendar::Day360, 2001, 2, 30)]
    #[case(Calendar::NoLeap, 2001, 12, 31)]
    fn test_days_in_month(#[case] cal: Calendar, #[case] year: i64, #[case] month: u32, #[case] expected: u32) {
        assert_eq!(cal.days_in_month(year, month).unwrap(), expected);
    }

    #[rstest]
    #[case(Calendar::NoLeap)]
    #[case(Calendar::AllLeap)]
    #[case(Calendar::Day360)]
    #[case(Calendar::Julian)]
    #[case(Calendar::Gregorian)]
    fn test_day_number_inverse(#[case] cal: Calendar) {
        for dn in (-800..800).chain(729_000..732_000) {
            let (y, m, d) = cal.date_from_day_number(dn).unwrap();
            assert_eq!(cal.day_number(y, m, d).unwrap(), dn, "{cal} day number {dn} -> {y}-{m}-{d}");
        }
    }

    #[test]
    fn test_gregorian_matches_chrono() {
        let cal = Calendar::Gregorian;
        let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        let epoch_dn = cal.day_number(1, 1, 1).unwrap();
        for offset in [0, 59, 365, 10_000, 730_000] {
            let date = epoch + chrono::Duration::days(offset);
            let (y, m, d) = cal.date_from_day_number(epoch_dn + offset).unwrap();
            assert_eq!((y, m, d), (date.year() as i64, date.month(), date.day()));
        }
    }

    #[test]
    fn test_parse_units() {
        let u = units("days since 0001-01-01 00:00:00", Calendar::NoLeap);
        assert_eq!(u.unit, TimeUnit::Days);
        assert_eq!(u.reference, CalendarDate::new(1, 1, 1));

        let u = units("hours since 1979-01-01T06:30", Calendar::Gregorian);
        assert_eq!(u.unit, TimeUnit::Hours);
        assert_abs_diff_eq!(u.reference.seconds, 6.0 * 3600.0 + 30.0 * 60.0);

        let u = units("seconds since 1900-1-1", Calendar::Gregorian);
        assert_eq!(u.reference, CalendarDate::new(1900, 1, 1));

        assert!(TimeUnits::parse("days after 0001-01-01", Calendar::NoLeap).is_err());
        assert!(TimeUnits::parse("fortnights since 0001-01-01", Calendar::NoLeap).is_err());
        assert!(TimeUnits::parse("days since 0001-02-30", Calendar::NoLeap).is_err());
        assert!(TimeUnits::parse("days since 0001-02-30", Calendar::Day360).is_ok());
    }

    #[test]
    fn test_decode() {
        let u = units("days since 0001-01-01 00:00:00", Calendar::NoLeap);
        let d = u.decode(15.5).unwrap();
        assert_eq!((d.year, d.month, d.day), (1, 1, 16));
        assert_abs_diff_eq!(d.seconds, 43_200.0);
        let d = u.decode(365.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (2, 1, 1));
        let d = u.decode(59.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (1, 3, 1));

        let u = units("days since 1900-01-01", Calendar::Gregorian);
        let d = u.decode(59.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (1900, 3, 1));

        let u = units("days since 1900-01-01", Calendar::Julian);
        let d = u.decode(59.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (1900, 2, 29));

        let u = units("days since 2000-01-01", Calendar::Day360);
        let d = u.decode(30.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (2000, 2, 1));

        let u = units("hours since 2000-01-01", Calendar::Gregorian);
        let d = u.decode(36.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (2000, 1, 2));
        assert_abs_diff_eq!(d.seconds, 43_200.0);

        let u = units("days since 2000-01-01", Calendar::NoLeap);
        let d = u.decode(-1.0).unwrap();
        assert_eq!((d.year, d.month, d.day), (1999, 12, 31));
    }

    #[rstest]
    #[case(1.0e20)]
    #[case(-1.0e20)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn test_decode_out_of_range(#[case] value: f64) {
        let u = units("days since 0001-01-01 00:00:00", Calendar::NoLeap);
        assert!(matches!(u.decode(value).unwrap_err(), PpError::Calendar(_)));
    }

    #[test]
    fn test_date_from_day_number_range() {
        assert!(Calendar::Gregorian.date_from_day_number(MAX_DAY_NUMBER).is_ok());
        assert!(Calendar::Gregorian.date_from_day_number(-MAX_DAY_NUMBER).is_ok());
        assert!(Calendar::Gregorian.date_from_day_number(i64::MAX).is_err());
        assert!(Calendar::NoLeap.date_from_day_number(i64::MIN).is_err());
    }

    #[test]
    fn test_parse_calendar() {
        assert_eq!(Calendar::from_str("NOLEAP").unwrap(), Calendar::NoLeap);
        assert_eq!(Calendar::from_str("365_day").unwrap(), Calendar::NoLeap);
        assert_eq!(Calendar::from_str("standard").unwrap(), Calendar::Gregorian);
        assert_eq!(Calendar::from_str("julian").unwrap(), Calendar::Julian);
        assert!(Calendar::from_str("lunar").is_err());
    }
}
