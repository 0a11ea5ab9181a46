//! Target-hour computation and listing timestamp matching.

use std::cmp::Ordering;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::UnrecognizedTimestampFormat;

/// Timestamp layouts seen across portals, tried in order.
const TIME_FORMATS: &[&str] = &["%H:%M"];
const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%H:%M %d/%m/%Y",
];

/// Where a listing row sits relative to the target hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPosition {
    /// Published in the target hour.
    InWindow,
    /// Published after the target hour (listing has not reached it yet).
    Newer,
    /// Published before the target hour (listing has moved past it).
    Older,
}

/// The single hour a run collects files for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    start: NaiveDateTime,
}

impl HourWindow {
    /// Window for `run_started`, shifted back by `offset_hours` to tolerate publish lag.
    pub fn at(run_started: NaiveDateTime, offset_hours: u32) -> Self {
        let shifted = run_started - Duration::hours(i64::from(offset_hours));
        Self {
            start: truncate_to_hour(shifted),
        }
    }

    /// Window from an explicit `YYYYMMDDHH` stamp.
    pub fn from_stamp(stamp: &str) -> Result<Self, UnrecognizedTimestampFormat> {
        let stamp = stamp.trim();
        if stamp.len() != 10 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(UnrecognizedTimestampFormat(stamp.to_string()));
        }
        NaiveDateTime::parse_from_str(&format!("{}00", stamp), "%Y%m%d%H%M")
            .map(|start| Self { start })
            .map_err(|_| UnrecognizedTimestampFormat(stamp.to_string()))
    }

    /// Hour of day (0-23) of the target window.
    pub fn target_hour(&self) -> u32 {
        self.start.hour()
    }

    /// Calendar date of the target window.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// `YYYYMMDDHH`, the form portals embed in file names.
    pub fn stamp(&self) -> String {
        self.start.format("%Y%m%d%H").to_string()
    }

    /// True when `file_name` carries this window's stamp.
    pub fn matches_name(&self, file_name: &str) -> bool {
        file_name.contains(&self.stamp())
    }

    /// True when the listing timestamp falls in the target hour.
    pub fn matches(&self, timestamp_text: &str) -> Result<bool, UnrecognizedTimestampFormat> {
        Ok(self.position(timestamp_text)? == RowPosition::InWindow)
    }

    /// Classify a listing timestamp against the target hour.
    ///
    /// Stamps that carry a date are compared as full date-times. Time-only
    /// stamps compare the hour of day: up to twelve hours after the target
    /// counts as newer, anything else as older.
    pub fn position(&self, timestamp_text: &str) -> Result<RowPosition, UnrecognizedTimestampFormat> {
        Ok(match parse_timestamp(timestamp_text)? {
            ListingStamp::Time(t) => position_of(t.hour(), self.target_hour()),
            ListingStamp::DateTime(dt) => match truncate_to_hour(dt).cmp(&self.start) {
                Ordering::Equal => RowPosition::InWindow,
                Ordering::Greater => RowPosition::Newer,
                Ordering::Less => RowPosition::Older,
            },
        })
    }
}

fn position_of(hour: u32, target: u32) -> RowPosition {
    let ahead = (hour + 24 - target) % 24;
    match ahead {
        0 => RowPosition::InWindow,
        1..=12 => RowPosition::Newer,
        _ => RowPosition::Older,
    }
}

fn truncate_to_hour(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date()
        .and_hms_opt(dt.hour(), 0, 0)
        .unwrap_or(dt)
}

/// A parsed listing timestamp; some portals omit the date.
#[derive(Debug, Clone, Copy)]
enum ListingStamp {
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

fn parse_timestamp(timestamp_text: &str) -> Result<ListingStamp, UnrecognizedTimestampFormat> {
    let text = timestamp_text.trim();

    for fmt in TIME_FORMATS {
        if let Ok(t) = NaiveTime::parse_from_str(text, fmt) {
            return Ok(ListingStamp::Time(t));
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(ListingStamp::DateTime(dt));
        }
    }

    Err(UnrecognizedTimestampFormat(timestamp_text.to_string()))
}

/// Hour of day from a listing timestamp, trying each known layout.
pub fn parse_hour(timestamp_text: &str) -> Result<u32, UnrecognizedTimestampFormat> {
    Ok(match parse_timestamp(timestamp_text)? {
        ListingStamp::Time(t) => t.hour(),
        ListingStamp::DateTime(dt) => dt.hour(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_every_format_round_trips_hour() {
        for hour in 0..24 {
            let t = dt(2024, 3, 7, hour, 25);
            let rendered = [
                t.format("%H:%M").to_string(),
                t.format("%m/%d/%Y %I:%M:%S %p").to_string(),
                t.format("%Y-%m-%d %H:%M:%S").to_string(),
                t.format("%d/%m/%Y %H:%M:%S").to_string(),
                t.format("%H:%M %d/%m/%Y").to_string(),
            ];
            for text in rendered {
                assert_eq!(parse_hour(&text), Ok(hour), "format output {:?}", text);
            }
        }
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = parse_hour("yesterday at noon").unwrap_err();
        assert_eq!(err, UnrecognizedTimestampFormat("yesterday at noon".to_string()));
        assert!(parse_hour("").is_err());
        assert!(parse_hour("2024/03/07").is_err());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert_eq!(parse_hour("  14:05 07/03/2024\n"), Ok(14));
    }

    #[test]
    fn test_previous_hour_offset() {
        let w = HourWindow::at(dt(2024, 3, 7, 10, 42), 1);
        assert_eq!(w.target_hour(), 9);
        assert_eq!(w.stamp(), "2024030709");

        let w = HourWindow::at(dt(2024, 3, 7, 10, 42), 0);
        assert_eq!(w.target_hour(), 10);
    }

    #[test]
    fn test_offset_crosses_midnight() {
        let w = HourWindow::at(dt(2024, 3, 7, 0, 5), 1);
        assert_eq!(w.target_hour(), 23);
        assert_eq!(w.date(), NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
        assert_eq!(w.stamp(), "2024030623");
    }

    #[test]
    fn test_from_stamp() {
        let w = HourWindow::from_stamp("2024050113").unwrap();
        assert_eq!(w.target_hour(), 13);
        assert_eq!(w.stamp(), "2024050113");
        assert!(HourWindow::from_stamp("20240501").is_err());
        assert!(HourWindow::from_stamp("2024050125").is_err());
        assert!(HourWindow::from_stamp("20240501ab").is_err());
    }

    #[test]
    fn test_matches() {
        let w = HourWindow::from_stamp("2024050110").unwrap();
        assert_eq!(w.matches("10:59"), Ok(true));
        assert_eq!(w.matches("2024-05-01 09:59:59"), Ok(false));
        assert!(w.matches("garbage").is_err());
        assert!(w.matches_name("PriceFull7290027600007-001-202405011000.gz"));
        assert!(!w.matches_name("PriceFull7290027600007-001-202405010900.gz"));
    }

    #[test]
    fn test_position() {
        let w = HourWindow::from_stamp("2024050110").unwrap();
        assert_eq!(w.position("10:00"), Ok(RowPosition::InWindow));
        assert_eq!(w.position("11:30"), Ok(RowPosition::Newer));
        assert_eq!(w.position("09:30"), Ok(RowPosition::Older));

        let late = HourWindow::from_stamp("2024050123").unwrap();
        assert_eq!(late.position("00:10"), Ok(RowPosition::Newer));
        assert_eq!(late.position("22:10"), Ok(RowPosition::Older));
    }

    #[test]
    fn test_position_uses_listed_date() {
        let w = HourWindow::from_stamp("2024050110").unwrap();
        // twelve hours ahead on the clock, but the day before
        assert_eq!(w.position("2024-04-30 22:00:00"), Ok(RowPosition::Older));
        assert_eq!(w.position("2024-04-30 10:30:00"), Ok(RowPosition::Older));
        assert_eq!(w.position("2024-05-01 11:00:00"), Ok(RowPosition::Newer));
        assert_eq!(w.position("2024-05-01 10:59:59"), Ok(RowPosition::InWindow));
        assert_eq!(w.position("05/02/2024 08:00:00 AM"), Ok(RowPosition::Newer));
        assert_eq!(w.matches("10:15 30/04/2024"), Ok(false));

        let late = HourWindow::from_stamp("2024050123").unwrap();
        assert_eq!(late.position("2024-05-02 00:10:00"), Ok(RowPosition::Newer));
        assert_eq!(late.position("01/05/2024 22:10:00"), Ok(RowPosition::Older));
    }
}
