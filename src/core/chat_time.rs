//! Best-effort parsing of the date/time fragments WhatsApp shows, both in the
//! web client (`data-pre-plain-text`, bubble clock) and in chat exports.
//! Times are local wall-clock times; results are converted to UTC.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

// Day-first before month-first: "12/31/20" only parses month-first, while an
// ambiguous "03/04/26" is read the way most non-US exports write it.
// Two-digit years go first; `%Y` would happily read "20" as year 20.
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%y", "%d/%m/%Y", "%m/%d/%y", "%m/%d/%Y", "%d.%m.%y", "%d.%m.%Y", "%Y-%m-%d",
    "%d-%m-%y", "%d-%m-%Y",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

pub fn parse_chat_datetime(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    local_to_utc(NaiveDateTime::new(date, time))
}

/// A bare bubble clock ("14:05", "2:05 PM") taken as today's local date.
pub fn parse_clock_time(text: &str) -> Option<DateTime<Utc>> {
    let time = parse_time(text)?;
    local_to_utc(NaiveDateTime::new(Local::now().date_naive(), time))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let cleaned = normalize_time(raw);
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(&cleaned, f).ok())
}

fn normalize_time(raw: &str) -> String {
    raw.replace(['\u{202f}', '\u{a0}'], " ")
        .replace("a.m.", "AM")
        .replace("p.m.", "PM")
        .trim()
        .to_uppercase()
}

fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
