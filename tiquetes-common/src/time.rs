//! Timestamp utilities
//!
//! Everything is stored in UTC as `YYYY-MM-DD HH:MM:SS`. Display uses
//! Bogotá local time (UTC-5, no daylight saving).

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};

/// Storage format for all `timestamp_*_utc` columns
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOGOTA_OFFSET_WEST_SECS: i32 = 5 * 3600;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Bogotá fixed offset
pub fn bogota() -> FixedOffset {
    FixedOffset::west_opt(BOGOTA_OFFSET_WEST_SECS).unwrap_or_else(|| Utc.fix())
}

/// Format a UTC instant for storage
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Current UTC instant formatted for storage
pub fn utc_timestamp_str() -> String {
    to_db_timestamp(now())
}

/// Parse a stored UTC timestamp. Accepts the storage format and RFC 3339.
pub fn parse_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, DB_TIMESTAMP_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render a UTC instant as Bogotá (`dd/mm/YYYY`, `HH:MM:SS`)
pub fn fecha_hora_bogota(ts: DateTime<Utc>) -> (String, String) {
    let local = ts.with_timezone(&bogota());
    (
        local.format("%d/%m/%Y").to_string(),
        local.format("%H:%M:%S").to_string(),
    )
}

/// Render a stored timestamp as Bogotá date and time, if it parses
pub fn db_timestamp_to_bogota(value: &str) -> Option<(String, String)> {
    parse_db_timestamp(value).map(fecha_hora_bogota)
}

/// UTC storage bounds covering whole Bogotá days `[inicio 00:00, fin 23:59:59]`
///
/// Either side may be absent. Used for date-filtered listings.
pub fn bogota_day_range_utc(
    inicio: Option<NaiveDate>,
    fin: Option<NaiveDate>,
) -> (Option<String>, Option<String>) {
    let to_utc = |date: NaiveDate, time: NaiveTime| {
        bogota()
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| to_db_timestamp(dt.with_timezone(&Utc)))
    };
    let start = inicio.and_then(|d| to_utc(d, NaiveTime::MIN));
    let end = fin.and_then(|d| {
        NaiveTime::from_hms_opt(23, 59, 59).and_then(|t| to_utc(d, t))
    });
    (start, end)
}

/// Parse a filter date in `YYYY-MM-DD`
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }

    #[test]
    fn test_db_timestamp_roundtrip_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(to_db_timestamp(ts), "2024-03-05 14:07:09");
        assert_eq!(parse_db_timestamp("2024-03-05 14:07:09"), Some(ts));
    }

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_db_timestamp("2024-03-05T14:07:09Z").unwrap();
        assert_eq!(to_db_timestamp(parsed), "2024-03-05 14:07:09");
    }

    #[test]
    fn test_bogota_rendering_crosses_midnight() {
        // 03:30 UTC is 22:30 of the previous day in Bogotá
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 30, 0).unwrap();
        let (fecha, hora) = fecha_hora_bogota(ts);
        assert_eq!(fecha, "01/01/2024");
        assert_eq!(hora, "22:30:00");
    }

    #[test]
    fn test_db_timestamp_to_bogota_invalid() {
        assert!(db_timestamp_to_bogota("not a date").is_none());
    }

    #[test]
    fn test_day_range_shifts_to_utc() {
        let d = parse_iso_date("2024-06-10").unwrap();
        let (start, end) = bogota_day_range_utc(Some(d), Some(d));
        assert_eq!(start.as_deref(), Some("2024-06-10 05:00:00"));
        assert_eq!(end.as_deref(), Some("2024-06-11 04:59:59"));
    }
}
