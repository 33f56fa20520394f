//! Display formatting for file sizes and upload dates

use chrono::{DateTime, Datelike, Utc};

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human readable size with base-1024 units.
///
/// Two decimals at most, trailing zeros dropped: `2048` -> `"2 KB"`,
/// `1536` -> `"1.5 KB"`. Zero is `"0 Bytes"`; anything past GB stays in GB.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    // Ties round up: 1.125 KB shows as 1.13 KB
    let rounded = format!("{:.2}", (value * 100.0).round() / 100.0);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

/// Upload date as `M/D/YYYY` (UTC); empty when the backend gave no timestamp
pub fn format_upload_date(created_at: Option<DateTime<Utc>>) -> String {
    match created_at {
        Some(t) => format!("{}/{}/{}", t.month(), t.day(), t.year()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_zero() {
        assert_eq!(format_file_size(0), "0 Bytes");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_file_size(1), "1 Bytes");
        assert_eq!(format_file_size(500), "500 Bytes");
        assert_eq!(format_file_size(1023), "1023 Bytes");
    }

    #[test]
    fn test_format_scaled_units() {
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(2048), "2 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1_234_567), "1.18 MB");
        assert_eq!(format_file_size(1152), "1.13 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn test_format_caps_at_gb() {
        assert_eq!(format_file_size(2 * 1024u64.pow(4)), "2048 GB");
    }

    #[test]
    fn test_format_upload_date() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 0).unwrap();
        assert_eq!(format_upload_date(Some(t)), "3/5/2024");
        assert_eq!(format_upload_date(None), "");
    }
}
