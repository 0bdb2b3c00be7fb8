use chrono::{DateTime, TimeZone, Utc};
use humansize::{format_size, FormatSizeOptions, DECIMAL};

fn size_options() -> FormatSizeOptions {
    FormatSizeOptions::from(DECIMAL)
        .decimal_places(2)
        .space_after_value(true)
}

pub fn bytes(n: u64) -> String {
    format_size(n, size_options())
}

pub fn rate(bytes_per_second: f64) -> String {
    let whole = if bytes_per_second.is_finite() { bytes_per_second.max(0.0).round() as u64 } else { 0 };
    format!("{}/s", bytes(whole))
}

pub fn datetime<Tz: TimeZone>(at: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format("%d.%m.%Y, %H:%M:%S").to_string()
}

pub fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_clamps_garbage_to_zero() {
        assert_eq!(rate(f64::NAN), rate(0.0));
        assert_eq!(rate(-5.0), rate(0.0));
        assert!(rate(3500.0).ends_with("/s"));
    }

    #[test]
    fn larger_counts_use_larger_units() {
        assert_ne!(bytes(999), bytes(1_500_000));
        assert!(bytes(1_500_000).contains('M'));
    }

    #[test]
    fn datetime_in_given_zone() {
        let at: DateTime<Utc> = "2024-05-01T12:03:04Z".parse().unwrap();
        assert_eq!(datetime(&at, &Utc), "01.05.2024, 12:03:04");
        let plus_two = chrono::FixedOffset::east_opt(7200).unwrap();
        assert_eq!(datetime(&at, &plus_two), "01.05.2024, 14:03:04");
    }
}
