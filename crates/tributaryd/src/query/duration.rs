//! Duration parsing and Go-style rendering for timeouts and metrics.

use std::fmt::Write as _;
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Parses a unit-suffixed duration such as `100ms` or `1m30s`.
pub(crate) fn parse_duration(text: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(text.trim())
}

/// Renders a duration the way the wire format expects (`1.5ms`, `2m3.25s`).
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_owned();
    }
    if nanos < NANOS_PER_MICRO {
        return format!("{nanos}ns");
    }
    if nanos < NANOS_PER_MILLI {
        return fractional(nanos, NANOS_PER_MICRO, 3, "µs");
    }
    if nanos < NANOS_PER_SECOND {
        return fractional(nanos, NANOS_PER_MILLI, 6, "ms");
    }

    let whole_seconds = duration.as_secs();
    let hours = whole_seconds / 3600;
    let minutes = (whole_seconds % 3600) / 60;
    let seconds = u128::from(whole_seconds % 60) * NANOS_PER_SECOND
        + u128::from(duration.subsec_nanos());

    let mut rendered = String::new();
    if hours > 0 {
        let _ = write!(rendered, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(rendered, "{minutes}m");
    }
    rendered.push_str(&fractional(seconds, NANOS_PER_SECOND, 9, "s"));
    rendered
}

fn fractional(value: u128, unit: u128, width: usize, suffix: &str) -> String {
    let whole = value / unit;
    let remainder = value % unit;
    if remainder == 0 {
        return format!("{whole}{suffix}");
    }
    let digits = format!("{remainder:0width$}");
    format!("{whole}.{}{suffix}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Duration::ZERO, "0s")]
    #[case(Duration::from_nanos(250), "250ns")]
    #[case(Duration::from_nanos(1_500), "1.5µs")]
    #[case(Duration::from_millis(100), "100ms")]
    #[case(Duration::from_micros(1_234_567), "1.234567s")]
    #[case(Duration::from_secs(90), "1m30s")]
    #[case(Duration::from_secs(3600), "1h0m0s")]
    #[case(Duration::from_millis(62_250), "1m2.25s")]
    fn formats_like_go(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }

    #[rstest]
    #[case("100ms", Duration::from_millis(100))]
    #[case("1s", Duration::from_secs(1))]
    #[case("1m30s", Duration::from_secs(90))]
    #[case(" 2h ", Duration::from_secs(7200))]
    fn parses_unit_suffixed_durations(#[case] text: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(text).expect("duration parses"), expected);
    }

    #[rstest]
    #[case("")]
    #[case("soon")]
    #[case("-1s")]
    fn rejects_malformed_durations(#[case] text: &str) {
        assert!(parse_duration(text).is_err());
    }
}
