use chrono::{DateTime, Utc};

/// Returns the current UTC wall-clock time.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Returns the non-negative number of seconds between `start` and `end`.
pub fn elapsed_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = end.signed_duration_since(start).num_milliseconds().max(0);
    millis as f64 / 1_000.0
}

/// Formats seconds with a fixed number of decimals and an `s` suffix.
pub fn format_duration_seconds(seconds: f64, decimals: usize) -> String {
    format!("{seconds:.decimals$}s")
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn unit_elapsed_seconds_clamps_negative_spans() {
        let now = utc_now();
        assert_eq!(elapsed_seconds_between(now, now - Duration::seconds(3)), 0.0);
        assert_eq!(
            elapsed_seconds_between(now, now + Duration::milliseconds(2_500)),
            2.5
        );
    }

    #[test]
    fn unit_format_duration_seconds_respects_decimals() {
        assert_eq!(format_duration_seconds(5.004, 2), "5.00s");
        assert_eq!(format_duration_seconds(12.36, 1), "12.4s");
    }
}
