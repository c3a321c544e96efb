use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds left in the test window, floored at zero. Partial elapsed
/// seconds count as not yet elapsed.
pub fn remaining_seconds(
    duration_min: i32,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i64 {
    let budget = i64::from(duration_min.max(0)) * 60;
    let elapsed = (now - started_at).num_seconds();
    (budget - elapsed).max(0)
}

pub fn is_expired(duration_min: i32, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    remaining_seconds(duration_min, started_at, now) == 0
}

/// `DD/MM/YYYY`, as printed on certificates.
pub fn format_issue_date(dt: DateTime<Utc>) -> String {
    dt.format("%d/%m/%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn full_budget_at_start() {
        assert_eq!(remaining_seconds(30, at(10, 0, 0), at(10, 0, 0)), 1800);
    }

    #[test]
    fn counts_down_with_elapsed_time() {
        assert_eq!(remaining_seconds(30, at(10, 0, 0), at(10, 10, 30)), 1170);
    }

    #[test]
    fn floors_at_zero_once_overdue() {
        let started = at(10, 0, 0);
        let now = started + Duration::minutes(31);
        assert_eq!(remaining_seconds(30, started, now), 0);
        assert!(is_expired(30, started, now));
    }

    #[test]
    fn expires_exactly_at_budget() {
        let started = at(10, 0, 0);
        assert!(is_expired(1, started, started + Duration::seconds(60)));
        assert!(!is_expired(1, started, started + Duration::milliseconds(59_900)));
    }

    #[test]
    fn issue_date_is_day_first() {
        assert_eq!(format_issue_date(at(9, 0, 0)), "14/03/2026");
    }
}
