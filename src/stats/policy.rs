use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

/// Largest accepted `ATTENDANCE_EDIT_HOURS`, about a hundred years.
pub const MAX_EDIT_WINDOW_HOURS: i64 = 876_000;

/// Threshold and edit window in effect for one request.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AttendancePolicy {
    pub min_attendance_percentage: f64,
    pub edit_window_hours: i64,
}

impl AttendancePolicy {
    pub fn is_low(&self, percentage: f64) -> bool {
        is_low_attendance(percentage, self.min_attendance_percentage)
    }

    pub fn can_edit(&self, record_date: NaiveDate, now: NaiveDateTime, is_admin: bool) -> bool {
        can_edit(record_date, now, self.edit_window_hours, is_admin)
    }
}

/// Strictly below the threshold; exactly at the threshold is not low.
pub fn is_low_attendance(percentage: f64, threshold: f64) -> bool {
    percentage < threshold
}

/// Admins always may edit. Others may edit while no more than `window_hours`
/// have passed since midnight of the record's date.
///
/// The window starts at the calendar date, not at the record's creation
/// time, so with `window_hours >= 24` a record for today is always editable.
/// A window too large for `TimeDelta` never closes.
pub fn can_edit(record_date: NaiveDate, now: NaiveDateTime, window_hours: i64, is_admin: bool) -> bool {
    if is_admin {
        return true;
    }
    let Some(window) = TimeDelta::try_hours(window_hours) else {
        return true;
    };
    let start = record_date.and_time(NaiveTime::MIN);
    now - start <= window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(d: NaiveDate, h: u32, min: u32) -> NaiveDateTime {
        d.and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn threshold_is_strict() {
        assert!(is_low_attendance(74.99, 75.0));
        assert!(!is_low_attendance(75.0, 75.0));
        assert!(!is_low_attendance(100.0, 75.0));
        assert!(is_low_attendance(0.0, 75.0));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let record = date(2026, 5, 10);

        let exactly = at(date(2026, 5, 11), 0, 0);
        assert!(can_edit(record, exactly, 24, false));

        let hour_later = at(date(2026, 5, 11), 1, 0);
        assert!(!can_edit(record, hour_later, 24, false));

        let minute_later = at(date(2026, 5, 11), 0, 1);
        assert!(!can_edit(record, minute_later, 24, false));
    }

    #[test]
    fn todays_record_is_always_editable() {
        let today = date(2026, 5, 10);
        assert!(can_edit(today, at(today, 23, 59), 24, false));
        assert!(can_edit(today, at(today, 0, 0), 24, false));
    }

    #[test]
    fn short_window_closes_on_the_same_day() {
        let today = date(2026, 5, 10);
        assert!(can_edit(today, at(today, 6, 0), 6, false));
        assert!(!can_edit(today, at(today, 6, 1), 6, false));
        assert!(!can_edit(today, at(today, 0, 1), 0, false));
    }

    #[test]
    fn oversized_window_never_closes() {
        let old = date(2000, 1, 1);
        let now = at(date(2026, 5, 10), 12, 0);
        assert!(can_edit(old, now, i64::MAX, false));
        assert!(can_edit(old, now, MAX_EDIT_WINDOW_HOURS, false));
    }

    #[test]
    fn admin_bypasses_the_window() {
        let old = date(2020, 1, 1);
        let now = at(date(2026, 5, 10), 12, 0);
        assert!(!can_edit(old, now, 24, false));
        assert!(can_edit(old, now, 24, true));
        assert!(can_edit(old, now, 0, true));
    }

    #[test]
    fn policy_uses_its_configured_values() {
        let policy = AttendancePolicy {
            min_attendance_percentage: 80.0,
            edit_window_hours: 48,
        };
        assert!(policy.is_low(79.99));
        assert!(!policy.is_low(80.0));

        let record = date(2026, 5, 10);
        assert!(policy.can_edit(record, at(date(2026, 5, 12), 0, 0), false));
        assert!(!policy.can_edit(record, at(date(2026, 5, 12), 1, 0), false));
    }
}
