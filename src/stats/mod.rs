//! Attendance aggregation and the policy rules applied to its results.

pub mod aggregate;
pub mod policy;

pub use aggregate::{
    AttendanceSummary, GroupKey, GroupKeyValue, StatusTally, aggregate, sorted_by_percentage,
    summarize,
};
pub use policy::{AttendancePolicy, MAX_EDIT_WINDOW_HOURS};
