use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use utoipa::ToSchema;

use super::text_column;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

text_column!(AttendanceStatus);

/// One persisted (student, subject, date) observation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceRecord {
    pub id: u64,
    pub student_id: u64,
    pub subject_id: u64,
    #[schema(value_type = String, format = "date", example = "2026-01-15")]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
}

/// Attendance row as fed to the aggregator: the record joined with the
/// student's current class.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AttendanceRow {
    pub student_id: u64,
    pub subject_id: u64,
    pub class_id: Option<u64>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}
