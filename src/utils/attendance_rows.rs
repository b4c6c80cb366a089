use chrono::NaiveDate;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::debug;

use crate::{model::attendance::AttendanceRow, stats::StatusTally};

/// Scope of attendance rows handed to the aggregator. All fields are
/// optional and combined with AND.
#[derive(Debug, Default, Clone)]
pub struct RowFilter {
    pub student_id: Option<u64>,
    pub subject_id: Option<u64>,
    pub class_id: Option<u64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Restrict to (class, subject) pairs taught by this teacher.
    pub teacher_id: Option<u64>,
    pub active_students_only: bool,
}

impl RowFilter {
    fn push_conditions(&self, qb: &mut QueryBuilder<'_, MySql>) {
        if let Some(student_id) = self.student_id {
            qb.push(" AND a.student_id = ").push_bind(student_id);
        }
        if let Some(subject_id) = self.subject_id {
            qb.push(" AND a.subject_id = ").push_bind(subject_id);
        }
        if let Some(class_id) = self.class_id {
            qb.push(" AND u.class_id = ").push_bind(class_id);
        }
        if let Some(from) = self.date_from {
            qb.push(" AND a.date >= ").push_bind(from);
        }
        if let Some(to) = self.date_to {
            qb.push(" AND a.date <= ").push_bind(to);
        }
        if let Some(teacher_id) = self.teacher_id {
            qb.push(
                " AND EXISTS (SELECT 1 FROM class_subject cs \
                 WHERE cs.class_id = u.class_id AND cs.subject_id = a.subject_id \
                 AND cs.teacher_id = ",
            )
            .push_bind(teacher_id)
            .push(")");
        }
        if self.active_students_only {
            qb.push(" AND u.status = 'active'");
        }
    }
}

/// Loads the rows matching `filter`, each joined with the student's class.
pub async fn fetch_rows(pool: &MySqlPool, filter: &RowFilter) -> Result<Vec<AttendanceRow>, sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT a.student_id, a.subject_id, u.class_id, a.date, a.status \
         FROM attendance a \
         JOIN users u ON u.id = a.student_id \
         WHERE u.role = 'student'",
    );
    filter.push_conditions(&mut qb);

    debug!(sql = %qb.sql(), ?filter, "Fetching attendance rows");

    qb.build_query_as::<AttendanceRow>().fetch_all(pool).await
}

/// Per-student status counts for the rows matching `filter`, counted by the
/// database instead of loading every row.
pub async fn fetch_student_tallies(
    pool: &MySqlPool,
    filter: &RowFilter,
) -> Result<Vec<(u64, StatusTally)>, sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT a.student_id, \
         CAST(SUM(a.status = 'present') AS UNSIGNED), \
         CAST(SUM(a.status = 'absent') AS UNSIGNED), \
         CAST(SUM(a.status = 'late') AS UNSIGNED) \
         FROM attendance a \
         JOIN users u ON u.id = a.student_id \
         WHERE u.role = 'student'",
    );
    filter.push_conditions(&mut qb);
    qb.push(" GROUP BY a.student_id");

    debug!(sql = %qb.sql(), ?filter, "Counting attendance per student");

    let rows = qb
        .build_query_as::<(u64, u64, u64, u64)>()
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(student_id, present, absent, late)| {
            (student_id, StatusTally { present, absent, late })
        })
        .collect())
}
