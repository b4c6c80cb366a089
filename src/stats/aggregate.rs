use std::collections::HashMap;
use std::ops::AddAssign;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

use crate::model::attendance::{AttendanceRow, AttendanceStatus};

/// Grouping granularity for [`aggregate`].
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupKey {
    Student,
    #[default]
    StudentSubject,
    Class,
    Subject,
    Month,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKeyValue {
    Student { student_id: u64 },
    StudentSubject { student_id: u64, subject_id: u64 },
    Class { class_id: u64 },
    Subject { subject_id: u64 },
    Month { year: i32, month: u32 },
}

impl GroupKey {
    /// Derives the group of a row, `None` when the row lacks the attribute
    /// (only a student without a class under [`GroupKey::Class`]).
    pub fn key_for(self, row: &AttendanceRow) -> Option<GroupKeyValue> {
        match self {
            GroupKey::Student => Some(GroupKeyValue::Student {
                student_id: row.student_id,
            }),
            GroupKey::StudentSubject => Some(GroupKeyValue::StudentSubject {
                student_id: row.student_id,
                subject_id: row.subject_id,
            }),
            GroupKey::Class => row
                .class_id
                .map(|class_id| GroupKeyValue::Class { class_id }),
            GroupKey::Subject => Some(GroupKeyValue::Subject {
                subject_id: row.subject_id,
            }),
            GroupKey::Month => Some(GroupKeyValue::Month {
                year: row.date.year(),
                month: row.date.month(),
            }),
        }
    }
}

/// Raw status counts. The total is always the sum of the three.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StatusTally {
    pub present: u64,
    pub absent: u64,
    pub late: u64,
}

impl StatusTally {
    pub fn record(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.present + self.absent + self.late
    }

    pub fn summary(&self) -> AttendanceSummary {
        let total_count = self.total();
        AttendanceSummary {
            present_count: self.present,
            absent_count: self.absent,
            late_count: self.late,
            total_count,
            percentage: percentage(self.present, total_count),
        }
    }
}

impl AddAssign for StatusTally {
    fn add_assign(&mut self, other: Self) {
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
    }
}

impl From<&AttendanceSummary> for StatusTally {
    fn from(summary: &AttendanceSummary) -> Self {
        Self {
            present: summary.present_count,
            absent: summary.absent_count,
            late: summary.late_count,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "present_count": 2,
    "absent_count": 1,
    "late_count": 1,
    "total_count": 4,
    "percentage": 50.0
}))]
pub struct AttendanceSummary {
    pub present_count: u64,
    pub absent_count: u64,
    pub late_count: u64,
    pub total_count: u64,
    /// Present share of all marked days, 0..=100, two decimals.
    pub percentage: f64,
}

impl AttendanceSummary {
    /// Recomputes a combined summary from several partial ones.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a AttendanceSummary>) -> Self {
        let mut tally = StatusTally::default();
        for part in parts {
            tally += StatusTally::from(part);
        }
        tally.summary()
    }
}

/// `part / total * 100` rounded to two decimals; 0 for an empty total.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = part as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Counts statuses per group.
pub fn aggregate(
    records: &[AttendanceRow],
    group_by: GroupKey,
) -> HashMap<GroupKeyValue, AttendanceSummary> {
    let mut tallies: HashMap<GroupKeyValue, StatusTally> = HashMap::new();
    let mut skipped = 0usize;

    for row in records {
        match group_by.key_for(row) {
            Some(key) => tallies.entry(key).or_default().record(row.status),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, %group_by, "Rows without grouping attribute skipped");
    }

    tallies
        .into_iter()
        .map(|(key, tally)| (key, tally.summary()))
        .collect()
}

/// Overall summary of all rows.
pub fn summarize(records: &[AttendanceRow]) -> AttendanceSummary {
    let mut tally = StatusTally::default();
    for row in records {
        tally.record(row.status);
    }
    tally.summary()
}

/// Ascending by percentage, so at-risk groups come first. Ties are ordered
/// by key to keep the output stable.
pub fn sorted_by_percentage(
    groups: HashMap<GroupKeyValue, AttendanceSummary>,
) -> Vec<(GroupKeyValue, AttendanceSummary)> {
    let mut sorted: Vec<_> = groups.into_iter().collect();
    sorted.sort_by(|(ka, a), (kb, b)| {
        a.percentage
            .total_cmp(&b.percentage)
            .then_with(|| ka.cmp(kb))
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use AttendanceStatus::{Absent, Late, Present};

    const MATH: u64 = 10;
    const SCIENCE: u64 = 11;

    fn row(student_id: u64, subject_id: u64, class_id: Option<u64>, day: u32, status: AttendanceStatus) -> AttendanceRow {
        AttendanceRow {
            student_id,
            subject_id,
            class_id,
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            status,
        }
    }

    fn assert_consistent(summary: &AttendanceSummary) {
        assert_eq!(
            summary.present_count + summary.absent_count + summary.late_count,
            summary.total_count
        );
        assert!((0.0..=100.0).contains(&summary.percentage));
    }

    #[test]
    fn single_student_subject_scenario() {
        let rows = vec![
            row(1, MATH, Some(1), 2, Present),
            row(1, MATH, Some(1), 3, Present),
            row(1, MATH, Some(1), 4, Absent),
            row(1, MATH, Some(1), 5, Late),
        ];

        let groups = aggregate(&rows, GroupKey::StudentSubject);
        assert_eq!(groups.len(), 1);

        let summary = groups[&GroupKeyValue::StudentSubject {
            student_id: 1,
            subject_id: MATH,
        }];
        assert_eq!(summary.present_count, 2);
        assert_eq!(summary.absent_count, 1);
        assert_eq!(summary.late_count, 1);
        assert_eq!(summary.total_count, 4);
        assert_eq!(summary.percentage, 50.0);
    }

    #[test]
    fn empty_input_yields_zero_summary() {
        assert!(aggregate(&[], GroupKey::Student).is_empty());

        let summary = summarize(&[]);
        assert_eq!(summary, AttendanceSummary::default());
        assert_eq!(summary.percentage, 0.0);
    }

    #[test]
    fn one_entry_per_distinct_student_subject_pair() {
        let rows = vec![
            row(1, MATH, Some(1), 2, Present),
            row(1, SCIENCE, Some(1), 2, Absent),
            row(2, MATH, Some(1), 2, Late),
            row(2, MATH, Some(1), 3, Present),
            row(1, MATH, Some(1), 3, Absent),
            row(3, SCIENCE, None, 2, Present),
        ];

        let groups = aggregate(&rows, GroupKey::StudentSubject);
        assert_eq!(groups.len(), 4);

        let total: u64 = groups.values().map(|s| s.total_count).sum();
        assert_eq!(total, rows.len() as u64);

        for (key, summary) in &groups {
            let GroupKeyValue::StudentSubject { student_id, subject_id } = *key else {
                panic!("unexpected key {key:?}");
            };
            let expected = rows
                .iter()
                .filter(|r| r.student_id == student_id && r.subject_id == subject_id)
                .count() as u64;
            assert_eq!(summary.total_count, expected);
            assert_consistent(summary);
        }
    }

    #[test]
    fn class_grouping_skips_students_without_class() {
        let rows = vec![
            row(1, MATH, Some(7), 2, Present),
            row(2, MATH, Some(7), 2, Absent),
            row(3, MATH, None, 2, Absent),
        ];

        let by_class = aggregate(&rows, GroupKey::Class);
        assert_eq!(by_class.len(), 1);
        let class = by_class[&GroupKeyValue::Class { class_id: 7 }];
        assert_eq!(class.total_count, 2);
        assert_eq!(class.percentage, 50.0);

        let by_student = aggregate(&rows, GroupKey::Student);
        assert_eq!(by_student.len(), 3);
        assert_eq!(
            by_student[&GroupKeyValue::Student { student_id: 3 }].absent_count,
            1
        );
    }

    #[test]
    fn month_and_subject_grouping() {
        let mut rows = vec![row(1, MATH, Some(1), 30, Present)];
        rows.push(AttendanceRow {
            date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            ..row(1, SCIENCE, Some(1), 1, Absent)
        });

        let by_month = aggregate(&rows, GroupKey::Month);
        assert_eq!(by_month.len(), 2);
        assert_eq!(
            by_month[&GroupKeyValue::Month { year: 2026, month: 4 }].absent_count,
            1
        );

        let by_subject = aggregate(&rows, GroupKey::Subject);
        assert_eq!(
            by_subject[&GroupKeyValue::Subject { subject_id: MATH }].percentage,
            100.0
        );
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(3, 3), 100.0);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn combine_recomputes_from_counts() {
        let a = StatusTally { present: 1, absent: 1, late: 0 }.summary();
        let b = StatusTally { present: 2, absent: 0, late: 1 }.summary();

        let combined = AttendanceSummary::combine([&a, &b]);
        assert_eq!(combined.total_count, 5);
        assert_eq!(combined.percentage, 60.0);
        assert_consistent(&combined);
    }

    #[test]
    fn sorting_surfaces_lowest_percentage_first() {
        let rows = vec![
            row(1, MATH, Some(1), 2, Present),
            row(2, MATH, Some(1), 2, Absent),
            row(3, MATH, Some(1), 2, Present),
            row(3, MATH, Some(1), 3, Absent),
        ];

        let sorted = sorted_by_percentage(aggregate(&rows, GroupKey::Student));
        let order: Vec<_> = sorted.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            order,
            vec![
                GroupKeyValue::Student { student_id: 2 },
                GroupKeyValue::Student { student_id: 3 },
                GroupKeyValue::Student { student_id: 1 },
            ]
        );
    }

    #[test]
    fn group_key_parses_query_values() {
        assert_eq!("student_subject".parse::<GroupKey>().ok(), Some(GroupKey::StudentSubject));
        assert_eq!("class".parse::<GroupKey>().ok(), Some(GroupKey::Class));
        assert!("teacher".parse::<GroupKey>().is_err());
    }
}
