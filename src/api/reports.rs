use std::collections::{BTreeSet, HashMap};

use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::ApiError,
    model::{
        attendance::AttendanceRow,
        role::Role,
        user::{USER_COLUMNS, User},
    },
    stats::{
        AttendancePolicy, AttendanceSummary, GroupKey, GroupKeyValue, StatusTally, aggregate,
        sorted_by_percentage, summarize,
    },
    utils::attendance_rows::{RowFilter, fetch_rows, fetch_student_tallies},
};
use actix_web::{HttpResponse, web};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_REPORT_MONTHS: u32 = 6;
const MAX_REPORT_MONTHS: u32 = 24;

#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Lowest percentage first
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReportQuery {
    #[param(value_type = String, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = String, format = "date")]
    pub date_to: Option<NaiveDate>,
    pub class_id: Option<u64>,
    pub subject_id: Option<u64>,
    /// student | student_subject | class | subject | month
    pub group_by: Option<GroupKey>,
    /// asc | desc by percentage
    pub sort: Option<SortOrder>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LowAttendanceQuery {
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
    pub class_id: Option<u64>,
    pub subject_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ClassReportQuery {
    /// Single day; all dates when absent
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StudentReportQuery {
    /// Months covered by the monthly breakdown (default 6)
    pub months: Option<u32>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReportGroup {
    #[schema(value_type = Object, example = json!({"kind": "student_subject", "student_id": 12, "subject_id": 7}))]
    pub key: GroupKeyValue,
    #[schema(example = "Asha Rao (10A-07) - Mathematics")]
    pub label: String,
    pub summary: AttendanceSummary,
    pub low_attendance: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceReport {
    #[schema(value_type = String, format = "date")]
    pub date_from: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub date_to: NaiveDate,
    pub group_by: GroupKey,
    #[schema(example = 75.0)]
    pub threshold: f64,
    pub groups: Vec<ReportGroup>,
    pub overall: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubjectSummary {
    pub subject_id: u64,
    pub subject_name: String,
    pub subject_code: String,
    pub summary: AttendanceSummary,
    pub low_attendance: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LowAttendanceStudent {
    pub student_id: u64,
    pub name: String,
    pub roll_number: Option<String>,
    pub class_id: Option<u64>,
    pub class_name: Option<String>,
    pub summary: AttendanceSummary,
    /// Subjects where the student is below the threshold
    pub low_subjects: Vec<SubjectSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClassReport {
    pub class_id: u64,
    pub class_name: String,
    pub student_count: i64,
    pub summary: AttendanceSummary,
    pub low_attendance: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClassReportResponse {
    #[schema(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    pub classes: Vec<ClassReport>,
    /// All classes together
    pub overall: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MonthSummary {
    #[schema(example = 2026)]
    pub year: i32,
    #[schema(example = 1)]
    pub month: u32,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StudentReport {
    pub student: User,
    pub class_name: Option<String>,
    pub threshold: f64,
    pub overall: AttendanceSummary,
    pub low_attendance: bool,
    pub subjects: Vec<SubjectSummary>,
    pub monthly: Vec<MonthSummary>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct RoleCounts {
    pub admin: i64,
    pub teacher: i64,
    pub student: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Overview {
    /// Active users by role
    pub users: RoleCounts,
    pub classes: i64,
    pub subjects: i64,
    #[schema(value_type = String, format = "date")]
    pub today: NaiveDate,
    pub today_summary: AttendanceSummary,
    /// Active students below the threshold over all recorded days
    pub low_attendance_students: usize,
}

// ---------- label lookups ----------

struct StudentLabel {
    name: String,
    roll_number: Option<String>,
    class_id: Option<u64>,
}

struct SubjectLabel {
    name: String,
    code: String,
}

/// Display names for the ids referenced by a set of groups.
#[derive(Default)]
struct Labels {
    students: HashMap<u64, StudentLabel>,
    subjects: HashMap<u64, SubjectLabel>,
    classes: HashMap<u64, String>,
}

fn push_in_list(qb: &mut QueryBuilder<'_, MySql>, ids: &BTreeSet<u64>) {
    qb.push(" IN (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    qb.push(")");
}

impl Labels {
    async fn load(
        pool: &MySqlPool,
        student_ids: &BTreeSet<u64>,
        subject_ids: &BTreeSet<u64>,
        class_ids: &BTreeSet<u64>,
    ) -> Result<Self, sqlx::Error> {
        let mut labels = Labels::default();

        if !student_ids.is_empty() {
            let mut qb = QueryBuilder::<MySql>::new(
                "SELECT id, name, roll_number, class_id FROM users WHERE id",
            );
            push_in_list(&mut qb, student_ids);
            let rows = qb
                .build_query_as::<(u64, String, Option<String>, Option<u64>)>()
                .fetch_all(pool)
                .await?;
            labels.students = rows
                .into_iter()
                .map(|(id, name, roll_number, class_id)| {
                    (id, StudentLabel { name, roll_number, class_id })
                })
                .collect();
        }

        if !subject_ids.is_empty() {
            let mut qb = QueryBuilder::<MySql>::new("SELECT id, name, code FROM subjects WHERE id");
            push_in_list(&mut qb, subject_ids);
            let rows = qb
                .build_query_as::<(u64, String, String)>()
                .fetch_all(pool)
                .await?;
            labels.subjects = rows
                .into_iter()
                .map(|(id, name, code)| (id, SubjectLabel { name, code }))
                .collect();
        }

        // students' own classes are needed for low-attendance rows
        let mut class_ids = class_ids.clone();
        class_ids.extend(labels.students.values().filter_map(|s| s.class_id));
        if !class_ids.is_empty() {
            let mut qb = QueryBuilder::<MySql>::new("SELECT id, name FROM classes WHERE id");
            push_in_list(&mut qb, &class_ids);
            labels.classes = qb
                .build_query_as::<(u64, String)>()
                .fetch_all(pool)
                .await?
                .into_iter()
                .collect();
        }

        Ok(labels)
    }

    async fn for_groups<'a>(
        pool: &MySqlPool,
        keys: impl IntoIterator<Item = &'a GroupKeyValue>,
    ) -> Result<Self, sqlx::Error> {
        let mut students = BTreeSet::new();
        let mut subjects = BTreeSet::new();
        let mut classes = BTreeSet::new();
        for key in keys {
            match *key {
                GroupKeyValue::Student { student_id } => {
                    students.insert(student_id);
                }
                GroupKeyValue::StudentSubject {
                    student_id,
                    subject_id,
                } => {
                    students.insert(student_id);
                    subjects.insert(subject_id);
                }
                GroupKeyValue::Class { class_id } => {
                    classes.insert(class_id);
                }
                GroupKeyValue::Subject { subject_id } => {
                    subjects.insert(subject_id);
                }
                GroupKeyValue::Month { .. } => {}
            }
        }
        Self::load(pool, &students, &subjects, &classes).await
    }

    fn student(&self, id: u64) -> String {
        match self.students.get(&id) {
            Some(StudentLabel {
                name,
                roll_number: Some(roll),
                ..
            }) => format!("{name} ({roll})"),
            Some(label) => label.name.clone(),
            None => format!("Student #{id}"),
        }
    }

    fn subject(&self, id: u64) -> String {
        self.subjects
            .get(&id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("Subject #{id}"))
    }

    fn class(&self, id: u64) -> String {
        self.classes
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Class #{id}"))
    }

    fn label(&self, key: &GroupKeyValue) -> String {
        match *key {
            GroupKeyValue::Student { student_id } => self.student(student_id),
            GroupKeyValue::StudentSubject {
                student_id,
                subject_id,
            } => format!("{} - {}", self.student(student_id), self.subject(subject_id)),
            GroupKeyValue::Class { class_id } => self.class(class_id),
            GroupKeyValue::Subject { subject_id } => self.subject(subject_id),
            GroupKeyValue::Month { year, month } => format!("{year}-{month:02}"),
        }
    }

    fn subject_summary(&self, subject_id: u64, summary: AttendanceSummary, policy: &AttendancePolicy) -> SubjectSummary {
        let (subject_name, subject_code) = match self.subjects.get(&subject_id) {
            Some(s) => (s.name.clone(), s.code.clone()),
            None => (self.subject(subject_id), String::new()),
        };
        SubjectSummary {
            subject_id,
            subject_name,
            subject_code,
            low_attendance: summary.total_count > 0 && policy.is_low(summary.percentage),
            summary,
        }
    }
}

// ---------- helpers ----------

fn check_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), ApiError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => {
            Err(ApiError::bad_request("date_from must not be after date_to"))
        }
        _ => Ok(()),
    }
}

/// Row scope for the caller: teachers only see their own (class, subject)
/// pairs.
fn scoped(auth: &AuthUser, filter: RowFilter) -> RowFilter {
    RowFilter {
        teacher_id: auth.is_teacher().then_some(auth.user_id),
        ..filter
    }
}

/// The `count` calendar months ending with the month of `today`, oldest first.
pub(crate) fn recent_months(today: NaiveDate, count: u32) -> Vec<(i32, u32)> {
    let mut year = today.year();
    let mut month = today.month();
    let mut months = Vec::with_capacity(count as usize);
    for _ in 0..count {
        months.push((year, month));
        if month == 1 {
            year -= 1;
            month = 12;
        } else {
            month -= 1;
        }
    }
    months.reverse();
    months
}

/// Every month in `months` paired with its summary, zeroed when empty.
fn monthly_breakdown(rows: &[AttendanceRow], months: &[(i32, u32)]) -> Vec<MonthSummary> {
    let by_month = aggregate(rows, GroupKey::Month);
    months
        .iter()
        .map(|&(year, month)| MonthSummary {
            year,
            month,
            summary: by_month
                .get(&GroupKeyValue::Month { year, month })
                .copied()
                .unwrap_or_default(),
        })
        .collect()
}

/// Students below the threshold, at-risk first, each with the subjects
/// dragging them down.
fn low_attendance_students(
    rows: &[AttendanceRow],
    labels: &Labels,
    policy: &AttendancePolicy,
) -> Vec<LowAttendanceStudent> {
    let per_subject = aggregate(rows, GroupKey::StudentSubject);

    sorted_by_percentage(aggregate(rows, GroupKey::Student))
        .into_iter()
        .filter(|(_, summary)| policy.is_low(summary.percentage))
        .filter_map(|(key, summary)| match key {
            GroupKeyValue::Student { student_id } => Some((student_id, summary)),
            _ => None,
        })
        .map(|(student_id, summary)| {
            let mut low_subjects: Vec<SubjectSummary> = per_subject
                .iter()
                .filter_map(|(key, s)| match *key {
                    GroupKeyValue::StudentSubject {
                        student_id: sid,
                        subject_id,
                    } if sid == student_id && policy.is_low(s.percentage) => {
                        Some(labels.subject_summary(subject_id, *s, policy))
                    }
                    _ => None,
                })
                .collect();
            low_subjects.sort_by(|a, b| {
                a.summary
                    .percentage
                    .total_cmp(&b.summary.percentage)
                    .then_with(|| a.subject_id.cmp(&b.subject_id))
            });

            let student = labels.students.get(&student_id);
            let class_id = student.and_then(|s| s.class_id);
            LowAttendanceStudent {
                student_id,
                name: student
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| labels.student(student_id)),
                roll_number: student.and_then(|s| s.roll_number.clone()),
                class_id,
                class_name: class_id.and_then(|id| labels.classes.get(&id).cloned()),
                summary,
                low_subjects,
            }
        })
        .collect()
}

/// Overall, subject-wise and monthly attendance of one student. Subjects of
/// the student's class without records are listed with a zero summary.
pub(crate) async fn build_student_report(
    pool: &MySqlPool,
    policy: AttendancePolicy,
    auth: &AuthUser,
    student_id: u64,
    query: &StudentReportQuery,
) -> Result<StudentReport, ApiError> {
    check_range(query.date_from, query.date_to)?;

    let student = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
    .bind(student_id)
    .fetch_optional(pool)
    .await?
    .filter(|u| u.role == Role::Student)
    .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let rows = fetch_rows(
        pool,
        &scoped(
            auth,
            RowFilter {
                student_id: Some(student_id),
                date_from: query.date_from,
                date_to: query.date_to,
                ..RowFilter::default()
            },
        ),
    )
    .await?;

    let overall = summarize(&rows);

    // class subjects first so zero-record subjects are listed too
    let mut subject_ids: BTreeSet<u64> = match student.class_id {
        Some(class_id) => {
            let mut qb = QueryBuilder::<MySql>::new(
                "SELECT DISTINCT subject_id FROM class_subject WHERE class_id = ",
            );
            qb.push_bind(class_id);
            if auth.is_teacher() {
                qb.push(" AND teacher_id = ").push_bind(auth.user_id);
            }
            qb.build_query_scalar::<u64>()
                .fetch_all(pool)
                .await?
                .into_iter()
                .collect()
        }
        None => BTreeSet::new(),
    };
    let by_subject = aggregate(&rows, GroupKey::Subject);
    subject_ids.extend(by_subject.keys().filter_map(|key| match *key {
        GroupKeyValue::Subject { subject_id } => Some(subject_id),
        _ => None,
    }));

    let class_ids: BTreeSet<u64> = student.class_id.into_iter().collect();
    let labels = Labels::load(pool, &BTreeSet::new(), &subject_ids, &class_ids).await?;

    let mut subjects: Vec<SubjectSummary> = subject_ids
        .iter()
        .map(|&subject_id| {
            let summary = by_subject
                .get(&GroupKeyValue::Subject { subject_id })
                .copied()
                .unwrap_or_default();
            labels.subject_summary(subject_id, summary, &policy)
        })
        .collect();
    subjects.sort_by(|a, b| a.subject_name.cmp(&b.subject_name));

    let months = query
        .months
        .unwrap_or(DEFAULT_REPORT_MONTHS)
        .clamp(1, MAX_REPORT_MONTHS);
    let monthly = monthly_breakdown(&rows, &recent_months(Local::now().date_naive(), months));

    Ok(StudentReport {
        class_name: student.class_id.map(|id| labels.class(id)),
        student,
        threshold: policy.min_attendance_percentage,
        low_attendance: overall.total_count > 0 && policy.is_low(overall.percentage),
        overall,
        subjects,
        monthly,
    })
}

// ---------- handlers ----------

/// Grouped attendance report over a date range
#[utoipa::path(
    get,
    path = "/api/reports/attendance",
    params(ReportQuery),
    responses(
        (status = 200, description = "Grouped summaries", body = AttendanceReport),
        (status = 400, description = "Missing or inverted date range")
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn attendance_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    let (Some(date_from), Some(date_to)) = (query.date_from, query.date_to) else {
        return Err(ApiError::bad_request("date_from and date_to are required"));
    };
    check_range(Some(date_from), Some(date_to))?;

    let group_by = query.group_by.unwrap_or_default();
    let policy = config.attendance_policy();

    let rows = fetch_rows(
        pool.get_ref(),
        &scoped(
            &auth,
            RowFilter {
                class_id: query.class_id,
                subject_id: query.subject_id,
                date_from: Some(date_from),
                date_to: Some(date_to),
                ..RowFilter::default()
            },
        ),
    )
    .await?;

    let mut sorted = sorted_by_percentage(aggregate(&rows, group_by));
    if query.sort.unwrap_or_default() == SortOrder::Desc {
        sorted.reverse();
    }

    let labels = Labels::for_groups(pool.get_ref(), sorted.iter().map(|(key, _)| key)).await?;

    let groups = sorted
        .into_iter()
        .map(|(key, summary)| ReportGroup {
            label: labels.label(&key),
            low_attendance: policy.is_low(summary.percentage),
            key,
            summary,
        })
        .collect::<Vec<_>>();

    debug!(rows = rows.len(), groups = groups.len(), %group_by, "Attendance report built");

    Ok(HttpResponse::Ok().json(AttendanceReport {
        date_from,
        date_to,
        group_by,
        threshold: policy.min_attendance_percentage,
        groups,
        overall: summarize(&rows),
    }))
}

/// Students below the minimum attendance
#[utoipa::path(
    get,
    path = "/api/reports/low-attendance",
    params(LowAttendanceQuery),
    responses((status = 200, description = "At-risk students, lowest first", body = [LowAttendanceStudent])),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn low_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<LowAttendanceQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    check_range(query.date_from, query.date_to)?;

    let policy = config.attendance_policy();
    let rows = fetch_rows(
        pool.get_ref(),
        &scoped(
            &auth,
            RowFilter {
                class_id: query.class_id,
                subject_id: query.subject_id,
                date_from: query.date_from,
                date_to: query.date_to,
                active_students_only: true,
                ..RowFilter::default()
            },
        ),
    )
    .await?;

    let keys = aggregate(&rows, GroupKey::StudentSubject);
    let labels = Labels::for_groups(pool.get_ref(), keys.keys()).await?;

    Ok(HttpResponse::Ok().json(low_attendance_students(&rows, &labels, &policy)))
}

/// Class-wise attendance
#[utoipa::path(
    get,
    path = "/api/reports/classes",
    params(ClassReportQuery),
    responses((status = 200, description = "One summary per class", body = ClassReportResponse)),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn class_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<ClassReportQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let policy = config.attendance_policy();

    let mut classes_qb = QueryBuilder::<MySql>::new(
        "SELECT c.id, c.name, \
         (SELECT COUNT(*) FROM users u \
          WHERE u.class_id = c.id AND u.role = 'student' AND u.status = 'active') AS student_count \
         FROM classes c",
    );
    if auth.is_teacher() {
        classes_qb
            .push(" WHERE EXISTS (SELECT 1 FROM class_subject cs WHERE cs.class_id = c.id AND cs.teacher_id = ")
            .push_bind(auth.user_id)
            .push(")");
    }
    classes_qb.push(" ORDER BY c.name");
    let classes = classes_qb
        .build_query_as::<(u64, String, i64)>()
        .fetch_all(pool.get_ref())
        .await?;

    let rows = fetch_rows(
        pool.get_ref(),
        &scoped(
            &auth,
            RowFilter {
                date_from: query.date,
                date_to: query.date,
                active_students_only: true,
                ..RowFilter::default()
            },
        ),
    )
    .await?;
    let by_class = aggregate(&rows, GroupKey::Class);

    let report: Vec<ClassReport> = classes
        .into_iter()
        .map(|(class_id, class_name, student_count)| {
            let summary = by_class
                .get(&GroupKeyValue::Class { class_id })
                .copied()
                .unwrap_or_default();
            ClassReport {
                class_id,
                class_name,
                student_count,
                low_attendance: summary.total_count > 0 && policy.is_low(summary.percentage),
                summary,
            }
        })
        .collect();

    let overall = AttendanceSummary::combine(report.iter().map(|c| &c.summary));

    Ok(HttpResponse::Ok().json(ClassReportResponse {
        date: query.date,
        classes: report,
        overall,
    }))
}

/// Admin dashboard figures
#[utoipa::path(
    get,
    path = "/api/reports/overview",
    responses(
        (status = 200, description = "Dashboard counts", body = Overview),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn overview(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let policy = config.attendance_policy();

    let mut users = RoleCounts::default();
    let by_role = sqlx::query_as::<_, (Role, i64)>(
        "SELECT role, COUNT(*) FROM users WHERE status = 'active' GROUP BY role",
    )
    .fetch_all(pool.get_ref())
    .await?;
    for (role, count) in by_role {
        match role {
            Role::Admin => users.admin = count,
            Role::Teacher => users.teacher = count,
            Role::Student => users.student = count,
        }
    }

    let (classes, subjects): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM classes), (SELECT COUNT(*) FROM subjects)",
    )
    .fetch_one(pool.get_ref())
    .await?;

    let today = Local::now().date_naive();
    let today_rows = fetch_rows(
        pool.get_ref(),
        &RowFilter {
            date_from: Some(today),
            date_to: Some(today),
            active_students_only: true,
            ..RowFilter::default()
        },
    )
    .await?;

    let tallies = fetch_student_tallies(
        pool.get_ref(),
        &RowFilter {
            active_students_only: true,
            ..RowFilter::default()
        },
    )
    .await?;
    let low_attendance_students = count_low(&tallies, &policy);

    Ok(HttpResponse::Ok().json(Overview {
        users,
        classes,
        subjects,
        today,
        today_summary: summarize(&today_rows),
        low_attendance_students,
    }))
}

/// Students whose tallied percentage is below the threshold.
fn count_low(tallies: &[(u64, StatusTally)], policy: &AttendancePolicy) -> usize {
    tallies
        .iter()
        .filter(|(_, tally)| policy.is_low(tally.summary().percentage))
        .count()
}

/// Attendance report of one student
#[utoipa::path(
    get,
    path = "/api/reports/students/{student_id}",
    params(("student_id", Path, description = "Student ID"), StudentReportQuery),
    responses(
        (status = 200, description = "Overall, subject-wise and monthly attendance", body = StudentReport),
        (status = 403, description = "Students can only view themselves"),
        (status = 404, description = "Student not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn student_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    query: web::Query<StudentReportQuery>,
) -> Result<HttpResponse, ApiError> {
    let student_id = path.into_inner();
    auth.require_self_or_staff(student_id)?;

    let report = build_student_report(
        pool.get_ref(),
        config.attendance_policy(),
        &auth,
        student_id,
        &query,
    )
    .await?;

    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::AttendanceStatus::{self, Absent, Late, Present};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(student_id: u64, subject_id: u64, date: NaiveDate, status: AttendanceStatus) -> AttendanceRow {
        AttendanceRow {
            student_id,
            subject_id,
            class_id: Some(1),
            date,
            status,
        }
    }

    fn policy() -> AttendancePolicy {
        AttendancePolicy {
            min_attendance_percentage: 75.0,
            edit_window_hours: 24,
        }
    }

    #[test]
    fn tallied_low_count_matches_row_aggregation() {
        let rows = vec![
            row(1, 1, d(2026, 1, 5), Present),
            row(1, 1, d(2026, 1, 6), Absent),
            row(2, 1, d(2026, 1, 5), Present),
            row(2, 2, d(2026, 1, 5), Present),
            row(2, 2, d(2026, 1, 6), Present),
            row(2, 2, d(2026, 1, 7), Late),
            row(3, 1, d(2026, 1, 5), Late),
        ];

        let mut tallies: HashMap<u64, StatusTally> = HashMap::new();
        for r in &rows {
            tallies.entry(r.student_id).or_default().record(r.status);
        }
        let tallies: Vec<(u64, StatusTally)> = tallies.into_iter().collect();

        let from_rows = aggregate(&rows, GroupKey::Student)
            .values()
            .filter(|s| policy().is_low(s.percentage))
            .count();
        // 50%, 75% and 0%: students 1 and 3 are low
        assert_eq!(count_low(&tallies, &policy()), 2);
        assert_eq!(count_low(&tallies, &policy()), from_rows);
        assert_eq!(count_low(&[], &policy()), 0);
    }

    #[test]
    fn recent_months_wrap_the_year() {
        assert_eq!(
            recent_months(d(2026, 2, 10), 4),
            vec![(2025, 11), (2025, 12), (2026, 1), (2026, 2)]
        );
        assert_eq!(recent_months(d(2026, 7, 1), 1), vec![(2026, 7)]);
    }

    #[test]
    fn monthly_breakdown_fills_empty_months() {
        let rows = vec![
            row(1, 1, d(2026, 1, 5), Present),
            row(1, 1, d(2026, 1, 6), Absent),
            row(1, 1, d(2025, 6, 1), Present),
        ];
        let months = recent_months(d(2026, 2, 1), 2);

        let breakdown = monthly_breakdown(&rows, &months);

        assert_eq!(breakdown.len(), 2);
        assert_eq!((breakdown[0].year, breakdown[0].month), (2026, 1));
        assert_eq!(breakdown[0].summary.total_count, 2);
        assert_eq!(breakdown[0].summary.percentage, 50.0);
        assert_eq!(breakdown[1].summary, AttendanceSummary::default());
    }

    #[test]
    fn low_students_sorted_with_their_weak_subjects() {
        let day = d(2026, 1, 5);
        let rows = vec![
            // student 1: 100% in subject 1, 0% in subject 2 => 50% overall
            row(1, 1, day, Present),
            row(1, 2, day, Absent),
            // student 2: 25%
            row(2, 1, day, Present),
            row(2, 1, d(2026, 1, 6), Absent),
            row(2, 1, d(2026, 1, 7), Late),
            row(2, 1, d(2026, 1, 8), Absent),
            // student 3: fine
            row(3, 1, day, Present),
        ];

        let result = low_attendance_students(&rows, &Labels::default(), &policy());

        let ids: Vec<u64> = result.iter().map(|s| s.student_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(result[0].summary.percentage, 25.0);

        let weak: Vec<u64> = result[1].low_subjects.iter().map(|s| s.subject_id).collect();
        assert_eq!(weak, vec![2]);
        assert_eq!(result[1].name, "Student #1");
    }

    #[test]
    fn labels_fall_back_to_ids() {
        let mut labels = Labels::default();
        labels.students.insert(
            4,
            StudentLabel {
                name: "Asha".to_string(),
                roll_number: Some("07".to_string()),
                class_id: None,
            },
        );
        labels.subjects.insert(
            9,
            SubjectLabel {
                name: "Physics".to_string(),
                code: "PHY".to_string(),
            },
        );

        assert_eq!(
            labels.label(&GroupKeyValue::StudentSubject {
                student_id: 4,
                subject_id: 9
            }),
            "Asha (07) - Physics"
        );
        assert_eq!(labels.label(&GroupKeyValue::Class { class_id: 2 }), "Class #2");
        assert_eq!(labels.label(&GroupKeyValue::Month { year: 2026, month: 3 }), "2026-03");
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(check_range(Some(d(2026, 2, 1)), Some(d(2026, 1, 1))).is_err());
        assert!(check_range(Some(d(2026, 1, 1)), Some(d(2026, 1, 1))).is_ok());
        assert!(check_range(None, Some(d(2026, 1, 1))).is_ok());
    }
}
