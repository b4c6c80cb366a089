use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::ApiError,
    model::attendance::{AttendanceRecord, AttendanceStatus},
    models::{Paginated, resolve_page},
    utils::validate::optional,
};
use actix_web::{HttpResponse, web};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlConnection, MySqlPool, QueryBuilder};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct MarkEntry {
    #[schema(example = 12)]
    pub student_id: u64,
    pub status: AttendanceStatus,
    #[schema(example = "Bus was late")]
    pub remarks: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct MarkAttendance {
    #[schema(example = 3)]
    pub class_id: u64,
    #[schema(example = 7)]
    pub subject_id: u64,
    #[schema(value_type = String, format = "date", example = "2026-01-15")]
    pub date: NaiveDate,
    pub entries: Vec<MarkEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkResult {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub inserted: u64,
    pub updated: u64,
    /// Existing rows left as they were: same values, or outside the edit window.
    pub unchanged: u64,
    /// Students not enrolled (active) in the class.
    pub rejected_student_ids: Vec<u64>,
    /// Whether existing rows of this date could be amended by the caller.
    pub editable: bool,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub class_id: Option<u64>,
    pub subject_id: Option<u64>,
    pub student_id: Option<u64>,
    /// Exact day; overrides the range
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_from: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub date_to: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceEntry {
    pub id: u64,
    pub student_id: u64,
    pub student_name: String,
    pub roll_number: Option<String>,
    pub class_id: Option<u64>,
    pub class_name: Option<String>,
    pub subject_id: u64,
    pub subject_name: String,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
    #[sqlx(skip)]
    pub editable: bool,
}

#[derive(Serialize, ToSchema)]
pub struct HistoryResponse {
    pub data: Vec<AttendanceEntry>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl From<Paginated<AttendanceEntry>> for HistoryResponse {
    fn from(p: Paginated<AttendanceEntry>) -> Self {
        Self {
            data: p.data,
            page: p.page,
            per_page: p.per_page,
            total: p.total,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateAttendance {
    pub status: Option<AttendanceStatus>,
    /// Blank clears the remarks
    pub remarks: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct BulkUpdateAttendance {
    #[schema(example = json!([101, 102, 103]))]
    pub ids: Vec<u64>,
    pub status: Option<AttendanceStatus>,
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkUpdateResult {
    pub updated: u64,
    /// Unknown, not owned or out-of-window ids
    pub skipped: u64,
}

/// Record identity needed for ownership and edit-window checks.
#[derive(Debug, sqlx::FromRow)]
struct RecordScope {
    id: u64,
    subject_id: u64,
    class_id: Option<u64>,
    date: NaiveDate,
}

/// Rows to write for one marking request, plus how each entry was classified.
#[derive(Debug, Default, PartialEq)]
struct MarkPlan {
    writes: Vec<MarkEntry>,
    inserted: u64,
    updated: u64,
    unchanged: u64,
}

/// Keeps the last entry per student and splits off students that are not
/// part of the class.
fn accept_entries(entries: Vec<MarkEntry>, enrolled: &HashSet<u64>) -> (Vec<MarkEntry>, Vec<u64>) {
    let mut accepted: BTreeMap<u64, MarkEntry> = BTreeMap::new();
    let mut rejected = Vec::new();

    for mut entry in entries {
        if !enrolled.contains(&entry.student_id) {
            if !rejected.contains(&entry.student_id) {
                rejected.push(entry.student_id);
            }
            continue;
        }
        entry.remarks = optional(entry.remarks.as_deref());
        accepted.insert(entry.student_id, entry);
    }

    (accepted.into_values().collect(), rejected)
}

/// New students are always written. Existing rows are rewritten only when
/// they differ and the date is still editable.
fn plan_marks(
    entries: Vec<MarkEntry>,
    existing: &HashMap<u64, (AttendanceStatus, Option<String>)>,
    editable: bool,
) -> MarkPlan {
    let mut plan = MarkPlan::default();

    for entry in entries {
        match existing.get(&entry.student_id) {
            None => {
                plan.inserted += 1;
                plan.writes.push(entry);
            }
            Some((status, remarks))
                if editable && (*status != entry.status || *remarks != entry.remarks) =>
            {
                plan.updated += 1;
                plan.writes.push(entry);
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    plan
}

/// (class, subject) pairs the teacher is assigned to.
async fn teacher_pairs(
    conn: &mut MySqlConnection,
    teacher_id: u64,
) -> Result<HashSet<(u64, u64)>, sqlx::Error> {
    let pairs = sqlx::query_as::<_, (u64, u64)>(
        "SELECT class_id, subject_id FROM class_subject WHERE teacher_id = ?",
    )
    .bind(teacher_id)
    .fetch_all(conn)
    .await?;
    Ok(pairs.into_iter().collect())
}

fn owns(pairs: Option<&HashSet<(u64, u64)>>, scope: &RecordScope) -> bool {
    match (pairs, scope.class_id) {
        // admin
        (None, _) => true,
        (Some(pairs), Some(class_id)) => pairs.contains(&(class_id, scope.subject_id)),
        (Some(_), None) => false,
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Mark attendance for one class, subject and day
#[utoipa::path(
    post,
    path = "/api/attendance",
    request_body = MarkAttendance,
    responses(
        (status = 200, description = "Attendance saved", body = MarkResult),
        (status = 400, description = "Empty entries or future date"),
        (status = 403, description = "Not assigned to this class and subject")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn mark_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<MarkAttendance>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let MarkAttendance {
        class_id,
        subject_id,
        date,
        entries,
    } = payload.into_inner();

    if entries.is_empty() {
        return Err(ApiError::bad_request("At least one attendance entry is required"));
    }
    let now = now();
    if date > now.date() {
        return Err(ApiError::bad_request("Cannot mark attendance for a future date"));
    }

    let mut tx = pool.begin().await?;

    // ---------- assignment ----------
    let assigned: i64 = if auth.is_admin() {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM class_subject WHERE class_id = ? AND subject_id = ?)",
        )
        .bind(class_id)
        .bind(subject_id)
        .fetch_one(&mut *tx)
        .await?
    } else {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM class_subject \
             WHERE class_id = ? AND subject_id = ? AND teacher_id = ?)",
        )
        .bind(class_id)
        .bind(subject_id)
        .bind(auth.user_id)
        .fetch_one(&mut *tx)
        .await?
    };
    if assigned == 0 {
        warn!(user_id = auth.user_id, class_id, subject_id, "Marking rejected: not assigned");
        return Err(ApiError::forbidden(
            "You are not assigned to teach this subject in this class",
        ));
    }

    // ---------- enrolment ----------
    let enrolled: HashSet<u64> = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM users WHERE class_id = ? AND role = 'student' AND status = 'active'",
    )
    .bind(class_id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .collect();

    let (accepted, rejected_student_ids) = accept_entries(entries, &enrolled);
    let editable = config
        .attendance_policy()
        .can_edit(date, now, auth.is_admin());

    if accepted.is_empty() {
        return Ok(HttpResponse::Ok().json(MarkResult {
            date,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            rejected_student_ids,
            editable,
        }));
    }

    // ---------- existing rows ----------
    let mut existing_qb = QueryBuilder::<MySql>::new(
        "SELECT student_id, status, remarks FROM attendance WHERE subject_id = ",
    );
    existing_qb
        .push_bind(subject_id)
        .push(" AND date = ")
        .push_bind(date)
        .push(" AND student_id IN (");
    let mut ids = existing_qb.separated(", ");
    for entry in &accepted {
        ids.push_bind(entry.student_id);
    }
    existing_qb.push(") FOR UPDATE");

    let existing: HashMap<u64, (AttendanceStatus, Option<String>)> = existing_qb
        .build_query_as::<(u64, AttendanceStatus, Option<String>)>()
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(student_id, status, remarks)| (student_id, (status, remarks)))
        .collect();

    let plan = plan_marks(accepted, &existing, editable);

    // ---------- write ----------
    if !plan.writes.is_empty() {
        let mut insert_qb = QueryBuilder::<MySql>::new(if editable {
            "INSERT INTO attendance (student_id, subject_id, date, status, remarks) "
        } else {
            "INSERT IGNORE INTO attendance (student_id, subject_id, date, status, remarks) "
        });
        insert_qb.push_values(&plan.writes, |mut row, entry| {
            row.push_bind(entry.student_id)
                .push_bind(subject_id)
                .push_bind(date)
                .push_bind(entry.status)
                .push_bind(entry.remarks.clone());
        });
        if editable {
            insert_qb.push(
                " ON DUPLICATE KEY UPDATE status = VALUES(status), remarks = VALUES(remarks)",
            );
        }
        debug!(sql = %insert_qb.sql(), rows = plan.writes.len(), "Writing attendance");
        insert_qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!(
        user_id = auth.user_id,
        class_id,
        subject_id,
        %date,
        inserted = plan.inserted,
        updated = plan.updated,
        unchanged = plan.unchanged,
        rejected = rejected_student_ids.len(),
        "Attendance marked"
    );

    Ok(HttpResponse::Ok().json(MarkResult {
        date,
        inserted: plan.inserted,
        updated: plan.updated,
        unchanged: plan.unchanged,
        rejected_student_ids,
        editable,
    }))
}

/// Attendance history
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(HistoryQuery),
    responses((status = 200, description = "Paginated attendance records", body = HistoryResponse)),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let (page, per_page, offset) = resolve_page(query.page, query.per_page);

    let push_where = |qb: &mut QueryBuilder<'_, MySql>| {
        qb.push(" WHERE 1 = 1");
        if auth.is_student() {
            qb.push(" AND a.student_id = ").push_bind(auth.user_id);
        } else if let Some(student_id) = query.student_id {
            qb.push(" AND a.student_id = ").push_bind(student_id);
        }
        if auth.is_teacher() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM class_subject cs \
                 WHERE cs.class_id = u.class_id AND cs.subject_id = a.subject_id \
                 AND cs.teacher_id = ",
            )
            .push_bind(auth.user_id)
            .push(")");
        }
        if let Some(class_id) = query.class_id {
            qb.push(" AND u.class_id = ").push_bind(class_id);
        }
        if let Some(subject_id) = query.subject_id {
            qb.push(" AND a.subject_id = ").push_bind(subject_id);
        }
        if let Some(date) = query.date {
            qb.push(" AND a.date = ").push_bind(date);
        } else {
            if let Some(from) = query.date_from {
                qb.push(" AND a.date >= ").push_bind(from);
            }
            if let Some(to) = query.date_to {
                qb.push(" AND a.date <= ").push_bind(to);
            }
        }
        if let Some(status) = query.status {
            qb.push(" AND a.status = ").push_bind(status);
        }
    };

    const FROM: &str = " FROM attendance a \
         JOIN users u ON u.id = a.student_id \
         JOIN subjects s ON s.id = a.subject_id \
         LEFT JOIN classes c ON c.id = u.class_id";

    let mut count_qb = QueryBuilder::<MySql>::new("SELECT COUNT(*)");
    count_qb.push(FROM);
    push_where(&mut count_qb);
    let total = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(pool.get_ref())
        .await?;

    let mut data_qb = QueryBuilder::<MySql>::new(
        "SELECT a.id, a.student_id, u.name AS student_name, u.roll_number, \
         u.class_id, c.name AS class_name, a.subject_id, s.name AS subject_name, \
         a.date, a.status, a.remarks, a.updated_at",
    );
    data_qb.push(FROM);
    push_where(&mut data_qb);
    data_qb
        .push(" ORDER BY a.date DESC, c.name, u.roll_number, s.name LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);

    debug!(sql = %data_qb.sql(), ?query, "Listing attendance");

    let mut records = data_qb
        .build_query_as::<AttendanceEntry>()
        .fetch_all(pool.get_ref())
        .await?;

    let policy = config.attendance_policy();
    let now = now();
    for record in &mut records {
        record.editable = !auth.is_student() && policy.can_edit(record.date, now, auth.is_admin());
    }

    Ok(HttpResponse::Ok().json(HistoryResponse::from(Paginated {
        data: records,
        page,
        per_page,
        total,
    })))
}

/// Update one attendance record
#[utoipa::path(
    put,
    path = "/api/attendance/{attendance_id}",
    params(("attendance_id", Path, description = "Attendance record ID")),
    request_body = UpdateAttendance,
    responses(
        (status = 200, description = "Record updated", body = AttendanceRecord),
        (status = 400, description = "Nothing to update"),
        (status = 403, description = "Not your class/subject or edit window expired"),
        (status = 404, description = "Record not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn update_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<UpdateAttendance>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();

    if payload.status.is_none() && payload.remarks.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let mut conn = pool.acquire().await?;

    let scope = sqlx::query_as::<_, RecordScope>(
        "SELECT a.id, a.subject_id, u.class_id, a.date \
         FROM attendance a JOIN users u ON u.id = a.student_id \
         WHERE a.id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Attendance record not found"))?;

    let pairs = if auth.is_admin() {
        None
    } else {
        Some(teacher_pairs(&mut *conn, auth.user_id).await?)
    };
    if !owns(pairs.as_ref(), &scope) {
        return Err(ApiError::forbidden(
            "You can only edit attendance for your own classes and subjects",
        ));
    }

    let policy = config.attendance_policy();
    if !policy.can_edit(scope.date, now(), auth.is_admin()) {
        return Err(ApiError::forbidden(format!(
            "Attendance can only be edited within {} hours",
            policy.edit_window_hours
        )));
    }

    let mut qb = QueryBuilder::<MySql>::new("UPDATE attendance SET ");
    let mut sets = qb.separated(", ");
    if let Some(status) = payload.status {
        sets.push("status = ").push_bind_unseparated(status);
    }
    if let Some(remarks) = &payload.remarks {
        sets.push("remarks = ")
            .push_bind_unseparated(optional(Some(remarks.as_str())));
    }
    qb.push(" WHERE id = ").push_bind(scope.id);
    qb.build().execute(&mut *conn).await?;

    let record = sqlx::query_as::<_, AttendanceRecord>(
        "SELECT id, student_id, subject_id, date, status, remarks, created_at, updated_at \
         FROM attendance WHERE id = ?",
    )
    .bind(scope.id)
    .fetch_one(&mut *conn)
    .await?;

    info!(attendance_id = id, user_id = auth.user_id, status = %record.status, "Attendance updated");

    Ok(HttpResponse::Ok().json(record))
}

/// Bulk update attendance records
///
/// Records outside the caller's classes or edit window are skipped.
#[utoipa::path(
    post,
    path = "/api/attendance/bulk-update",
    request_body = BulkUpdateAttendance,
    responses(
        (status = 200, description = "Bulk update applied", body = BulkUpdateResult),
        (status = 400, description = "No ids or nothing to update")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn bulk_update_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<BulkUpdateAttendance>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    let BulkUpdateAttendance {
        mut ids,
        status,
        remarks,
    } = payload.into_inner();
    ids.sort_unstable();
    ids.dedup();

    if ids.is_empty() {
        return Err(ApiError::bad_request("No records selected"));
    }
    if status.is_none() && remarks.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let remarks = remarks.map(|r| optional(Some(r.as_str())));

    let mut tx = pool.begin().await?;

    let mut scope_qb = QueryBuilder::<MySql>::new(
        "SELECT a.id, a.subject_id, u.class_id, a.date \
         FROM attendance a JOIN users u ON u.id = a.student_id \
         WHERE a.id IN (",
    );
    let mut in_list = scope_qb.separated(", ");
    for id in &ids {
        in_list.push_bind(*id);
    }
    scope_qb.push(") FOR UPDATE");
    let scopes = scope_qb
        .build_query_as::<RecordScope>()
        .fetch_all(&mut *tx)
        .await?;

    let pairs = if auth.is_admin() {
        None
    } else {
        Some(teacher_pairs(&mut *tx, auth.user_id).await?)
    };
    let policy = config.attendance_policy();
    let now = now();

    let allowed: Vec<u64> = scopes
        .iter()
        .filter(|scope| owns(pairs.as_ref(), scope) && policy.can_edit(scope.date, now, auth.is_admin()))
        .map(|scope| scope.id)
        .collect();

    let updated = if allowed.is_empty() {
        0
    } else {
        let mut qb = QueryBuilder::<MySql>::new("UPDATE attendance SET ");
        let mut sets = qb.separated(", ");
        if let Some(status) = status {
            sets.push("status = ").push_bind_unseparated(status);
        }
        if let Some(remarks) = remarks {
            sets.push("remarks = ").push_bind_unseparated(remarks);
        }
        qb.push(" WHERE id IN (");
        let mut in_list = qb.separated(", ");
        for id in &allowed {
            in_list.push_bind(*id);
        }
        qb.push(")");
        qb.build().execute(&mut *tx).await?;
        allowed.len() as u64
    };

    tx.commit().await?;

    let skipped = ids.len() as u64 - updated;
    info!(user_id = auth.user_id, updated, skipped, "Bulk attendance update");

    Ok(HttpResponse::Ok().json(BulkUpdateResult { updated, skipped }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceStatus::{Absent, Late, Present};

    fn entry(student_id: u64, status: AttendanceStatus, remarks: Option<&str>) -> MarkEntry {
        MarkEntry {
            student_id,
            status,
            remarks: remarks.map(str::to_string),
        }
    }

    #[test]
    fn accept_keeps_last_entry_and_rejects_outsiders() {
        let enrolled: HashSet<u64> = [1, 2, 3].into_iter().collect();
        let entries = vec![
            entry(1, Present, None),
            entry(9, Absent, None),
            entry(1, Late, Some("  ")),
            entry(2, Absent, Some(" sick ")),
            entry(9, Present, None),
        ];

        let (accepted, rejected) = accept_entries(entries, &enrolled);

        assert_eq!(
            accepted,
            vec![entry(1, Late, None), entry(2, Absent, Some("sick"))]
        );
        assert_eq!(rejected, vec![9]);
    }

    #[test]
    fn plan_inside_window_upserts_changes_only() {
        let existing: HashMap<_, _> = [(1, (Present, None)), (2, (Absent, None))]
            .into_iter()
            .collect();
        let entries = vec![
            entry(1, Present, None),
            entry(2, Late, None),
            entry(3, Present, None),
        ];

        let plan = plan_marks(entries, &existing, true);

        assert_eq!(plan.inserted, 1);
        assert_eq!(plan.updated, 1);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.writes, vec![entry(2, Late, None), entry(3, Present, None)]);
    }

    #[test]
    fn plan_outside_window_only_inserts() {
        let existing: HashMap<_, _> = [(1, (Present, None))].into_iter().collect();
        let entries = vec![entry(1, Absent, Some("changed")), entry(2, Present, None)];

        let plan = plan_marks(entries, &existing, false);

        assert_eq!(plan.inserted, 1);
        assert_eq!(plan.updated, 0);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.writes, vec![entry(2, Present, None)]);
    }

    #[test]
    fn remarks_change_counts_as_update() {
        let existing: HashMap<_, _> = [(4, (Late, None))].into_iter().collect();
        let plan = plan_marks(vec![entry(4, Late, Some("traffic"))], &existing, true);
        assert_eq!(plan.updated, 1);
    }

    #[test]
    fn ownership_requires_matching_pair() {
        let scope = RecordScope {
            id: 1,
            subject_id: 7,
            class_id: Some(3),
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        };
        let pairs: HashSet<(u64, u64)> = [(3, 7)].into_iter().collect();
        let other: HashSet<(u64, u64)> = [(3, 8)].into_iter().collect();

        assert!(owns(None, &scope));
        assert!(owns(Some(&pairs), &scope));
        assert!(!owns(Some(&other), &scope));

        let classless = RecordScope {
            class_id: None,
            ..scope
        };
        assert!(!owns(Some(&pairs), &classless));
    }
}
