use crate::{
    auth::auth::AuthUser,
    error::{ApiError, is_duplicate_key},
    model::{class_subject::Assignment, role::Role},
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

const ASSIGNMENT_SELECT: &str = r#"
    SELECT cs.id, cs.class_id, c.name AS class_name,
           cs.subject_id, s.name AS subject_name, s.code AS subject_code,
           cs.teacher_id, u.name AS teacher_name
    FROM class_subject cs
    JOIN classes c ON c.id = cs.class_id
    JOIN subjects s ON s.id = cs.subject_id
    JOIN users u ON u.id = cs.teacher_id
"#;

#[derive(Deserialize, ToSchema)]
pub struct AssignmentPayload {
    #[schema(example = 3)]
    pub class_id: u64,
    #[schema(example = 7)]
    pub subject_id: u64,
    #[schema(example = 21)]
    pub teacher_id: u64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AssignmentQuery {
    pub teacher_id: Option<u64>,
    pub class_id: Option<u64>,
}

/// Assignments matching the optional teacher/class filters, ordered by
/// class then subject.
pub(crate) async fn fetch_assignments(
    pool: &MySqlPool,
    filter: &AssignmentQuery,
) -> Result<Vec<Assignment>, sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new(ASSIGNMENT_SELECT);
    qb.push(" WHERE 1 = 1");
    if let Some(teacher_id) = filter.teacher_id {
        qb.push(" AND cs.teacher_id = ").push_bind(teacher_id);
    }
    if let Some(class_id) = filter.class_id {
        qb.push(" AND cs.class_id = ").push_bind(class_id);
    }
    qb.push(" ORDER BY c.name, s.name");

    debug!(sql = %qb.sql(), ?filter, "Fetching assignments");

    qb.build_query_as::<Assignment>().fetch_all(pool).await
}

/// Assign a teacher to a (class, subject) pair
#[utoipa::path(
    post,
    path = "/api/assignments",
    request_body = AssignmentPayload,
    responses(
        (status = 201, description = "Assignment created", body = Assignment),
        (status = 400, description = "Unknown class/subject or user is not a teacher"),
        (status = 409, description = "Assignment already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Assignments"
)]
pub async fn create_assignment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<AssignmentPayload>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let teacher_role = sqlx::query_scalar::<_, Role>("SELECT role FROM users WHERE id = ?")
        .bind(payload.teacher_id)
        .fetch_optional(pool.get_ref())
        .await?;
    if teacher_role != Some(Role::Teacher) {
        return Err(ApiError::bad_request("Selected user is not a teacher"));
    }

    // FK violations share SQLSTATE 23000 with duplicates, so check first
    let (class_found, subject_found): (i64, i64) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM classes WHERE id = ?), \
                EXISTS(SELECT 1 FROM subjects WHERE id = ?)",
    )
    .bind(payload.class_id)
    .bind(payload.subject_id)
    .fetch_one(pool.get_ref())
    .await?;
    if class_found == 0 {
        return Err(ApiError::bad_request("Class does not exist"));
    }
    if subject_found == 0 {
        return Err(ApiError::bad_request("Subject does not exist"));
    }

    let id = match sqlx::query(
        "INSERT INTO class_subject (class_id, subject_id, teacher_id) VALUES (?, ?, ?)",
    )
    .bind(payload.class_id)
    .bind(payload.subject_id)
    .bind(payload.teacher_id)
    .execute(pool.get_ref())
    .await
    {
        Ok(res) => res.last_insert_id(),
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("This assignment already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        assignment_id = id,
        class_id = payload.class_id,
        subject_id = payload.subject_id,
        teacher_id = payload.teacher_id,
        "Teacher assigned"
    );

    let assignment = sqlx::query_as::<_, Assignment>(&format!("{ASSIGNMENT_SELECT} WHERE cs.id = ?"))
        .bind(id)
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Created().json(assignment))
}

/// List assignments
///
/// Teachers always see only their own.
#[utoipa::path(
    get,
    path = "/api/assignments",
    params(AssignmentQuery),
    responses((status = 200, description = "Assignments", body = [Assignment])),
    security(("bearer_auth" = [])),
    tag = "Assignments"
)]
pub async fn list_assignments(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AssignmentQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    let mut filter = query.into_inner();
    if auth.is_teacher() {
        filter.teacher_id = Some(auth.user_id);
    }

    let assignments = fetch_assignments(pool.get_ref(), &filter).await?;
    Ok(HttpResponse::Ok().json(assignments))
}

/// Remove an assignment
#[utoipa::path(
    delete,
    path = "/api/assignments/{assignment_id}",
    params(("assignment_id", Path, description = "Assignment ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Assignment not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Assignments"
)]
pub async fn delete_assignment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let removed = sqlx::query("DELETE FROM class_subject WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(ApiError::not_found("Assignment not found"));
    }

    info!(assignment_id = id, deleted_by = auth.user_id, "Assignment removed");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}
