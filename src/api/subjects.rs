use crate::{
    auth::auth::AuthUser,
    error::{ApiError, is_duplicate_key},
    model::subject::Subject,
    utils::validate::{optional, required},
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct SubjectPayload {
    #[schema(example = "MATH101")]
    pub code: String,
    #[schema(example = "Mathematics")]
    pub name: String,
    pub description: Option<String>,
}

impl SubjectPayload {
    /// Codes are stored upper-case.
    fn validated(&self) -> Result<(String, String, Option<String>), ApiError> {
        let code = required("Subject code", &self.code)?.to_uppercase();
        let name = required("Subject name", &self.name)?;
        Ok((code, name, optional(self.description.as_deref())))
    }
}

async fn fetch_subject(pool: &MySqlPool, id: u64) -> Result<Option<Subject>, sqlx::Error> {
    sqlx::query_as::<_, Subject>("SELECT id, code, name, description FROM subjects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Create subject
#[utoipa::path(
    post,
    path = "/api/subjects",
    request_body = SubjectPayload,
    responses(
        (status = 201, description = "Subject created", body = Subject),
        (status = 409, description = "Subject code already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Subjects"
)]
pub async fn create_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<SubjectPayload>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let (code, name, description) = payload.validated()?;

    let id = match sqlx::query("INSERT INTO subjects (code, name, description) VALUES (?, ?, ?)")
        .bind(&code)
        .bind(&name)
        .bind(&description)
        .execute(pool.get_ref())
        .await
    {
        Ok(res) => res.last_insert_id(),
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("Subject code already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    info!(subject_id = id, %code, "Subject created");

    Ok(HttpResponse::Created().json(Subject {
        id,
        code,
        name,
        description,
    }))
}

/// List subjects
#[utoipa::path(
    get,
    path = "/api/subjects",
    responses((status = 200, description = "All subjects", body = [Subject])),
    security(("bearer_auth" = [])),
    tag = "Subjects"
)]
pub async fn list_subjects(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    let subjects = sqlx::query_as::<_, Subject>(
        "SELECT id, code, name, description FROM subjects ORDER BY name",
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(subjects))
}

/// Get subject by id
#[utoipa::path(
    get,
    path = "/api/subjects/{subject_id}",
    params(("subject_id", Path, description = "Subject ID")),
    responses(
        (status = 200, description = "Subject found", body = Subject),
        (status = 404, description = "Subject not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Subjects"
)]
pub async fn get_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    fetch_subject(pool.get_ref(), path.into_inner())
        .await?
        .map(|subject| HttpResponse::Ok().json(subject))
        .ok_or_else(|| ApiError::not_found("Subject not found"))
}

/// Update subject
#[utoipa::path(
    put,
    path = "/api/subjects/{subject_id}",
    params(("subject_id", Path, description = "Subject ID")),
    request_body = SubjectPayload,
    responses(
        (status = 200, description = "Subject updated", body = Subject),
        (status = 404, description = "Subject not found"),
        (status = 409, description = "Subject code already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Subjects"
)]
pub async fn update_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<SubjectPayload>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();
    let (code, name, description) = payload.validated()?;

    if fetch_subject(pool.get_ref(), id).await?.is_none() {
        return Err(ApiError::not_found("Subject not found"));
    }

    match sqlx::query("UPDATE subjects SET code = ?, name = ?, description = ? WHERE id = ?")
        .bind(&code)
        .bind(&name)
        .bind(&description)
        .bind(id)
        .execute(pool.get_ref())
        .await
    {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("Subject code already exists"));
        }
        Err(e) => return Err(e.into()),
    }

    info!(subject_id = id, "Subject updated");

    Ok(HttpResponse::Ok().json(Subject {
        id,
        code,
        name,
        description,
    }))
}

/// Delete subject
///
/// Refused while the subject is assigned to any class.
#[utoipa::path(
    delete,
    path = "/api/subjects/{subject_id}",
    params(("subject_id", Path, description = "Subject ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Subject not found"),
        (status = 409, description = "Subject still assigned")
    ),
    security(("bearer_auth" = [])),
    tag = "Subjects"
)]
pub async fn delete_subject(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    if fetch_subject(pool.get_ref(), id).await?.is_none() {
        return Err(ApiError::not_found("Subject not found"));
    }

    let assignments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM class_subject WHERE subject_id = ?")
        .bind(id)
        .fetch_one(pool.get_ref())
        .await?;
    if assignments > 0 {
        return Err(ApiError::conflict(
            "Cannot delete subject: it is assigned to one or more classes",
        ));
    }

    sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await?;

    info!(subject_id = id, deleted_by = auth.user_id, "Subject deleted");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}
