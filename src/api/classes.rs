use crate::{
    auth::auth::AuthUser,
    error::{ApiError, is_duplicate_key},
    model::{
        class::Class,
        user::{USER_COLUMNS, User},
    },
    utils::validate::{optional, required},
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct ClassPayload {
    #[schema(example = "Grade 10 - A")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Serialize, sqlx::FromRow, ToSchema)]
pub struct ClassWithCount {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    #[schema(example = 32)]
    pub student_count: i64,
}

async fn fetch_class(pool: &MySqlPool, id: u64) -> Result<Option<Class>, sqlx::Error> {
    sqlx::query_as::<_, Class>("SELECT id, name, description FROM classes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Create class
#[utoipa::path(
    post,
    path = "/api/classes",
    request_body = ClassPayload,
    responses(
        (status = 201, description = "Class created", body = Class),
        (status = 409, description = "Class name already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Classes"
)]
pub async fn create_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ClassPayload>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let name = required("Class name", &payload.name)?;
    let description = optional(payload.description.as_deref());

    let id = match sqlx::query("INSERT INTO classes (name, description) VALUES (?, ?)")
        .bind(&name)
        .bind(&description)
        .execute(pool.get_ref())
        .await
    {
        Ok(res) => res.last_insert_id(),
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("Class name already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    info!(class_id = id, %name, "Class created");

    Ok(HttpResponse::Created().json(Class {
        id,
        name,
        description,
    }))
}

/// List classes with their active student counts
#[utoipa::path(
    get,
    path = "/api/classes",
    responses((status = 200, description = "All classes", body = [ClassWithCount])),
    security(("bearer_auth" = [])),
    tag = "Classes"
)]
pub async fn list_classes(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    let classes = sqlx::query_as::<_, ClassWithCount>(
        r#"
        SELECT c.id, c.name, c.description,
               COUNT(u.id) AS student_count
        FROM classes c
        LEFT JOIN users u
               ON u.class_id = c.id AND u.role = 'student' AND u.status = 'active'
        GROUP BY c.id, c.name, c.description
        ORDER BY c.name
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(classes))
}

/// Get class by id
#[utoipa::path(
    get,
    path = "/api/classes/{class_id}",
    params(("class_id", Path, description = "Class ID")),
    responses(
        (status = 200, description = "Class found", body = Class),
        (status = 404, description = "Class not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Classes"
)]
pub async fn get_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    match fetch_class(pool.get_ref(), path.into_inner()).await? {
        Some(class) => Ok(HttpResponse::Ok().json(class)),
        None => Err(ApiError::not_found("Class not found")),
    }
}

/// Update class
#[utoipa::path(
    put,
    path = "/api/classes/{class_id}",
    params(("class_id", Path, description = "Class ID")),
    request_body = ClassPayload,
    responses(
        (status = 200, description = "Class updated", body = Class),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Class name already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Classes"
)]
pub async fn update_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ClassPayload>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let name = required("Class name", &payload.name)?;
    let description = optional(payload.description.as_deref());

    if fetch_class(pool.get_ref(), id).await?.is_none() {
        return Err(ApiError::not_found("Class not found"));
    }

    match sqlx::query("UPDATE classes SET name = ?, description = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(id)
        .execute(pool.get_ref())
        .await
    {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("Class name already exists"));
        }
        Err(e) => return Err(e.into()),
    }

    info!(class_id = id, "Class updated");

    Ok(HttpResponse::Ok().json(Class {
        id,
        name,
        description,
    }))
}

/// Delete class
///
/// Refused while students are enrolled; teacher assignments go with it.
#[utoipa::path(
    delete,
    path = "/api/classes/{class_id}",
    params(("class_id", Path, description = "Class ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Class still has students")
    ),
    security(("bearer_auth" = [])),
    tag = "Classes"
)]
pub async fn delete_class(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    if fetch_class(pool.get_ref(), id).await?.is_none() {
        return Err(ApiError::not_found("Class not found"));
    }

    let students: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE class_id = ? AND role = 'student'")
            .bind(id)
            .fetch_one(pool.get_ref())
            .await?;
    if students > 0 {
        return Err(ApiError::conflict(format!(
            "Cannot delete class: {students} student(s) are enrolled"
        )));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM class_subject WHERE class_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(class_id = id, deleted_by = auth.user_id, "Class deleted");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

/// Students of a class, ordered by roll number then name
#[utoipa::path(
    get,
    path = "/api/classes/{class_id}/students",
    params(("class_id", Path, description = "Class ID")),
    responses(
        (status = 200, description = "Students of the class", body = [User]),
        (status = 403, description = "Not assigned to this class"),
        (status = 404, description = "Class not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Classes"
)]
pub async fn list_class_students(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();

    if fetch_class(pool.get_ref(), id).await?.is_none() {
        return Err(ApiError::not_found("Class not found"));
    }

    if auth.is_teacher() {
        let assigned: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM class_subject WHERE class_id = ? AND teacher_id = ?)",
        )
        .bind(id)
        .bind(auth.user_id)
        .fetch_one(pool.get_ref())
        .await?;
        if assigned == 0 {
            return Err(ApiError::forbidden("You are not assigned to this class"));
        }
    }

    let students = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users \
         WHERE class_id = ? AND role = 'student' AND status = 'active' \
         ORDER BY roll_number IS NULL, roll_number, name"
    ))
    .bind(id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(students))
}
