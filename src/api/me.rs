use crate::{
    api::{
        assignments::{AssignmentQuery, fetch_assignments},
        reports::{StudentReportQuery, build_student_report},
        users::fetch_user,
    },
    auth::{
        auth::AuthUser,
        password::{hash_password, verify_password},
    },
    config::Config,
    error::{ApiError, is_duplicate_key},
    models::UserSql,
    utils::{
        email_filter,
        validate::{check_password, is_valid_email, optional, required},
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct UpdateProfile {
    #[schema(example = "Asha Rao")]
    pub name: String,
    #[schema(example = "asha.rao@school.test", format = "email")]
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Own profile
#[utoipa::path(
    get,
    path = "/api/me",
    responses((status = 200, description = "Caller's profile", body = crate::model::user::User)),
    security(("bearer_auth" = [])),
    tag = "Me"
)]
pub async fn get_profile(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, ApiError> {
    fetch_user(pool.get_ref(), auth.user_id)
        .await?
        .map(|user| HttpResponse::Ok().json(user))
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Update own name, email and contact details
#[utoipa::path(
    put,
    path = "/api/me",
    request_body = UpdateProfile,
    responses(
        (status = 200, description = "Profile updated", body = crate::model::user::User),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Me"
)]
pub async fn update_profile(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<UpdateProfile>,
) -> Result<HttpResponse, ApiError> {
    let name = required("Name", &payload.name)?;
    let email = required("Email", &payload.email)?.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email format"));
    }
    if !email_filter::is_email_available(&email, Some(auth.user_id), pool.get_ref()).await? {
        return Err(ApiError::conflict("Email already exists"));
    }

    match sqlx::query("UPDATE users SET name = ?, email = ?, phone = ?, address = ? WHERE id = ?")
        .bind(&name)
        .bind(&email)
        .bind(optional(payload.phone.as_deref()))
        .bind(optional(payload.address.as_deref()))
        .bind(auth.user_id)
        .execute(pool.get_ref())
        .await
    {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => return Err(ApiError::conflict("Email already exists")),
        Err(e) => return Err(e.into()),
    }

    if email != auth.email {
        email_filter::insert(&email);
    }
    info!(user_id = auth.user_id, "Profile updated");

    fetch_user(pool.get_ref(), auth.user_id)
        .await?
        .map(|user| HttpResponse::Ok().json(user))
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Change own password
///
/// Revokes every refresh token of the caller.
#[utoipa::path(
    put,
    path = "/api/me/password",
    request_body = ChangePassword,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Too short or confirmation mismatch"),
        (status = 401, description = "Current password is incorrect")
    ),
    security(("bearer_auth" = [])),
    tag = "Me"
)]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ChangePassword>,
) -> Result<HttpResponse, ApiError> {
    if payload.current_password.is_empty() {
        return Err(ApiError::bad_request("Current password is required"));
    }
    check_password(&payload.new_password)?;
    if payload.new_password != payload.confirm_password {
        return Err(ApiError::bad_request(
            "New password and confirm password do not match",
        ));
    }

    let user = sqlx::query_as::<_, UserSql>(
        "SELECT id, name, email, password, role, status FROM users WHERE id = ?",
    )
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    if verify_password(&payload.current_password, &user.password).is_err() {
        warn!(user_id = user.id, "Password change rejected: wrong current password");
        return Err(ApiError::Unauthorized(
            "Current password is incorrect".to_string(),
        ));
    }

    let hashed = hash_password(&payload.new_password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::Internal
    })?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(&hashed)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(user_id = user.id, "Password changed");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Password changed successfully"
    })))
}

/// Own attendance (students)
#[utoipa::path(
    get,
    path = "/api/me/attendance",
    params(StudentReportQuery),
    responses(
        (status = 200, description = "Overall, subject-wise and monthly attendance", body = crate::api::reports::StudentReport),
        (status = 403, description = "Students only")
    ),
    security(("bearer_auth" = [])),
    tag = "Me"
)]
pub async fn my_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<StudentReportQuery>,
) -> Result<HttpResponse, ApiError> {
    if !auth.is_student() {
        return Err(ApiError::forbidden("Students only"));
    }

    let report = build_student_report(
        pool.get_ref(),
        config.attendance_policy(),
        &auth,
        auth.user_id,
        &query,
    )
    .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// Own (class, subject) assignments (teachers)
#[utoipa::path(
    get,
    path = "/api/me/assignments",
    responses(
        (status = 200, description = "Caller's assignments", body = [crate::model::class_subject::Assignment]),
        (status = 403, description = "Teachers only")
    ),
    security(("bearer_auth" = [])),
    tag = "Me"
)]
pub async fn my_assignments(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, ApiError> {
    if !auth.is_teacher() {
        return Err(ApiError::forbidden("Teachers only"));
    }

    let assignments = fetch_assignments(
        pool.get_ref(),
        &AssignmentQuery {
            teacher_id: Some(auth.user_id),
            class_id: None,
        },
    )
    .await?;

    Ok(HttpResponse::Ok().json(assignments))
}
