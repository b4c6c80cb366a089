use crate::{
    auth::{auth::AuthUser, password::hash_password},
    error::{ApiError, is_duplicate_key},
    model::{
        role::{AccountStatus, Role},
        user::{USER_COLUMNS, User},
    },
    models::{Paginated, resolve_page},
    utils::{
        db_utils::{as_object, build_update_sql, execute_update},
        email_filter,
        validate::{check_password, is_valid_email, optional, required},
    },
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};

const UPDATABLE_COLUMNS: &[&str] = &[
    "name",
    "email",
    "password",
    "role",
    "class_id",
    "roll_number",
    "parent_name",
    "parent_phone",
    "parent_email",
    "phone",
    "address",
    "status",
];

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    /// Explicit id; assigned by the database when absent.
    #[schema(example = 1001)]
    pub id: Option<u64>,
    #[schema(example = "Asha Rao")]
    pub name: String,
    #[schema(example = "asha.rao@school.test", format = "email")]
    pub email: String,
    #[schema(example = "changeme")]
    pub password: String,
    pub role: Role,
    #[schema(example = 3)]
    pub class_id: Option<u64>,
    #[schema(example = "10A-07")]
    pub roll_number: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub parent_email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: Option<AccountStatus>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// admin | teacher | student
    pub role: Option<Role>,
    pub class_id: Option<u64>,
    /// active | inactive
    pub status: Option<AccountStatus>,
    /// Matches name, email or roll number
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub data: Vec<User>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 120)]
    pub total: i64,
}

impl From<Paginated<User>> for UserListResponse {
    fn from(p: Paginated<User>) -> Self {
        Self {
            data: p.data,
            page: p.page,
            per_page: p.per_page,
            total: p.total,
        }
    }
}

pub(crate) async fn fetch_user(pool: &MySqlPool, id: u64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn class_exists(pool: &MySqlPool, class_id: u64) -> Result<bool, sqlx::Error> {
    let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM classes WHERE id = ?)")
        .bind(class_id)
        .fetch_one(pool)
        .await?;
    Ok(found != 0)
}

async fn ensure_email_free(
    pool: &MySqlPool,
    email: &str,
    except_user_id: Option<u64>,
) -> Result<(), ApiError> {
    if !email_filter::is_email_available(email, except_user_id, pool).await? {
        return Err(ApiError::conflict("Email already exists"));
    }
    Ok(())
}

/// Create user
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Email or id already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let name = required("Name", &payload.name)?;
    let email = required("Email", &payload.email)?.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email format"));
    }
    let parent_email = optional(payload.parent_email.as_deref());
    if parent_email.as_deref().is_some_and(|e| !is_valid_email(e)) {
        return Err(ApiError::bad_request("Invalid parent email format"));
    }
    check_password(&payload.password)?;

    let roll_number = optional(payload.roll_number.as_deref());
    if payload.role == Role::Student {
        if payload.class_id.is_none() {
            return Err(ApiError::bad_request("Class is required for students"));
        }
        if roll_number.is_none() {
            return Err(ApiError::bad_request("Roll number is required for students"));
        }
    }
    if let Some(class_id) = payload.class_id {
        if !class_exists(pool.get_ref(), class_id).await? {
            return Err(ApiError::bad_request("Class does not exist"));
        }
    }

    ensure_email_free(pool.get_ref(), &email, None).await?;

    let hashed = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::Internal
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO users
            (id, name, email, password, role, class_id, roll_number,
             parent_name, parent_phone, parent_email, phone, address, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.id)
    .bind(&name)
    .bind(&email)
    .bind(&hashed)
    .bind(payload.role)
    .bind(payload.class_id)
    .bind(&roll_number)
    .bind(optional(payload.parent_name.as_deref()))
    .bind(optional(payload.parent_phone.as_deref()))
    .bind(&parent_email)
    .bind(optional(payload.phone.as_deref()))
    .bind(optional(payload.address.as_deref()))
    .bind(payload.status.unwrap_or_default())
    .execute(pool.get_ref())
    .await;

    let id = match result {
        Ok(res) => payload.id.unwrap_or_else(|| res.last_insert_id()),
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("Email or user id already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    email_filter::insert(&email);
    info!(user_id = id, role = %payload.role, created_by = auth.user_id, "User created");

    let user = fetch_user(pool.get_ref(), id)
        .await?
        .ok_or(ApiError::Internal)?;
    Ok(HttpResponse::Created().json(user))
}

/// List users
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Paginated user list", body = UserListResponse),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let (page, per_page, offset) = resolve_page(query.page, query.per_page);

    // ---------- WHERE clause, shared by count and data queries ----------
    let push_where = |qb: &mut QueryBuilder<'_, MySql>| {
        qb.push(" WHERE 1 = 1");
        if let Some(role) = query.role {
            qb.push(" AND role = ").push_bind(role);
        }
        if let Some(class_id) = query.class_id {
            qb.push(" AND class_id = ").push_bind(class_id);
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(search) = optional(query.search.as_deref()) {
            let like = format!("%{search}%");
            qb.push(" AND (name LIKE ")
                .push_bind(like.clone())
                .push(" OR email LIKE ")
                .push_bind(like.clone())
                .push(" OR roll_number LIKE ")
                .push_bind(like)
                .push(")");
        }
    };

    // ---------- total count ----------
    let mut count_qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM users");
    push_where(&mut count_qb);
    debug!(sql = %count_qb.sql(), ?query, "Counting users");
    let total = count_qb.build_query_scalar::<i64>().fetch_one(pool.get_ref()).await?;

    // ---------- data query ----------
    let mut data_qb = QueryBuilder::<MySql>::new(format!("SELECT {USER_COLUMNS} FROM users"));
    push_where(&mut data_qb);
    data_qb
        .push(" ORDER BY role, name LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);
    let users = data_qb
        .build_query_as::<User>()
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(UserListResponse::from(Paginated {
        data: users,
        page,
        per_page,
        total,
    })))
}

/// Get user by id
#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id", Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    match fetch_user(pool.get_ref(), path.into_inner()).await? {
        Some(user) => Ok(HttpResponse::Ok().json(user)),
        None => Err(ApiError::not_found("User not found")),
    }
}

/// Partially update a user
#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id", Path, description = "User ID")),
    request_body(content = Object, description = "Any subset of the user fields; `password` is re-hashed"),
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Unknown field or invalid value"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    let existing = fetch_user(pool.get_ref(), user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let mut fields = as_object(&body)?.clone();

    if let Some(value) = fields.get("email") {
        let email = value
            .as_str()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| is_valid_email(e))
            .ok_or_else(|| ApiError::bad_request("Invalid email format"))?;
        ensure_email_free(pool.get_ref(), &email, Some(user_id)).await?;
        fields.insert("email".to_string(), Value::String(email));
    }

    if let Some(value) = fields.get("role") {
        value
            .as_str()
            .and_then(|r| r.parse::<Role>().ok())
            .ok_or_else(|| ApiError::bad_request("Valid role is required"))?;
    }

    if let Some(value) = fields.get("status") {
        value
            .as_str()
            .and_then(|s| s.parse::<AccountStatus>().ok())
            .ok_or_else(|| ApiError::bad_request("Valid status is required"))?;
        if user_id == auth.user_id && value.as_str() == Some("inactive") {
            return Err(ApiError::bad_request("You cannot deactivate your own account"));
        }
    }

    if let Some(value) = fields.get("class_id") {
        if let Some(class_id) = value.as_u64() {
            if !class_exists(pool.get_ref(), class_id).await? {
                return Err(ApiError::bad_request("Class does not exist"));
            }
        } else if !value.is_null() {
            return Err(ApiError::bad_request("class_id must be a number or null"));
        }
    }

    if let Some(value) = fields.get("password") {
        let password = value
            .as_str()
            .ok_or_else(|| ApiError::bad_request("Password must be a string"))?;
        check_password(password)?;
        let hashed = hash_password(password).map_err(|e| {
            error!(error = %e, "Failed to hash password");
            ApiError::Internal
        })?;
        fields.insert("password".to_string(), Value::String(hashed));
    }

    let update = build_update_sql("users", &fields, UPDATABLE_COLUMNS, "id", user_id)?;

    match execute_update(pool.get_ref(), update).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => return Err(ApiError::conflict("Email already exists")),
        Err(e) => return Err(e.into()),
    }

    if let Some(Value::String(email)) = fields.get("email") {
        if *email != existing.email {
            email_filter::insert(email);
        }
    }

    info!(user_id, updated_by = auth.user_id, "User updated");

    let user = fetch_user(pool.get_ref(), user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(HttpResponse::Ok().json(user))
}

/// Delete user
///
/// A student's attendance records are removed with them.
#[utoipa::path(
    delete,
    path = "/api/users/{user_id}",
    params(("user_id", Path, description = "User ID")),
    responses(
        (status = 200, description = "Successfully deleted", body = Object, example = json!({
            "message": "Successfully deleted"
        })),
        (status = 400, description = "Cannot delete own account"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let user = fetch_user(pool.get_ref(), user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let mut tx = pool.begin().await?;
    if user.role == Role::Student {
        let removed = sqlx::query("DELETE FROM attendance WHERE student_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        debug!(user_id, removed, "Removed attendance of deleted student");
    }
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    email_filter::remove(&user.email);
    info!(user_id, role = %user.role, deleted_by = auth.user_id, "User deleted");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}
