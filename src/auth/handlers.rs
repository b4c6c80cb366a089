use crate::{
    auth::{
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::ApiError,
    model::role::AccountStatus,
    models::{Claims, LoginReqDto, LoginResponse, TokenType, UserSql},
    utils::login_throttle::LoginThrottle,
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument, warn};

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Issues an access/refresh pair and stores the refresh token's jti.
async fn issue_tokens(
    pool: &MySqlPool,
    config: &Config,
    user_id: u64,
    email: &str,
    role: u8,
) -> Result<(String, String), ApiError> {
    let access_token =
        generate_access_token(user_id, email, role, &config.jwt_secret, config.access_token_ttl)
            .map_err(|e| {
                error!(error = %e, "Failed to sign access token");
                ApiError::Internal
            })?;

    let (refresh_token, refresh_claims) =
        generate_refresh_token(user_id, email, role, &config.jwt_secret, config.refresh_token_ttl)
            .map_err(|e| {
                error!(error = %e, "Failed to sign refresh token");
                ApiError::Internal
            })?;

    debug!(user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await?;

    Ok((access_token, refresh_token))
}

/// Login
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 400, description = "Email or password missing"),
        (status = 401, description = "Invalid credentials or inactive account"),
        (status = 429, description = "Account temporarily locked")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, throttle, user),
    fields(email = %user.email)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    throttle: web::Data<LoginThrottle>,
) -> Result<HttpResponse, ApiError> {
    info!("Login request received");

    let email = user.email.trim().to_lowercase();

    // 1️⃣ Basic validation
    if email.is_empty() || user.password.is_empty() {
        info!("Validation failed: empty email or password");
        return Err(ApiError::bad_request("Email and password are required"));
    }
    if !email.contains('@') {
        return Err(ApiError::bad_request("Invalid email format"));
    }

    // 2️⃣ Lockout
    if throttle.is_locked(&email).await {
        warn!("Login rejected: account locked after repeated failures");
        return Err(ApiError::TooManyAttempts);
    }

    // 3️⃣ Fetch user
    let db_user = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, name, email, password, role, status
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(db_user) = db_user else {
        info!("Invalid credentials: user not found");
        throttle.record_failure(&email).await;
        return Err(ApiError::Unauthorized("Invalid email or password".to_string()));
    };

    if db_user.status != AccountStatus::Active {
        info!(user_id = db_user.id, "Login rejected: inactive account");
        return Err(ApiError::Unauthorized(
            "Your account is inactive. Please contact the administrator.".to_string(),
        ));
    }

    // 4️⃣ Verify password
    if let Err(e) = verify_password(&user.password, &db_user.password) {
        let failures = throttle.record_failure(&email).await;
        info!(error = %e, failures, "Invalid credentials: password mismatch");
        return Err(ApiError::Unauthorized("Invalid email or password".to_string()));
    }

    throttle.reset(&email).await;
    debug!(user_id = db_user.id, "Password verified");

    // 5️⃣ Tokens
    let (access_token, refresh_token) = issue_tokens(
        pool.get_ref(),
        &config,
        db_user.id,
        &db_user.email,
        db_user.role.id(),
    )
    .await?;

    // 6️⃣ Update last_login_at (non-fatal)
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, role = %db_user.role, name = %db_user.name, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        access_token,
        refresh_token,
        role: db_user.role,
    }))
}

/// Flips `revoked` only on a token that is still live.
const REVOKE_UNUSED_REFRESH: &str =
    "UPDATE refresh_tokens SET revoked = TRUE WHERE id = ? AND revoked = FALSE";

/// Exactly one request may rotate a given refresh token.
fn claimed_rotation(rows_affected: u64) -> bool {
    rows_affected == 1
}

fn refresh_claims(req: &HttpRequest, config: &Config) -> Option<Claims> {
    let claims = verify_token(bearer_token(req)?, &config.jwt_secret).ok()?;
    (claims.token_type == TokenType::Refresh).then_some(claims)
}

/// Rotate refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = Object, example = json!({
            "access_token": "eyJ...",
            "refresh_token": "eyJ..."
        })),
        (status = 401, description = "Missing, invalid or revoked refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let unauthorized = || ApiError::Unauthorized("Invalid refresh token".to_string());

    let claims = refresh_claims(&req, &config).ok_or_else(unauthorized)?;

    // 🔍 find refresh token in DB
    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        r#"
        SELECT id, user_id, revoked
        FROM refresh_tokens
        WHERE jti = ? AND expires_at > NOW()
        "#,
    )
    .bind(&claims.jti)
    .fetch_optional(pool.get_ref())
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        _ => return Err(unauthorized()),
    };

    // the account may have been deactivated since the token was issued
    let active: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ? AND status = 'active')",
    )
    .bind(user_id)
    .fetch_one(pool.get_ref())
    .await?;
    if active == 0 {
        return Err(unauthorized());
    }

    // 🔥 revoke old refresh token; a concurrent refresh with the same token loses here
    let revoked = sqlx::query(REVOKE_UNUSED_REFRESH)
        .bind(record_id)
        .execute(pool.get_ref())
        .await?
        .rows_affected();
    if !claimed_rotation(revoked) {
        warn!(user_id, jti = %claims.jti, "Refresh token reused during rotation");
        return Err(unauthorized());
    }

    // 🔄 issue new pair
    let (access_token, refresh_token) =
        issue_tokens(pool.get_ref(), &config, user_id, &claims.sub, claims.role).await?;

    Ok(HttpResponse::Ok().json(json!({
        "access_token": access_token,
        "refresh_token": refresh_token
    })))
}

/// Logout
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Refresh token revoked (idempotent)")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    // only refresh tokens can logout
    let Some(claims) = refresh_claims(&req, &config) else {
        return HttpResponse::NoContent().finish();
    };

    // revoke refresh token (idempotent)
    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    // success even if token didn't exist
    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_requires_the_revoke_to_hit_a_live_token() {
        assert!(REVOKE_UNUSED_REFRESH.ends_with("WHERE id = ? AND revoked = FALSE"));

        assert!(claimed_rotation(1));
        // second refresh with the same token finds it already revoked
        assert!(!claimed_rotation(0));
    }
}
