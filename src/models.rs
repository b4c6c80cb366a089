use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::role::{AccountStatus, Role};

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "teacher@school.test")]
    pub email: String,
    #[schema(example = "password")]
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub role: Role,
}

/// Credentials row used by login and password changes.
#[derive(sqlx::FromRow)]
pub struct UserSql {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub status: AccountStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    /// Login email
    pub sub: String,
    pub role: u8, // role id
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

/// Resolves optional paging parameters into (page, per_page, offset):
/// 1-based page, `per_page` clamped to 1..=100 with a default of 20.
/// The offset saturates, so a page past the end yields an empty result.
pub fn resolve_page(page: Option<u32>, per_page: Option<u32>) -> (u32, u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page, (page - 1).saturating_mul(per_page))
}

#[derive(Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_and_clamps() {
        assert_eq!(resolve_page(None, None), (1, 20, 0));
        assert_eq!(resolve_page(Some(3), Some(500)), (3, 100, 200));
        assert_eq!(resolve_page(Some(0), Some(0)), (1, 1, 0));
    }

    #[test]
    fn huge_page_saturates_offset() {
        assert_eq!(
            resolve_page(Some(u32::MAX), Some(100)),
            (u32::MAX, 100, u32::MAX)
        );
        assert_eq!(resolve_page(Some(u32::MAX), None), (u32::MAX, 20, u32::MAX));
    }
}
