use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::role::{AccountStatus, Role};

/// A user row without the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 12,
    "name": "Asha Rao",
    "email": "asha.rao@school.test",
    "role": "student",
    "class_id": 3,
    "roll_number": "10A-07",
    "parent_name": "R. Rao",
    "parent_phone": "+919800000000",
    "parent_email": "parent@school.test",
    "phone": null,
    "address": null,
    "status": "active",
    "created_at": "2026-01-01T09:00:00",
    "last_login_at": null
}))]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub class_id: Option<u64>,
    pub roll_number: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub parent_email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: AccountStatus,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_login_at: Option<NaiveDateTime>,
}

pub const USER_COLUMNS: &str = "id, name, email, role, class_id, roll_number, parent_name, \
     parent_phone, parent_email, phone, address, status, created_at, last_login_at";
