use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A teacher teaching one subject to one class.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Assignment {
    pub id: u64,
    pub class_id: u64,
    pub class_name: String,
    pub subject_id: u64,
    pub subject_name: String,
    pub subject_code: String,
    pub teacher_id: u64,
    pub teacher_name: String,
}
