use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Class {
    #[schema(example = 3)]
    pub id: u64,
    #[schema(example = "Grade 10 - A")]
    pub name: String,
    pub description: Option<String>,
}
