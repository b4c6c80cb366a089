use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Subject {
    #[schema(example = 7)]
    pub id: u64,
    #[schema(example = "MATH101")]
    pub code: String,
    #[schema(example = "Mathematics")]
    pub name: String,
    pub description: Option<String>,
}
