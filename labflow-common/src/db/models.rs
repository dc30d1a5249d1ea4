//! Database row models
//!
//! One struct per table, loaded with `query_as` via `FromRow`. Timestamps are
//! written by SQLite defaults and read back as naive UTC datetimes. Guids are
//! stored as TEXT; callers parse them into `Uuid` when building domain types.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestTypeRow {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub kind: String,
    pub for_multiplexing: bool,
    pub pooling_method: Option<String>,
    pub pool_count: Option<i64>,
    pub for_pre_capture_pooling: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: i64,
    pub guid: String,
    pub name: Option<String>,
    pub state: String,
    pub message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub guid: String,
    pub submission_id: i64,
    pub study_id: Option<i64>,
    pub project_id: Option<i64>,
    pub contaminated_human_dna: bool,
    pub remove_x_and_autosomes: bool,
    /// JSON array of request type ids, in pipeline order
    pub request_types: String,
    /// JSON object mapping request type id to multiplier
    pub multipliers: String,
    /// JSON object of request options
    pub request_options: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestRow {
    pub id: i64,
    pub guid: String,
    pub submission_id: i64,
    pub order_id: Option<i64>,
    pub request_type_id: i64,
    pub next_request_type_id: Option<i64>,
    pub state: String,
    pub source_asset_id: Option<i64>,
    pub target_asset_id: Option<i64>,
    pub pool_index: Option<i64>,
    pub paired_request_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
