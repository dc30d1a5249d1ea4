//! Request type configuration loading

use crate::domain::{PoolingMethod, RequestKind, RequestType, RequestTypeRegistry};
use crate::error::{Error, Result};
use labflow_common::db::RequestTypeRow;
use sqlx::SqlitePool;
use tracing::info;

/// Load every configured request type into an in-memory registry.
/// Called once at startup; the pipeline configuration is read-only here.
pub async fn load_registry(pool: &SqlitePool) -> Result<RequestTypeRegistry> {
    let rows: Vec<RequestTypeRow> =
        sqlx::query_as("SELECT * FROM request_types ORDER BY id")
            .fetch_all(pool)
            .await?;

    let types = rows
        .into_iter()
        .map(request_type_from_row)
        .collect::<Result<Vec<_>>>()?;

    info!(count = types.len(), "loaded request type registry");
    Ok(RequestTypeRegistry::new(types))
}

fn request_type_from_row(row: RequestTypeRow) -> Result<RequestType> {
    let kind = RequestKind::parse(&row.kind).ok_or_else(|| {
        Error::Internal(format!(
            "unknown request kind '{}' for type {}",
            row.kind, row.id
        ))
    })?;
    let pooling_method = match (row.pooling_method.as_deref(), row.pool_count) {
        (Some("fixed_pool"), Some(count)) if count > 0 => Some(PoolingMethod::FixedPool {
            pool_count: count as usize,
        }),
        (None, _) => None,
        (method, count) => {
            return Err(Error::Internal(format!(
                "invalid pooling configuration for request type {}: {:?}/{:?}",
                row.id, method, count
            )));
        }
    };
    Ok(RequestType {
        id: row.id,
        key: row.key,
        name: row.name,
        kind,
        for_multiplexing: row.for_multiplexing,
        pooling_method,
        for_pre_capture_pooling: row.for_pre_capture_pooling,
    })
}
