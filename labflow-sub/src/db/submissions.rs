//! Submission aggregate persistence
//!
//! Loads a submission with its orders, requests and pre-capture pools, and
//! writes build output and state changes back. Every multi-row write runs in
//! one transaction so a failed build or batch action leaves no partial rows.

use crate::domain::{
    IdGen, Order, PreCapturePool, Request, RequestKind, RequestState, StudyMetadata, Submission,
    SubmissionState,
};
use crate::error::{Error, Result};
use labflow_common::db::{OrderRow, RequestRow, SubmissionRow};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

/// Order payload for submission creation
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub study_id: Option<i64>,
    pub project_id: Option<i64>,
    #[serde(default)]
    pub study_metadata: StudyMetadata,
    pub request_types: Vec<i64>,
    #[serde(default)]
    pub multipliers: HashMap<i64, u32>,
    #[serde(default)]
    pub request_options: BTreeMap<String, String>,
    #[serde(default)]
    pub assets: Vec<i64>,
}

fn json_string<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(e.to_string()))
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("corrupt {} column: {}", what, e)))
}

fn parse_guid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::Internal(format!("corrupt guid column: {}", e)))
}

/// Allocator seeded from the current database maxima. The caller serializes
/// builds, so the returned ids are safe to assign.
pub async fn next_ids(pool: &SqlitePool) -> Result<IdGen> {
    let (max_request,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM requests")
        .fetch_one(pool)
        .await?;
    let (max_asset,): (Option<i64>,) = sqlx::query_as(
        r#"
        SELECT MAX(asset) FROM (
            SELECT MAX(asset_id) AS asset FROM order_assets
            UNION ALL
            SELECT MAX(source_asset_id) FROM requests
            UNION ALL
            SELECT MAX(target_asset_id) FROM requests
        )
        "#,
    )
    .fetch_one(pool)
    .await?;
    let (max_pool,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM pre_capture_pools")
        .fetch_one(pool)
        .await?;

    Ok(IdGen::new(
        max_request.unwrap_or(0) + 1,
        max_asset.unwrap_or(0) + 1,
        max_pool.unwrap_or(0) + 1,
    ))
}

/// Insert a new building submission with its orders and input assets
pub async fn create_submission(
    pool: &SqlitePool,
    name: Option<String>,
    orders: Vec<NewOrder>,
) -> Result<Submission> {
    let guid = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    let result = sqlx::query("INSERT INTO submissions (guid, name) VALUES (?, ?)")
        .bind(guid.to_string())
        .bind(&name)
        .execute(&mut *tx)
        .await?;
    let submission_id = result.last_insert_rowid();

    for order in &orders {
        let order_result = sqlx::query(
            r#"
            INSERT INTO orders
                (guid, submission_id, study_id, project_id,
                 contaminated_human_dna, remove_x_and_autosomes,
                 request_types, multipliers, request_options)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(submission_id)
        .bind(order.study_id)
        .bind(order.project_id)
        .bind(order.study_metadata.contaminated_human_dna)
        .bind(order.study_metadata.remove_x_and_autosomes)
        .bind(json_string(&order.request_types)?)
        .bind(json_string(&order.multipliers)?)
        .bind(json_string(&order.request_options)?)
        .execute(&mut *tx)
        .await?;
        let order_id = order_result.last_insert_rowid();

        for (position, asset_id) in order.assets.iter().enumerate() {
            sqlx::query("INSERT INTO order_assets (order_id, position, asset_id) VALUES (?, ?, ?)")
                .bind(order_id)
                .bind(position as i64)
                .bind(asset_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    info!(submission_id, %guid, orders = orders.len(), "created submission");

    load_submission_by_guid(pool, guid).await
}

pub async fn load_submission_by_guid(pool: &SqlitePool, guid: Uuid) -> Result<Submission> {
    let row: Option<SubmissionRow> = sqlx::query_as("SELECT * FROM submissions WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(Error::NotFound(format!("submission {}", guid)));
    };
    assemble_submission(pool, row).await
}

/// Resolve the submission owning the given request, for request-scoped
/// endpoints. Returns the submission and the member request's id.
pub async fn load_submission_by_request_guid(
    pool: &SqlitePool,
    request_guid: Uuid,
) -> Result<(Submission, i64)> {
    let row: Option<(i64, i64)> =
        sqlx::query_as("SELECT id, submission_id FROM requests WHERE guid = ?")
            .bind(request_guid.to_string())
            .fetch_optional(pool)
            .await?;

    let Some((request_id, submission_id)) = row else {
        return Err(Error::NotFound(format!("request {}", request_guid)));
    };

    let sub_row: Option<SubmissionRow> = sqlx::query_as("SELECT * FROM submissions WHERE id = ?")
        .bind(submission_id)
        .fetch_optional(pool)
        .await?;
    let Some(sub_row) = sub_row else {
        return Err(Error::NotFound(format!("submission {}", submission_id)));
    };

    Ok((assemble_submission(pool, sub_row).await?, request_id))
}

async fn assemble_submission(pool: &SqlitePool, row: SubmissionRow) -> Result<Submission> {
    let state = SubmissionState::parse(&row.state)
        .ok_or_else(|| Error::Internal(format!("corrupt submission state '{}'", row.state)))?;

    let mut submission = Submission::new(row.id, parse_guid(&row.guid)?, row.name);
    submission.state = state;
    submission.message = row.message;
    submission.orders = load_orders(pool, row.id).await?;
    submission.requests = load_requests(pool, row.id).await?;
    submission.pre_capture_pools = load_pools(pool, row.id).await?;
    Ok(submission)
}

async fn load_orders(pool: &SqlitePool, submission_id: i64) -> Result<Vec<Order>> {
    let rows: Vec<OrderRow> =
        sqlx::query_as("SELECT * FROM orders WHERE submission_id = ? ORDER BY id")
            .bind(submission_id)
            .fetch_all(pool)
            .await?;

    let mut orders = Vec::with_capacity(rows.len());
    for row in rows {
        let assets: Vec<(i64,)> = sqlx::query_as(
            "SELECT asset_id FROM order_assets WHERE order_id = ? ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(pool)
        .await?;

        orders.push(Order {
            id: row.id,
            guid: parse_guid(&row.guid)?,
            submission_id,
            study_id: row.study_id,
            project_id: row.project_id,
            study_metadata: StudyMetadata {
                contaminated_human_dna: row.contaminated_human_dna,
                remove_x_and_autosomes: row.remove_x_and_autosomes,
            },
            request_types: parse_json(&row.request_types, "request_types")?,
            multipliers: parse_json(&row.multipliers, "multipliers")?,
            request_options: parse_json(&row.request_options, "request_options")?,
            assets: assets.into_iter().map(|(a,)| a).collect(),
        });
    }
    Ok(orders)
}

async fn load_requests(pool: &SqlitePool, submission_id: i64) -> Result<Vec<Request>> {
    // Kind lives on the request type; fetch the mapping once per load
    let kind_rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, kind FROM request_types")
        .fetch_all(pool)
        .await?;
    let mut kind_by_type = HashMap::with_capacity(kind_rows.len());
    for (type_id, kind) in kind_rows {
        let kind = RequestKind::parse(&kind)
            .ok_or_else(|| Error::Internal(format!("unknown request kind '{}'", kind)))?;
        kind_by_type.insert(type_id, kind);
    }

    // Ascending id order is the resolution contract
    let rows: Vec<RequestRow> =
        sqlx::query_as("SELECT * FROM requests WHERE submission_id = ? ORDER BY id")
            .bind(submission_id)
            .fetch_all(pool)
            .await?;

    let mut requests = Vec::with_capacity(rows.len());
    for row in rows {
        let kind = *kind_by_type.get(&row.request_type_id).ok_or_else(|| {
            Error::Internal(format!("unknown request type {}", row.request_type_id))
        })?;
        requests.push(Request {
            id: row.id,
            guid: parse_guid(&row.guid)?,
            submission_id,
            order_id: row.order_id,
            request_type_id: row.request_type_id,
            next_request_type_id: row.next_request_type_id,
            state: RequestState::parse(&row.state).ok_or_else(|| {
                Error::Internal(format!("corrupt request state '{}'", row.state))
            })?,
            kind,
            source_asset_id: row.source_asset_id,
            target_asset_id: row.target_asset_id,
            pool_index: row.pool_index.map(|p| p as usize),
            paired_request: row.paired_request_id,
        });
    }
    Ok(requests)
}

async fn load_pools(pool: &SqlitePool, submission_id: i64) -> Result<Vec<PreCapturePool>> {
    let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT id, order_id, pool_index
        FROM pre_capture_pools
        WHERE submission_id = ?
        ORDER BY order_id, pool_index
        "#,
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await?;

    let mut pools = Vec::with_capacity(rows.len());
    for (id, order_id, pool_index) in rows {
        let members: Vec<(i64,)> = sqlx::query_as(
            "SELECT request_id FROM pre_capture_pool_requests WHERE pool_id = ? ORDER BY request_id",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        pools.push(PreCapturePool {
            id,
            submission_id,
            order_id,
            pool_index: pool_index as usize,
            request_ids: members.into_iter().map(|(r,)| r).collect(),
        });
    }
    Ok(pools)
}

/// Persist a successful build: the new state plus every created request and
/// pre-capture pool, committed atomically.
pub async fn save_build(pool: &SqlitePool, submission: &Submission) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE submissions SET state = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(submission.state.to_string())
        .bind(submission.id)
        .execute(&mut *tx)
        .await?;

    for request in &submission.requests {
        sqlx::query(
            r#"
            INSERT INTO requests
                (id, guid, submission_id, order_id, request_type_id,
                 next_request_type_id, state, source_asset_id, target_asset_id,
                 pool_index, paired_request_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id)
        .bind(request.guid.to_string())
        .bind(request.submission_id)
        .bind(request.order_id)
        .bind(request.request_type_id)
        .bind(request.next_request_type_id)
        .bind(request.state.to_string())
        .bind(request.source_asset_id)
        .bind(request.target_asset_id)
        .bind(request.pool_index.map(|p| p as i64))
        .bind(request.paired_request)
        .execute(&mut *tx)
        .await?;
    }

    for pre_capture in &submission.pre_capture_pools {
        sqlx::query(
            "INSERT INTO pre_capture_pools (id, submission_id, order_id, pool_index) VALUES (?, ?, ?, ?)",
        )
        .bind(pre_capture.id)
        .bind(pre_capture.submission_id)
        .bind(pre_capture.order_id)
        .bind(pre_capture.pool_index as i64)
        .execute(&mut *tx)
        .await?;

        for request_id in &pre_capture.request_ids {
            sqlx::query(
                "INSERT INTO pre_capture_pool_requests (pool_id, request_id) VALUES (?, ?)",
            )
            .bind(pre_capture.id)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    debug!(
        submission_id = submission.id,
        requests = submission.requests.len(),
        pools = submission.pre_capture_pools.len(),
        "persisted submission build"
    );
    Ok(())
}

/// Write back the state of the given requests
pub async fn save_request_states(
    pool: &SqlitePool,
    submission: &Submission,
    request_ids: &[i64],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for &request_id in request_ids {
        let request = submission
            .request(request_id)
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?;
        sqlx::query("UPDATE requests SET state = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(request.state.to_string())
            .bind(request.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Write back the submission row only
pub async fn save_submission_state(pool: &SqlitePool, submission: &Submission) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET state = ?, message = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(submission.state.to_string())
    .bind(&submission.message)
    .bind(submission.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Write back the submission row and every request state in one transaction.
/// Used by cascade cancellation.
pub async fn save_all_states(pool: &SqlitePool, submission: &Submission) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE submissions SET state = ?, message = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(submission.state.to_string())
    .bind(&submission.message)
    .bind(submission.id)
    .execute(&mut *tx)
    .await?;

    for request in &submission.requests {
        sqlx::query("UPDATE requests SET state = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(request.state.to_string())
            .bind(request.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Remove a building submission. Orders, assets, requests and pools follow
/// via cascading foreign keys; the caller has already run the destroy guard.
pub async fn delete_submission(pool: &SqlitePool, submission_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM submissions WHERE id = ?")
        .bind(submission_id)
        .execute(pool)
        .await?;
    info!(submission_id, "deleted submission");
    Ok(())
}
