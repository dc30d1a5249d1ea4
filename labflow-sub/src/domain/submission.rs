//! Submissions: aggregate of orders defining one body of work
//!
//! A submission collects orders together, triggers their request-graph
//! builds, and handles multiplexing between orders. For non-multiplexed
//! work the submission is largely bookkeeping; for multiplexed work it
//! decides which assets pool together. Downstream resolution reconstructs
//! request relationships at query time from ordinal position plus configured
//! multiplier/pooling metadata; no explicit edges are stored, which is why
//! id-ascending creation order is a hard contract.

use crate::domain::order::Order;
use crate::domain::pool::{PreCapturePool, PreCapturePoolBuilder};
use crate::domain::request::{Request, RequestKind, RequestState, SideEffect};
use crate::domain::request_type::RequestTypeRegistry;
use crate::domain::IdGen;
use crate::error::{Error, Result, ValidationErrors};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Submission lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionState {
    Building,
    Pending,
    Ready,
    Failed,
    Cancelled,
}

impl SubmissionState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "building" => Some(SubmissionState::Building),
            "pending" => Some(SubmissionState::Pending),
            "ready" => Some(SubmissionState::Ready),
            "failed" => Some(SubmissionState::Failed),
            "cancelled" => Some(SubmissionState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionState::Building => write!(f, "building"),
            SubmissionState::Pending => write!(f, "pending"),
            SubmissionState::Ready => write!(f, "ready"),
            SubmissionState::Failed => write!(f, "failed"),
            SubmissionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Aggregate of orders, their built requests, and pre-capture pools
///
/// The two lookup caches are scoped to this instance's lifetime and filled
/// lazily; any mutation of the request collection must invalidate them
/// (stale reads would silently mis-resolve downstream requests).
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: i64,
    pub guid: Uuid,
    pub name: Option<String>,
    pub state: SubmissionState,
    pub message: Option<String>,
    pub orders: Vec<Order>,
    /// Always kept in ascending id order (creation order)
    pub requests: Vec<Request>,
    pub pre_capture_pools: Vec<PreCapturePool>,
    /// request_type_id -> request ids of that type, ascending
    request_cache: HashMap<i64, Vec<i64>>,
    /// next_request_type_id -> agreed divergence ratio across orders
    multiplier_cache: HashMap<i64, u32>,
}

impl Submission {
    pub fn new(id: i64, guid: Uuid, name: Option<String>) -> Self {
        Self {
            id,
            guid,
            name,
            state: SubmissionState::Building,
            message: None,
            orders: Vec::new(),
            requests: Vec::new(),
            pre_capture_pools: Vec::new(),
            request_cache: HashMap::new(),
            multiplier_cache: HashMap::new(),
        }
    }

    /// Display name, falling back to the numeric id
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("#{}", self.id))
    }

    pub fn request(&self, id: i64) -> Option<&Request> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn request_by_guid(&self, guid: Uuid) -> Option<&Request> {
        self.requests.iter().find(|r| r.guid == guid)
    }

    /// Add a request after the initial build (e.g. a re-batch copy).
    /// Invalidates the resolution caches; ids must still ascend.
    pub fn add_request(&mut self, request: Request) {
        let position = self
            .requests
            .iter()
            .position(|r| r.id > request.id)
            .unwrap_or(self.requests.len());
        self.requests.insert(position, request);
        self.invalidate_caches();
    }

    /// Drop the lazily-filled lookup caches. Must be called after any
    /// mutation of the request collection.
    pub fn invalidate_caches(&mut self) {
        self.request_cache.clear();
        self.multiplier_cache.clear();
    }

    /// True when any order includes a multiplexing stage
    pub fn multiplexed(&self, registry: &RequestTypeRegistry) -> Result<bool> {
        for order in &self.orders {
            for &rt in &order.request_types {
                if registry.for_multiplexing(rt)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// The shared pooled asset (usually a multiplexed library tube), if built.
    /// All multiplexed requests end up in a single asset, so any one will do.
    pub fn multiplexed_asset(&self, registry: &RequestTypeRegistry) -> Result<Option<i64>> {
        for request in &self.requests {
            if registry.for_multiplexing(request.request_type_id)? {
                return Ok(request.target_asset_id);
            }
        }
        Ok(None)
    }

    /// True when this is a multiplexed submission with lab work underway
    pub fn multiplex_started_passed(&self, registry: &RequestTypeRegistry) -> Result<bool> {
        if !self.multiplexed(registry)? {
            return Ok(false);
        }
        Ok(self.requests.iter().any(|r| {
            matches!(r.state, RequestState::Started | RequestState::Passed)
        }))
    }

    pub fn requests_cancellable(&self) -> bool {
        self.requests.iter().all(|r| r.cancellable())
    }

    /// Materialize the request graph for every order, then build pre-capture
    /// pools, as a single all-or-nothing unit.
    ///
    /// Nothing is written to `self` until every step has succeeded, so a
    /// failure leaves the submission building and unmodified. The caller
    /// wraps persistence of the result in one database transaction.
    pub fn process_submission(
        &mut self,
        registry: &RequestTypeRegistry,
        ids: &mut IdGen,
    ) -> Result<()> {
        if self.state != SubmissionState::Building {
            let mut errors = ValidationErrors::new();
            errors.add(
                "state",
                format!("submission {} has already been processed", self.id),
            );
            return Err(Error::Validation(errors));
        }

        let mut errors = ValidationErrors::new();
        if self.orders.is_empty() {
            errors.add("orders", "at least one order is required");
        }
        self.check_orders_compatible(&mut errors);
        errors.into_result()?;

        // Pass 1: fix the shared pooling target before any order builds, so
        // every order in a multiplexed submission feeds the same asset.
        let multiplexing_asset = if self.multiplexed(registry)? {
            Some(ids.next_asset_id())
        } else {
            None
        };

        // Pass 2: all orders build against the now-fixed target
        let mut built = Vec::new();
        for order in &self.orders {
            built.extend(order.build_request_graph(self.id, registry, multiplexing_asset, ids)?);
        }

        let pools = PreCapturePoolBuilder::new(self.id, &self.orders, &built)
            .build(registry, ids)?;

        if built.is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add("requests", "No requests have been created for this submission");
            return Err(Error::Validation(errors));
        }

        info!(
            submission_id = self.id,
            requests = built.len(),
            pools = pools.len(),
            multiplexed = multiplexing_asset.is_some(),
            "submission build complete"
        );

        self.requests = built;
        self.pre_capture_pools = pools;
        self.invalidate_caches();
        self.state = SubmissionState::Pending;
        Ok(())
    }

    /// Rebuild pre-capture pools from the current request set. Deterministic,
    /// so re-running on a built submission yields identical membership.
    pub fn rebuild_pre_capture_pools(
        &mut self,
        registry: &RequestTypeRegistry,
        ids: &mut IdGen,
    ) -> Result<()> {
        self.pre_capture_pools =
            PreCapturePoolBuilder::new(self.id, &self.orders, &self.requests)
                .build(registry, ids)?;
        Ok(())
    }

    fn check_orders_compatible(&self, errors: &mut ValidationErrors) {
        let Some((first, rest)) = self.orders.split_first() else {
            return;
        };
        for other in rest {
            if !first.request_options_compatible(other) {
                errors.add("request_options", "Incompatible request options");
            }
            first.check_studies_compatible(other, errors);
        }
    }

    /// Returns the next requests in the submission along from the one given.
    ///
    /// E.g. a library creation request resolves to multiplexing requests, and
    /// multiplexing requests resolve to sequencing requests; more than one
    /// request may come back. Relationships are positional: the earliest
    /// requests, those created by the submission build, sort first by id, so
    /// any later additions from a re-batch keep the mapping deterministic.
    pub fn next_requests_via_submission(
        &mut self,
        request_id: i64,
        registry: &RequestTypeRegistry,
    ) -> Result<Vec<i64>> {
        let request = self
            .request(request_id)
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?
            .clone();
        if request.submission_id != self.id {
            return Err(Error::ForeignRequest {
                request_id,
                submission_id: self.id,
            });
        }

        let Some(next_type_id) = request.next_request_type_id else {
            // Final stage: nothing downstream
            return Ok(Vec::new());
        };

        self.ensure_request_group(request.request_type_id);
        self.ensure_request_group(next_type_id);
        let sibling_requests = self.request_cache[&request.request_type_id].clone();
        let next_possible_requests = self.request_cache[&next_type_id].clone();

        let request_type = registry.get(request.request_type_id)?;

        if request_type.for_multiplexing {
            // No pooling behaviour specified means pooling by submission:
            // every candidate belongs to the one pool.
            let Some(pool_count) = request_type.pool_count() else {
                return Ok(next_possible_requests);
            };

            // Custom pooling: fixed-size partitioning of the candidate list
            // into pool_count contiguous groups.
            let index = request_type.pool_index_for_request(&request);
            let number_to_return = next_possible_requests.len() / pool_count;
            debug!(
                request_id,
                index, number_to_return, "resolving custom-pooled downstream requests"
            );
            Ok(next_possible_requests
                .into_iter()
                .skip(index * number_to_return)
                .take(number_to_return)
                .collect())
        } else {
            let multiplier = self.multiplier_for(next_type_id)? as usize;

            // Keep cross-order isolation intact while tolerating legacy
            // requests that carry no order.
            let same_order = |id: i64| -> bool {
                self.request(id)
                    .map(|r| r.order_id.is_none() || r.order_id == request.order_id)
                    .unwrap_or(false)
            };
            let siblings: Vec<i64> = sibling_requests
                .into_iter()
                .filter(|&id| same_order(id))
                .collect();
            let candidates: Vec<i64> = next_possible_requests
                .into_iter()
                .filter(|&id| same_order(id))
                .collect();

            let index = siblings
                .iter()
                .position(|&id| id == request.id)
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "request {} missing from its own sibling group",
                        request.id
                    ))
                })?;

            Ok(candidates
                .into_iter()
                .skip(index * multiplier)
                .take(multiplier)
                .collect())
        }
    }

    // Sibling/candidate groups are cached per instance: passing a plate of
    // libraries iterates every request in the submission against the same
    // instance, so the grouped query result is reused.
    fn ensure_request_group(&mut self, request_type_id: i64) {
        if self.request_cache.contains_key(&request_type_id) {
            return;
        }
        let mut ids: Vec<i64> = self
            .requests
            .iter()
            .filter(|r| r.request_type_id == request_type_id)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        self.request_cache.insert(request_type_id, ids);
    }

    /// The agreed divergence ratio for the given downstream request type.
    /// Orders must agree; a silent pick would mis-slice the candidate list.
    fn multiplier_for(&mut self, next_request_type_id: i64) -> Result<u32> {
        if let Some(&m) = self.multiplier_cache.get(&next_request_type_id) {
            return Ok(m);
        }
        let multipliers: BTreeSet<u32> = self
            .orders
            .iter()
            .map(|o| o.multiplier_for(next_request_type_id))
            .collect();
        if multipliers.len() != 1 {
            return Err(Error::MismatchedMultiplier {
                submission_id: self.id,
            });
        }
        let multiplier = *multipliers
            .iter()
            .next()
            .ok_or_else(|| Error::MismatchedMultiplier {
                submission_id: self.id,
            })?;
        self.multiplier_cache.insert(next_request_type_id, multiplier);
        Ok(multiplier)
    }

    /// Whether the given request is ready for lab work.
    ///
    /// Non-sequencing requests are always ready. A sequencing request is
    /// ready once at least one of the upstream requests feeding its source
    /// asset has passed and none are still open.
    pub fn request_ready(&self, request_id: i64) -> Result<bool> {
        let request = self
            .request(request_id)
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?;
        if request.kind != RequestKind::Sequencing {
            return Ok(true);
        }
        let Some(source) = request.source_asset_id else {
            return Ok(false);
        };

        let upstream: Vec<&Request> = self
            .requests
            .iter()
            .filter(|r| r.id != request.id && r.target_asset_id == Some(source))
            .collect();

        let upstream_orders: BTreeSet<Option<i64>> =
            upstream.iter().map(|r| r.order_id).collect();
        if upstream_orders.len() > 1 {
            // Readiness assumes a single upstream chain per asset; behaviour
            // with multiple chains is ambiguous, so flag it.
            warn!(
                request_id,
                source_asset = source,
                "upstream requests for asset span multiple orders; readiness may be ambiguous"
            );
        }

        Ok(upstream.iter().any(|r| r.state == RequestState::Passed)
            && upstream.iter().all(|r| r.state.is_closed()))
    }

    /// Pipeline batch action: start the given request
    pub fn start_request(&mut self, request_id: i64) -> Result<Vec<i64>> {
        self.transition_request(request_id, Request::start)
    }

    /// Pipeline batch action: pass the given request
    pub fn pass_request(&mut self, request_id: i64) -> Result<Vec<i64>> {
        self.transition_request(request_id, Request::pass)
    }

    /// Pipeline batch action: fail the given request
    pub fn fail_request(&mut self, request_id: i64) -> Result<Vec<i64>> {
        self.transition_request(request_id, Request::fail)
    }

    /// Reopen a failed request for rework
    pub fn change_decision(&mut self, request_id: i64) -> Result<()> {
        let index = self.request_index(request_id)?;
        self.requests[index].change_decision()
    }

    pub fn cancel_request(&mut self, request_id: i64) -> Result<()> {
        let index = self.request_index(request_id)?;
        self.requests[index].cancel()
    }

    pub fn abort_request(&mut self, request_id: i64) -> Result<()> {
        let index = self.request_index(request_id)?;
        self.requests[index].abort()
    }

    /// Run a transition and apply the side effects its hooks emit.
    /// Returns the ids of every request whose state changed.
    fn transition_request(
        &mut self,
        request_id: i64,
        action: fn(&mut Request) -> Result<Vec<SideEffect>>,
    ) -> Result<Vec<i64>> {
        let index = self.request_index(request_id)?;
        let effects = action(&mut self.requests[index])?;

        let mut touched = vec![request_id];
        for effect in effects {
            match effect {
                SideEffect::PassRequest(other_id) => {
                    if let Ok(other_index) = self.request_index(other_id) {
                        let other = &mut self.requests[other_index];
                        if other.state == RequestState::Pending {
                            let _ = other.start()?;
                        }
                        if other.state == RequestState::Started {
                            let _ = other.pass()?;
                            touched.push(other_id);
                        }
                    }
                }
                SideEffect::FailRequest(other_id) => {
                    if let Ok(other_index) = self.request_index(other_id) {
                        let other = &mut self.requests[other_index];
                        if other.state == RequestState::Pending {
                            let _ = other.start()?;
                        }
                        if other.state == RequestState::Started {
                            let _ = other.fail()?;
                            touched.push(other_id);
                        }
                    }
                }
            }
        }
        Ok(touched)
    }

    fn request_index(&self, request_id: i64) -> Result<usize> {
        self.requests
            .iter()
            .position(|r| r.id == request_id)
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))
    }

    /// Cascade cancellation: every member request is cancelled as one batch.
    /// Rejected unless all requests are still open; partial cancellation is
    /// not a supported state.
    pub fn cancel_all_requests(&mut self) -> Result<()> {
        if !self.requests_cancellable() {
            let mut errors = ValidationErrors::new();
            errors.add(
                "requests",
                "all requests must still be open to cancel the submission",
            );
            return Err(Error::Validation(errors));
        }
        for request in &mut self.requests {
            request.cancel()?;
        }
        Ok(())
    }

    /// Cancel the submission and all of its requests
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            SubmissionState::Building | SubmissionState::Pending | SubmissionState::Ready => {
                self.cancel_all_requests()?;
                self.state = SubmissionState::Cancelled;
                Ok(())
            }
            _ => {
                let mut errors = ValidationErrors::new();
                errors.add("state", format!("cannot cancel a {} submission", self.state));
                Err(Error::Validation(errors))
            }
        }
    }

    /// Mark processing complete
    pub fn ready(&mut self) -> Result<()> {
        if self.state != SubmissionState::Pending {
            let mut errors = ValidationErrors::new();
            errors.add(
                "state",
                format!("cannot mark a {} submission ready", self.state),
            );
            return Err(Error::Validation(errors));
        }
        self.state = SubmissionState::Ready;
        Ok(())
    }

    /// Record a processing failure
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        match self.state {
            SubmissionState::Building | SubmissionState::Pending => {
                self.state = SubmissionState::Failed;
                self.message = Some(message.into());
                Ok(())
            }
            _ => {
                let mut errors = ValidationErrors::new();
                errors.add("state", format!("cannot fail a {} submission", self.state));
                Err(Error::Validation(errors))
            }
        }
    }

    /// Once a submission progresses beyond building, destruction is a risky
    /// action and is prevented; later submissions should be cancelled.
    pub fn destroy_guard(&self) -> Result<()> {
        if self.state == SubmissionState::Building {
            Ok(())
        } else {
            Err(Error::NotBuilding {
                submission_id: self.id,
            })
        }
    }
}
