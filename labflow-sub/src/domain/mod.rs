//! Domain core for the submission workflow service
//!
//! Pure, synchronous logic: the request state machine, submission build,
//! downstream resolution and pre-capture pooling. Persistence wraps these
//! operations in transactions but never participates in them.

pub mod order;
pub mod pool;
pub mod request;
pub mod request_type;
pub mod submission;

pub use order::{Order, StudyMetadata, PER_ORDER_REQUEST_OPTIONS};
pub use pool::{PreCapturePool, PreCapturePoolBuilder};
pub use request::{Request, RequestKind, RequestState, SideEffect, TransitionHooks};
pub use request_type::{PoolingMethod, RequestType, RequestTypeRegistry};
pub use submission::{Submission, SubmissionState};

/// Explicit id allocator for build-time record creation
///
/// Ids are handed out sequentially; request creation order (ascending id) is
/// the sole ordering authority for downstream resolution, so ids must never
/// be reused or renumbered. Seeded from the current database maxima before a
/// build (the caller guarantees at most one concurrent build per submission).
#[derive(Debug, Clone)]
pub struct IdGen {
    next_request: i64,
    next_asset: i64,
    next_pool: i64,
}

impl IdGen {
    pub fn new(next_request: i64, next_asset: i64, next_pool: i64) -> Self {
        Self {
            next_request,
            next_asset,
            next_pool,
        }
    }

    /// Fresh allocator starting at 1 for every sequence. Used by tests.
    pub fn starting_at_one() -> Self {
        Self::new(1, 1, 1)
    }

    pub fn next_request_id(&mut self) -> i64 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    pub fn next_asset_id(&mut self) -> i64 {
        let id = self.next_asset;
        self.next_asset += 1;
        id
    }

    pub fn next_pool_id(&mut self) -> i64 {
        let id = self.next_pool;
        self.next_pool += 1;
        id
    }
}
