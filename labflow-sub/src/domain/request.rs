//! Request lifecycle state machine
//!
//! A request is a single unit of laboratory work. States move monotonically
//! through the machine below; closed states are never revisited except for
//! the explicit `change_decision` reopening from failed.
//!
//! ```text
//! pending -> started -> passed
//!                    -> failed -> pending   (change_decision)
//! pending | started  -> cancelled | aborted
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Started,
    Passed,
    Failed,
    Cancelled,
    Aborted,
}

impl RequestState {
    /// Open states still accept lab work
    pub fn is_open(self) -> bool {
        matches!(self, RequestState::Pending | RequestState::Started)
    }

    /// Closed states are terminal for query purposes
    pub fn is_closed(self) -> bool {
        !self.is_open()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestState::Pending),
            "started" => Some(RequestState::Started),
            "passed" => Some(RequestState::Passed),
            "failed" => Some(RequestState::Failed),
            "cancelled" => Some(RequestState::Cancelled),
            "aborted" => Some(RequestState::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Started => write!(f, "started"),
            RequestState::Passed => write!(f, "passed"),
            RequestState::Failed => write!(f, "failed"),
            RequestState::Cancelled => write!(f, "cancelled"),
            RequestState::Aborted => write!(f, "aborted"),
        }
    }
}

/// What kind of work a request represents
///
/// A closed set: dispatch on kind replaces open-ended subtyping. The kind
/// determines transition side effects and the readiness rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    LibraryCreation,
    Multiplexing,
    Sequencing,
    Transfer,
}

impl RequestKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "library_creation" => Some(RequestKind::LibraryCreation),
            "multiplexing" => Some(RequestKind::Multiplexing),
            "sequencing" => Some(RequestKind::Sequencing),
            "transfer" => Some(RequestKind::Transfer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::LibraryCreation => "library_creation",
            RequestKind::Multiplexing => "multiplexing",
            RequestKind::Sequencing => "sequencing",
            RequestKind::Transfer => "transfer",
        }
    }
}

/// Deferred mutation of another request, produced by a transition hook and
/// applied by the owning submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Auto-pass the given request if it is still open
    PassRequest(i64),
    /// Auto-fail the given request if it is still open
    FailRequest(i64),
}

/// Capability interface for kind-specific transition behaviour
///
/// The state machine core calls through this interface without knowing the
/// concrete kind. Effects are applied by the submission, which owns the
/// sibling requests a hook may touch.
pub trait TransitionHooks {
    fn on_started(&self, request: &Request) -> Vec<SideEffect> {
        let _ = request;
        Vec::new()
    }

    fn on_passed(&self, request: &Request) -> Vec<SideEffect> {
        let _ = request;
        Vec::new()
    }

    fn on_failed(&self, request: &Request) -> Vec<SideEffect> {
        let _ = request;
        Vec::new()
    }
}

impl TransitionHooks for RequestKind {
    // Passing or failing a transfer propagates to its paired final transfer,
    // so the pair closes as a unit.
    fn on_passed(&self, request: &Request) -> Vec<SideEffect> {
        match self {
            RequestKind::Transfer => request
                .paired_request
                .map(SideEffect::PassRequest)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn on_failed(&self, request: &Request) -> Vec<SideEffect> {
        match self {
            RequestKind::Transfer => request
                .paired_request
                .map(SideEffect::FailRequest)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A single unit of laboratory work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub guid: Uuid,
    pub submission_id: i64,
    /// Legacy requests may have no order
    pub order_id: Option<i64>,
    pub request_type_id: i64,
    /// Derived from the order's request-type sequence at build time
    pub next_request_type_id: Option<i64>,
    pub state: RequestState,
    pub kind: RequestKind,
    pub source_asset_id: Option<i64>,
    /// Unset until the downstream pipeline wires it up
    pub target_asset_id: Option<i64>,
    /// Placement within a custom pooling partition, assigned at build time
    pub pool_index: Option<usize>,
    /// Paired final transfer, for transfer-kind transition hooks
    pub paired_request: Option<i64>,
}

impl Request {
    fn transition(
        &mut self,
        action: &'static str,
        from: RequestState,
        to: RequestState,
    ) -> Result<()> {
        if self.state != from {
            return Err(Error::InvalidTransition {
                request_id: self.id,
                state: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }

    /// pending -> started
    pub fn start(&mut self) -> Result<Vec<SideEffect>> {
        self.transition("start", RequestState::Pending, RequestState::Started)?;
        Ok(self.kind.on_started(self))
    }

    /// started -> passed
    pub fn pass(&mut self) -> Result<Vec<SideEffect>> {
        self.transition("pass", RequestState::Started, RequestState::Passed)?;
        Ok(self.kind.on_passed(self))
    }

    /// started -> failed
    pub fn fail(&mut self) -> Result<Vec<SideEffect>> {
        self.transition("fail", RequestState::Started, RequestState::Failed)?;
        Ok(self.kind.on_failed(self))
    }

    /// failed -> pending, reopening the request for rework
    pub fn change_decision(&mut self) -> Result<()> {
        self.transition("change_decision", RequestState::Failed, RequestState::Pending)
    }

    /// Administrative short-circuit from any open state
    pub fn cancel(&mut self) -> Result<()> {
        self.close("cancel", RequestState::Cancelled)
    }

    /// Administrative short-circuit from any open state
    pub fn abort(&mut self) -> Result<()> {
        self.close("abort", RequestState::Aborted)
    }

    fn close(&mut self, action: &'static str, to: RequestState) -> Result<()> {
        if !self.state.is_open() {
            return Err(Error::InvalidTransition {
                request_id: self.id,
                state: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn cancellable(&self) -> bool {
        self.state.is_open()
    }

    /// New pending request with the same shape; the target asset is cleared
    /// since the copy has not been processed yet.
    pub fn copy(&self, new_id: i64) -> Request {
        Request {
            id: new_id,
            guid: Uuid::new_v4(),
            state: RequestState::Pending,
            target_asset_id: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(state: RequestState) -> Request {
        Request {
            id: 1,
            guid: Uuid::new_v4(),
            submission_id: 1,
            order_id: Some(1),
            request_type_id: 1,
            next_request_type_id: Some(2),
            state,
            kind: RequestKind::LibraryCreation,
            source_asset_id: Some(10),
            target_asset_id: None,
            pool_index: None,
            paired_request: None,
        }
    }

    #[test]
    fn full_pass_path() {
        let mut r = request(RequestState::Pending);
        r.start().unwrap();
        assert_eq!(r.state, RequestState::Started);
        r.pass().unwrap();
        assert_eq!(r.state, RequestState::Passed);
    }

    #[test]
    fn pass_and_fail_require_started() {
        for state in [
            RequestState::Pending,
            RequestState::Passed,
            RequestState::Failed,
            RequestState::Cancelled,
            RequestState::Aborted,
        ] {
            let mut r = request(state);
            assert!(matches!(r.pass(), Err(Error::InvalidTransition { .. })));
            assert_eq!(r.state, state, "state must be unchanged after a rejected pass");

            let mut r = request(state);
            assert!(matches!(r.fail(), Err(Error::InvalidTransition { .. })));
            assert_eq!(r.state, state, "state must be unchanged after a rejected fail");
        }
    }

    #[test]
    fn start_requires_pending() {
        let mut r = request(RequestState::Passed);
        assert!(matches!(r.start(), Err(Error::InvalidTransition { .. })));
        assert_eq!(r.state, RequestState::Passed);
    }

    #[test]
    fn change_decision_only_from_failed() {
        let mut r = request(RequestState::Failed);
        r.change_decision().unwrap();
        assert_eq!(r.state, RequestState::Pending);

        for state in [
            RequestState::Pending,
            RequestState::Started,
            RequestState::Passed,
            RequestState::Cancelled,
            RequestState::Aborted,
        ] {
            let mut r = request(state);
            assert!(matches!(
                r.change_decision(),
                Err(Error::InvalidTransition { .. })
            ));
            assert_eq!(r.state, state);
        }
    }

    #[test]
    fn cancel_and_abort_only_from_open() {
        let mut r = request(RequestState::Pending);
        r.cancel().unwrap();
        assert_eq!(r.state, RequestState::Cancelled);

        let mut r = request(RequestState::Started);
        r.abort().unwrap();
        assert_eq!(r.state, RequestState::Aborted);

        let mut r = request(RequestState::Passed);
        assert!(r.cancel().is_err());
        assert!(r.abort().is_err());
        assert_eq!(r.state, RequestState::Passed);
    }

    #[test]
    fn transfer_pass_hook_emits_paired_effect() {
        let mut r = request(RequestState::Started);
        r.kind = RequestKind::Transfer;
        r.paired_request = Some(42);
        let effects = r.pass().unwrap();
        assert_eq!(effects, vec![SideEffect::PassRequest(42)]);
    }

    #[test]
    fn non_transfer_hooks_are_empty() {
        let mut r = request(RequestState::Started);
        assert!(r.pass().unwrap().is_empty());
    }

    #[test]
    fn copy_is_pending_with_no_target() {
        let mut r = request(RequestState::Pending);
        r.target_asset_id = Some(99);
        r.start().unwrap();
        let copy = r.copy(2);
        assert_eq!(copy.id, 2);
        assert_eq!(copy.state, RequestState::Pending);
        assert_eq!(copy.target_asset_id, None);
        assert_eq!(copy.source_asset_id, r.source_asset_id);
        assert_ne!(copy.guid, r.guid);
    }

    #[test]
    fn open_closed_partition() {
        assert!(RequestState::Pending.is_open());
        assert!(RequestState::Started.is_open());
        assert!(RequestState::Passed.is_closed());
        assert!(RequestState::Failed.is_closed());
        assert!(RequestState::Cancelled.is_closed());
        assert!(RequestState::Aborted.is_closed());
    }
}
