//! Persistence layer
//!
//! Thin SQLite access over the shared schema. Domain logic stays in
//! `crate::domain`; these functions only load aggregates, persist build
//! results, and write state changes back, each multi-row write inside a
//! single transaction.

pub mod request_types;
pub mod submissions;

pub use request_types::load_registry;
pub use submissions::{
    create_submission, delete_submission, load_submission_by_guid,
    load_submission_by_request_guid, next_ids, save_all_states, save_build,
    save_request_states, save_submission_state, NewOrder,
};
