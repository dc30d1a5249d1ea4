//! LabFlow submission workflow service
//!
//! Manages submissions through their lifecycle: orders are collected while
//! building, processing materializes the request graph (with multiplexing
//! and pre-capture pooling), and pipeline batch actions drive each request's
//! state machine. Downstream request relationships are resolved positionally
//! rather than stored.

pub mod api;
pub mod db;
pub mod domain;
pub mod error;

pub use error::{Error, Result};
