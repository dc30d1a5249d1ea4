//! # LabFlow Common Library
//!
//! Shared code for the LabFlow services including:
//! - Database schema and row models
//! - Configuration resolution
//! - Common error types

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
