//! Database access layer shared between LabFlow services

pub mod init;
pub mod models;

pub use init::{init_database, init_memory_database};
pub use models::{OrderRow, RequestRow, RequestTypeRow, SubmissionRow};
