//! Shared error type
//!
//! Covers the concerns this crate actually owns: configuration resolution,
//! database setup, and the filesystem work around it. Service crates define
//! their own richer error enums and convert where needed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file missing, unreadable, or missing a required key
    #[error("configuration: {0}")]
    Config(String),

    /// Connection, schema creation, or query failure
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the data folder or touching the database file
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
