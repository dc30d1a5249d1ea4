//! Request type configuration
//!
//! Request types are external, read-only pipeline configuration: whether a
//! stage multiplexes, how its pools partition, and whether its requests feed
//! pre-capture pooling. The registry is loaded once at startup.

use crate::domain::request::{Request, RequestKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Named strategy for partitioning candidate requests into pools
///
/// Absent pooling method means whole-submission pooling: one pool for the
/// entire submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum PoolingMethod {
    /// Fixed-size partitioning of candidates into `pool_count` equal groups
    FixedPool { pool_count: usize },
}

/// One node in the pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestType {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub kind: RequestKind,
    pub for_multiplexing: bool,
    pub pooling_method: Option<PoolingMethod>,
    pub for_pre_capture_pooling: bool,
}

impl RequestType {
    /// Number of pools for fixed-size partitioning. A zero pool count is
    /// treated as unconfigured, collapsing to whole-submission pooling.
    pub fn pool_count(&self) -> Option<usize> {
        match self.pooling_method {
            Some(PoolingMethod::FixedPool { pool_count }) if pool_count > 0 => Some(pool_count),
            _ => None,
        }
    }

    /// Placement of a multiplexing request within this type's partition.
    /// The index is assigned at graph-build time and read back here.
    pub fn pool_index_for_request(&self, request: &Request) -> usize {
        request.pool_index.unwrap_or(0)
    }
}

/// Read-only lookup of request types by id
#[derive(Debug, Clone, Default)]
pub struct RequestTypeRegistry {
    types: HashMap<i64, RequestType>,
}

impl RequestTypeRegistry {
    pub fn new(types: Vec<RequestType>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    pub fn get(&self, id: i64) -> Result<&RequestType> {
        self.types
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("request type {}", id)))
    }

    pub fn for_multiplexing(&self, id: i64) -> Result<bool> {
        Ok(self.get(id)?.for_multiplexing)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pool_exposes_pool_count() {
        let rt = RequestType {
            id: 2,
            key: "multiplexing".into(),
            name: "Multiplexing".into(),
            kind: RequestKind::Multiplexing,
            for_multiplexing: true,
            pooling_method: Some(PoolingMethod::FixedPool { pool_count: 4 }),
            for_pre_capture_pooling: false,
        };
        assert_eq!(rt.pool_count(), Some(4));
    }

    #[test]
    fn zero_pool_count_reads_as_unconfigured() {
        let rt = RequestType {
            id: 2,
            key: "multiplexing".into(),
            name: "Multiplexing".into(),
            kind: RequestKind::Multiplexing,
            for_multiplexing: true,
            pooling_method: Some(PoolingMethod::FixedPool { pool_count: 0 }),
            for_pre_capture_pooling: false,
        };
        assert_eq!(rt.pool_count(), None);
    }

    #[test]
    fn registry_lookup_fails_for_unknown_type() {
        let registry = RequestTypeRegistry::new(vec![]);
        assert!(matches!(registry.get(7), Err(Error::NotFound(_))));
    }
}
