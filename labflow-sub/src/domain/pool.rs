//! Pre-capture pooling
//!
//! Groups an order's capture-library requests into fixed-size pools ahead of
//! the capture step. Pool membership is a pure function of the built request
//! set and the order's plex level, so rebuilding yields identical groupings.

use crate::domain::order::Order;
use crate::domain::request::Request;
use crate::domain::request_type::RequestTypeRegistry;
use crate::domain::IdGen;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A fixed-size group of requests pooled before capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCapturePool {
    pub id: i64,
    pub submission_id: i64,
    pub order_id: i64,
    /// Position of this pool within its order, in request id order
    pub pool_index: usize,
    /// Member request ids, ascending
    pub request_ids: Vec<i64>,
}

/// Chunks each order's eligible requests into pools of its configured plex
/// level. Orders without a plex level build no pools.
pub struct PreCapturePoolBuilder<'a> {
    submission_id: i64,
    orders: &'a [Order],
    requests: &'a [Request],
}

impl<'a> PreCapturePoolBuilder<'a> {
    pub fn new(submission_id: i64, orders: &'a [Order], requests: &'a [Request]) -> Self {
        Self {
            submission_id,
            orders,
            requests,
        }
    }

    pub fn build(
        &self,
        registry: &RequestTypeRegistry,
        ids: &mut IdGen,
    ) -> Result<Vec<PreCapturePool>> {
        let mut pools = Vec::new();
        for order in self.orders {
            let Some(plex_level) = order.pre_capture_plex_level() else {
                continue;
            };

            // Requests arrive in ascending id order; pooling follows that
            // order so membership is stable across rebuilds.
            let mut eligible = Vec::new();
            for request in self.requests {
                if request.order_id != Some(order.id) {
                    continue;
                }
                if registry.get(request.request_type_id)?.for_pre_capture_pooling {
                    eligible.push(request.id);
                }
            }

            for (pool_index, chunk) in eligible.chunks(plex_level).enumerate() {
                pools.push(PreCapturePool {
                    id: ids.next_pool_id(),
                    submission_id: self.submission_id,
                    order_id: order.id,
                    pool_index,
                    request_ids: chunk.to_vec(),
                });
            }
        }
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::tests::registry;
    use crate::domain::order::StudyMetadata;
    use std::collections::{BTreeMap, HashMap};
    use uuid::Uuid;

    fn order_with_plex(id: i64, assets: Vec<i64>, plex: Option<&str>) -> Order {
        let mut request_options = BTreeMap::new();
        if let Some(p) = plex {
            request_options.insert("pre_capture_plex_level".to_string(), p.to_string());
        }
        Order {
            id,
            guid: Uuid::new_v4(),
            submission_id: 1,
            study_id: Some(1),
            project_id: Some(1),
            study_metadata: StudyMetadata::default(),
            request_types: vec![1, 3],
            multipliers: HashMap::new(),
            request_options,
            assets,
        }
    }

    fn build_requests(orders: &[Order]) -> Vec<Request> {
        let mut ids = IdGen::starting_at_one();
        let mut requests = Vec::new();
        for order in orders {
            requests.extend(
                order
                    .build_request_graph(1, &registry(), None, &mut ids)
                    .unwrap(),
            );
        }
        requests
    }

    #[test]
    fn pools_chunk_eligible_requests_by_plex_level() {
        // 5 library creation requests at plex 2: pools of 2, 2 and 1
        let orders = vec![order_with_plex(1, vec![10, 11, 12, 13, 14], Some("2"))];
        let requests = build_requests(&orders);
        let mut ids = IdGen::starting_at_one();
        let pools = PreCapturePoolBuilder::new(1, &orders, &requests)
            .build(&registry(), &mut ids)
            .unwrap();

        assert_eq!(pools.len(), 3);
        assert_eq!(pools[0].request_ids.len(), 2);
        assert_eq!(pools[1].request_ids.len(), 2);
        assert_eq!(pools[2].request_ids.len(), 1);
        assert_eq!(
            pools.iter().map(|p| p.pool_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // Only library creation requests are eligible, in id order
        let mut members: Vec<i64> = pools.iter().flat_map(|p| p.request_ids.clone()).collect();
        let eligible: Vec<i64> = requests
            .iter()
            .filter(|r| r.request_type_id == 1)
            .map(|r| r.id)
            .collect();
        members.sort_unstable();
        assert_eq!(members, eligible);
    }

    #[test]
    fn orders_without_plex_level_build_no_pools() {
        let orders = vec![order_with_plex(1, vec![10, 11], None)];
        let requests = build_requests(&orders);
        let mut ids = IdGen::starting_at_one();
        let pools = PreCapturePoolBuilder::new(1, &orders, &requests)
            .build(&registry(), &mut ids)
            .unwrap();
        assert!(pools.is_empty());
    }

    #[test]
    fn zero_or_garbage_plex_level_is_ignored() {
        for bad in ["0", "-3", "lots"] {
            let orders = vec![order_with_plex(1, vec![10, 11], Some(bad))];
            let requests = build_requests(&orders);
            let mut ids = IdGen::starting_at_one();
            let pools = PreCapturePoolBuilder::new(1, &orders, &requests)
                .build(&registry(), &mut ids)
                .unwrap();
            assert!(pools.is_empty(), "plex level {:?} must not pool", bad);
        }
    }

    #[test]
    fn pooling_is_per_order() {
        let orders = vec![
            order_with_plex(1, vec![10, 11], Some("2")),
            order_with_plex(2, vec![12, 13, 14], Some("3")),
        ];
        let requests = build_requests(&orders);
        let mut ids = IdGen::starting_at_one();
        let pools = PreCapturePoolBuilder::new(1, &orders, &requests)
            .build(&registry(), &mut ids)
            .unwrap();

        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].order_id, 1);
        assert_eq!(pools[0].request_ids.len(), 2);
        assert_eq!(pools[1].order_id, 2);
        assert_eq!(pools[1].request_ids.len(), 3);
        // pool_index restarts per order
        assert_eq!(pools[1].pool_index, 0);
    }

    #[test]
    fn rebuild_yields_identical_membership() {
        let orders = vec![order_with_plex(1, vec![10, 11, 12], Some("2"))];
        let requests = build_requests(&orders);

        let mut ids = IdGen::starting_at_one();
        let first = PreCapturePoolBuilder::new(1, &orders, &requests)
            .build(&registry(), &mut ids)
            .unwrap();
        let mut ids = IdGen::new(100, 100, 100);
        let second = PreCapturePoolBuilder::new(1, &orders, &requests)
            .build(&registry(), &mut ids)
            .unwrap();

        let key = |pools: &[PreCapturePool]| -> Vec<(i64, usize, Vec<i64>)> {
            pools
                .iter()
                .map(|p| (p.order_id, p.pool_index, p.request_ids.clone()))
                .collect()
        };
        assert_eq!(key(&first), key(&second));
    }
}
