//! Orders: the request-generating unit within a submission
//!
//! An order ties a set of input assets, a study and project, an ordered
//! request-type sequence, and multiplier/pooling configuration together.
//! Orders build their own request graphs; the submission triggers the build
//! and handles multiplexing between orders.

use crate::domain::request::{Request, RequestState};
use crate::domain::request_type::RequestTypeRegistry;
use crate::domain::IdGen;
use crate::error::{Result, ValidationErrors};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Request options allowed to differ between orders in the same submission
pub const PER_ORDER_REQUEST_OPTIONS: &[&str] = &["pre_capture_plex_level", "gigabases_expected"];

/// Study metadata flags that must agree across a submission's orders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub contaminated_human_dna: bool,
    pub remove_x_and_autosomes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub guid: Uuid,
    pub submission_id: i64,
    pub study_id: Option<i64>,
    pub project_id: Option<i64>,
    pub study_metadata: StudyMetadata,
    /// Ordered sequence of pipeline stages
    pub request_types: Vec<i64>,
    /// Divergence ratio per request type; absent means 1
    pub multipliers: HashMap<i64, u32>,
    pub request_options: BTreeMap<String, String>,
    /// Input assets, in submission order
    pub assets: Vec<i64>,
}

impl Order {
    /// Configured number of downstream requests per upstream request for the
    /// given stage. Types without an entry diverge 1:1.
    pub fn multiplier_for(&self, request_type_id: i64) -> u32 {
        self.multipliers.get(&request_type_id).copied().unwrap_or(1)
    }

    /// Plex level for pre-capture pooling, when configured on this order
    pub fn pre_capture_plex_level(&self) -> Option<usize> {
        self.request_options
            .get("pre_capture_plex_level")
            .and_then(|v| v.parse().ok())
            .filter(|&level| level > 0)
    }

    fn comparable_options(&self) -> BTreeMap<&str, &str> {
        self.request_options
            .iter()
            .filter(|(k, _)| !PER_ORDER_REQUEST_OPTIONS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Orders agree on request options apart from the per-order overridable set
    pub fn request_options_compatible(&self, other: &Order) -> bool {
        self.comparable_options() == other.comparable_options()
    }

    /// Study metadata flags must match; mixing them would contaminate pools
    pub fn check_studies_compatible(&self, other: &Order, errors: &mut ValidationErrors) {
        if self.study_metadata.contaminated_human_dna != other.study_metadata.contaminated_human_dna
        {
            errors.add("study", "Can't mix contaminated and non contaminated human DNA");
        }
        if self.study_metadata.remove_x_and_autosomes != other.study_metadata.remove_x_and_autosomes
        {
            errors.add("study", "Can't mix X and autosome removal with non-removal");
        }
    }

    /// Materialize this order's requests, stage by stage
    ///
    /// Stage 1 sources are the order assets. A multiplexing stage targets the
    /// submission-shared pooling asset and collapses the downstream source
    /// list to that single asset; every other stage fans out by its
    /// configured multiplier, leaving targets unset for the downstream
    /// pipeline to wire up.
    pub fn build_request_graph(
        &self,
        submission_id: i64,
        registry: &RequestTypeRegistry,
        multiplexing_asset: Option<i64>,
        ids: &mut IdGen,
    ) -> Result<Vec<Request>> {
        let mut requests = Vec::new();
        let mut sources: Vec<Option<i64>> = self.assets.iter().map(|&a| Some(a)).collect();

        for (stage, &request_type_id) in self.request_types.iter().enumerate() {
            let request_type = registry.get(request_type_id)?;
            let next_request_type_id = self.request_types.get(stage + 1).copied();
            let multiplier = self.multiplier_for(request_type_id) as usize;

            if request_type.for_multiplexing {
                let mut created = 0usize;
                for &source in &sources {
                    for _ in 0..multiplier {
                        let pool_index = request_type.pool_count().map(|count| created % count);
                        requests.push(self.new_request(
                            ids.next_request_id(),
                            submission_id,
                            request_type_id,
                            next_request_type_id,
                            request_type.kind,
                            source,
                            multiplexing_asset,
                            pool_index,
                        ));
                        created += 1;
                    }
                }
                // Pooling collapses the graph: downstream stages hang off the
                // shared target asset.
                sources = vec![multiplexing_asset];
            } else {
                let mut next_sources = Vec::with_capacity(sources.len() * multiplier);
                for &source in &sources {
                    for _ in 0..multiplier {
                        requests.push(self.new_request(
                            ids.next_request_id(),
                            submission_id,
                            request_type_id,
                            next_request_type_id,
                            request_type.kind,
                            source,
                            None,
                            None,
                        ));
                        next_sources.push(None);
                    }
                }
                sources = next_sources;
            }
        }

        Ok(requests)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_request(
        &self,
        id: i64,
        submission_id: i64,
        request_type_id: i64,
        next_request_type_id: Option<i64>,
        kind: crate::domain::request::RequestKind,
        source_asset_id: Option<i64>,
        target_asset_id: Option<i64>,
        pool_index: Option<usize>,
    ) -> Request {
        Request {
            id,
            guid: Uuid::new_v4(),
            submission_id,
            order_id: Some(self.id),
            request_type_id,
            next_request_type_id,
            state: RequestState::Pending,
            kind,
            source_asset_id,
            target_asset_id,
            pool_index,
            paired_request: None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::request_type::{PoolingMethod, RequestType};
    use crate::domain::RequestKind;

    pub(crate) fn registry() -> RequestTypeRegistry {
        RequestTypeRegistry::new(vec![
            RequestType {
                id: 1,
                key: "library_creation".into(),
                name: "Library creation".into(),
                kind: RequestKind::LibraryCreation,
                for_multiplexing: false,
                pooling_method: None,
                for_pre_capture_pooling: true,
            },
            RequestType {
                id: 2,
                key: "multiplexing".into(),
                name: "Multiplexing".into(),
                kind: RequestKind::Multiplexing,
                for_multiplexing: true,
                pooling_method: None,
                for_pre_capture_pooling: false,
            },
            RequestType {
                id: 3,
                key: "single_ended_sequencing".into(),
                name: "Single ended sequencing".into(),
                kind: RequestKind::Sequencing,
                for_multiplexing: false,
                pooling_method: None,
                for_pre_capture_pooling: false,
            },
            RequestType {
                id: 4,
                key: "pooled_multiplexing".into(),
                name: "Multiplexing (fixed pools)".into(),
                kind: RequestKind::Multiplexing,
                for_multiplexing: true,
                pooling_method: Some(PoolingMethod::FixedPool { pool_count: 2 }),
                for_pre_capture_pooling: false,
            },
        ])
    }

    fn order(request_types: Vec<i64>, assets: Vec<i64>) -> Order {
        Order {
            id: 1,
            guid: Uuid::new_v4(),
            submission_id: 1,
            study_id: Some(1),
            project_id: Some(1),
            study_metadata: StudyMetadata::default(),
            request_types,
            multipliers: HashMap::new(),
            request_options: BTreeMap::new(),
            assets,
        }
    }

    #[test]
    fn linear_build_fans_out_by_multiplier() {
        let mut o = order(vec![1, 3], vec![10, 11]);
        o.multipliers.insert(3, 2);
        let mut ids = IdGen::starting_at_one();
        let requests = o.build_request_graph(1, &registry(), None, &mut ids).unwrap();

        let stage_one: Vec<_> = requests.iter().filter(|r| r.request_type_id == 1).collect();
        let stage_two: Vec<_> = requests.iter().filter(|r| r.request_type_id == 3).collect();
        assert_eq!(stage_one.len(), 2);
        assert_eq!(stage_two.len(), 4, "2 upstream x multiplier 2");
        assert!(stage_one.iter().all(|r| r.next_request_type_id == Some(3)));
        assert!(stage_two.iter().all(|r| r.next_request_type_id.is_none()));
        assert!(stage_one.iter().all(|r| r.source_asset_id.is_some()));
    }

    #[test]
    fn multiplexing_stage_collapses_to_shared_target() {
        let o = order(vec![1, 2, 3], vec![10, 11, 12, 13]);
        let mut ids = IdGen::starting_at_one();
        let requests = o.build_request_graph(1, &registry(), Some(500), &mut ids).unwrap();

        let mx: Vec<_> = requests.iter().filter(|r| r.request_type_id == 2).collect();
        let seq: Vec<_> = requests.iter().filter(|r| r.request_type_id == 3).collect();
        assert_eq!(mx.len(), 4);
        assert!(mx.iter().all(|r| r.target_asset_id == Some(500)));
        assert_eq!(seq.len(), 1, "pooled: one sequencing request per submission");
        assert_eq!(seq[0].source_asset_id, Some(500));
    }

    #[test]
    fn custom_pooling_assigns_pool_indexes() {
        let o = order(vec![4], vec![10, 11, 12, 13]);
        let mut ids = IdGen::starting_at_one();
        let requests = o.build_request_graph(1, &registry(), Some(500), &mut ids).unwrap();
        let indexes: Vec<_> = requests.iter().map(|r| r.pool_index).collect();
        assert_eq!(indexes, vec![Some(0), Some(1), Some(0), Some(1)]);
    }

    #[test]
    fn ids_ascend_in_creation_order() {
        let o = order(vec![1, 3], vec![10, 11]);
        let mut ids = IdGen::starting_at_one();
        let requests = o.build_request_graph(1, &registry(), None, &mut ids).unwrap();
        let id_list: Vec<_> = requests.iter().map(|r| r.id).collect();
        let mut sorted = id_list.clone();
        sorted.sort_unstable();
        assert_eq!(id_list, sorted);
    }

    #[test]
    fn per_order_options_do_not_break_compatibility() {
        let mut a = order(vec![1], vec![10]);
        let mut b = order(vec![1], vec![11]);
        a.request_options.insert("read_length".into(), "76".into());
        b.request_options.insert("read_length".into(), "76".into());
        a.request_options.insert("pre_capture_plex_level".into(), "8".into());
        b.request_options.insert("gigabases_expected".into(), "1.5".into());
        assert!(a.request_options_compatible(&b));

        b.request_options.insert("read_length".into(), "108".into());
        assert!(!a.request_options_compatible(&b));
    }

    #[test]
    fn mixed_study_flags_are_reported() {
        let a = order(vec![1], vec![10]);
        let mut b = order(vec![1], vec![11]);
        b.study_metadata.contaminated_human_dna = true;
        let mut errors = ValidationErrors::new();
        a.check_studies_compatible(&b, &mut errors);
        assert_eq!(errors.errors.len(), 1);
        assert_eq!(errors.errors[0].field, "study");
    }
}
