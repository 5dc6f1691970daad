use serde::{Deserialize, Serialize};

use crate::errors::GraphBuildError;

/// How input coordinates are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSpace {
    /// lon/lat degrees, projected to a local tangent plane for all metric work
    Wgs84,
    /// coordinates are already meters
    Planar,
}

/// What to do when several split points on one trail land within tolerance of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDedupPolicy {
    /// Collapse the cluster to a single split point (flagged for audit).
    Merge,
    /// Keep every distinct point; only exact duplicates are collapsed.
    KeepAll,
}

/// Whether the gap bridger checks for an existing path before inserting a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgePolicy {
    /// Bridge by distance alone (pairs directly joined by a segment are still skipped).
    DistanceOnly,
    /// Skip the bridge when both endpoints are already connected within `max_hops` edges.
    SkipIfConnectedWithin { max_hops: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphBuildConfig {
    pub coordinate_space: CoordinateSpace,
    /// Reach of near-miss T-intersection detection, meters.
    pub intersection_tolerance_m: f64,
    /// Endpoint clustering, split-point dedup and contiguity tolerance, meters.
    pub node_snap_tolerance_m: f64,
    pub min_trail_length_m: f64,
    pub min_segment_length_m: f64,
    pub split_point_dedup: SplitDedupPolicy,
    /// Additional detect+split passes run over the produced segments.
    pub redetect_passes: usize,
    pub min_bridge_distance_m: f64,
    pub max_bridge_distance_m: f64,
    pub bridge_policy: BridgePolicy,
    pub merge_duplicate_edges: bool,
    /// Maximum number of original edges a consolidated edge may absorb.
    pub max_chain_length: usize,
    pub max_consolidation_iterations: usize,
    /// Trails per batch in intersection detection.
    pub batch_size: usize,
    /// Largest-component share (0..=1) below which fragmentation is reported.
    pub fragmentation_threshold: f64,
}

impl Default for GraphBuildConfig {
    fn default() -> Self {
        Self {
            coordinate_space: CoordinateSpace::Wgs84,
            intersection_tolerance_m: 3.0,
            node_snap_tolerance_m: 1.0,
            min_trail_length_m: 0.5,
            min_segment_length_m: 0.5,
            split_point_dedup: SplitDedupPolicy::Merge,
            redetect_passes: 1,
            min_bridge_distance_m: 1.0,
            max_bridge_distance_m: 30.0,
            bridge_policy: BridgePolicy::SkipIfConnectedWithin { max_hops: 4 },
            merge_duplicate_edges: true,
            max_chain_length: 500,
            max_consolidation_iterations: 10_000,
            batch_size: 2000,
            fragmentation_threshold: 0.8,
        }
    }
}

impl GraphBuildConfig {
    /// Planar defaults, used for synthetic data already expressed in meters.
    pub fn planar() -> Self {
        Self {
            coordinate_space: CoordinateSpace::Planar,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), GraphBuildError> {
        let non_negative = [
            ("intersection_tolerance_m", self.intersection_tolerance_m),
            ("node_snap_tolerance_m", self.node_snap_tolerance_m),
            ("min_trail_length_m", self.min_trail_length_m),
            ("min_segment_length_m", self.min_segment_length_m),
            ("min_bridge_distance_m", self.min_bridge_distance_m),
            ("max_bridge_distance_m", self.max_bridge_distance_m),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(GraphBuildError::Config(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }

        if self.min_bridge_distance_m > self.max_bridge_distance_m {
            return Err(GraphBuildError::Config(format!(
                "min_bridge_distance_m ({}) exceeds max_bridge_distance_m ({})",
                self.min_bridge_distance_m, self.max_bridge_distance_m
            )));
        }
        if self.batch_size == 0 {
            return Err(GraphBuildError::Config("batch_size must be at least 1".into()));
        }
        if self.max_chain_length < 2 {
            return Err(GraphBuildError::Config(
                "max_chain_length must allow at least two edges".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fragmentation_threshold) {
            return Err(GraphBuildError::Config(format!(
                "fragmentation_threshold must be within 0..=1, got {}",
                self.fragmentation_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(GraphBuildConfig::default().validate().is_ok());
        assert!(GraphBuildConfig::planar().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_bridge_bounds() {
        let config = GraphBuildConfig {
            min_bridge_distance_m: 40.0,
            max_bridge_distance_m: 30.0,
            ..GraphBuildConfig::default()
        };
        assert!(matches!(config.validate(), Err(GraphBuildError::Config(_))));
    }

    #[test]
    fn partial_ron_uses_defaults() {
        let config: GraphBuildConfig =
            ron::from_str("(coordinate_space: Planar, max_bridge_distance_m: 12.5)").unwrap();
        assert_eq!(config.coordinate_space, CoordinateSpace::Planar);
        assert_eq!(config.max_bridge_distance_m, 12.5);
        assert_eq!(config.redetect_passes, 1);
        assert_eq!(
            config.bridge_policy,
            BridgePolicy::SkipIfConnectedWithin { max_hops: 4 }
        );
    }

    #[test]
    fn json_policy_variants() {
        let config: GraphBuildConfig =
            serde_json::from_str(r#"{"bridge_policy": "DistanceOnly", "split_point_dedup": "KeepAll"}"#)
                .unwrap();
        assert_eq!(config.bridge_policy, BridgePolicy::DistanceOnly);
        assert_eq!(config.split_point_dedup, SplitDedupPolicy::KeepAll);
    }
}
