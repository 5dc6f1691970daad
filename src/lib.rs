// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Builds a routable trail network graph from raw trail polylines:
//! split at intersections, bridge small gaps, cluster endpoints into nodes,
//! collapse degree-2 chains, and report connectivity.

pub mod bridging;
pub mod config;
pub mod connectivity;
pub mod consolidate;
pub mod errors;
pub mod geometry;
pub mod graph;
pub mod intersections;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod splitter;
pub mod topology;
pub mod workspace;

pub use config::GraphBuildConfig;
pub use errors::{GraphBuildError, Issue, IssueKind, IssueLog, Phase};
pub use model::{GraphTables, Trail};
pub use pipeline::{GraphBuild, GraphBuilder, RegionInput, RunSummary, build_graphs_parallel};
pub use workspace::{GraphStore, RunWorkspace};

#[cfg(test)]
mod pipeline_tests;
