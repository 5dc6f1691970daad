// ===========================================================================
// Pipeline: trails -> segments -> graph, one run per workspace
// ===========================================================================

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::bridging::{BridgeRecord, GapBridger};
use crate::config::GraphBuildConfig;
use crate::connectivity::{ConnectivityReport, validate_connectivity};
use crate::consolidate::{ChainConsolidator, ConsolidationReport};
use crate::errors::{GraphBuildError, Issue, IssueLog};
use crate::geometry::{GeometryEngine, PlanarGeometryEngine, Projection, polyline_length_3d};
use crate::graph::{AdjacencyGraphEngine, GraphEngine, TrailGraph};
use crate::intersections::IntersectionDetector;
use crate::model::{Segment, Trail};
use crate::preprocess::preprocess;
use crate::splitter::{TrailSplitter, whole_segment};
use crate::topology::TopologyBuilder;
use crate::workspace::{GraphStore, RunWorkspace};

/// Everything a finished build produced, before it is staged anywhere.
#[derive(Debug, Clone)]
pub struct GraphBuild {
    pub graph: TrailGraph,
    pub projection: Projection,
    pub segments: Vec<Segment>,
    pub bridges: Vec<BridgeRecord>,
    pub consolidation: ConsolidationReport,
    pub connectivity: ConnectivityReport,
    pub trails_in: usize,
    pub trails_accepted: usize,
    pub issues: IssueLog,
}

/// Auditable summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub trails_in: usize,
    pub trails_accepted: usize,
    pub segments: usize,
    pub bridges: usize,
    pub nodes: usize,
    pub edges: usize,
    pub merges: usize,
    pub connectivity: ConnectivityReport,
    pub total_length_m: f64,
    /// Including elevation change along every edge.
    pub total_length_3d_m: f64,
    pub issues: Vec<Issue>,
}

impl RunSummary {
    pub fn excluded_count(&self) -> usize {
        self.issues.iter().filter(|i| i.excluded).count()
    }
}

pub struct GraphBuilder<G: GeometryEngine = PlanarGeometryEngine, R: GraphEngine = AdjacencyGraphEngine> {
    geometry: G,
    graph_engine: R,
    config: GraphBuildConfig,
}

impl GraphBuilder {
    /// Builder backed by the planar geometry engine and the adjacency graph engine.
    pub fn from_config(config: GraphBuildConfig) -> Result<Self, GraphBuildError> {
        Self::new(PlanarGeometryEngine::new(), AdjacencyGraphEngine::new(), config)
    }
}

impl<G: GeometryEngine, R: GraphEngine> GraphBuilder<G, R> {
    pub fn new(geometry: G, graph_engine: R, config: GraphBuildConfig) -> Result<Self, GraphBuildError> {
        config.validate()?;
        Ok(Self {
            geometry,
            graph_engine,
            config,
        })
    }

    pub fn config(&self) -> &GraphBuildConfig {
        &self.config
    }

    /// Runs every phase in order. Per-record failures end up in the issue log;
    /// only whole-run failures are returned as errors.
    pub fn build(&self, trails: &[Trail]) -> Result<GraphBuild, GraphBuildError> {
        let config = &self.config;
        let mut issues = IssueLog::new();
        let projection = Projection::for_points(
            config.coordinate_space,
            trails.iter().flat_map(|t| t.points.iter()),
        );

        let prepared = preprocess(trails, config, &projection, &self.geometry, &mut issues);
        if prepared.is_empty() {
            return Err(GraphBuildError::Workspace {
                namespace: String::new(),
                reason: format!("none of {} trails survived preprocessing", trails.len()),
            });
        }

        let detector = IntersectionDetector::new(&self.geometry, config);
        let splitter = TrailSplitter::new(&self.geometry, config);
        let mut segments: Vec<Segment> = prepared.iter().map(whole_segment).collect();
        for pass in 0..=config.redetect_passes {
            let _span = info_span!("detect_and_split", pass).entered();
            let detection = detector.detect(&segments, &mut issues);
            let quiet = detection.split_count() == 0
                && detection.snaps.is_empty()
                && detection.excluded.is_empty();
            if pass > 0 && quiet {
                break;
            }
            segments = splitter.split(&segments, &detection, &mut issues);
        }

        let topology = TopologyBuilder::new(&self.geometry, config);
        let mut graph = topology.build(&segments, &mut issues);

        let bridger = GapBridger::new(&self.geometry, &self.graph_engine, config);
        let bridges = bridger.bridge(&mut graph);

        let consolidation =
            ChainConsolidator::new(&self.geometry, config).consolidate(&mut graph, &mut issues);

        let problems = graph.integrity_problems();
        if !problems.is_empty() {
            return Err(GraphBuildError::geometry("graph", problems.join("; ")));
        }

        let connectivity = validate_connectivity(
            &graph,
            &self.graph_engine,
            config.fragmentation_threshold,
            &mut issues,
        );

        Ok(GraphBuild {
            graph,
            projection,
            segments,
            bridges,
            consolidation,
            connectivity,
            trails_in: trails.len(),
            trails_accepted: prepared.len(),
            issues,
        })
    }

    /// Builds the graph and stages its tables in `workspace`. The caller decides
    /// whether to commit or discard.
    pub fn run(&self, trails: &[Trail], workspace: &mut RunWorkspace) -> Result<RunSummary, GraphBuildError> {
        let _span = info_span!("run", namespace = workspace.namespace(), run_id = %workspace.run_id()).entered();
        let build = self.build(trails).map_err(|err| match err {
            GraphBuildError::Workspace { reason, .. } => GraphBuildError::Workspace {
                namespace: workspace.namespace().to_string(),
                reason,
            },
            other => other,
        })?;

        let total_length_m = build.graph.edges().map(|e| e.length_m).sum();
        let total_length_3d_m = build
            .graph
            .edges()
            .map(|e| polyline_length_3d(&e.coords, &e.elevations))
            .sum();

        let summary = RunSummary {
            run_id: workspace.run_id(),
            namespace: workspace.namespace().to_string(),
            started_at: workspace.started_at(),
            trails_in: build.trails_in,
            trails_accepted: build.trails_accepted,
            segments: build.segments.len(),
            bridges: build.bridges.len(),
            nodes: build.graph.node_count(),
            edges: build.graph.edge_count(),
            merges: build.consolidation.merges,
            connectivity: build.connectivity.clone(),
            total_length_m,
            total_length_3d_m,
            issues: build.issues.issues().to_vec(),
        };

        workspace.stage(build.graph.to_tables(&build.projection));
        info!(
            trails = summary.trails_in,
            segments = summary.segments,
            nodes = summary.nodes,
            edges = summary.edges,
            issues = summary.issues.len(),
            "run staged"
        );
        Ok(summary)
    }
}

/// One independent dataset to build into its own namespace.
#[derive(Debug, Clone)]
pub struct RegionInput {
    pub namespace: String,
    pub trails: Vec<Trail>,
}

/// Builds and commits several regions concurrently, one workspace each.
/// Results come back in input order.
pub fn build_graphs_parallel<G, R>(
    builder: &GraphBuilder<G, R>,
    store: &GraphStore,
    regions: &[RegionInput],
) -> Vec<(String, Result<RunSummary, GraphBuildError>)>
where
    G: GeometryEngine + Sync,
    R: GraphEngine + Sync,
{
    regions
        .par_iter()
        .map(|region| {
            let result = RunWorkspace::create(store, region.namespace.clone()).and_then(|mut ws| {
                let summary = builder.run(&region.trails, &mut ws)?;
                ws.commit()?;
                Ok(summary)
            });
            (region.namespace.clone(), result)
        })
        .collect()
}
