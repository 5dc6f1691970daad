use geo::Coord;

use crate::config::{CoordinateSpace, GraphBuildConfig};
use crate::consolidate::ChainConsolidator;
use crate::errors::{GraphBuildError, IssueKind, IssueLog};
use crate::geometry::{GeometryEngine, PlanarGeometryEngine, polyline_length};
use crate::graph::TrailGraph;
use crate::model::{Node, NodeProvenance, Trail};
use crate::pipeline::{GraphBuilder, RegionInput, build_graphs_parallel};
use crate::workspace::{GraphStore, RunWorkspace};

fn node_at(graph: &TrailGraph, x: f64, y: f64) -> Option<&Node> {
    graph
        .nodes()
        .find(|n| (n.coord.x - x).abs() < 1e-6 && (n.coord.y - y).abs() < 1e-6)
}

fn trail_edge_length(graph: &TrailGraph) -> f64 {
    graph.edges().filter(|e| !e.is_bridge).map(|e| e.length_m).sum()
}

#[test]
fn crossing_trails_meet_at_one_node() {
    let trails = vec![
        Trail::from_xy("a", "A", &[(0.0, 0.0), (2.0, 0.0)]),
        Trail::from_xy("b", "B", &[(1.0, -1.0), (1.0, 1.0)]),
    ];
    // every far end sits exactly one default snap tolerance from the crossing
    let builder = GraphBuilder::from_config(GraphBuildConfig::planar()).unwrap();
    let build = builder.build(&trails).unwrap();

    let ids: Vec<&str> = build.segments.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a-0", "a-1", "b-0", "b-1"]);
    assert_eq!(
        build.segments[0].coords,
        vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 0.0 }]
    );
    assert_eq!(
        build.segments[3].coords,
        vec![Coord { x: 1.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }]
    );

    let center = node_at(&build.graph, 1.0, 0.0).unwrap();
    assert_eq!(center.degree, 4);
    assert_eq!(center.provenance, NodeProvenance::Intersection);
    assert_eq!(build.graph.node_count(), 5);
    assert_eq!(build.graph.edge_count(), 4);
    assert!(build.bridges.is_empty());
    assert_eq!(build.connectivity.components, 1);
    assert!((trail_edge_length(&build.graph) - 4.0).abs() < 1e-9);
}

#[test]
fn short_trail_crossing_near_its_ends_is_kept() {
    let trails = vec![
        Trail::from_xy("main", "Main", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("short", "Short", &[(50.0, -0.9), (50.0, 0.9)]),
    ];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    assert_eq!(build.issues.issues().iter().filter(|i| i.excluded).count(), 0);
    assert_eq!(build.graph.node_count(), 5);
    assert_eq!(build.graph.edge_count(), 4);
    assert_eq!(node_at(&build.graph, 50.0, 0.0).unwrap().degree, 4);
    assert!(build.bridges.is_empty());
    assert!((trail_edge_length(&build.graph) - 101.8).abs() < 1e-9);
}

#[test]
fn collinear_chain_collapses_to_one_edge() {
    let trails = vec![
        Trail::from_xy("ab", "AB", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("bc", "BC", &[(100.0, 0.0), (250.0, 0.0)]),
        Trail::from_xy("cd", "CD", &[(250.0, 0.0), (400.0, 0.0)]),
    ];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    assert_eq!(build.consolidation.merges, 2);
    assert_eq!(build.graph.edge_count(), 1);
    assert_eq!(build.graph.node_count(), 2);
    assert!(node_at(&build.graph, 100.0, 0.0).is_none());
    assert!(node_at(&build.graph, 250.0, 0.0).is_none());

    let edge = build.graph.edges().next().unwrap();
    assert!((edge.length_m - 400.0).abs() < 1e-9);
    assert_eq!(edge.merged_from.len(), 3);
    let names: Vec<&str> = edge.attribution.iter().map(|a| a.trail_id.as_str()).collect();
    assert_eq!(names, vec!["ab", "bc", "cd"]);
}

#[test]
fn self_crossing_loop_becomes_two_simple_arcs() {
    let trails = vec![Trail::from_xy(
        "eight",
        "Figure Eight",
        &[(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0), (0.0, 0.0)],
    )];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    let engine = PlanarGeometryEngine::new();
    assert_eq!(build.graph.node_count(), 1);
    assert_eq!(build.graph.edge_count(), 2);
    let hub = node_at(&build.graph, 5.0, 5.0).unwrap();
    assert_eq!(hub.degree, 4);
    for edge in build.graph.edges() {
        assert!(edge.is_loop);
        assert!(engine.is_simple(&edge.coords), "{} self-intersects", edge.id);
    }

    let original = polyline_length(&[
        Coord { x: 0.0, y: 0.0 },
        Coord { x: 10.0, y: 10.0 },
        Coord { x: 10.0, y: 0.0 },
        Coord { x: 0.0, y: 10.0 },
        Coord { x: 0.0, y: 0.0 },
    ]);
    assert!((trail_edge_length(&build.graph) - original).abs() < 1e-9);
    assert!(build.graph.integrity_problems().is_empty());
}

#[test]
fn twelve_meter_gap_gets_one_bridge() {
    let trails = vec![
        Trail::from_xy("west", "West", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("east", "East", &[(112.0, 0.0), (212.0, 0.0)]),
    ];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    assert_eq!(build.bridges.len(), 1);
    let bridges: Vec<_> = build.graph.edges().filter(|e| e.is_bridge).collect();
    assert_eq!(bridges.len(), 1);
    assert!((bridges[0].length_m - 12.0).abs() < 1e-9);
    assert!(bridges[0].attribution.is_empty());

    // the bridge stays its own edge through consolidation
    assert_eq!(build.graph.edge_count(), 3);
    assert_eq!(build.connectivity.components, 1);
    assert!(!build.connectivity.fragmented);
    assert_eq!(
        node_at(&build.graph, 100.0, 0.0).unwrap().provenance,
        NodeProvenance::Bridge
    );
}

#[test]
fn dead_end_takes_every_unconnected_bridge() {
    // west's free end is 5 m from north and 10 m from east
    let trails = vec![
        Trail::from_xy("west", "West", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("north", "North", &[(100.0, 105.0), (100.0, 5.0)]),
        Trail::from_xy("east", "East", &[(110.0, 0.0), (210.0, 0.0)]),
    ];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    let distances: Vec<f64> = build.bridges.iter().map(|b| b.distance_m).collect();
    assert_eq!(distances, vec![5.0, 10.0]);
    // north to east is reached through west's end and gets no shortcut
    assert_eq!(build.connectivity.components, 1);
    assert_eq!(build.graph.edge_count(), 5);
    let hub = node_at(&build.graph, 100.0, 0.0).unwrap();
    assert_eq!(hub.degree, 3);
    assert_eq!(hub.provenance, NodeProvenance::Bridge);
}

#[test]
fn near_miss_end_is_snapped_onto_host() {
    let trails = vec![
        Trail::from_xy("main", "Main", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("spur", "Spur", &[(50.0, 2.0), (50.0, 60.0)]),
    ];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    let junction = node_at(&build.graph, 50.0, 0.0).unwrap();
    assert_eq!(junction.degree, 3);
    assert!(build.bridges.is_empty());
    assert_eq!(build.connectivity.components, 1);
}

#[test]
fn second_pass_splits_where_a_snapped_end_now_crosses() {
    // spur's end is pulled 2.95 m down onto main and hook's start onto main as
    // well, which tilts hook's first leg across the lengthened spur
    let trails = vec![
        Trail::from_xy("main", "Main", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("spur", "Spur", &[(50.0, 2.95), (50.0, 60.0)]),
        Trail::from_xy(
            "hook",
            "Hook",
            &[(20.0, 2.8), (60.0, 2.8), (60.0, 30.0), (40.0, 30.0)],
        ),
    ];

    let single = GraphBuildConfig {
        redetect_passes: 0,
        ..GraphBuildConfig::planar()
    };
    let first_only = GraphBuilder::from_config(single).unwrap().build(&trails).unwrap();
    assert!(node_at(&first_only.graph, 50.0, 2.1).is_none());

    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();
    let late = node_at(&build.graph, 50.0, 2.1).unwrap();
    assert_eq!(late.degree, 4);
    assert_eq!(late.provenance, NodeProvenance::Intersection);
    assert_eq!(node_at(&build.graph, 50.0, 30.0).unwrap().degree, 4);
    assert_eq!(node_at(&build.graph, 50.0, 0.0).unwrap().degree, 3);
    assert_eq!(node_at(&build.graph, 20.0, 0.0).unwrap().degree, 3);
    assert_eq!(build.graph.node_count(), 8);
    assert_eq!(build.graph.edge_count(), 9);
    assert!(build.bridges.is_empty());
    assert_eq!(build.connectivity.components, 1);
}

#[test]
fn rejected_trails_are_logged_and_the_run_continues() {
    let trails = vec![
        Trail::from_xy("ok", "Ok", &[(0.0, 0.0), (100.0, 0.0)]),
        Trail::from_xy("dot", "Dot", &[(5.0, 5.0)]),
        Trail::from_xy("ok", "Dup", &[(0.0, 50.0), (100.0, 50.0)]),
    ];
    let build = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .build(&trails)
        .unwrap();

    assert_eq!(build.trails_in, 3);
    assert_eq!(build.trails_accepted, 1);
    assert_eq!(build.issues.issues().iter().filter(|i| i.excluded).count(), 2);
    assert_eq!(build.graph.edge_count(), 1);
}

#[test]
fn nothing_left_after_preprocessing_fails_the_run() {
    let store = GraphStore::new();
    let mut ws = RunWorkspace::create(&store, "empty").unwrap();
    let builder = GraphBuilder::from_config(GraphBuildConfig::planar()).unwrap();
    let err = builder
        .run(&[Trail::from_xy("dot", "Dot", &[(1.0, 1.0)])], &mut ws)
        .unwrap_err();
    match err {
        GraphBuildError::Workspace { namespace, .. } => assert_eq!(namespace, "empty"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(ws.staged().is_none());
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let config = GraphBuildConfig {
        min_bridge_distance_m: 40.0,
        ..GraphBuildConfig::planar()
    };
    assert!(matches!(
        GraphBuilder::from_config(config),
        Err(GraphBuildError::Config(_))
    ));
}

#[test]
fn consolidation_output_is_a_fixed_point() {
    let trails = vec![
        Trail::from_xy("a", "A", &[(0.0, 0.0), (50.0, 0.0), (100.0, 20.0)]),
        Trail::from_xy("b", "B", &[(100.0, 20.0), (150.0, 60.0)]),
        Trail::from_xy("c", "C", &[(75.0, -40.0), (75.0, 60.0)]),
    ];
    let config = GraphBuildConfig::planar();
    let mut build = GraphBuilder::from_config(config.clone())
        .unwrap()
        .build(&trails)
        .unwrap();
    let edges_before = build.graph.edge_count();

    let engine = PlanarGeometryEngine::new();
    let mut issues = IssueLog::new();
    let again = ChainConsolidator::new(&engine, &config).consolidate(&mut build.graph, &mut issues);
    assert_eq!(again.merges, 0);
    assert_eq!(build.graph.edge_count(), edges_before);
    for node in build.graph.nodes() {
        assert_ne!(node.degree, 2, "{} left at degree 2", node.id);
    }
}

#[test]
fn runs_are_deterministic() {
    let trails = vec![
        Trail::from_xy("a", "A", &[(0.0, 0.0), (200.0, 0.0)]),
        Trail::from_xy("b", "B", &[(50.0, -50.0), (50.0, 50.0)]),
        Trail::from_xy("c", "C", &[(150.0, -50.0), (150.0, 50.0)]),
        Trail::from_xy("d", "D", &[(150.0, 62.0), (220.0, 62.0)]),
    ];
    let builder = GraphBuilder::from_config(GraphBuildConfig::planar()).unwrap();
    let first = builder.build(&trails).unwrap();
    let second = builder.build(&trails).unwrap();
    assert_eq!(
        first.graph.to_tables(&first.projection),
        second.graph.to_tables(&second.projection)
    );
    assert_eq!(first.bridges.len(), 1);
    assert!((trail_edge_length(&first.graph) - 470.0).abs() < 1e-9);
}

#[test]
fn wgs84_run_reports_lon_lat() {
    let trails = vec![
        Trail::new(
            "east-west",
            "Mesa",
            vec![[-105.0, 40.0, 1650.0], [-104.998, 40.0, 1660.0]],
        ),
        Trail::new(
            "north-south",
            "Bluebell",
            vec![[-104.999, 39.999, 1640.0], [-104.999, 40.001, 1670.0]],
        ),
    ];
    let config = GraphBuildConfig::default();
    assert_eq!(config.coordinate_space, CoordinateSpace::Wgs84);
    let build = GraphBuilder::from_config(config).unwrap().build(&trails).unwrap();
    let tables = build.graph.to_tables(&build.projection);

    assert_eq!(tables.nodes.len(), 5);
    assert_eq!(tables.edges.len(), 4);
    let hub = tables.nodes.iter().find(|n| n.degree == 4).unwrap();
    assert!((hub.lon - -104.999).abs() < 1e-7);
    assert!((hub.lat - 40.0).abs() < 1e-7);
    // roughly 170 m east-west plus 222 m north-south
    let total: f64 = tables.edges.iter().map(|e| e.length).sum();
    assert!((total - 393.0).abs() < 5.0, "total {total}");
}

#[test]
fn parallel_regions_commit_independently() {
    let store = GraphStore::new();
    let builder = GraphBuilder::from_config(GraphBuildConfig::planar()).unwrap();
    let regions = vec![
        RegionInput {
            namespace: "north".to_string(),
            trails: vec![Trail::from_xy("n", "N", &[(0.0, 0.0), (10.0, 0.0)])],
        },
        RegionInput {
            namespace: "south".to_string(),
            trails: vec![
                Trail::from_xy("s1", "S1", &[(0.0, 0.0), (10.0, 0.0)]),
                Trail::from_xy("s2", "S2", &[(5.0, -5.0), (5.0, 5.0)]),
            ],
        },
        RegionInput {
            namespace: "broken".to_string(),
            trails: vec![Trail::from_xy("x", "X", &[(0.0, 0.0)])],
        },
    ];

    let results = build_graphs_parallel(&builder, &store, &regions);
    let names: Vec<&str> = results.iter().map(|(ns, _)| ns.as_str()).collect();
    assert_eq!(names, vec!["north", "south", "broken"]);
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].1.as_ref().unwrap().nodes, 5);
    assert!(results[2].1.is_err());

    assert_eq!(store.namespaces(), vec!["north".to_string(), "south".to_string()]);
    assert_eq!(store.get("south").unwrap().tables.edges.len(), 4);
    assert!(!store.is_reserved("broken"));
}

#[test]
fn summary_counts_issues_and_lengths() {
    let store = GraphStore::new();
    let mut ws = RunWorkspace::create(&store, "summary").unwrap();
    let trails = vec![
        Trail::new("climb", "Climb", vec![[0.0, 0.0, 100.0], [30.0, 0.0, 140.0]]),
        Trail::from_xy("tiny", "Tiny", &[(500.0, 500.0), (500.1, 500.0)]),
    ];
    let summary = GraphBuilder::from_config(GraphBuildConfig::planar())
        .unwrap()
        .run(&trails, &mut ws)
        .unwrap();

    assert_eq!(summary.namespace, "summary");
    assert_eq!(summary.run_id, ws.run_id());
    assert_eq!(summary.trails_accepted, 1);
    assert_eq!(summary.excluded_count(), 1);
    assert_eq!(
        summary.issues[0].kind,
        IssueKind::BelowMinimumLength
    );
    assert!((summary.total_length_m - 30.0).abs() < 1e-9);
    assert!((summary.total_length_3d_m - 50.0).abs() < 1e-9);
    assert!(ws.staged().is_some());
}
