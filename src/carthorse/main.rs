use anyhow::{Context, Result, bail};
use carthorse::{GraphBuildConfig, GraphBuilder, GraphStore, RegionInput, RunSummary, Trail};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::Level;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trail files (JSON arrays of trails, comma-separated).
    /// Each file is built into its own namespace named after the file stem.
    #[arg(long, env = "CARTHORSE_INPUT", value_delimiter = ',', required = true)]
    input: Vec<PathBuf>,

    /// Build configuration, `.ron` or `.json`. Defaults apply when omitted.
    #[arg(long, env = "CARTHORSE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory receiving one `<namespace>.graph.json` per input.
    #[arg(long, env = "CARTHORSE_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Treat input coordinates as planar meters instead of lon/lat.
    #[arg(long)]
    planar: bool,

    /// Overrides `intersection_tolerance_m` from the config file.
    #[arg(long, env = "CARTHORSE_INTERSECTION_TOLERANCE_M")]
    intersection_tolerance_m: Option<f64>,

    /// Overrides `node_snap_tolerance_m` from the config file.
    #[arg(long, env = "CARTHORSE_NODE_SNAP_TOLERANCE_M")]
    node_snap_tolerance_m: Option<f64>,

    /// Overrides `max_bridge_distance_m` from the config file.
    #[arg(long, env = "CARTHORSE_MAX_BRIDGE_DISTANCE_M")]
    max_bridge_distance_m: Option<f64>,

    /// Overrides `batch_size` from the config file.
    #[arg(long, env = "CARTHORSE_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Log per-merge and per-bridge detail.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize)]
struct GraphFile<'a> {
    summary: &'a RunSummary,
    graph: &'a carthorse::workspace::CommittedGraph,
}

fn load_config(args: &Args) -> Result<GraphBuildConfig> {
    let path = args.config.as_deref();
    let mut config = match path {
        None => GraphBuildConfig::default(),
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("ron") => ron::from_str(&text)
                    .with_context(|| format!("parsing RON config {}", path.display()))?,
                Some("json") => serde_json::from_str(&text)
                    .with_context(|| format!("parsing JSON config {}", path.display()))?,
                other => bail!("unsupported config extension {:?}", other),
            }
        }
    };
    if args.planar {
        config.coordinate_space = carthorse::config::CoordinateSpace::Planar;
    }
    if let Some(v) = args.intersection_tolerance_m {
        config.intersection_tolerance_m = v;
    }
    if let Some(v) = args.node_snap_tolerance_m {
        config.node_snap_tolerance_m = v;
    }
    if let Some(v) = args.max_bridge_distance_m {
        config.max_bridge_distance_m = v;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    Ok(config)
}

fn load_region(path: &Path) -> Result<RegionInput> {
    let namespace = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("no usable file name in {}", path.display()))?
        .to_string();
    let text =
        fs::read_to_string(path).with_context(|| format!("reading trails {}", path.display()))?;
    let trails: Vec<Trail> = serde_json::from_str(&text)
        .with_context(|| format!("parsing trails {}", path.display()))?;
    Ok(RegionInput { namespace, trails })
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(&args)?;
    let builder = GraphBuilder::from_config(config)?;

    let regions = args
        .input
        .iter()
        .map(|p| load_region(p))
        .collect::<Result<Vec<_>>>()?;
    println!("Loaded {} regions", regions.len());

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let store = GraphStore::new();
    let start = Instant::now();
    let results = carthorse::build_graphs_parallel(&builder, &store, &regions);
    println!("Built {} regions in {:?}", results.len(), start.elapsed());

    let mut failed = 0;
    for (namespace, result) in &results {
        let summary = match result {
            Ok(summary) => summary,
            Err(err) => {
                eprintln!("{namespace}: run failed: {err}");
                failed += 1;
                continue;
            }
        };
        let Some(graph) = store.get(namespace) else {
            eprintln!("{namespace}: committed graph missing from store");
            failed += 1;
            continue;
        };

        let out = args.output_dir.join(format!("{namespace}.graph.json"));
        let file = fs::File::create(&out).with_context(|| format!("creating {}", out.display()))?;
        serde_json::to_writer(
            std::io::BufWriter::new(file),
            &GraphFile {
                summary,
                graph: graph.as_ref(),
            },
        )
        .with_context(|| format!("writing {}", out.display()))?;

        println!(
            "{namespace}: {}/{} trails, {} segments, {} nodes, {} edges, {} bridges, {} merges",
            summary.trails_accepted,
            summary.trails_in,
            summary.segments,
            summary.nodes,
            summary.edges,
            summary.bridges,
            summary.merges
        );
        println!(
            "{namespace}: {} components, largest {:.1}%, {:.1} km ({:.1} km 3D), {} issues ({} excluded)",
            summary.connectivity.components,
            summary.connectivity.largest_share * 100.0,
            summary.total_length_m / 1000.0,
            summary.total_length_3d_m / 1000.0,
            summary.issues.len(),
            summary.excluded_count()
        );
        println!("Wrote {}", out.display());
    }

    ensure_all_succeeded(failed, results.len())
}

/// Any failed region fails the whole invocation, after the others were written.
fn ensure_all_succeeded(failed: usize, total: usize) -> Result<()> {
    if failed > 0 {
        bail!("{failed} of {total} runs failed");
    }
    Ok(())
}
