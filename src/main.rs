use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lod_tiler::codec::decode_tile;
use lod_tiler::config::{CliArgs, Command, TileArgs, TilingConfig};
use lod_tiler::incremental::read_incremental_index;
use lod_tiler::index::{ValidationResult, read_index, repair_index, scan_tiles, validate_index};
use lod_tiler::ingestion::FileGeometrySource;
use lod_tiler::orchestrator::Orchestrator;
use lod_tiler::repository::{MemoryRepository, Repository};
use lod_tiler::storage::{LocalStorage, Storage};
use lod_tiler::types::TilingTask;

/// Output paths are relative to the storage root.
const OUTPUT_PREFIX: &str = "";

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Init tracing
    let filter = if args.verbose {
        EnvFilter::new("lod_tiler=debug")
    } else {
        EnvFilter::new("lod_tiler=info")
    };
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match &args.command {
        Command::Tile(tile) => run_tile(tile),
        Command::Validate { output, repair } => run_validate(output, *repair),
        Command::Inspect { file } => run_inspect(file),
    }
}

fn run_tile(args: &TileArgs) -> anyhow::Result<()> {
    let config = TilingConfig::from(args);
    config.validate().context("Invalid tiling configuration")?;

    let storage = LocalStorage::new(&args.output);
    let repo = MemoryRepository::new();
    let task = repo.insert_task(TilingTask::new(
        args.output.display().to_string(),
        args.input.as_str(),
        OUTPUT_PREFIX,
        &config,
    )?)?;

    // Rows of a previous run let incremental mode skip unchanged tiles and
    // let every run remove tiles it no longer produces.
    let previous = load_previous_tiles(&storage, task.id)?;
    if !previous.is_empty() {
        info!(tiles = previous.len(), "Found tiles from a previous run");
        repo.upsert_tiles(previous)?;
    }

    let orchestrator = Orchestrator::new(
        Arc::new(storage),
        Arc::new(repo),
        Arc::new(FileGeometrySource),
    );
    match orchestrator.process(task.id) {
        Ok(summary) => {
            println!(
                "Done: {} tiles written, {} unchanged, {} deleted, {} failed in {:.2}s",
                summary.tiles_written,
                summary.tiles_unchanged,
                summary.tiles_deleted,
                summary.tiles_failed,
                summary.duration.as_secs_f64()
            );
            if !summary.index_valid {
                warn!("Index did not validate after repair");
            }
            Ok(())
        }
        Err(e) => {
            error!(%e, "Tiling failed");
            Err(anyhow::anyhow!(e)).context("lod-tiler run failed")
        }
    }
}

fn load_previous_tiles(storage: &dyn Storage, task_id: u64) -> anyhow::Result<Vec<lod_tiler::Tile>> {
    let index = read_index(storage, OUTPUT_PREFIX).ok();
    let mut tiles = scan_tiles(storage, OUTPUT_PREFIX, task_id, index.as_ref())
        .context("Failed to scan previous output")?;
    if let Ok(incremental) = read_incremental_index(storage, OUTPUT_PREFIX) {
        for tile in &mut tiles {
            tile.content_hash = incremental
                .tiles
                .iter()
                .find(|e| e.path == tile.path && e.bbox == tile.bounds)
                .map(|e| e.hash.clone())
                .filter(|h| !h.is_empty());
        }
    }
    Ok(tiles)
}

fn run_validate(output: &Path, repair: bool) -> anyhow::Result<()> {
    if !output.is_dir() {
        bail!("Output directory not found: {}", output.display());
    }
    let storage = LocalStorage::new(output);
    let index = read_index(&storage, OUTPUT_PREFIX).ok();
    let task_id = index.as_ref().map_or(0, |i| i.task_id);

    let repo = MemoryRepository::new();
    let tiles = scan_tiles(&storage, OUTPUT_PREFIX, task_id, index.as_ref())?;
    println!("Found {} tile files", tiles.len());
    repo.upsert_tiles(tiles)?;

    let mut result = validate_index(&storage, &repo, task_id, OUTPUT_PREFIX)?;
    print_validation(&result);

    if !result.is_valid() && repair {
        let report = repair_index(&storage, &repo, task_id, OUTPUT_PREFIX);
        for action in &report.actions {
            println!("  repair: {action}");
        }
        result = validate_index(&storage, &repo, task_id, OUTPUT_PREFIX)?;
        print_validation(&result);
    }

    if result.is_valid() {
        println!("Index is valid");
        Ok(())
    } else {
        bail!("Index is invalid");
    }
}

fn print_validation(result: &ValidationResult) {
    for issue in &result.issues {
        println!("  {:?}: {}", issue.severity, issue.message);
    }
}

fn run_inspect(file: &Path) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let tile = decode_tile(&bytes).with_context(|| format!("Failed to decode {}", file.display()))?;

    println!("=== {} ===", file.display());
    println!("  Format:          {}", tile.format);
    if let Some(name) = &tile.name {
        println!("  Name:            {name}");
    }
    if let Some(coord) = tile.coord {
        println!("  Tile:            {coord}");
    }
    let b = tile.bounds;
    println!(
        "  Bounds:          [{:.3}, {:.3}, {:.3}] - [{:.3}, {:.3}, {:.3}]",
        b.min[0], b.min[1], b.min[2], b.max[0], b.max[1], b.max[2]
    );
    if let Some(err) = tile.geometric_error {
        println!("  Geometric error: {err:.4}");
    }
    if let Some(c) = tile.rtc_center {
        println!("  RTC center:      [{:.3}, {:.3}, {:.3}]", c[0], c[1], c[2]);
    }
    println!("  Triangles:       {}", tile.triangles.len());
    println!("  Vertices:        {}", tile.vertex_count);
    println!("  Size:            {} bytes", bytes.len());
    Ok(())
}
