//! Scatter pillar dumps from disk into a BEV grid dump.
//!
//! Run with: cargo run --release --bin pillar-scatter -- \
//!     --features input/scatter_input_x.bin --coords input/scatter_input_coords.bin \
//!     --output output/scatter_output_x.bin
//!
//! The pillar count is derived from the input file sizes. Pass `--reference`
//! to compare the result against a known-good output grid.
//!
//! For per-unit wall times, build with `--features timing`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use pillar_scatter::host::{self, GridSummary};
use pillar_scatter::verify::compare_grids;
use pillar_scatter::{
    scatter, GridShape, PillarBatch, ScatterConfig, SpatialGrid, DEFAULT_GRID_EXTENT, DEFAULT_UNITS,
    PILLAR_FEATURE_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "pillar-scatter")]
#[command(about = "Scatter pillar features into a dense NHWC BEV grid")]
#[command(version)]
struct Args {
    /// Pillar features, raw f16 `[N, C]`
    #[arg(long)]
    features: PathBuf,

    /// Pillar coordinates, raw u32 `[N, 4]` as {batch, row, col, reserved}
    #[arg(long)]
    coords: PathBuf,

    /// Output grid, raw f16 NHWC
    #[arg(short, long)]
    output: PathBuf,

    /// Number of compute units
    #[arg(short, long, default_value_t = DEFAULT_UNITS)]
    units: usize,

    /// Grid height (rows)
    #[arg(long, default_value_t = DEFAULT_GRID_EXTENT)]
    height: usize,

    /// Grid width (columns)
    #[arg(long, default_value_t = DEFAULT_GRID_EXTENT)]
    width: usize,

    /// Feature channels per pillar
    #[arg(long, default_value_t = PILLAR_FEATURE_SIZE)]
    channels: usize,

    /// Fail on coordinates outside the grid
    #[arg(long)]
    check_bounds: bool,

    /// Fail when two pillars address the same cell
    #[arg(long)]
    reject_collisions: bool,

    /// Run each unit as a plain fetch-then-write loop
    #[arg(long)]
    no_prefetch: bool,

    /// Known-good output grid to compare against
    #[arg(long)]
    reference: Option<PathBuf>,

    /// The reference grid is channel-major `[C, H, W]`
    #[arg(long, requires = "reference")]
    reference_nchw: bool,

    /// Absolute and relative tolerance for the reference comparison
    #[arg(long, default_value_t = 1e-5)]
    tolerance: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let shape = GridShape::new(args.height, args.width, args.channels);
    let config = ScatterConfig::default()
        .with_units(args.units)
        .with_prefetch(!args.no_prefetch)
        .with_bounds_check(args.check_bounds)
        .with_collision_rejection(args.reject_collisions);

    let count = host::pillar_count_from_files(&args.features, &args.coords, shape.channels)
        .context("failed to stat input files")?;
    let num_pillars = count.pillars();
    ensure!(
        num_pillars <= u32::MAX as usize,
        "{num_pillars} pillars exceed the u32 pillar count"
    );
    tracing::info!("Detected {num_pillars} pillars");

    let features = host::read_features(&args.features, shape.channels)
        .with_context(|| format!("failed to read {}", args.features.display()))?;
    let coords = host::read_coords(&args.coords)
        .with_context(|| format!("failed to read {}", args.coords.display()))?;

    let mut grid = SpatialGrid::new(shape);
    let batch = PillarBatch::new(&features, coords.as_slice(), num_pillars as u32);

    tracing::info!("Scattering into {shape} grid with {} units", config.units);
    let start = Instant::now();
    let report = scatter(&batch, &mut grid, config).context("scatter failed")?;
    let elapsed = start.elapsed();

    let us = elapsed.as_secs_f64() * 1e6;
    println!("Execution time: {:.3} ms", us / 1000.0);
    println!("Pillars: {num_pillars}");
    if num_pillars > 0 {
        println!("Average per pillar: {:.3} us", us / num_pillars as f64);
        println!(
            "Throughput: {:.2} K pillars/s",
            num_pillars as f64 / elapsed.as_secs_f64() / 1000.0
        );
    }
    println!(
        "Written: {}, dropped out of range: {}, cross-unit collisions: {}",
        report.written(),
        report.dropped_out_of_range(),
        report.cross_unit_collisions()
    );
    #[cfg(feature = "timing")]
    for unit in &report.units {
        println!(
            "  unit {:>3}: [{:>8}, {:>8}) {:>8.3} ms",
            unit.range.unit,
            unit.range.start,
            unit.range.end,
            unit.elapsed.as_secs_f64() * 1000.0
        );
    }

    let summary = GridSummary::of(&grid);
    println!("Output (NHWC):");
    println!("  elements: {}", summary.total_elements);
    println!(
        "  non-zero: {} ({:.2}%)",
        summary.non_zero_elements,
        summary.density() * 100.0
    );
    match summary.first_non_zero {
        Some(first) => println!(
            "  first non-zero: 0x{:04X} at {} (H={}, W={}, C={})",
            first.bits, first.index, first.row, first.col, first.channel
        ),
        None => tracing::warn!("output grid is all zero"),
    }

    host::write_grid(&args.output, &grid)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    tracing::info!("Wrote {}", args.output.display());

    if let Some(reference) = &args.reference {
        let expected = host::read_grid(reference, shape, args.reference_nchw)
            .with_context(|| format!("failed to read {}", reference.display()))?;
        let cmp = compare_grids(&grid, &expected, args.tolerance)?;
        let expected_summary = GridSummary::of(&expected);
        println!("Reference comparison:");
        println!(
            "  non-zero: output {} / reference {}",
            summary.non_zero_elements, expected_summary.non_zero_elements
        );
        println!("  max abs diff: {:.6e}", cmp.max_abs_diff);
        println!("  mean abs diff: {:.6e}", cmp.mean_abs_diff);
        println!(
            "  mismatched: {} elements in {} cells ({:.4}% match)",
            cmp.mismatched_elements,
            cmp.mismatched_cells,
            cmp.match_ratio() * 100.0
        );
        if let Some((cell, channel)) = cmp.first_mismatch {
            println!("  first mismatch: row={} col={} channel={}", cell.row, cell.col, channel);
        }
        ensure!(cmp.is_match(), "output does not match {}", reference.display());
        println!("Output matches reference");
    }

    Ok(())
}
