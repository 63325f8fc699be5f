//! Benchmark pillar scatter across compute unit counts.
//!
//! Run with: cargo run --release --bin bench_units
//!
//! Usage:
//!   bench_units                 Default size (30k pillars, 1024x1024x64 grid)
//!   bench_units -p 100k         Number of pillars
//!   bench_units --no-prefetch   Sequential fetch-then-write per unit
//!   bench_units --unchecked     Skip cross-unit cell arbitration

use clap::Parser;
use half::f16;
use pillar_scatter::{
    scatter_into, scatter_unchecked, CoordBuffer, CoordRecord, GridShape, PillarBatch, ScatterConfig,
};
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Instant;

fn parse_count(s: &str) -> Result<usize, String> {
    let s = s.to_lowercase();
    let (num_str, multiplier) = if s.ends_with('m') {
        (&s[..s.len() - 1], 1_000_000)
    } else if s.ends_with('k') {
        (&s[..s.len() - 1], 1_000)
    } else {
        (s.as_str(), 1)
    };

    num_str
        .parse::<f64>()
        .map(|n| (n * multiplier as f64) as usize)
        .map_err(|e| format!("Invalid number '{}': {}", s, e))
}

#[derive(Parser, Debug)]
#[command(about = "Benchmark pillar scatter across unit counts")]
struct Args {
    /// Number of pillars (accepts k/m suffixes)
    #[arg(short, long, default_value = "30k", value_parser = parse_count)]
    pillars: usize,

    /// Grid extent (square grid)
    #[arg(long, default_value_t = 1024)]
    extent: usize,

    /// Samples per unit count
    #[arg(short, long, default_value_t = 5)]
    samples: usize,

    #[arg(long)]
    no_prefetch: bool,

    #[arg(long)]
    unchecked: bool,
}

/// Pillars on distinct random cells with random features.
fn generate_pillars(n: usize, shape: GridShape, seed: u64) -> (Vec<f16>, CoordBuffer) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut cells: Vec<usize> = (0..shape.num_cells()).collect();
    let (picked, _) = cells.partial_shuffle(&mut rng, n.min(shape.num_cells()));

    let records: Vec<CoordRecord> = picked
        .iter()
        .map(|&cell| CoordRecord::new((cell / shape.width) as u32, (cell % shape.width) as u32))
        .collect();
    let features: Vec<f16> = (0..records.len() * shape.channels)
        .map(|_| f16::from_f32(rng.gen_range(-4.0..4.0)))
        .collect();
    (features, CoordBuffer::from_records(&records))
}

struct Stats {
    mean: f64,
    std_dev: f64,
    min: f64,
}

fn compute_stats(samples: &[f64]) -> Stats {
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        samples.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    Stats {
        mean,
        std_dev: variance.sqrt(),
        min: samples.iter().fold(f64::INFINITY, |a, &b| a.min(b)),
    }
}

fn main() {
    let args = Args::parse();
    let shape = GridShape::new(args.extent, args.extent, pillar_scatter::PILLAR_FEATURE_SIZE);
    let (features, coords) = generate_pillars(args.pillars, shape, 12345);
    let batch = PillarBatch::from_buffer(&features, &coords);
    let mut dest = vec![f16::ZERO; shape.len()];

    println!(
        "Benchmarking {} pillars into {shape} grid ({} samples, prefetch={}, unchecked={})",
        batch.num_pillars(),
        args.samples.max(1),
        !args.no_prefetch,
        args.unchecked
    );
    println!("{:>6} {:>12} {:>10} {:>10} {:>16}", "Units", "Mean (ms)", "StdDev", "Min", "K pillars/sec");
    println!("{}", "-".repeat(60));

    for units in [1, 2, 4, 8, 16, 32] {
        let config = ScatterConfig::default()
            .with_units(units)
            .with_prefetch(!args.no_prefetch);

        let mut times = Vec::with_capacity(args.samples);
        for _ in 0..args.samples.max(1) {
            dest.fill(f16::ZERO);
            let start = Instant::now();
            let result = if args.unchecked {
                // SAFETY: generated pillars occupy distinct cells.
                unsafe { scatter_unchecked(&batch, shape, &mut dest, config) }
            } else {
                scatter_into(&batch, shape, &mut dest, config)
            };
            let elapsed = start.elapsed();
            if let Err(e) = result {
                eprintln!("units={units}: scatter failed: {e}");
                return;
            }
            times.push(elapsed.as_secs_f64() * 1000.0);
        }

        let stats = compute_stats(&times);
        let rate = batch.num_pillars() as f64 / (stats.mean / 1000.0) / 1000.0;
        println!(
            "{:>6} {:>9.3} ms {:>7.3} ms {:>7.3} ms {:>16.1}",
            units, stats.mean, stats.std_dev, stats.min, rate
        );
    }
}
