#![allow(dead_code)]

use half::f16;
use pillar_scatter::{CoordBuffer, CoordRecord, GridShape};
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Owned pillar input for tests.
pub struct Pillars {
    pub features: Vec<f16>,
    pub coords: CoordBuffer,
}

impl Pillars {
    pub fn batch(&self) -> pillar_scatter::PillarBatch<'_> {
        pillar_scatter::PillarBatch::from_buffer(&self.features, &self.coords)
    }

    pub fn len(&self) -> usize {
        self.coords.num_pillars()
    }

    /// Feature vector of pillar `p`.
    pub fn vector(&self, p: usize, channels: usize) -> &[f16] {
        &self.features[p * channels..(p + 1) * channels]
    }
}

/// Distinct, recognizable feature vector for pillar `p`: `p * 100 + channel`.
pub fn feature_vector(p: usize, channels: usize) -> Vec<f16> {
    (0..channels)
        .map(|c| f16::from_f32((p * 100 + c) as f32))
        .collect()
}

/// Pillars at the given `(row, col)` cells with `feature_vector` features.
pub fn pillars_at(cells: &[(u32, u32)], channels: usize) -> Pillars {
    let records: Vec<CoordRecord> = cells.iter().map(|&(r, c)| CoordRecord::new(r, c)).collect();
    let features = (0..cells.len())
        .flat_map(|p| feature_vector(p, channels))
        .collect();
    Pillars {
        features,
        coords: CoordBuffer::from_records(&records),
    }
}

/// `n` pillars on distinct random in-bounds cells with random features.
pub fn random_pillars(n: usize, shape: GridShape, seed: u64) -> Pillars {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    random_pillars_with_rng(n, shape, &mut rng)
}

pub fn random_pillars_with_rng<R: Rng + ?Sized>(n: usize, shape: GridShape, rng: &mut R) -> Pillars {
    assert!(n <= shape.num_cells(), "more pillars than cells");
    let mut cells: Vec<usize> = (0..shape.num_cells()).collect();
    cells.shuffle(rng);

    let records: Vec<CoordRecord> = cells[..n]
        .iter()
        .map(|&cell| CoordRecord {
            batch: rng.gen(),
            row: (cell / shape.width) as u32,
            col: (cell % shape.width) as u32,
            reserved: rng.gen(),
        })
        .collect();
    let features = (0..n * shape.channels)
        .map(|_| f16::from_f32(rng.gen_range(-8.0..8.0)))
        .collect();
    Pillars {
        features,
        coords: CoordBuffer::from_records(&records),
    }
}

/// `n` pillars on random cells, repeats allowed.
pub fn random_pillars_with_repeats(n: usize, shape: GridShape, seed: u64) -> Pillars {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let records: Vec<CoordRecord> = (0..n)
        .map(|_| {
            CoordRecord::new(
                rng.gen_range(0..shape.height as u32),
                rng.gen_range(0..shape.width as u32),
            )
        })
        .collect();
    let features = (0..n * shape.channels)
        .map(|_| f16::from_f32(rng.gen_range(-8.0..8.0)))
        .collect();
    Pillars {
        features,
        coords: CoordBuffer::from_records(&records),
    }
}
