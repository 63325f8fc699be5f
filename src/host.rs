//! Host-side I/O around the scatter core.
//!
//! Files are raw little-endian dumps: features as `[N, C]` `f16`, coordinates
//! as `[N, 4]` `u32`, the output grid as NHWC `f16`. The pillar count is
//! derived from the file sizes.

use std::fs;
use std::path::Path;

use half::f16;

use crate::error::{Result, ScatterError};
use crate::grid::SpatialGrid;
use crate::types::{CoordBuffer, GridShape, COORD_FIELDS};

const F16_BYTES: u64 = std::mem::size_of::<f16>() as u64;
const COORD_RECORD_BYTES: u64 = (COORD_FIELDS * std::mem::size_of::<u32>()) as u64;

/// Pillar counts implied by the feature and coordinate file sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PillarCount {
    pub from_features: usize,
    pub from_coords: usize,
}

impl PillarCount {
    /// The count safe to process: the smaller of the two.
    pub fn pillars(&self) -> usize {
        self.from_features.min(self.from_coords)
    }

    pub fn is_consistent(&self) -> bool {
        self.from_features == self.from_coords
    }
}

pub fn pillar_count_from_sizes(feature_bytes: u64, coord_bytes: u64, channels: usize) -> PillarCount {
    let per_pillar = channels as u64 * F16_BYTES;
    let from_features = if per_pillar == 0 { 0 } else { feature_bytes / per_pillar };
    PillarCount {
        from_features: from_features as usize,
        from_coords: (coord_bytes / COORD_RECORD_BYTES) as usize,
    }
}

/// Count pillars from the sizes of two files on disk.
pub fn pillar_count_from_files(
    features: impl AsRef<Path>,
    coords: impl AsRef<Path>,
    channels: usize,
) -> Result<PillarCount> {
    let feature_bytes = fs::metadata(features)?.len();
    let coord_bytes = fs::metadata(coords)?.len();
    let count = pillar_count_from_sizes(feature_bytes, coord_bytes, channels);
    if !count.is_consistent() {
        tracing::warn!(
            from_features = count.from_features,
            from_coords = count.from_coords,
            "feature and coordinate files disagree on pillar count, using the smaller"
        );
    }
    Ok(count)
}

/// Read a feature dump. Trailing bytes that do not form a whole vector are ignored.
pub fn read_features(path: impl AsRef<Path>, channels: usize) -> Result<Vec<f16>> {
    let path = path.as_ref();
    if channels == 0 {
        return Err(ScatterError::InvalidFile {
            path: path.to_path_buf(),
            reason: "zero channels per pillar".into(),
        });
    }
    let bytes = fs::read(path)?;
    let vector_bytes = channels * F16_BYTES as usize;
    let whole = bytes.len() / vector_bytes * vector_bytes;
    if whole != bytes.len() {
        tracing::warn!(
            path = %path.display(),
            trailing = bytes.len() - whole,
            "ignoring partial feature vector at end of file"
        );
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes[..whole]))
}

/// Read a coordinate dump into a slack-padded buffer.
///
/// Trailing bytes that do not form a whole record are ignored, matching the
/// count [`pillar_count_from_sizes`] derives.
pub fn read_coords(path: impl AsRef<Path>) -> Result<CoordBuffer> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let whole = bytes.len() / COORD_RECORD_BYTES as usize * COORD_RECORD_BYTES as usize;
    if whole != bytes.len() {
        tracing::warn!(
            path = %path.display(),
            trailing = bytes.len() - whole,
            "ignoring partial coordinate record at end of file"
        );
    }
    Ok(CoordBuffer::from_words(bytemuck::pod_collect_to_vec(&bytes[..whole])))
}

/// Write the grid as a raw NHWC `f16` dump.
pub fn write_grid(path: impl AsRef<Path>, grid: &SpatialGrid) -> Result<()> {
    fs::write(path, bytemuck::cast_slice::<f16, u8>(grid.as_slice()))?;
    Ok(())
}

/// Read a raw grid dump, either NHWC or channel-major `[C, H, W]`.
pub fn read_grid(path: impl AsRef<Path>, shape: GridShape, nchw: bool) -> Result<SpatialGrid> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let expected = shape.len() * F16_BYTES as usize;
    if bytes.len() != expected {
        return Err(ScatterError::InvalidFile {
            path: path.to_path_buf(),
            reason: format!("expected {expected} bytes for grid {shape}, got {}", bytes.len()),
        });
    }
    let data: Vec<f16> = bytemuck::pod_collect_to_vec(&bytes);
    if nchw {
        SpatialGrid::from_nchw(shape, &data)
    } else {
        SpatialGrid::from_vec(shape, data)
    }
}

/// First non-zero element of a grid, located in NHWC terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonZeroElement {
    pub index: usize,
    pub bits: u16,
    pub row: usize,
    pub col: usize,
    pub channel: usize,
}

/// Occupancy summary of a scattered grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSummary {
    pub total_elements: usize,
    pub non_zero_elements: usize,
    pub first_non_zero: Option<NonZeroElement>,
}

impl GridSummary {
    /// Non-zero means bitwise non-zero, so `-0.0` counts.
    pub fn of(grid: &SpatialGrid) -> Self {
        let shape = grid.shape();
        let mut non_zero_elements = 0;
        let mut first_non_zero = None;
        for (index, v) in grid.as_slice().iter().enumerate() {
            let bits = v.to_bits();
            if bits == 0 {
                continue;
            }
            if first_non_zero.is_none() {
                let (row, col, channel) = shape.decompose(index);
                first_non_zero = Some(NonZeroElement {
                    index,
                    bits,
                    row,
                    col,
                    channel,
                });
            }
            non_zero_elements += 1;
        }
        Self {
            total_elements: grid.as_slice().len(),
            non_zero_elements,
            first_non_zero,
        }
    }

    /// Fraction of non-zero elements.
    pub fn density(&self) -> f64 {
        if self.total_elements == 0 {
            return 0.0;
        }
        self.non_zero_elements as f64 / self.total_elements as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pillar_count_from_sizes() {
        // 3 pillars of 64 f16 = 384 bytes; 3 coordinate records = 48 bytes.
        let count = pillar_count_from_sizes(384, 48, 64);
        assert_eq!(count.pillars(), 3);
        assert!(count.is_consistent());

        let count = pillar_count_from_sizes(384 + 10, 32, 64);
        assert_eq!(count.from_features, 3);
        assert_eq!(count.from_coords, 2);
        assert_eq!(count.pillars(), 2);
        assert!(!count.is_consistent());

        assert_eq!(pillar_count_from_sizes(100, 0, 0).pillars(), 0);
    }

    #[test]
    fn test_summary() {
        let shape = GridShape::new(2, 3, 4);
        let mut grid = SpatialGrid::new(shape);
        let empty = GridSummary::of(&grid);
        assert_eq!(empty.non_zero_elements, 0);
        assert_eq!(empty.first_non_zero, None);

        grid.cell_mut(1, 2).unwrap()[3] = f16::ONE;
        grid.cell_mut(1, 2).unwrap()[1] = f16::NEG_ZERO;
        let summary = GridSummary::of(&grid);
        assert_eq!(summary.total_elements, 24);
        assert_eq!(summary.non_zero_elements, 2);
        let first = summary.first_non_zero.unwrap();
        assert_eq!((first.row, first.col, first.channel), (1, 2, 1));
        assert_eq!(first.bits, f16::NEG_ZERO.to_bits());
        assert_eq!(first.index, 21);
        assert!((summary.density() - 2.0 / 24.0).abs() < 1e-12);
    }
}
