use glam::DVec3;
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use rayon::prelude::*;

mod lloyd;
pub use lloyd::{LloydStats, SamplingParams};

mod mesh;
pub use mesh::TriangleMesh;

/// Error types for the volume module.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VolumeError {
    /// The cell size is zero, negative or not finite.
    #[error("cell size must be positive and finite, got {0}")]
    InvalidCellSize(f64),

    /// At least one axis has zero cells.
    #[error("resolution must be positive on every axis, got {0:?}")]
    InvalidResolution([usize; 3]),

    /// Sampling asked for more distinct cells than are occupied.
    #[error("requested {requested} samples but only {available} cells are occupied")]
    NotEnoughOccupied {
        /// Number of requested samples.
        requested: usize,
        /// Number of occupied cells.
        available: usize,
    },

    /// The mesh has no triangles.
    #[error("mesh has no triangles")]
    EmptyMesh,

    /// A triangle references a vertex that does not exist.
    #[error("triangle {0} references a missing vertex")]
    InvalidTriangle(usize),
}

/// A dense, bit-packed boolean grid marking the cells inside a solid.
///
/// Cell `(x, y, z)` covers `origin + [x, y, z] * cell_size` to the next corner and is stored at
/// linear index `(x * ny + y) * nz + z`. The grid is immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyVolume {
    origin: DVec3,
    cell_size: f64,
    resolution: [usize; 3],
    bits: Vec<u64>,
    occupied: usize,
}

impl OccupancyVolume {
    /// Build a volume by evaluating `inside` for every cell, in parallel.
    ///
    /// # Arguments
    ///
    /// * `origin` - The min corner of the grid.
    /// * `cell_size` - The edge length of a cubic cell.
    /// * `resolution` - Number of cells along x, y and z.
    /// * `inside` - Occupancy predicate over cell coordinates.
    pub fn from_fn<F>(
        origin: DVec3,
        cell_size: f64,
        resolution: [usize; 3],
        inside: F,
    ) -> Result<Self, VolumeError>
    where
        F: Fn([usize; 3]) -> bool + Sync,
    {
        validate(cell_size, resolution)?;
        let total = resolution.iter().product::<usize>();
        let [_, ny, nz] = resolution;

        let bits: Vec<u64> = (0..total.div_ceil(64))
            .into_par_iter()
            .map(|w| {
                let mut word = 0u64;
                for b in 0..64 {
                    let idx = w * 64 + b;
                    if idx >= total {
                        break;
                    }
                    if inside([idx / (ny * nz), (idx / nz) % ny, idx % nz]) {
                        word |= 1 << b;
                    }
                }
                word
            })
            .collect();

        Ok(Self::from_raw_parts(origin, cell_size, resolution, bits))
    }

    /// Assemble a volume from packed words; bit `i % 64` of word `i / 64` is cell `i`.
    pub(crate) fn from_raw_parts(
        origin: DVec3,
        cell_size: f64,
        resolution: [usize; 3],
        bits: Vec<u64>,
    ) -> Self {
        let occupied = bits.iter().map(|w| w.count_ones() as usize).sum();
        Self {
            origin,
            cell_size,
            resolution,
            bits,
            occupied,
        }
    }

    /// The min corner of the grid.
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// The edge length of a cell.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of cells along x, y and z.
    pub fn resolution(&self) -> [usize; 3] {
        self.resolution
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.resolution.iter().product()
    }

    /// Number of occupied cells.
    pub fn occupied_count(&self) -> usize {
        self.occupied
    }

    #[inline]
    fn linear_index(&self, [x, y, z]: [usize; 3]) -> usize {
        let [_, ny, nz] = self.resolution;
        (x * ny + y) * nz + z
    }

    #[inline]
    pub(crate) fn bit(&self, idx: usize) -> bool {
        (self.bits[idx / 64] >> (idx % 64)) & 1 == 1
    }

    /// Whether a cell is occupied. Out of range cells are empty.
    pub fn is_occupied(&self, cell: [usize; 3]) -> bool {
        let [nx, ny, nz] = self.resolution;
        if cell[0] >= nx || cell[1] >= ny || cell[2] >= nz {
            return false;
        }
        self.bit(self.linear_index(cell))
    }

    /// World position of a cell centre: `origin + cell * cell_size + cell_size / 2`.
    #[inline]
    pub fn cell_center(&self, [x, y, z]: [usize; 3]) -> DVec3 {
        self.origin
            + DVec3::new(x as f64, y as f64, z as f64) * self.cell_size
            + DVec3::splat(self.cell_size * 0.5)
    }

    /// The cell containing a world point, `floor((point - origin) / cell_size)`.
    pub fn cell_of(&self, point: DVec3) -> Option<[usize; 3]> {
        let rel = ((point - self.origin) / self.cell_size).floor();
        if !rel.is_finite() || rel.min_element() < 0.0 {
            return None;
        }
        let cell = [rel.x as usize, rel.y as usize, rel.z as usize];
        let [nx, ny, nz] = self.resolution;
        (cell[0] < nx && cell[1] < ny && cell[2] < nz).then_some(cell)
    }

    /// Whether the cell containing a world point is occupied.
    pub fn probe(&self, point: DVec3) -> bool {
        self.cell_of(point).is_some_and(|c| self.bit(self.linear_index(c)))
    }

    /// Iterate over occupied cells in storage order.
    pub fn occupied_cells(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let [_, ny, nz] = self.resolution;
        (0..self.cell_count())
            .filter(|&i| self.bit(i))
            .map(move |i| [i / (ny * nz), (i / nz) % ny, i % nz])
    }

    /// Draw `count` distinct occupied cell centres.
    ///
    /// The selection is deterministic for a given `seed`.
    pub fn random_sample(&self, count: usize, seed: u64) -> Result<Vec<DVec3>, VolumeError> {
        if count > self.occupied {
            return Err(VolumeError::NotEnoughOccupied {
                requested: count,
                available: self.occupied,
            });
        }
        let cells: Vec<[usize; 3]> = self.occupied_cells().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(index::sample(&mut rng, cells.len(), count)
            .iter()
            .map(|i| self.cell_center(cells[i]))
            .collect())
    }

    /// Jitter points by up to half a percent of a cell along each axis.
    ///
    /// Breaks the exact ties between cell centres and samples drawn from them.
    pub fn perturb(&self, points: &mut [DVec3], seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = self.cell_size * 0.01;
        for p in points.iter_mut() {
            let jitter = DVec3::new(
                rng.random::<f64>() - 0.5,
                rng.random::<f64>() - 0.5,
                rng.random::<f64>() - 0.5,
            );
            *p += jitter * scale;
        }
    }
}

pub(crate) fn validate(cell_size: f64, resolution: [usize; 3]) -> Result<(), VolumeError> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(VolumeError::InvalidCellSize(cell_size));
    }
    if resolution.contains(&0) {
        return Err(VolumeError::InvalidResolution(resolution));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A ball of `radius` cells centred in a cube of `res` cells of size `1 / res`.
    pub(crate) fn sphere_volume(res: usize, radius: f64) -> OccupancyVolume {
        let center = res as f64 / 2.0;
        OccupancyVolume::from_fn(DVec3::ZERO, 1.0 / res as f64, [res; 3], |[x, y, z]| {
            let d = DVec3::new(x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5) - DVec3::splat(center);
            d.length() <= radius
        })
        .unwrap()
    }

    #[test]
    fn test_cell_mapping_roundtrip() -> Result<(), VolumeError> {
        let vol = OccupancyVolume::from_fn(DVec3::new(-1.0, 2.0, 0.5), 0.25, [4, 5, 6], |_| true)?;
        assert_eq!(vol.cell_count(), 120);
        assert_eq!(vol.occupied_count(), 120);
        for x in 0..4 {
            for y in 0..5 {
                for z in 0..6 {
                    let c = vol.cell_center([x, y, z]);
                    assert_eq!(vol.cell_of(c), Some([x, y, z]));
                }
            }
        }
        let c = vol.cell_center([1, 2, 3]);
        assert_relative_eq!(c.x, -1.0 + 0.25 + 0.125);
        assert_relative_eq!(c.y, 2.0 + 0.5 + 0.125);
        assert_relative_eq!(c.z, 0.5 + 0.75 + 0.125);
        assert_eq!(vol.cell_of(DVec3::new(-1.1, 2.1, 0.6)), None);
        assert_eq!(vol.cell_of(DVec3::new(0.1, 2.1, 0.6)), None);
        Ok(())
    }

    #[test]
    fn test_probe_and_storage_order() -> Result<(), VolumeError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [3, 4, 5], |[x, y, z]| {
            x == 2 && y == 1 && z == 4
        })?;
        assert_eq!(vol.occupied_count(), 1);
        assert!(vol.is_occupied([2, 1, 4]));
        assert!(!vol.is_occupied([2, 1, 3]));
        assert!(!vol.is_occupied([3, 1, 4]));
        assert!(vol.probe(DVec3::new(2.5, 1.2, 4.9)));
        assert!(!vol.probe(DVec3::new(2.5, 1.2, 5.1)));
        assert_eq!(vol.occupied_cells().collect::<Vec<_>>(), vec![[2, 1, 4]]);
        Ok(())
    }

    #[test]
    fn test_invalid_construction() {
        let res = OccupancyVolume::from_fn(DVec3::ZERO, 0.0, [1, 1, 1], |_| true);
        assert_eq!(res, Err(VolumeError::InvalidCellSize(0.0)));
        let res = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [1, 0, 1], |_| true);
        assert_eq!(res, Err(VolumeError::InvalidResolution([1, 0, 1])));
    }

    #[test]
    fn test_random_sample_distinct_and_inside() -> Result<(), VolumeError> {
        let vol = sphere_volume(16, 6.0);
        let samples = vol.random_sample(50, 0)?;
        assert_eq!(samples.len(), 50);
        assert!(samples.iter().all(|&p| vol.probe(p)));

        let mut cells: Vec<_> = samples.iter().filter_map(|&p| vol.cell_of(p)).collect();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), 50);

        assert_eq!(samples, vol.random_sample(50, 0)?);

        let err = vol.random_sample(vol.occupied_count() + 1, 0);
        assert!(matches!(err, Err(VolumeError::NotEnoughOccupied { .. })));
        Ok(())
    }

    #[test]
    fn test_perturb_stays_in_cell() -> Result<(), VolumeError> {
        let vol = sphere_volume(16, 6.0);
        let samples = vol.random_sample(20, 1)?;
        let mut jittered = samples.clone();
        vol.perturb(&mut jittered, 0);
        for (a, b) in samples.iter().zip(jittered.iter()) {
            assert!((*a - *b).abs().max_element() <= vol.cell_size() * 0.005);
            assert_eq!(vol.cell_of(*a), vol.cell_of(*b));
        }
        Ok(())
    }
}
