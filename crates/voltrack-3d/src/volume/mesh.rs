use glam::DVec3;
use rayon::prelude::*;

use super::{OccupancyVolume, VolumeError};
use crate::pointcloud::compute_bounds;

/// A closed triangle surface.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    /// Vertex positions.
    pub vertices: Vec<DVec3>,
    /// Vertex indices of each triangle.
    pub triangles: Vec<[usize; 3]>,
}

/// Depth at which the vertical line through `(qx, qy)` crosses a triangle, if it does.
fn column_depth(tri: &[DVec3; 3], qx: f64, qy: f64, eps: f64) -> Option<f64> {
    let [a, b, c] = tri;
    let det = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
    if det.abs() < eps {
        return None;
    }
    let l1 = ((b.y - c.y) * (qx - c.x) + (c.x - b.x) * (qy - c.y)) / det;
    let l2 = ((c.y - a.y) * (qx - c.x) + (a.x - c.x) * (qy - c.y)) / det;
    let l3 = 1.0 - l1 - l2;
    if l1 < 0.0 || l2 < 0.0 || l3 < 0.0 {
        return None;
    }
    Some(l1 * a.z + l2 * b.z + l3 * c.z)
}

impl OccupancyVolume {
    /// Voxelize the interior of a closed mesh.
    ///
    /// The grid spans the mesh bounding box with cubic cells sized so that the longest axis has
    /// `max_resolution` cells. Each (x, y) column is intersected with every triangle and a cell
    /// is inside when an odd number of crossings lies below its centre.
    pub fn from_mesh(mesh: &TriangleMesh, max_resolution: usize) -> Result<Self, VolumeError> {
        if mesh.triangles.is_empty() {
            return Err(VolumeError::EmptyMesh);
        }
        let triangles = mesh
            .triangles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let vertex = |k: usize| mesh.vertices.get(t[k]).copied();
                match (vertex(0), vertex(1), vertex(2)) {
                    (Some(a), Some(b), Some(c)) => Ok([a, b, c]),
                    _ => Err(VolumeError::InvalidTriangle(i)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (lo, hi) = compute_bounds(&mesh.vertices).ok_or(VolumeError::EmptyMesh)?;
        let extent = hi - lo;
        let cell_size = extent.max_element() / max_resolution as f64;
        super::validate(cell_size, [max_resolution; 3])?;
        let cells = |e: f64| ((e / cell_size - 1e-9).ceil() as usize).max(1);
        let resolution = [cells(extent.x), cells(extent.y), cells(extent.z)];
        let [_, ny, _] = resolution;

        let det_eps = 1e-12 * cell_size * cell_size;
        // off-grid column offset so columns do not run exactly through mesh edges
        let shift = DVec3::new(1.234_567e-6, 2.345_678e-6, 0.0) * cell_size;

        let columns: Vec<Vec<f64>> = (0..resolution[0] * ny)
            .into_par_iter()
            .map(|col| {
                let qx = lo.x + ((col / ny) as f64 + 0.5) * cell_size + shift.x;
                let qy = lo.y + ((col % ny) as f64 + 0.5) * cell_size + shift.y;
                let mut depths: Vec<f64> = triangles
                    .iter()
                    .filter_map(|t| column_depth(t, qx, qy, det_eps))
                    .collect();
                depths.sort_by(f64::total_cmp);
                depths
            })
            .collect();

        let volume = Self::from_fn(lo, cell_size, resolution, |[x, y, z]| {
            let zc = lo.z + (z as f64 + 0.5) * cell_size;
            columns[x * ny + y].iter().filter(|&&d| d < zc).count() % 2 == 1
        })?;

        log::debug!(
            "voxelized {} triangles into {:?} cells, {} occupied",
            triangles.len(),
            resolution,
            volume.occupied_count()
        );
        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_mesh(lo: DVec3, hi: DVec3) -> TriangleMesh {
        let v = |x: bool, y: bool, z: bool| {
            DVec3::new(
                if x { hi.x } else { lo.x },
                if y { hi.y } else { lo.y },
                if z { hi.z } else { lo.z },
            )
        };
        let vertices = vec![
            v(false, false, false),
            v(true, false, false),
            v(true, true, false),
            v(false, true, false),
            v(false, false, true),
            v(true, false, true),
            v(true, true, true),
            v(false, true, true),
        ];
        let triangles = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        TriangleMesh {
            vertices,
            triangles,
        }
    }

    #[test]
    fn test_voxelize_unit_cube() -> Result<(), VolumeError> {
        let mesh = box_mesh(DVec3::ZERO, DVec3::ONE);
        let vol = OccupancyVolume::from_mesh(&mesh, 8)?;
        assert_eq!(vol.resolution(), [8, 8, 8]);
        assert_eq!(vol.occupied_count(), 512);
        Ok(())
    }

    #[test]
    fn test_voxelize_two_boxes() -> Result<(), VolumeError> {
        let mut mesh = box_mesh(DVec3::ZERO, DVec3::new(1.0, 1.0, 1.0));
        let other = box_mesh(DVec3::new(3.0, 0.0, 0.0), DVec3::new(4.0, 1.0, 1.0));
        let offset = mesh.vertices.len();
        mesh.vertices.extend(other.vertices);
        mesh.triangles
            .extend(other.triangles.iter().map(|t| t.map(|i| i + offset)));

        let vol = OccupancyVolume::from_mesh(&mesh, 8)?;
        assert_eq!(vol.resolution(), [8, 2, 2]);
        assert!(vol.probe(DVec3::new(0.5, 0.5, 0.5)));
        assert!(vol.probe(DVec3::new(3.5, 0.5, 0.5)));
        assert!(!vol.probe(DVec3::new(2.0, 0.5, 0.5)));
        assert_eq!(vol.occupied_count(), 16);
        Ok(())
    }

    #[test]
    fn test_invalid_meshes() {
        let empty = TriangleMesh::default();
        assert_eq!(
            OccupancyVolume::from_mesh(&empty, 8),
            Err(VolumeError::EmptyMesh)
        );

        let broken = TriangleMesh {
            vertices: vec![DVec3::ZERO, DVec3::X],
            triangles: vec![[0, 1, 2]],
        };
        assert_eq!(
            OccupancyVolume::from_mesh(&broken, 8),
            Err(VolumeError::InvalidTriangle(0))
        );
    }
}
