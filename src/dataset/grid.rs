use serde::Serialize;

use super::DataSetError;
use crate::geom::{BBox, Point3};

/// Axis-aligned rectilinear grid in data coordinates.
///
/// Vertices are ordered with I varying slowest and K fastest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RectilinearGrid {
    axes: [Vec<f64>; 3],
}

/// Cell containing a point plus the point's local coordinates in `[0, 1]^3`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSample {
    pub cell: [usize; 3],
    pub weights: [f64; 3],
}

impl RectilinearGrid {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>, zs: Vec<f64>) -> Result<Self, DataSetError> {
        let axes = [xs, ys, zs];
        for (axis, coords) in axes.iter().enumerate() {
            if coords.len() < 2 {
                return Err(DataSetError::DegenerateAxis {
                    axis,
                    len: coords.len(),
                });
            }
            if coords.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(DataSetError::NonMonotonicAxis { axis });
            }
        }
        Ok(Self { axes })
    }

    /// Grid of `dims` vertices spread evenly over `bounds`.
    pub fn uniform(dims: [usize; 3], bounds: BBox) -> Result<Self, DataSetError> {
        let lo = bounds.min.to_array();
        let hi = bounds.max.to_array();
        let axis = |a: usize| -> Vec<f64> {
            let n = dims[a].max(1);
            let denom = (n.saturating_sub(1)).max(1) as f64;
            (0..n)
                .map(|i| lo[a] + (hi[a] - lo[a]) * i as f64 / denom)
                .collect()
        };
        Self::new(axis(0), axis(1), axis(2))
    }

    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        [self.axes[0].len(), self.axes[1].len(), self.axes[2].len()]
    }

    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.dims().iter().product()
    }

    #[must_use]
    pub fn axis(&self, axis: usize) -> &[f64] {
        &self.axes[axis]
    }

    #[must_use]
    pub fn vertex_index(&self, [i, j, k]: [usize; 3]) -> usize {
        let [_, ny, nz] = self.dims();
        (i * ny + j) * nz + k
    }

    #[must_use]
    pub fn vertex(&self, [i, j, k]: [usize; 3]) -> Point3 {
        Point3::new(self.axes[0][i], self.axes[1][j], self.axes[2][k])
    }

    #[must_use]
    pub fn bounds(&self) -> BBox {
        let first = |a: usize| self.axes[a][0];
        let last = |a: usize| self.axes[a][self.axes[a].len() - 1];
        BBox::new(
            Point3::new(first(0), first(1), first(2)),
            Point3::new(last(0), last(1), last(2)),
        )
    }

    /// Locates a data-space point. Points on the outer boundary are inside.
    #[must_use]
    pub fn locate(&self, p: Point3) -> Option<CellSample> {
        let coords = p.to_array();
        let mut cell = [0usize; 3];
        let mut weights = [0.0f64; 3];
        for a in 0..3 {
            let axis = &self.axes[a];
            let v = coords[a];
            if !v.is_finite() || v < axis[0] || v > axis[axis.len() - 1] {
                return None;
            }
            let i = axis
                .partition_point(|&x| x <= v)
                .saturating_sub(1)
                .min(axis.len() - 2);
            cell[a] = i;
            weights[a] = ((v - axis[i]) / (axis[i + 1] - axis[i])).clamp(0.0, 1.0);
        }
        Some(CellSample { cell, weights })
    }

    /// Indices and trilinear weights of the eight corners of a sampled cell.
    #[must_use]
    pub fn corner_weights(&self, sample: &CellSample) -> [(usize, f64); 8] {
        let [ci, cj, ck] = sample.cell;
        let [u, v, w] = sample.weights;
        let mut out = [(0usize, 0.0f64); 8];
        for (n, slot) in out.iter_mut().enumerate() {
            let (di, dj, dk) = ((n >> 2) & 1, (n >> 1) & 1, n & 1);
            let wi = if di == 1 { u } else { 1.0 - u };
            let wj = if dj == 1 { v } else { 1.0 - v };
            let wk = if dk == 1 { w } else { 1.0 - w };
            *slot = (
                self.vertex_index([ci + di, cj + dj, ck + dk]),
                wi * wj * wk,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> RectilinearGrid {
        RectilinearGrid::new(vec![0.0, 1.0, 3.0], vec![0.0, 2.0], vec![-1.0, 0.0, 1.0, 2.0])
            .expect("valid grid")
    }

    #[test]
    fn vertex_order_has_k_fastest() {
        let g = grid();
        assert_eq!(g.dims(), [3, 2, 4]);
        assert_eq!(g.vertex_index([0, 0, 1]), 1);
        assert_eq!(g.vertex_index([0, 1, 0]), 4);
        assert_eq!(g.vertex_index([1, 0, 0]), 8);
        assert_eq!(g.num_vertices(), 24);
    }

    #[test]
    fn locate_returns_cell_and_local_coordinates() {
        let sample = grid().locate(Point3::new(2.0, 1.0, 2.0)).expect("inside");
        assert_eq!(sample.cell, [1, 0, 2]);
        assert_eq!(sample.weights, [0.5, 0.5, 1.0]);
    }

    #[test]
    fn locate_rejects_points_outside() {
        assert!(grid().locate(Point3::new(3.5, 1.0, 0.0)).is_none());
        assert!(grid().locate(Point3::new(f64::NAN, 1.0, 0.0)).is_none());
    }

    #[test]
    fn corner_weights_sum_to_one() {
        let g = grid();
        let sample = g.locate(Point3::new(0.25, 0.5, -0.5)).expect("inside");
        let total: f64 = g.corner_weights(&sample).iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_increasing_axis() {
        match RectilinearGrid::new(vec![0.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]) {
            Err(DataSetError::NonMonotonicAxis { axis: 0 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
