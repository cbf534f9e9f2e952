//! Toroidal geometry helpers and the uniform spatial hash backing Vivarium's
//! neighbor and ray queries.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use thiserror::Error;

/// Errors emitted when constructing spatial structures.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Wrap a coordinate into `[0, extent)`.
#[must_use]
pub fn wrap(value: f32, extent: f32) -> f32 {
    if extent <= 0.0 {
        return 0.0;
    }
    let mut v = value % extent;
    if v < 0.0 {
        v += extent;
    }
    v
}

/// Shortest signed difference `to - from` on a wrapped axis of the given extent.
#[must_use]
pub fn wrap_delta(from: f32, to: f32, extent: f32) -> f32 {
    if extent <= 0.0 {
        return to - from;
    }
    let mut delta = (to - from) % extent;
    if delta > extent * 0.5 {
        delta -= extent;
    } else if delta < -extent * 0.5 {
        delta += extent;
    }
    delta
}

/// Shortest displacement vector from `a` to `b` on the torus.
#[must_use]
pub fn torus_delta(a: (f32, f32), b: (f32, f32), width: f32, height: f32) -> (f32, f32) {
    (wrap_delta(a.0, b.0, width), wrap_delta(a.1, b.1, height))
}

/// Squared torus distance between two points.
#[must_use]
pub fn torus_distance_sq(a: (f32, f32), b: (f32, f32), width: f32, height: f32) -> f32 {
    let (dx, dy) = torus_delta(a, b, width, height);
    dx * dx + dy * dy
}

/// Whether two circles overlap under torus distance.
#[must_use]
pub fn circles_overlap(
    a: (f32, f32),
    radius_a: f32,
    b: (f32, f32),
    radius_b: f32,
    width: f32,
    height: f32,
) -> bool {
    let reach = radius_a + radius_b;
    torus_distance_sq(a, b, width, height) <= reach * reach
}

/// Earliest intersection parameter `t` in `[0, 1]` of the segment
/// `start -> end` against a circle, with the circle center taken through the
/// torus-shortest displacement from `start`. Returns `None` on a miss.
#[must_use]
pub fn ray_circle_hit(
    start: (f32, f32),
    end: (f32, f32),
    center: (f32, f32),
    radius: f32,
    width: f32,
    height: f32,
) -> Option<f32> {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let (cx, cy) = torus_delta(start, center, width, height);

    let a = dx * dx + dy * dy;
    if a <= f32::EPSILON {
        // Degenerate segment: a hit iff the start point lies inside the circle.
        return (cx * cx + cy * cy <= radius * radius).then_some(0.0);
    }
    let b = -2.0 * (dx * cx + dy * cy);
    let c = cx * cx + cy * cy - radius * radius;
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let t0 = (-b - sqrt_d) / (2.0 * a);
    let t1 = (-b + sqrt_d) / (2.0 * a);
    if (0.0..=1.0).contains(&t0) {
        Some(t0)
    } else if (0.0..=1.0).contains(&t1) {
        // Segment starts inside the circle.
        Some(0.0)
    } else {
        None
    }
}

/// Uniform grid over a toroidal world, bucketing entity keys by position.
///
/// Queries return candidates only; callers must re-check exact geometry.
/// Bucket contents are scanned in insertion order and cells in a fixed
/// row-major order, so query results are deterministic for a fixed insertion
/// sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialHash<K> {
    cell_size: f32,
    cols: usize,
    rows: usize,
    width: f32,
    height: f32,
    #[serde(skip)]
    buckets: Vec<Vec<K>>,
}

impl<K: Copy + Eq + Hash> SpatialHash<K> {
    /// Create a grid covering `width x height` with the given cell size.
    pub fn new(cell_size: f32, width: f32, height: f32) -> Result<Self, IndexError> {
        if cell_size <= 0.0 {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if width <= 0.0 || height <= 0.0 {
            return Err(IndexError::InvalidConfig("world extents must be positive"));
        }
        let cols = (width / cell_size).ceil().max(1.0) as usize;
        let rows = (height / cell_size).ceil().max(1.0) as usize;
        Ok(Self {
            cell_size,
            cols,
            rows,
            width,
            height,
            buckets: vec![Vec::new(); cols * rows],
        })
    }

    /// Number of grid columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of grid rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Remove all entries while retaining bucket capacity.
    pub fn clear(&mut self) {
        if self.buckets.len() != self.cols * self.rows {
            self.buckets = vec![Vec::new(); self.cols * self.rows];
            return;
        }
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    #[inline]
    fn cell_of(&self, x: f32, y: f32) -> usize {
        let col = ((wrap(x, self.width) / self.cell_size) as usize).min(self.cols - 1);
        let row = ((wrap(y, self.height) / self.cell_size) as usize).min(self.rows - 1);
        row * self.cols + col
    }

    /// Insert a key at the given position.
    pub fn insert(&mut self, key: K, x: f32, y: f32) {
        if self.buckets.len() != self.cols * self.rows {
            self.buckets = vec![Vec::new(); self.cols * self.rows];
        }
        let cell = self.cell_of(x, y);
        self.buckets[cell].push(key);
    }

    /// All keys in the wrapped cell block covering a circle of `radius`
    /// around `(x, y)`. Over-returns; never misses an in-radius entry.
    #[must_use]
    pub fn query_radius(&self, x: f32, y: f32, radius: f32) -> Vec<K> {
        if self.buckets.is_empty() {
            return Vec::new();
        }
        let reach = (radius.max(0.0) / self.cell_size).ceil() as isize;
        let span = reach * 2 + 1;
        if span >= self.cols as isize || span >= self.rows as isize {
            // Block would lap the grid; a single full scan covers everything.
            return self.buckets.iter().flatten().copied().collect();
        }
        let center_col = ((wrap(x, self.width) / self.cell_size) as isize)
            .min(self.cols as isize - 1);
        let center_row = ((wrap(y, self.height) / self.cell_size) as isize)
            .min(self.rows as isize - 1);
        let mut out = Vec::new();
        for dr in -reach..=reach {
            let row = (center_row + dr).rem_euclid(self.rows as isize) as usize;
            for dc in -reach..=reach {
                let col = (center_col + dc).rem_euclid(self.cols as isize) as usize;
                out.extend_from_slice(&self.buckets[row * self.cols + col]);
            }
        }
        out
    }

    /// All keys in cells covered by the margin-expanded bounding box of the
    /// segment `start -> end`, deduplicated, in cell-scan order.
    ///
    /// The box is computed from the raw endpoint coordinates and the covered
    /// cell range is wrapped per axis; a segment whose box straddles the wrap
    /// seam is not special-cased.
    #[must_use]
    pub fn query_ray(&self, start: (f32, f32), end: (f32, f32), margin: f32) -> Vec<K> {
        if self.buckets.is_empty() {
            return Vec::new();
        }
        let min_x = start.0.min(end.0) - margin;
        let max_x = start.0.max(end.0) + margin;
        let min_y = start.1.min(end.1) - margin;
        let max_y = start.1.max(end.1) + margin;

        let col_lo = (min_x / self.cell_size).floor() as isize;
        let col_hi = (max_x / self.cell_size).floor() as isize;
        let row_lo = (min_y / self.cell_size).floor() as isize;
        let row_hi = (max_y / self.cell_size).floor() as isize;

        let mut seen_cells = HashSet::new();
        let mut seen_keys = HashSet::new();
        let mut out = Vec::new();
        for raw_row in row_lo..=row_hi {
            let row = raw_row.rem_euclid(self.rows as isize) as usize;
            for raw_col in col_lo..=col_hi {
                let col = raw_col.rem_euclid(self.cols as isize) as usize;
                let cell = row * self.cols + col;
                if !seen_cells.insert(cell) {
                    continue;
                }
                for &key in &self.buckets[cell] {
                    if seen_keys.insert(key) {
                        out.push(key);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_maps_into_extent() {
        assert_eq!(wrap(5.0, 10.0), 5.0);
        assert_eq!(wrap(15.0, 10.0), 5.0);
        assert_eq!(wrap(-1.0, 10.0), 9.0);
        assert_eq!(wrap(-11.0, 10.0), 9.0);
        assert_eq!(wrap(10.0, 10.0), 0.0);
    }

    #[test]
    fn wrap_delta_takes_the_short_way() {
        assert_eq!(wrap_delta(1.0, 9.0, 10.0), -2.0);
        assert_eq!(wrap_delta(9.0, 1.0, 10.0), 2.0);
        assert_eq!(wrap_delta(2.0, 4.0, 10.0), 2.0);
        assert_eq!(wrap_delta(4.0, 2.0, 10.0), -2.0);
    }

    #[test]
    fn torus_distance_crosses_the_seam() {
        let d = torus_distance_sq((0.5, 0.5), (99.5, 99.5), 100.0, 100.0);
        assert!((d - 2.0).abs() < 1e-4);
    }

    #[test]
    fn overlap_respects_wrapping() {
        assert!(circles_overlap(
            (1.0, 50.0),
            1.0,
            (99.0, 50.0),
            1.5,
            100.0,
            100.0
        ));
        assert!(!circles_overlap(
            (1.0, 50.0),
            0.5,
            (95.0, 50.0),
            0.5,
            100.0,
            100.0
        ));
    }

    #[test]
    fn ray_hits_circle_ahead() {
        let t = ray_circle_hit((0.0, 0.0), (10.0, 0.0), (5.0, 0.0), 1.0, 100.0, 100.0)
            .expect("hit");
        assert!((t - 0.4).abs() < 1e-4);
    }

    #[test]
    fn ray_hits_circle_across_seam() {
        let t = ray_circle_hit((98.0, 0.0), (108.0, 0.0), (3.0, 0.0), 1.0, 100.0, 100.0)
            .expect("hit");
        assert!((t - 0.4).abs() < 1e-4);
    }

    #[test]
    fn ray_misses_offset_circle() {
        assert!(ray_circle_hit((0.0, 0.0), (10.0, 0.0), (5.0, 3.0), 1.0, 100.0, 100.0).is_none());
    }

    #[test]
    fn ray_starting_inside_reports_zero() {
        let t = ray_circle_hit((5.0, 0.0), (10.0, 0.0), (5.0, 0.0), 1.0, 100.0, 100.0)
            .expect("hit");
        assert_eq!(t, 0.0);
    }

    #[test]
    fn radius_query_returns_nearby_keys() {
        let mut hash: SpatialHash<u32> = SpatialHash::new(10.0, 100.0, 100.0).expect("hash");
        hash.insert(1, 5.0, 5.0);
        hash.insert(2, 50.0, 50.0);
        let hits = hash.query_radius(6.0, 6.0, 5.0);
        assert!(hits.contains(&1));
        assert!(!hits.contains(&2));
    }

    #[test]
    fn radius_query_wraps_all_four_edges() {
        let mut hash: SpatialHash<u32> = SpatialHash::new(10.0, 100.0, 100.0).expect("hash");
        hash.insert(10, 99.0, 50.0); // left neighbor across the seam
        hash.insert(11, 1.0, 50.0); // right neighbor
        hash.insert(12, 50.0, 99.0); // top neighbor
        hash.insert(13, 50.0, 1.0); // bottom neighbor
        hash.insert(14, 99.0, 99.0); // corner neighbor

        assert!(hash.query_radius(2.0, 50.0, 6.0).contains(&10));
        assert!(hash.query_radius(98.0, 50.0, 6.0).contains(&11));
        assert!(hash.query_radius(50.0, 2.0, 6.0).contains(&12));
        assert!(hash.query_radius(50.0, 98.0, 6.0).contains(&13));
        assert!(hash.query_radius(1.0, 1.0, 6.0).contains(&14));
    }

    #[test]
    fn radius_query_never_misses_true_hits() {
        // Deterministic xorshift point cloud, brute-force cross-check.
        let mut state = 0x1234_5678_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 8) as f32 / 16_777_216.0
        };
        let points: Vec<(f32, f32)> = (0..200).map(|_| (next() * 80.0, next() * 60.0)).collect();

        let mut hash: SpatialHash<usize> = SpatialHash::new(7.0, 80.0, 60.0).expect("hash");
        for (idx, &(x, y)) in points.iter().enumerate() {
            hash.insert(idx, x, y);
        }

        let center = (2.0, 58.0);
        let radius = 12.0;
        let candidates = hash.query_radius(center.0, center.1, radius);
        for (idx, &p) in points.iter().enumerate() {
            if torus_distance_sq(center, p, 80.0, 60.0) <= radius * radius {
                assert!(candidates.contains(&idx), "missed in-radius point {idx}");
            }
        }
    }

    #[test]
    fn oversized_radius_scans_everything_once() {
        let mut hash: SpatialHash<u32> = SpatialHash::new(10.0, 40.0, 40.0).expect("hash");
        for k in 0..8 {
            hash.insert(k, k as f32 * 5.0, k as f32 * 5.0);
        }
        let hits = hash.query_radius(0.0, 0.0, 1_000.0);
        assert_eq!(hits.len(), 8);
    }

    #[test]
    fn ray_query_covers_segment_cells_and_dedups() {
        let mut hash: SpatialHash<u32> = SpatialHash::new(10.0, 100.0, 100.0).expect("hash");
        hash.insert(1, 15.0, 15.0);
        hash.insert(2, 45.0, 15.0);
        hash.insert(3, 80.0, 80.0);
        let hits = hash.query_ray((10.0, 12.0), (50.0, 18.0), 2.0);
        assert!(hits.contains(&1));
        assert!(hits.contains(&2));
        assert!(!hits.contains(&3));
        let unique: HashSet<u32> = hits.iter().copied().collect();
        assert_eq!(unique.len(), hits.len());
    }

    #[test]
    fn clear_empties_all_buckets() {
        let mut hash: SpatialHash<u32> = SpatialHash::new(10.0, 50.0, 50.0).expect("hash");
        hash.insert(1, 5.0, 5.0);
        hash.insert(2, 45.0, 45.0);
        hash.clear();
        assert!(hash.query_radius(5.0, 5.0, 50.0).is_empty());
    }

    #[test]
    fn invalid_cell_size_is_rejected() {
        assert!(SpatialHash::<u32>::new(0.0, 10.0, 10.0).is_err());
        assert!(SpatialHash::<u32>::new(5.0, 0.0, 10.0).is_err());
    }
}
