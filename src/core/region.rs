//! Rectangular regions and the horizontal-band partitioner.
//!
//! Region-parallel execution splits a buffer into horizontal bands:
//! - Band height is `floor(height / n)`
//! - The last band absorbs the remainder, so every row is covered once
//! - Buffers with fewer rows than `n` get one single-row band per row
//!
//! Spatial kernels read `halo` extra rows around each band; the core rows of
//! every band still tile the buffer with no gaps and no overlaps.

use crate::core::buffer::PixelBuffer;
use serde::{Deserialize, Serialize};

/// Represents a rectangular region within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// X offset from the image origin
    pub x: u32,
    /// Y offset from the image origin
    pub y: u32,
    /// Width of the region
    pub width: u32,
    /// Height of the region
    pub height: u32,
}

impl Region {
    /// Create a new region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the right edge coordinate (exclusive).
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Get the bottom edge coordinate (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Calculate the area of this region in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check if this region is entirely within the given bounds.
    pub fn is_within_bounds(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Check whether two regions share at least one pixel.
    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Grow the region by `halo` rows above and below, clamped to
    /// `image_height`.
    pub fn expand_rows(&self, halo: u32, image_height: u32) -> Self {
        let top = self.y.saturating_sub(halo);
        let bottom = self.bottom().saturating_add(halo).min(image_height);
        Self {
            x: self.x,
            y: top,
            width: self.width,
            height: bottom - top,
        }
    }
}

/// Partition a buffer into at most `n` horizontal bands.
pub fn partition(buffer: &PixelBuffer, n: usize) -> Vec<Region> {
    partition_rows(buffer.width(), buffer.height(), n)
}

/// Partition a `width × height` grid into at most `n` horizontal bands.
///
/// `n == 0` is treated as 1. When `height < n` the result has `height`
/// single-row bands; a zero-height band is never produced.
pub fn partition_rows(width: u32, height: u32, n: usize) -> Vec<Region> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let n = (n.max(1) as u64).min(height as u64) as u32;
    let band = height / n;

    (0..n)
        .map(|i| {
            let y = i * band;
            let rows = if i == n - 1 { height - (n - 1) * band } else { band };
            Region::new(0, y, width, rows)
        })
        .collect()
}

/// Check that `regions` are pairwise disjoint, inside the grid, non-empty,
/// and together cover every pixel of `width × height`.
pub fn is_valid_cover(regions: &[Region], width: u32, height: u32) -> bool {
    let in_bounds = regions
        .iter()
        .all(|r| r.area() > 0 && r.is_within_bounds(width, height));
    if !in_bounds {
        return false;
    }

    let disjoint = regions.iter().enumerate().all(|(i, a)| {
        regions[i + 1..].iter().all(|b| !a.intersects(b))
    });

    // Disjoint and in bounds, so equal area means exact cover.
    let covered: u64 = regions.iter().map(Region::area).sum();
    disjoint && covered == width as u64 * height as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_region() {
        let region = Region::new(10, 20, 100, 200);
        assert_eq!(region.right(), 110);
        assert_eq!(region.bottom(), 220);
        assert_eq!(region.area(), 20000);
    }

    #[test]
    fn test_region_expand_rows() {
        let region = Region::new(0, 50, 100, 100);
        let expanded = region.expand_rows(10, 200);
        assert_eq!(expanded, Region::new(0, 40, 100, 120));
    }

    #[test]
    fn test_region_expand_rows_at_boundary() {
        let region = Region::new(0, 0, 100, 100);
        let expanded = region.expand_rows(10, 105);
        assert_eq!(expanded, Region::new(0, 0, 100, 105));
    }

    #[test]
    fn test_partition_even() {
        let bands = partition_rows(8, 12, 4);
        assert_eq!(bands.len(), 4);
        assert!(bands.iter().all(|b| b.height == 3));
        assert_eq!(bands[3].y, 9);
    }

    #[test]
    fn test_partition_last_band_absorbs_remainder() {
        let bands = partition_rows(8, 10, 4);
        let heights: Vec<u32> = bands.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![2, 2, 2, 4]);
    }

    #[test]
    fn test_partition_fewer_rows_than_bands() {
        let bands = partition_rows(5, 3, 8);
        assert_eq!(bands.len(), 3);
        assert!(bands.iter().all(|b| b.height == 1));
        assert!(is_valid_cover(&bands, 5, 3));
    }

    #[test]
    fn test_partition_zero_parts_is_one_band() {
        assert_eq!(partition_rows(4, 4, 0), vec![Region::new(0, 0, 4, 4)]);
    }

    #[test]
    fn test_partition_buffer() {
        let buffer = PixelBuffer::blank(6, 7, 3).unwrap();
        let bands = partition(&buffer, 2);
        assert_eq!(bands, vec![Region::new(0, 0, 6, 3), Region::new(0, 3, 6, 4)]);
    }

    #[test]
    fn test_invalid_covers() {
        let gap = [Region::new(0, 0, 4, 1), Region::new(0, 2, 4, 2)];
        assert!(!is_valid_cover(&gap, 4, 4));

        let overlap = [Region::new(0, 0, 4, 3), Region::new(0, 2, 4, 2)];
        assert!(!is_valid_cover(&overlap, 4, 4));

        let outside = [Region::new(0, 0, 4, 5)];
        assert!(!is_valid_cover(&outside, 4, 4));
    }

    proptest! {
        #[test]
        fn prop_bands_are_ordered_disjoint_and_cover(
            width in 1u32..64,
            height in 1u32..500,
            n in 1usize..40,
        ) {
            let bands = partition_rows(width, height, n);
            prop_assert!(is_valid_cover(&bands, width, height));
            prop_assert!(bands.len() <= n);
            prop_assert!(bands.len() as u32 <= height);

            let mut next_row = 0;
            for band in &bands {
                prop_assert_eq!(band.y, next_row);
                prop_assert!(band.height > 0);
                next_row = band.bottom();
            }
            prop_assert_eq!(next_row, height);
        }

        #[test]
        fn prop_last_band_height(height in 1u32..500, n in 1usize..40) {
            prop_assume!(n as u32 <= height);
            let bands = partition_rows(3, height, n);
            let floor = height / n as u32;
            let last = bands.last().unwrap();
            prop_assert_eq!(bands.len(), n);
            prop_assert_eq!(last.height, height - (n as u32 - 1) * floor);
        }
    }
}
