//! Intensity histogram.

use super::{require_gray, MAX_VALUE};
use crate::core::buffer::{Depth, PixelBuffer};
use crate::core::error::{ExecutionError, ExecutionResult};

/// Number of histogram buckets.
pub const BINS: usize = 256;

/// Count pixels per intensity over `[0, 256)`.
pub fn histogram(gray: &PixelBuffer) -> ExecutionResult<[u32; BINS]> {
    require_gray(gray, "histogram")?;
    let stats = imageproc::stats::histogram(&gray.to_gray_image()?);
    Ok(stats.channels[0])
}

/// Render counts as a `256 × height` bar chart, white bars on black.
///
/// Bars are scaled so the largest bucket spans the full height.
pub fn render_histogram(counts: &[u32; BINS], height: u32) -> ExecutionResult<PixelBuffer> {
    if height == 0 {
        return Err(ExecutionError::InvalidHistogramHeight(height));
    }
    let peak = counts.iter().copied().max().unwrap_or(0).max(1) as u64;
    let bars: Vec<u32> = counts
        .iter()
        .map(|&count| ((count as u64 * height as u64 + peak - 1) / peak) as u32)
        .collect();

    let mut data = vec![0u8; BINS * height as usize];
    for (x, &bar) in bars.iter().enumerate() {
        for y in (height - bar)..height {
            data[y as usize * BINS + x] = MAX_VALUE;
        }
    }
    PixelBuffer::new(BINS as u32, height, 1, Depth::U8, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_counts() {
        let buffer = PixelBuffer::new(4, 1, 1, Depth::U8, vec![0, 7, 7, 255]).unwrap();
        let counts = histogram(&buffer).unwrap();
        assert_eq!(counts[0], 1);
        assert_eq!(counts[7], 2);
        assert_eq!(counts[255], 1);
        assert_eq!(counts.iter().sum::<u32>(), 4);
    }

    #[test]
    fn test_histogram_requires_gray() {
        let color = PixelBuffer::blank(2, 2, 3).unwrap();
        assert!(histogram(&color).is_err());
    }

    #[test]
    fn test_render_scales_to_peak() {
        let mut counts = [0u32; BINS];
        counts[10] = 50;
        counts[20] = 25;
        let chart = render_histogram(&counts, 10).unwrap();
        assert_eq!(chart.width(), 256);
        assert_eq!(chart.height(), 10);

        let column = |x: usize| -> usize {
            (0..10).filter(|&y| chart.data()[y * BINS + x] == 255).count()
        };
        assert_eq!(column(10), 10);
        assert_eq!(column(20), 5);
        assert_eq!(column(0), 0);
        // Bars grow from the bottom.
        assert_eq!(chart.data()[9 * BINS + 20], 255);
        assert_eq!(chart.data()[20], 0);
    }

    #[test]
    fn test_render_empty_counts() {
        let chart = render_histogram(&[0; BINS], 4).unwrap();
        assert!(chart.data().iter().all(|&v| v == 0));
        let err = render_histogram(&[0; BINS], 0).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidHistogramHeight(0)));
        assert!(err.to_string().contains("height"));
    }
}
