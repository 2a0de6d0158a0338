//! Gaussian blur by odd kernel size.

use super::as_image;
use crate::core::buffer::{Depth, PixelBuffer};
use crate::core::error::{ExecutionError, ExecutionResult};
use image::{Luma, Rgb, Rgba};

/// Blur a buffer with a square Gaussian kernel of `kernel_size` taps.
///
/// `kernel_size` must be odd and positive. Sigma is derived from the size
/// the usual way (`0.3 * ((k - 1) / 2 - 1) + 0.8`), and borders replicate the
/// edge pixels.
pub fn blur(buffer: &PixelBuffer, kernel_size: i64) -> ExecutionResult<PixelBuffer> {
    if kernel_size <= 0 || kernel_size % 2 == 0 {
        return Err(ExecutionError::InvalidKernelSize(kernel_size));
    }
    let kernel = gaussian_kernel(kernel_size as usize);

    let data = match buffer.channels() {
        1 => imageproc::filter::separable_filter(&as_image::<Luma<u8>>(buffer)?, &kernel, &kernel)
            .into_raw(),
        3 => imageproc::filter::separable_filter(&as_image::<Rgb<u8>>(buffer)?, &kernel, &kernel)
            .into_raw(),
        _ => imageproc::filter::separable_filter(&as_image::<Rgba<u8>>(buffer)?, &kernel, &kernel)
            .into_raw(),
    };

    PixelBuffer::new(
        buffer.width(),
        buffer.height(),
        buffer.channels(),
        Depth::U8,
        data,
    )
}

/// Normalized 1-D Gaussian weights for an odd `size`.
pub fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size as f64 - 1.0) / 2.0;

    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();

    weights.iter().map(|w| (w / sum) as f32).collect()
}
