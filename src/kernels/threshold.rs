//! Global, Otsu and adaptive binarization of single-channel buffers.

use super::{require_gray, MAX_VALUE};
use crate::core::buffer::{Depth, PixelBuffer};
use crate::core::error::{ExecutionError, ExecutionResult};
use serde::{Deserialize, Serialize};

/// Polarity of a binarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// `v > t` becomes 255, everything else 0
    Binary,
    /// `v > t` becomes 0, everything else 255
    BinaryInverted,
}

/// How the local threshold of an adaptive binarization is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveMethod {
    /// Unweighted mean of the block
    Mean,
    /// Gaussian-weighted mean of the block
    Gaussian,
}

/// Binarize against a fixed level.
pub fn threshold(gray: &PixelBuffer, thresh: f64, kind: ThresholdType) -> ExecutionResult<PixelBuffer> {
    require_gray(gray, "threshold")?;
    let (above, below) = match kind {
        ThresholdType::Binary => (MAX_VALUE, 0),
        ThresholdType::BinaryInverted => (0, MAX_VALUE),
    };
    let data = gray
        .data()
        .iter()
        .map(|&v| if v as f64 > thresh { above } else { below })
        .collect();
    PixelBuffer::new(gray.width(), gray.height(), 1, Depth::U8, data)
}

/// Otsu's optimal global level for a single-channel buffer.
pub fn otsu_level(gray: &PixelBuffer) -> ExecutionResult<u8> {
    require_gray(gray, "otsu")?;
    Ok(imageproc::contrast::otsu_level(&gray.to_gray_image()?))
}

/// Binarize each pixel against the mean of its `block × block` neighborhood
/// minus `c`.
///
/// `block` must be odd and greater than 1.
pub fn adaptive_threshold(
    gray: &PixelBuffer,
    method: AdaptiveMethod,
    block: i64,
    c: f64,
) -> ExecutionResult<PixelBuffer> {
    if block <= 1 || block % 2 == 0 {
        return Err(ExecutionError::InvalidBlockSize(block));
    }
    require_gray(gray, "adaptive_threshold")?;

    let size = block as usize;
    let kernel = match method {
        AdaptiveMethod::Mean => vec![1.0 / size as f32; size],
        AdaptiveMethod::Gaussian => super::gaussian_kernel(size),
    };
    let local = imageproc::filter::separable_filter(&gray.to_gray_image()?, &kernel, &kernel);

    let data = gray
        .data()
        .iter()
        .zip(local.as_raw())
        .map(|(&v, &mean)| {
            if v as f64 > mean as f64 - c {
                MAX_VALUE
            } else {
                0
            }
        })
        .collect();
    PixelBuffer::new(gray.width(), gray.height(), 1, Depth::U8, data)
}
