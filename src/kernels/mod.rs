//! Pixel kernels.
//!
//! Every kernel is a pure, synchronous function from one or more buffers to
//! a new buffer. Heavy lifting is delegated to `image` and `imageproc`; this
//! layer only adapts `PixelBuffer` to their typed images and validates
//! arguments.

mod blur;
mod color;
mod stats;
mod threshold;

use crate::core::buffer::PixelBuffer;
use crate::core::error::{ExecutionError, ExecutionResult};
use image::{ImageBuffer, Pixel};

pub use blur::{blur, gaussian_kernel};
pub use color::{convert_color, split_channels, ColorConversion};
pub use stats::{histogram, render_histogram, BINS};
pub use threshold::{adaptive_threshold, otsu_level, threshold, AdaptiveMethod, ThresholdType};

/// Value written for foreground pixels by the threshold kernels.
pub const MAX_VALUE: u8 = 255;

/// Reinterpret an 8-bit buffer as a typed `image` buffer.
pub(crate) fn as_image<P>(buffer: &PixelBuffer) -> ExecutionResult<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    buffer.require_u8()?;
    ImageBuffer::from_raw(buffer.width(), buffer.height(), buffer.data().to_vec()).ok_or(
        ExecutionError::BufferSize {
            expected: buffer.width() as usize
                * buffer.height() as usize
                * P::CHANNEL_COUNT as usize,
            actual: buffer.data().len(),
        },
    )
}

/// Fail unless `buffer` is single-channel.
pub(crate) fn require_gray(buffer: &PixelBuffer, operation: &'static str) -> ExecutionResult<()> {
    buffer.require_u8()?;
    if buffer.channels() != 1 {
        return Err(ExecutionError::ChannelCount {
            operation,
            expected: "1",
            actual: buffer.channels(),
        });
    }
    Ok(())
}
