//! Color-space conversion and channel splitting.
//!
//! Color buffers are stored in RGB(A) order.

use super::as_image;
use crate::core::buffer::{Depth, PixelBuffer};
use crate::core::error::{ExecutionError, ExecutionResult};
use image::{Rgb, Rgba};
use serde::{Deserialize, Serialize};

/// Supported color conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorConversion {
    /// RGB to 8-bit HSV (hue halved into 0..180, saturation and value 0..255)
    ToHsv,
    /// Swap the red and blue channels (BGR <-> RGB reorder)
    ToRgb,
    /// Luminance; single-channel input passes through unchanged
    ToGrayscale,
    /// Replicate a single channel into three
    GrayscaleToColor,
}

/// Convert `buffer` to another color space.
pub fn convert_color(buffer: &PixelBuffer, conversion: ColorConversion) -> ExecutionResult<PixelBuffer> {
    buffer.require_u8()?;
    match conversion {
        ColorConversion::ToGrayscale => to_grayscale(buffer),
        ColorConversion::ToHsv => {
            require_color(buffer, "to_hsv")?;
            map_pixels(buffer, 3, |px, out| out.copy_from_slice(&rgb_to_hsv(px[0], px[1], px[2])))
        }
        ColorConversion::ToRgb => {
            require_color(buffer, "to_rgb")?;
            map_pixels(buffer, buffer.channels(), |px, out| {
                out.copy_from_slice(px);
                out.swap(0, 2);
            })
        }
        ColorConversion::GrayscaleToColor => {
            if buffer.channels() != 1 {
                return Err(ExecutionError::ChannelCount {
                    operation: "grayscale_to_color",
                    expected: "1",
                    actual: buffer.channels(),
                });
            }
            map_pixels(buffer, 3, |px, out| out.fill(px[0]))
        }
    }
}

/// Split a color buffer into one single-channel buffer per channel.
pub fn split_channels(buffer: &PixelBuffer) -> ExecutionResult<Vec<PixelBuffer>> {
    buffer.require_u8()?;
    require_color(buffer, "split_channels")?;

    let channels = buffer.channels() as usize;
    (0..channels)
        .map(|c| {
            let data = buffer
                .data()
                .chunks_exact(channels)
                .map(|px| px[c])
                .collect();
            PixelBuffer::new(buffer.width(), buffer.height(), 1, Depth::U8, data)
        })
        .collect()
}

fn to_grayscale(buffer: &PixelBuffer) -> ExecutionResult<PixelBuffer> {
    let gray = match buffer.channels() {
        1 => return Ok(buffer.clone()),
        3 => image::imageops::grayscale(&as_image::<Rgb<u8>>(buffer)?),
        _ => image::imageops::grayscale(&as_image::<Rgba<u8>>(buffer)?),
    };
    PixelBuffer::new(buffer.width(), buffer.height(), 1, Depth::U8, gray.into_raw())
}

fn require_color(buffer: &PixelBuffer, operation: &'static str) -> ExecutionResult<()> {
    if buffer.channels() < 3 {
        return Err(ExecutionError::ChannelCount {
            operation,
            expected: "at least 3",
            actual: buffer.channels(),
        });
    }
    Ok(())
}

fn map_pixels<F>(buffer: &PixelBuffer, out_channels: u8, mut f: F) -> ExecutionResult<PixelBuffer>
where
    F: FnMut(&[u8], &mut [u8]),
{
    let in_channels = buffer.channels() as usize;
    let mut data = vec![0u8; buffer.width() as usize * buffer.height() as usize * out_channels as usize];
    for (px, out) in buffer
        .data()
        .chunks_exact(in_channels)
        .zip(data.chunks_exact_mut(out_channels as usize))
    {
        f(px, out);
    }
    PixelBuffer::new(buffer.width(), buffer.height(), out_channels, Depth::U8, data)
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [(h / 2.0).round() as u8 % 180, s.round() as u8, max as u8]
}
