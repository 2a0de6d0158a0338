//! Owned pixel storage and region windows over it.
//!
//! A `PixelBuffer` is exclusively owned by whichever stage currently holds
//! it. Parallel work never shares a buffer for mutation: either one task
//! owns the whole buffer, or the buffer is split into disjoint
//! `RegionViewMut` windows with one owner each.

use crate::core::error::{ExecutionError, ExecutionResult};
use crate::core::region::{is_valid_cover, Region};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Pixel element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit float
    F32,
}

impl Depth {
    /// Size of one channel element in bytes.
    pub fn bytes_per_element(&self) -> usize {
        match self {
            Depth::U8 => 1,
            Depth::U16 => 2,
            Depth::F32 => 4,
        }
    }
}

/// A width × height × channels pixel grid with owned, row-major storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    depth: Depth,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a buffer from raw storage.
    ///
    /// Fails if the dimensions are zero, the channel count is not 1, 3 or 4,
    /// or `data.len()` does not match `width * height * channels * bytes`.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        depth: Depth,
        data: Vec<u8>,
    ) -> ExecutionResult<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(ExecutionError::ChannelCount {
                operation: "buffer",
                expected: "1, 3 or 4",
                actual: channels,
            });
        }
        let expected = Self::byte_len(width, height, channels, depth);
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ExecutionError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            depth,
            data,
        })
    }

    /// Allocate a zero-filled 8-bit buffer.
    pub fn blank(width: u32, height: u32, channels: u8) -> ExecutionResult<Self> {
        let len = Self::byte_len(width, height, channels, Depth::U8);
        Self::new(width, height, channels, Depth::U8, vec![0; len])
    }

    /// Build an 8-bit buffer by evaluating `f(x, y, channel)` for every element.
    pub fn from_fn<F>(width: u32, height: u32, channels: u8, mut f: F) -> ExecutionResult<Self>
    where
        F: FnMut(u32, u32, u8) -> u8,
    {
        let mut data = Vec::with_capacity(Self::byte_len(width, height, channels, Depth::U8));
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self::new(width, height, channels, Depth::U8, data)
    }

    fn byte_len(width: u32, height: u32, channels: u8, depth: Depth) -> usize {
        width as usize * height as usize * channels as usize * depth.bytes_per_element()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Raw storage, row-major, channels interleaved.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes in one full row.
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.channels as usize * self.depth.bytes_per_element()
    }

    /// Fail unless the buffer holds 8-bit elements.
    pub fn require_u8(&self) -> ExecutionResult<()> {
        match self.depth {
            Depth::U8 => Ok(()),
            other => Err(ExecutionError::UnsupportedDepth(other)),
        }
    }

    /// Copy rows `[y, y + rows)` into a new owned buffer.
    pub fn crop_rows(&self, y: u32, rows: u32) -> ExecutionResult<Self> {
        let end = y.checked_add(rows).filter(|&end| end <= self.height);
        let Some(end) = end else {
            return Err(ExecutionError::BufferSize {
                expected: self.height as usize,
                actual: y as usize + rows as usize,
            });
        };
        let stride = self.row_stride();
        let data = self.data[y as usize * stride..end as usize * stride].to_vec();
        Self::new(self.width, rows, self.channels, self.depth, data)
    }

    /// Split the buffer into disjoint mutable windows, one per region.
    ///
    /// Regions must be full-width horizontal bands, ordered top to bottom and
    /// non-overlapping. Returns `None` otherwise.
    pub fn split_bands_mut(&mut self, regions: &[Region]) -> Option<Vec<RegionViewMut<'_>>> {
        let stride = self.row_stride();
        let mut rest: &mut [u8] = &mut self.data;
        let mut consumed_rows = 0u32;
        let mut views = Vec::with_capacity(regions.len());

        for region in regions {
            if region.x != 0 || region.width != self.width || region.y < consumed_rows {
                return None;
            }
            if region.bottom() > self.height {
                return None;
            }
            let skip = (region.y - consumed_rows) as usize * stride;
            let take = region.height as usize * stride;
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
            let (band, tail) = tail.split_at_mut(take);
            rest = tail;
            consumed_rows = region.bottom();
            views.push(RegionViewMut {
                region: *region,
                data: band,
            });
        }

        Some(views)
    }

    /// Assemble an output buffer from per-region results.
    ///
    /// Each band is written only into its own region of a freshly allocated
    /// buffer; the regions must form a valid cover of `width × height`.
    pub fn assemble(width: u32, height: u32, bands: Vec<(Region, PixelBuffer)>) -> ExecutionResult<Self> {
        let (channels, depth) = match bands.first() {
            Some((_, first)) => (first.channels, first.depth),
            None => {
                return Err(ExecutionError::BufferSize {
                    expected: width as usize * height as usize,
                    actual: 0,
                })
            }
        };
        let regions: Vec<Region> = bands.iter().map(|(region, _)| *region).collect();
        if !is_valid_cover(&regions, width, height) {
            return Err(ExecutionError::TaskFailed(
                "bands do not cover the output exactly once".to_string(),
            ));
        }

        let len = Self::byte_len(width, height, channels, depth);
        let mut output = Self::new(width, height, channels, depth, vec![0; len])?;
        let mut views = output
            .split_bands_mut(&regions)
            .ok_or_else(|| ExecutionError::TaskFailed("bands do not tile the output".to_string()))?;

        for (view, (_, band)) in views.iter_mut().zip(bands.iter()) {
            view.copy_from(band)?;
        }
        drop(views);

        Ok(output)
    }

    /// Convert from a decoded image.
    ///
    /// Luma and RGB(A) 8-bit images keep their layout; luma-alpha becomes
    /// RGBA and higher depths are reduced to 8 bits.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image {
            DynamicImage::ImageLuma8(gray) => (1, gray.into_raw()),
            DynamicImage::ImageRgb8(rgb) => (3, rgb.into_raw()),
            DynamicImage::ImageRgba8(rgba) => (4, rgba.into_raw()),
            other if other.color().channel_count() == 1 => (1, other.into_luma8().into_raw()),
            other if other.color().has_alpha() => (4, other.into_rgba8().into_raw()),
            other => (3, other.into_rgb8().into_raw()),
        };
        Self {
            width,
            height,
            channels,
            depth: Depth::U8,
            data,
        }
    }

    /// Convert into an image the codec layer can encode.
    pub fn to_dynamic(&self) -> ExecutionResult<DynamicImage> {
        self.require_u8()?;
        let data = self.data.clone();
        let image = match self.channels {
            1 => GrayImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgba8),
        };
        image.ok_or(ExecutionError::BufferSize {
            expected: self.data.len(),
            actual: self.data.len(),
        })
    }

    /// View a single-channel 8-bit buffer as an `image` gray image.
    pub fn to_gray_image(&self) -> ExecutionResult<GrayImage> {
        self.require_u8()?;
        if self.channels != 1 {
            return Err(ExecutionError::ChannelCount {
                operation: "gray image",
                expected: "1",
                actual: self.channels,
            });
        }
        GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            ExecutionError::BufferSize {
                expected: self.data.len(),
                actual: self.data.len(),
            },
        )
    }
}

/// Exclusive mutable window over one full-width band of a buffer.
///
/// Writes through this view can never leave its rectangle.
#[derive(Debug)]
pub struct RegionViewMut<'a> {
    region: Region,
    data: &'a mut [u8],
}

impl RegionViewMut<'_> {
    pub fn region(&self) -> Region {
        self.region
    }

    /// Overwrite the window with a buffer of identical band dimensions.
    pub fn copy_from(&mut self, band: &PixelBuffer) -> ExecutionResult<()> {
        if band.data().len() != self.data.len() || band.height() != self.region.height {
            return Err(ExecutionError::BufferSize {
                expected: self.data.len(),
                actual: band.data().len(),
            });
        }
        self.data.copy_from_slice(band.data());
        Ok(())
    }
}
