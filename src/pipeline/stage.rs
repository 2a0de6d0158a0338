//! Pipeline stages.
//!
//! A `Stage` is a tagged variant carrying already-validated parameters.
//! Construction goes through the checked constructors (or the registry).
//! Deserialized stages are rebuilt through the same constructors, and
//! `prepare` re-checks a stage before running it, so out-of-range
//! parameters never reach a kernel.
//!
//! Applying a stage happens in two steps:
//! 1. `prepare` runs the whole-buffer prelude (auto-grayscale, Otsu level,
//!    color-space conversion) exactly once
//! 2. the resulting `BandKernel` runs either on the whole prepared buffer
//!    or independently on horizontal bands of it

use crate::core::buffer::PixelBuffer;
use crate::core::error::{ExecutionError, ExecutionResult, PipelineError, PipelineResult};
use crate::kernels::{self, AdaptiveMethod, ColorConversion, ThresholdType};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Default height of a rendered histogram chart.
pub const DEFAULT_HISTOGRAM_HEIGHT: u32 = 100;

/// Tallest histogram chart a stage may render.
pub const MAX_HISTOGRAM_HEIGHT: u32 = 4096;

/// A loosely typed stage parameter as it arrives from text or config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Parse a textual parameter: integer first, then float, else text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            ParamValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            ParamValue::Float(f)
        } else {
            ParamValue::Text(raw.to_string())
        }
    }

    /// Numeric value. Integers widen to float; text never coerces.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    /// Integer value. Floats are rejected rather than truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Color space a channel is isolated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSpace {
    Rgb,
    Hsv,
}

impl ChannelSpace {
    /// Parse a space name. Grayscale and gray-to-color are recognized so they
    /// can be rejected with a clear message.
    pub fn parse(name: &str) -> PipelineResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rgb" => Ok(ChannelSpace::Rgb),
            "hsv" => Ok(ChannelSpace::Hsv),
            "grayscale" | "gray" | "reverse" | "gray_to_color" => Err(PipelineError::invalid(
                "isolate_channel",
                format!("'{}' is not a color space with isolatable channels", name),
            )),
            other => Err(PipelineError::invalid(
                "isolate_channel",
                format!("unknown color space '{}'", other),
            )),
        }
    }
}

/// Binarization method with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ThresholdMethod {
    Otsu,
    Global { thresh: f64 },
    GlobalInverted { thresh: f64 },
    AdaptiveMean { block: i64, c: f64 },
    AdaptiveGaussian { block: i64, c: f64 },
}

impl ThresholdMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ThresholdMethod::Otsu => "otsu",
            ThresholdMethod::Global { .. } => "threshold",
            ThresholdMethod::GlobalInverted { .. } => "threshold_inv",
            ThresholdMethod::AdaptiveMean { .. } => "adaptive_mean",
            ThresholdMethod::AdaptiveGaussian { .. } => "adaptive_gaussian",
        }
    }

    fn validate(&self) -> PipelineResult<()> {
        match *self {
            ThresholdMethod::Otsu => Ok(()),
            ThresholdMethod::Global { thresh } | ThresholdMethod::GlobalInverted { thresh } => {
                if thresh.is_finite() {
                    Ok(())
                } else {
                    Err(PipelineError::invalid(self.name(), "threshold must be finite"))
                }
            }
            ThresholdMethod::AdaptiveMean { block, c }
            | ThresholdMethod::AdaptiveGaussian { block, c } => {
                if block <= 1 || block % 2 == 0 {
                    return Err(PipelineError::invalid(
                        self.name(),
                        format!("block size must be odd and greater than 1, got {}", block),
                    ));
                }
                if !c.is_finite() {
                    return Err(PipelineError::invalid(self.name(), "constant must be finite"));
                }
                Ok(())
            }
        }
    }
}

/// One validated transform of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case", try_from = "StageRepr")]
pub enum Stage {
    ConvertColor { conversion: ColorConversion },
    Blur { kernel_size: i64 },
    Threshold { method: ThresholdMethod },
    IsolateChannel { space: ChannelSpace, channel: u8 },
    Histogram { height: u32 },
}

/// Wire shape of a `Stage` before its parameters are checked.
#[derive(Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
enum StageRepr {
    ConvertColor { conversion: ColorConversion },
    Blur { kernel_size: i64 },
    Threshold { method: ThresholdMethod },
    IsolateChannel { space: ChannelSpace, channel: i64 },
    Histogram { height: i64 },
}

impl TryFrom<StageRepr> for Stage {
    type Error = PipelineError;

    fn try_from(repr: StageRepr) -> PipelineResult<Self> {
        match repr {
            StageRepr::ConvertColor { conversion } => Ok(Stage::convert(conversion)),
            StageRepr::Blur { kernel_size } => Stage::blur(kernel_size),
            StageRepr::Threshold { method } => Stage::threshold(method),
            StageRepr::IsolateChannel { space, channel } => Stage::isolate_channel(space, channel),
            StageRepr::Histogram { height } => Stage::histogram(height),
        }
    }
}

impl Stage {
    pub fn convert(conversion: ColorConversion) -> Self {
        Stage::ConvertColor { conversion }
    }

    /// Gaussian blur; `kernel_size` must be odd and positive.
    pub fn blur(kernel_size: i64) -> PipelineResult<Self> {
        if kernel_size <= 0 || kernel_size % 2 == 0 {
            return Err(PipelineError::invalid(
                "blur",
                format!("kernel size must be odd and positive, got {}", kernel_size),
            ));
        }
        Ok(Stage::Blur { kernel_size })
    }

    pub fn threshold(method: ThresholdMethod) -> PipelineResult<Self> {
        method.validate()?;
        Ok(Stage::Threshold { method })
    }

    /// Keep one channel (1-based) of the buffer in `space`.
    pub fn isolate_channel(space: ChannelSpace, channel: i64) -> PipelineResult<Self> {
        if !(1..=3).contains(&channel) {
            return Err(PipelineError::invalid(
                "isolate_channel",
                format!("channel must be between 1 and 3, got {}", channel),
            ));
        }
        Ok(Stage::IsolateChannel {
            space,
            channel: channel as u8,
        })
    }

    pub fn histogram(height: i64) -> PipelineResult<Self> {
        if height <= 0 || height > MAX_HISTOGRAM_HEIGHT as i64 {
            return Err(PipelineError::invalid(
                "histogram",
                format!(
                    "height must be between 1 and {}, got {}",
                    MAX_HISTOGRAM_HEIGHT, height
                ),
            ));
        }
        Ok(Stage::Histogram {
            height: height as u32,
        })
    }

    /// Re-run the constructor checks on a stage that may have been built
    /// from its public fields.
    pub fn validate(&self) -> PipelineResult<()> {
        match *self {
            Stage::ConvertColor { .. } => Ok(()),
            Stage::Blur { kernel_size } => Stage::blur(kernel_size).map(drop),
            Stage::Threshold { method } => method.validate(),
            Stage::IsolateChannel { space, channel } => {
                Stage::isolate_channel(space, channel as i64).map(drop)
            }
            Stage::Histogram { height } => Stage::histogram(height as i64).map(drop),
        }
    }

    /// Stage name as it appears in the registry.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ConvertColor { conversion } => match conversion {
                ColorConversion::ToGrayscale => "grayscale",
                ColorConversion::ToHsv => "hsv",
                ColorConversion::ToRgb => "rgb",
                ColorConversion::GrayscaleToColor => "gray_to_color",
            },
            Stage::Blur { .. } => "blur",
            Stage::Threshold { method } => method.name(),
            Stage::IsolateChannel { .. } => "isolate_channel",
            Stage::Histogram { .. } => "histogram",
        }
    }

    /// Run the whole-buffer prelude and return the band-local remainder.
    pub fn prepare<'a>(&self, buffer: &'a PixelBuffer) -> ExecutionResult<Prepared<'a>> {
        self.validate()?;
        let (input, kernel) = match *self {
            Stage::ConvertColor { conversion } => {
                (Cow::Borrowed(buffer), BandKernel::Convert(conversion))
            }
            Stage::Blur { kernel_size } => (Cow::Borrowed(buffer), BandKernel::Blur(kernel_size)),
            Stage::Threshold { method } => {
                let gray = to_gray(buffer)?;
                let kernel = match method {
                    ThresholdMethod::Otsu => BandKernel::Binarize {
                        thresh: kernels::otsu_level(&gray)? as f64,
                        kind: ThresholdType::Binary,
                    },
                    ThresholdMethod::Global { thresh } => BandKernel::Binarize {
                        thresh,
                        kind: ThresholdType::Binary,
                    },
                    ThresholdMethod::GlobalInverted { thresh } => BandKernel::Binarize {
                        thresh,
                        kind: ThresholdType::BinaryInverted,
                    },
                    ThresholdMethod::AdaptiveMean { block, c } => BandKernel::Adaptive {
                        method: AdaptiveMethod::Mean,
                        block,
                        c,
                    },
                    ThresholdMethod::AdaptiveGaussian { block, c } => BandKernel::Adaptive {
                        method: AdaptiveMethod::Gaussian,
                        block,
                        c,
                    },
                };
                (gray, kernel)
            }
            Stage::IsolateChannel { space, channel } => {
                let input = match space {
                    ChannelSpace::Rgb => Cow::Borrowed(buffer),
                    ChannelSpace::Hsv => {
                        Cow::Owned(kernels::convert_color(buffer, ColorConversion::ToHsv)?)
                    }
                };
                (input, BandKernel::Select(usize::from(channel.saturating_sub(1))))
            }
            Stage::Histogram { height } => (to_gray(buffer)?, BandKernel::Histogram { height }),
        };
        Ok(Prepared { input, kernel })
    }

    /// Apply the stage to a whole buffer.
    pub fn apply(&self, buffer: &PixelBuffer) -> ExecutionResult<PixelBuffer> {
        let prepared = self.prepare(buffer)?;
        prepared.kernel.apply(&prepared.input)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Blur { kernel_size } => write!(f, "blur:{}", kernel_size),
            Stage::Threshold { method } => match method {
                ThresholdMethod::Otsu => write!(f, "otsu"),
                ThresholdMethod::Global { thresh } | ThresholdMethod::GlobalInverted { thresh } => {
                    write!(f, "{}:{}", method.name(), thresh)
                }
                ThresholdMethod::AdaptiveMean { block, c }
                | ThresholdMethod::AdaptiveGaussian { block, c } => {
                    write!(f, "{}:{}:{}", method.name(), block, c)
                }
            },
            Stage::IsolateChannel { space, channel } => {
                let space = match space {
                    ChannelSpace::Rgb => "rgb",
                    ChannelSpace::Hsv => "hsv",
                };
                write!(f, "isolate_channel:{}:{}", space, channel)
            }
            Stage::Histogram { height } => write!(f, "histogram:{}", height),
            Stage::ConvertColor { .. } => write!(f, "{}", self.name()),
        }
    }
}

fn to_gray(buffer: &PixelBuffer) -> ExecutionResult<Cow<'_, PixelBuffer>> {
    if buffer.channels() == 1 {
        Ok(Cow::Borrowed(buffer))
    } else {
        Ok(Cow::Owned(kernels::convert_color(
            buffer,
            ColorConversion::ToGrayscale,
        )?))
    }
}

/// A stage after its whole-buffer prelude has run.
#[derive(Debug)]
pub struct Prepared<'a> {
    /// Buffer the band kernel reads from
    pub input: Cow<'a, PixelBuffer>,
    pub kernel: BandKernel,
}

/// The part of a stage that can run on a horizontal band in isolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandKernel {
    Convert(ColorConversion),
    Blur(i64),
    Binarize { thresh: f64, kind: ThresholdType },
    Adaptive {
        method: AdaptiveMethod,
        block: i64,
        c: f64,
    },
    /// Zero-based channel index
    Select(usize),
    Histogram { height: u32 },
}

impl BandKernel {
    /// Rows of context needed above and below a band, or `None` if the kernel
    /// needs the whole buffer at once.
    pub fn halo(&self) -> Option<u32> {
        match *self {
            BandKernel::Convert(_) | BandKernel::Binarize { .. } | BandKernel::Select(_) => Some(0),
            BandKernel::Blur(k) => Some((k / 2) as u32),
            BandKernel::Adaptive { block, .. } => Some((block / 2) as u32),
            BandKernel::Histogram { .. } => None,
        }
    }

    pub fn apply(&self, buffer: &PixelBuffer) -> ExecutionResult<PixelBuffer> {
        match *self {
            BandKernel::Convert(conversion) => kernels::convert_color(buffer, conversion),
            BandKernel::Blur(k) => kernels::blur(buffer, k),
            BandKernel::Binarize { thresh, kind } => kernels::threshold(buffer, thresh, kind),
            BandKernel::Adaptive { method, block, c } => {
                kernels::adaptive_threshold(buffer, method, block, c)
            }
            BandKernel::Select(index) => {
                let planes = kernels::split_channels(buffer)?;
                let available = planes.len();
                planes
                    .into_iter()
                    .nth(index)
                    .ok_or(ExecutionError::ChannelCount {
                        operation: "isolate_channel",
                        expected: "at least the selected",
                        actual: available as u8,
                    })
            }
            BandKernel::Histogram { height } => {
                let counts = kernels::histogram(buffer)?;
                kernels::render_histogram(&counts, height)
            }
        }
    }
}
