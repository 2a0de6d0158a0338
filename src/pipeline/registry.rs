//! Stage registry: the single dispatch table from stage names to validated
//! constructors.

use crate::core::error::{PipelineError, PipelineResult};
use crate::kernels::ColorConversion;
use crate::pipeline::stage::{
    ChannelSpace, ParamValue, Stage, ThresholdMethod, DEFAULT_HISTOGRAM_HEIGHT,
};
use indexmap::IndexMap;

/// Constructor for a stage from raw parameters.
pub type StageBuilder = fn(&str, &[ParamValue]) -> PipelineResult<Stage>;

/// Category of a stage, used for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageCategory {
    Color,
    Filter,
    Threshold,
    Analysis,
}

impl StageCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            StageCategory::Color => "Color",
            StageCategory::Filter => "Filter",
            StageCategory::Threshold => "Threshold",
            StageCategory::Analysis => "Analysis",
        }
    }
}

/// Registry entry containing metadata and constructor.
#[derive(Clone)]
pub struct StageEntry {
    pub builder: StageBuilder,
    pub category: StageCategory,
    /// Parameter usage, e.g. `"<block:int> <c:number>"`
    pub usage: &'static str,
    pub description: &'static str,
}

impl std::fmt::Debug for StageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEntry")
            .field("category", &self.category)
            .field("usage", &self.usage)
            .field("description", &self.description)
            .finish()
    }
}

/// Registry for all available stage kinds.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: IndexMap<&'static str, StageEntry>,
}

impl StageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            stages: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in stages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register a stage kind, replacing any previous entry of the same name.
    pub fn register(&mut self, name: &'static str, entry: StageEntry) {
        self.stages.insert(name, entry);
    }

    /// Build a stage by name. Unknown names fail with `UnsupportedStage`.
    pub fn create(&self, name: &str, params: &[ParamValue]) -> PipelineResult<Stage> {
        let key = name.trim().to_ascii_lowercase();
        let entry = self
            .stages
            .get(key.as_str())
            .ok_or_else(|| PipelineError::UnsupportedStage(name.to_string()))?;
        (entry.builder)(&key, params)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&StageEntry> {
        self.stages.get(name)
    }

    /// Registered stage names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.keys().copied()
    }

    /// Names of the stages in `category`.
    pub fn by_category(&self, category: StageCategory) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|(_, entry)| entry.category == category)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn register_builtins(registry: &mut StageRegistry) {
    let color = |builder: StageBuilder, description| StageEntry {
        builder,
        category: StageCategory::Color,
        usage: "",
        description,
    };
    registry.register(
        "grayscale",
        color(
            |name, params| {
                arity(name, params, 0)?;
                Ok(Stage::convert(ColorConversion::ToGrayscale))
            },
            "Convert to single-channel luminance",
        ),
    );
    registry.register(
        "hsv",
        color(
            |name, params| {
                arity(name, params, 0)?;
                Ok(Stage::convert(ColorConversion::ToHsv))
            },
            "Convert RGB to 8-bit HSV",
        ),
    );
    registry.register(
        "rgb",
        color(
            |name, params| {
                arity(name, params, 0)?;
                Ok(Stage::convert(ColorConversion::ToRgb))
            },
            "Swap red and blue channel order",
        ),
    );
    registry.register(
        "gray_to_color",
        color(
            |name, params| {
                arity(name, params, 0)?;
                Ok(Stage::convert(ColorConversion::GrayscaleToColor))
            },
            "Replicate a single channel into three",
        ),
    );

    registry.register(
        "blur",
        StageEntry {
            builder: |name, params| {
                arity(name, params, 1)?;
                Stage::blur(int_param(name, params, 0, "kernel size")?)
            },
            category: StageCategory::Filter,
            usage: "<kernel_size:odd int>",
            description: "Gaussian blur",
        },
    );

    // Threshold family: all methods resolve through this one table.
    let threshold = |builder: StageBuilder, usage, description| StageEntry {
        builder,
        category: StageCategory::Threshold,
        usage,
        description,
    };
    registry.register(
        "otsu",
        threshold(
            |name, params| {
                arity(name, params, 0)?;
                Stage::threshold(ThresholdMethod::Otsu)
            },
            "",
            "Binarize at Otsu's global level",
        ),
    );
    registry.register(
        "threshold",
        threshold(
            |name, params| {
                arity(name, params, 1)?;
                let thresh = num_param(name, params, 0, "threshold")?;
                Stage::threshold(ThresholdMethod::Global { thresh })
            },
            "<threshold:number>",
            "Binarize at a fixed level",
        ),
    );
    registry.register(
        "threshold_inv",
        threshold(
            |name, params| {
                arity(name, params, 1)?;
                let thresh = num_param(name, params, 0, "threshold")?;
                Stage::threshold(ThresholdMethod::GlobalInverted { thresh })
            },
            "<threshold:number>",
            "Binarize at a fixed level, inverted",
        ),
    );
    registry.register(
        "adaptive_mean",
        threshold(
            |name, params| {
                arity(name, params, 2)?;
                let block = int_param(name, params, 0, "block size")?;
                let c = num_param(name, params, 1, "constant")?;
                Stage::threshold(ThresholdMethod::AdaptiveMean { block, c })
            },
            "<block:odd int> <c:number>",
            "Binarize against the local mean",
        ),
    );
    registry.register(
        "adaptive_gaussian",
        threshold(
            |name, params| {
                arity(name, params, 2)?;
                let block = int_param(name, params, 0, "block size")?;
                let c = num_param(name, params, 1, "constant")?;
                Stage::threshold(ThresholdMethod::AdaptiveGaussian { block, c })
            },
            "<block:odd int> <c:number>",
            "Binarize against the Gaussian-weighted local mean",
        ),
    );

    registry.register(
        "isolate_channel",
        StageEntry {
            builder: |name, params| {
                arity(name, params, 2)?;
                let space = params[0].as_str().ok_or_else(|| {
                    PipelineError::invalid(name, format!("color space must be text, got '{}'", params[0]))
                })?;
                let channel = int_param(name, params, 1, "channel")?;
                Stage::isolate_channel(ChannelSpace::parse(space)?, channel)
            },
            category: StageCategory::Color,
            usage: "<space:rgb|hsv> <channel:1..3>",
            description: "Keep a single channel of a color space",
        },
    );

    registry.register(
        "histogram",
        StageEntry {
            builder: |name, params| match params {
                [] => Stage::histogram(DEFAULT_HISTOGRAM_HEIGHT as i64),
                [_] => Stage::histogram(int_param(name, params, 0, "height")?),
                _ => Err(PipelineError::invalid(
                    name,
                    format!("expects at most 1 parameter, got {}", params.len()),
                )),
            },
            category: StageCategory::Analysis,
            usage: "[height:int]",
            description: "Render the intensity histogram as a bar chart",
        },
    );
}

fn arity(name: &str, params: &[ParamValue], expected: usize) -> PipelineResult<()> {
    if params.len() != expected {
        return Err(PipelineError::invalid(
            name,
            format!(
                "expects {} parameter{}, got {}",
                expected,
                if expected == 1 { "" } else { "s" },
                params.len()
            ),
        ));
    }
    Ok(())
}

fn int_param(name: &str, params: &[ParamValue], index: usize, what: &str) -> PipelineResult<i64> {
    params[index].as_i64().ok_or_else(|| {
        PipelineError::invalid(name, format!("{} must be an integer, got '{}'", what, params[index]))
    })
}

fn num_param(name: &str, params: &[ParamValue], index: usize, what: &str) -> PipelineResult<f64> {
    params[index].as_f64().ok_or_else(|| {
        PipelineError::invalid(name, format!("{} must be a number, got '{}'", what, params[index]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> ParamValue {
        ParamValue::Int(i)
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StageRegistry::with_builtins();
        assert_eq!(registry.len(), 12);
        assert!(registry.contains("adaptive_gaussian"));
        assert_eq!(
            registry.by_category(StageCategory::Threshold),
            vec!["otsu", "threshold", "threshold_inv", "adaptive_mean", "adaptive_gaussian"]
        );
    }

    #[test]
    fn test_global_threshold_arity() {
        let registry = StageRegistry::with_builtins();
        assert!(matches!(
            registry.create("threshold", &[]),
            Err(PipelineError::InvalidStageParameters { .. })
        ));
        let stage = registry.create("threshold", &[int(10)]).unwrap();
        assert_eq!(
            stage,
            Stage::Threshold {
                method: ThresholdMethod::Global { thresh: 10.0 }
            }
        );
        assert!(registry.create("threshold", &[int(1), int(2)]).is_err());
    }

    #[test]
    fn test_adaptive_parameter_types() {
        let registry = StageRegistry::with_builtins();
        assert!(registry
            .create("adaptive_mean", &[int(11), ParamValue::Float(2.5)])
            .is_ok());
        // Even block size.
        assert!(matches!(
            registry.create("adaptive_mean", &[int(10), int(2)]),
            Err(PipelineError::InvalidStageParameters { .. })
        ));
        // A float block size is never truncated.
        assert!(registry
            .create("adaptive_gaussian", &[ParamValue::Float(11.0), int(2)])
            .is_err());
        assert!(registry
            .create("adaptive_gaussian", &[int(11), ParamValue::Text("x".into())])
            .is_err());
    }

    #[test]
    fn test_unknown_stage() {
        let registry = StageRegistry::with_builtins();
        assert_eq!(
            registry.create("sharpen", &[]),
            Err(PipelineError::UnsupportedStage("sharpen".to_string()))
        );
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let registry = StageRegistry::with_builtins();
        assert!(registry.create("OTSU", &[]).is_ok());
    }

    #[test]
    fn test_isolate_channel_and_histogram() {
        let registry = StageRegistry::with_builtins();
        let hsv = ParamValue::Text("hsv".into());
        assert!(registry.create("isolate_channel", &[hsv.clone(), int(2)]).is_ok());
        assert!(registry.create("isolate_channel", &[hsv, int(5)]).is_err());
        assert!(registry
            .create("isolate_channel", &[ParamValue::Text("grayscale".into()), int(1)])
            .is_err());

        assert_eq!(
            registry.create("histogram", &[]).unwrap(),
            Stage::Histogram { height: 100 }
        );
        assert!(registry.create("histogram", &[int(0)]).is_err());
    }

    #[test]
    fn test_empty_registry() {
        let registry = StageRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.create("otsu", &[]).is_err());
    }
}
