//! Ordered stage chains.

use crate::core::buffer::PixelBuffer;
use crate::core::error::{ExecutionResult, PipelineError, PipelineResult};
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::stage::{ParamValue, Stage, ThresholdMethod};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage as written in configuration: a registry name plus raw parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamValue>,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, params: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// An ordered, validated sequence of stages.
///
/// Applying a pipeline is pure: the input buffer is never mutated and the
/// same input always yields the same output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Parse a comma-separated chain such as `"grayscale,blur:5,adaptive_mean:11:2"`.
    ///
    /// Each entry is a stage name followed by `:`-separated parameters.
    pub fn parse(spec: &str) -> PipelineResult<Self> {
        Self::parse_with(&StageRegistry::with_builtins(), spec)
    }

    pub fn parse_with(registry: &StageRegistry, spec: &str) -> PipelineResult<Self> {
        let stages = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let mut parts = entry.split(':');
                let name = parts.next().unwrap_or_default();
                let params: Vec<ParamValue> = parts.map(ParamValue::parse).collect();
                registry.create(name, &params)
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        if stages.is_empty() {
            return Err(PipelineError::invalid("pipeline", "no stages given"));
        }
        Ok(Self::new(stages))
    }

    /// Build from configuration entries, validating every stage.
    pub fn from_configs(configs: &[StageConfig]) -> PipelineResult<Self> {
        let registry = StageRegistry::with_builtins();
        let stages = configs
            .iter()
            .map(|config| registry.create(&config.name, &config.params))
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self::new(stages))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Apply every stage in order on the whole buffer.
    pub fn apply(&self, buffer: &PixelBuffer) -> ExecutionResult<PixelBuffer> {
        let mut stages = self.stages.iter();
        let Some(first) = stages.next() else {
            return Ok(buffer.clone());
        };
        let mut current = first.apply(buffer)?;
        for stage in stages {
            current = stage.apply(&current)?;
        }
        Ok(current)
    }
}

impl Default for Pipeline {
    /// Otsu binarization, the batch default.
    fn default() -> Self {
        Self::new(vec![Stage::Threshold {
            method: ThresholdMethod::Otsu,
        }])
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}
