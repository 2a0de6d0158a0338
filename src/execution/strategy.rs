//! Direct and region-parallel execution of a pipeline.
//!
//! Large images are split into horizontal bands and each stage runs once
//! per band on the worker pool. A stage's whole-buffer prelude (grayscale
//! conversion, Otsu level, color-space conversion) runs first, on the
//! whole buffer; only the band-local kernel is forked. Bands read `halo`
//! extra rows on either side and keep only their own rows, so the
//! assembled output matches direct execution pixel for pixel.

use crate::core::buffer::PixelBuffer;
use crate::core::error::{ExecutionError, ExecutionResult};
use crate::core::region::{partition, Region};
use crate::execution::pool::{TaskContext, WorkerPool};
use crate::pipeline::{Pipeline, Stage};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default size above which an image runs region-parallel.
pub const DEFAULT_REGION_THRESHOLD: u64 = 2000;

/// How one job's pipeline is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One kernel call per stage on the whole buffer
    Direct,
    /// One forked task per band per stage
    RegionParallel,
}

/// Whether the strategy is chosen per image or forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    #[default]
    Auto,
    Direct,
    RegionParallel,
}

/// Image measure compared against the region threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    #[default]
    Width,
    /// max(width, height)
    Longest,
    /// width × height
    Pixels,
}

impl Dimension {
    pub fn measure(&self, buffer: &PixelBuffer) -> u64 {
        let (w, h) = (buffer.width() as u64, buffer.height() as u64);
        match self {
            Dimension::Width => w,
            Dimension::Longest => w.max(h),
            Dimension::Pixels => w * h,
        }
    }
}

/// Rule for choosing between direct and region-parallel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyPolicy {
    pub mode: StrategyMode,
    pub dimension: Dimension,
    /// Region-parallel when the measured dimension is strictly greater
    pub threshold: u64,
    /// Bands per image (0 = pool capacity)
    pub bands: usize,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            mode: StrategyMode::Auto,
            dimension: Dimension::Width,
            threshold: DEFAULT_REGION_THRESHOLD,
            bands: 0,
        }
    }
}

impl StrategyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: StrategyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands;
        self
    }

    pub fn choose(&self, buffer: &PixelBuffer) -> ExecutionStrategy {
        match self.mode {
            StrategyMode::Direct => ExecutionStrategy::Direct,
            StrategyMode::RegionParallel => ExecutionStrategy::RegionParallel,
            StrategyMode::Auto if self.dimension.measure(buffer) > self.threshold => {
                ExecutionStrategy::RegionParallel
            }
            StrategyMode::Auto => ExecutionStrategy::Direct,
        }
    }

    /// Number of bands to split into on a pool of `capacity` workers.
    pub fn band_count(&self, capacity: usize) -> usize {
        if self.bands > 0 {
            self.bands
        } else {
            capacity.max(1)
        }
    }
}

/// Run `pipeline` on `buffer` from inside a pool task, choosing the
/// strategy with `policy`.
///
/// Cancellation is checked between stages and before each band.
pub fn run_pipeline(
    pipeline: &Pipeline,
    buffer: &PixelBuffer,
    policy: &StrategyPolicy,
    ctx: &TaskContext,
) -> ExecutionResult<PixelBuffer> {
    let strategy = policy.choose(buffer);
    debug!(
        "{}x{} image runs {:?} through {} stage(s)",
        buffer.width(),
        buffer.height(),
        strategy,
        pipeline.len()
    );

    let bands = policy.band_count(ctx.capacity());
    let mut current: Option<PixelBuffer> = None;
    for stage in pipeline.stages() {
        ctx.check_cancelled()?;
        let input = current.as_ref().unwrap_or(buffer);
        let output = match strategy {
            ExecutionStrategy::Direct => stage.apply(input)?,
            ExecutionStrategy::RegionParallel => run_stage_in_bands(stage, input, bands, ctx)?,
        };
        current = Some(output);
    }
    Ok(current.unwrap_or_else(|| buffer.clone()))
}

/// Submit a pipeline run to `pool` and wait for it.
pub fn execute_on_pool(
    pool: &WorkerPool,
    pipeline: Arc<Pipeline>,
    buffer: PixelBuffer,
    policy: StrategyPolicy,
) -> ExecutionResult<PixelBuffer> {
    pool.submit(move |ctx| run_pipeline(&pipeline, &buffer, &policy, ctx))?
        .join()?
}

/// Fork one task per band for a single stage and assemble the results.
pub fn run_stage_in_bands(
    stage: &Stage,
    buffer: &PixelBuffer,
    bands: usize,
    ctx: &TaskContext,
) -> ExecutionResult<PixelBuffer> {
    let prepared = stage.prepare(buffer)?;
    let kernel = prepared.kernel;
    let Some(halo) = kernel.halo() else {
        return kernel.apply(&prepared.input);
    };

    let source = Arc::new(prepared.input.into_owned());
    let regions = partition(&source, bands);
    if regions.len() <= 1 {
        return kernel.apply(&source);
    }

    let handles = regions
        .iter()
        .map(|&region| {
            let source = Arc::clone(&source);
            ctx.spawn(move |ctx| -> ExecutionResult<(Region, PixelBuffer)> {
                ctx.check_cancelled()?;
                let window = region.expand_rows(halo, source.height());
                let input = source.crop_rows(window.y, window.height)?;
                let output = kernel.apply(&input)?;
                let core = output.crop_rows(region.y - window.y, region.height)?;
                Ok((region, core))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Join every band before reporting, so no band outlives this stage.
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error: Option<ExecutionError> = None;
    for handle in handles {
        match handle.join().and_then(|band| band) {
            Ok(band) => results.push(band),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    PixelBuffer::assemble(source.width(), source.height(), results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::pool::PoolConfig;

    fn noise(width: u32, height: u32, channels: u8) -> PixelBuffer {
        let mut state = 0x2545_f491u32;
        PixelBuffer::from_fn(width, height, channels, |x, y, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            ((state >> 24) as u8 / 2).wrapping_add(((x + y) % 128) as u8)
        })
        .unwrap()
    }

    fn pool(threads: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig::new().with_threads(threads).with_name("strategy")).unwrap()
    }

    #[test]
    fn test_choose_by_width() {
        let policy = StrategyPolicy::default();
        let narrow = PixelBuffer::blank(2000, 1, 1).unwrap();
        let wide = PixelBuffer::blank(2001, 1, 1).unwrap();
        assert_eq!(policy.choose(&narrow), ExecutionStrategy::Direct);
        assert_eq!(policy.choose(&wide), ExecutionStrategy::RegionParallel);
    }

    #[test]
    fn test_choose_other_dimensions_and_modes() {
        let tall = PixelBuffer::blank(10, 300, 1).unwrap();
        let by_longest = StrategyPolicy::new()
            .with_dimension(Dimension::Longest)
            .with_threshold(200);
        assert_eq!(by_longest.choose(&tall), ExecutionStrategy::RegionParallel);

        let by_pixels = StrategyPolicy::new()
            .with_dimension(Dimension::Pixels)
            .with_threshold(3000);
        assert_eq!(by_pixels.choose(&tall), ExecutionStrategy::Direct);

        let forced = StrategyPolicy::new().with_mode(StrategyMode::RegionParallel);
        assert_eq!(forced.choose(&tall), ExecutionStrategy::RegionParallel);
        assert_eq!(forced.band_count(6), 6);
        assert_eq!(forced.with_bands(3).band_count(6), 3);
    }

    fn assert_strategies_agree(spec: &str, input: PixelBuffer, bands: usize) {
        let pool = pool(3);
        let pipeline = Arc::new(Pipeline::parse(spec).unwrap());
        let expected = pipeline.apply(&input).unwrap();

        let direct = StrategyPolicy::new().with_mode(StrategyMode::Direct);
        let region = StrategyPolicy::new()
            .with_mode(StrategyMode::RegionParallel)
            .with_bands(bands);

        let a = execute_on_pool(&pool, Arc::clone(&pipeline), input.clone(), direct).unwrap();
        let b = execute_on_pool(&pool, pipeline, input, region).unwrap();
        assert_eq!(a, expected, "direct run of '{}' differs", spec);
        assert_eq!(b, expected, "region run of '{}' differs", spec);
    }

    #[test]
    fn test_region_matches_direct_threshold_family() {
        assert_strategies_agree("otsu", noise(40, 37, 3), 5);
        assert_strategies_agree("threshold:100", noise(40, 37, 1), 4);
        assert_strategies_agree("threshold_inv:90.5", noise(17, 23, 4), 6);
    }

    #[test]
    fn test_region_matches_direct_spatial_stages() {
        assert_strategies_agree("blur:5", noise(31, 29, 3), 4);
        assert_strategies_agree("blur:7,adaptive_mean:11:2", noise(33, 41, 1), 6);
        assert_strategies_agree("grayscale,adaptive_gaussian:9:3", noise(25, 50, 3), 7);
    }

    #[test]
    fn test_region_matches_direct_color_and_histogram() {
        assert_strategies_agree("hsv,isolate_channel:rgb:2", noise(20, 19, 3), 3);
        assert_strategies_agree("isolate_channel:hsv:1,gray_to_color", noise(20, 19, 3), 4);
        assert_strategies_agree("blur:3,histogram:64", noise(20, 33, 1), 4);
    }

    #[test]
    fn test_more_bands_than_rows() {
        assert_strategies_agree("blur:3", noise(8, 3, 1), 16);
    }

    #[test]
    fn test_single_worker_region_execution() {
        let pool = pool(1);
        let input = noise(64, 64, 3);
        let pipeline = Arc::new(Pipeline::parse("blur:5,otsu").unwrap());
        let expected = pipeline.apply(&input).unwrap();
        let policy = StrategyPolicy::new()
            .with_mode(StrategyMode::RegionParallel)
            .with_bands(8);
        assert_eq!(execute_on_pool(&pool, pipeline, input, policy).unwrap(), expected);
    }

    #[test]
    fn test_band_failure_surfaces() {
        let pool = pool(2);
        let gray = noise(10, 10, 1);
        let pipeline = Arc::new(Pipeline::parse("isolate_channel:rgb:1").unwrap());
        let policy = StrategyPolicy::new().with_mode(StrategyMode::RegionParallel);
        assert!(matches!(
            execute_on_pool(&pool, pipeline, gray, policy),
            Err(ExecutionError::ChannelCount { .. })
        ));
    }

    #[test]
    fn test_cancelled_pool_stops_pipeline() {
        let pool = pool(1);
        pool.terminate();
        let pipeline = Arc::new(Pipeline::default());
        assert!(matches!(
            execute_on_pool(&pool, pipeline, noise(4, 4, 1), StrategyPolicy::default()),
            Err(ExecutionError::Pool(_))
        ));
    }
}
