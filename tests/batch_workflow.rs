//! End-to-end batch runs over real directories.
//!
//! These tests cover:
//! - Failure isolation (a corrupt file among good ones)
//! - Idempotence (two runs produce byte-identical outputs)
//! - Region-parallel vs direct equivalence on wide images
//! - Configuration-driven enumeration
//! - Recursive runs keeping same-named files from different folders apart
//!
//! Run with: `cargo test --test batch_workflow`

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rasterbatch::batch::{read_image, write_image, ListOptions};
use rasterbatch::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn orchestrator(threads: usize, policy: StrategyPolicy, options: BatchOptions) -> BatchOrchestrator {
    let pool = WorkerPool::new(PoolConfig::new().with_threads(threads).with_name("it")).unwrap();
    BatchOrchestrator::new(Arc::new(pool), policy, options)
}

/// A colourful, non-trivial image so thresholds and blurs have work to do.
fn scene(width: u32, height: u32, seed: u32) -> PixelBuffer {
    PixelBuffer::from_fn(width, height, 3, |x, y, c| {
        let wave = ((x / 7 + y / 5 + seed) % 2) * 90;
        ((x * 3 + y * 2 + c as u32 * 40 + seed * 11 + wave) % 256) as u8
    })
    .unwrap()
}

fn write_scenes(dir: &Path, count: u32, width: u32, height: u32) {
    for i in 0..count {
        write_image(&dir.join(format!("scene_{:02}.png", i)), &scene(width, height, i)).unwrap();
    }
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_corrupt_file_does_not_stop_batch() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_scenes(input.path(), 5, 40, 30);
    fs::write(input.path().join("scene_99.jpg"), b"\xff\xd8 truncated").unwrap();

    let report = orchestrator(3, StrategyPolicy::default(), BatchOptions::default())
        .run(BatchRequest::new(input.path(), output.path(), Pipeline::default()))
        .unwrap();

    assert_eq!(report.total, 6);
    assert_eq!(report.succeeded, 5);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].file, "scene_99.jpg");
    assert_eq!(report.cancelled, 0);
    assert_eq!(sorted_names(output.path()).len(), 5);
}

#[test]
fn test_repeated_runs_are_byte_identical() {
    let input = TempDir::new().unwrap();
    write_scenes(input.path(), 3, 48, 32);
    let pipeline = || Pipeline::parse("grayscale,blur:5,adaptive_gaussian:11:2").unwrap();
    let orchestrator = orchestrator(2, StrategyPolicy::default(), BatchOptions::default());

    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    orchestrator
        .run(BatchRequest::new(input.path(), first.path(), pipeline()))
        .unwrap();
    orchestrator
        .run(BatchRequest::new(input.path(), second.path(), pipeline()))
        .unwrap();

    let names = sorted_names(first.path());
    assert_eq!(names, sorted_names(second.path()));
    assert_eq!(names.len(), 3);
    for name in names {
        assert!(name.starts_with("processado_"));
        assert_eq!(
            fs::read(first.path().join(&name)).unwrap(),
            fs::read(second.path().join(&name)).unwrap()
        );
    }
}

#[test]
fn test_input_that_is_a_file_yields_empty_report() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let file = input.path().join("single.png");
    write_image(&file, &scene(8, 8, 0)).unwrap();

    let report = orchestrator(1, StrategyPolicy::default(), BatchOptions::default())
        .run(BatchRequest::new(&file, output.path(), Pipeline::default()))
        .unwrap();
    assert_eq!(report.total, 0);
    assert!(report.is_clean());
}

#[test]
fn test_region_parallel_batch_matches_direct() {
    let input = TempDir::new().unwrap();
    write_scenes(input.path(), 2, 120, 90);

    for spec in [
        "otsu",
        "grayscale,blur:7,threshold:127",
        "adaptive_mean:15:4",
        "hsv,isolate_channel:hsv:3",
        "blur:3,histogram:64",
    ] {
        let direct_out = TempDir::new().unwrap();
        let region_out = TempDir::new().unwrap();

        let direct = StrategyPolicy::new().with_mode(StrategyMode::Direct);
        orchestrator(2, direct, BatchOptions::default())
            .run(BatchRequest::new(input.path(), direct_out.path(), Pipeline::parse(spec).unwrap()))
            .unwrap();

        // A low width threshold sends every image down the banded path.
        let region = StrategyPolicy::new().with_threshold(16).with_bands(5);
        orchestrator(3, region, BatchOptions::default())
            .run(BatchRequest::new(input.path(), region_out.path(), Pipeline::parse(spec).unwrap()))
            .unwrap();

        for name in sorted_names(direct_out.path()) {
            let a = read_image(&direct_out.path().join(&name)).unwrap();
            let b = read_image(&region_out.path().join(&name)).unwrap();
            assert_eq!(a, b, "pipeline '{}' differs on {}", spec, name);
        }
    }
}

#[test]
fn test_config_driven_batch() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_scenes(input.path(), 3, 20, 20);
    write_image(&input.path().join("skip_me.png"), &scene(20, 20, 7)).unwrap();

    let config = BatchConfig::from_toml_str(
        r#"
        threads = 2
        output_prefix = "bin_"
        pattern = "scene_*"

        [[pipeline]]
        name = "threshold_inv"
        params = [100]
        "#,
    )
    .unwrap();

    let pool = Arc::new(WorkerPool::new(config.pool_config()).unwrap());
    let orchestrator = BatchOrchestrator::new(pool, config.policy(), config.batch_options().unwrap());
    let report = orchestrator
        .run(BatchRequest::new(input.path(), output.path(), config.pipeline().unwrap()))
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(
        sorted_names(output.path()),
        vec!["bin_scene_00.png", "bin_scene_01.png", "bin_scene_02.png"]
    );
}

#[test]
fn test_recursive_batch_keeps_same_named_files_apart() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    for (i, dir) in ["a", "b"].iter().enumerate() {
        fs::create_dir(input.path().join(dir)).unwrap();
        write_image(&input.path().join(dir).join("scan.png"), &scene(16, 12, i as u32)).unwrap();
        write_image(&input.path().join(dir).join("photo.png"), &scene(16, 12, 5)).unwrap();
    }

    let listing = ListOptions::new().with_recursive(true).with_pattern("scan*").unwrap();
    let options = BatchOptions::default().with_listing(listing);
    let report = orchestrator(2, StrategyPolicy::default(), options)
        .run(BatchRequest::new(input.path(), output.path(), Pipeline::parse("grayscale").unwrap()))
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(sorted_names(output.path()), vec!["a", "b"]);
    let first = read_image(&output.path().join("a/processado_scan.png")).unwrap();
    let second = read_image(&output.path().join("b/processado_scan.png")).unwrap();
    assert_ne!(first, second);
    assert_eq!(sorted_names(&output.path().join("a")), vec!["processado_scan.png"]);
}

#[test]
fn test_background_batch_through_service() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_scenes(input.path(), 4, 24, 16);

    let orchestrator = Arc::new(orchestrator(2, StrategyPolicy::default(), BatchOptions::default()));
    let service = ImageService::new(Arc::clone(&orchestrator), Pipeline::default());
    let ticket = service
        .start_batch(
            Some(input.path().to_path_buf()),
            Some(output.path().to_path_buf()),
            Pipeline::parse("grayscale").unwrap(),
        )
        .unwrap();

    let report = ticket.join().unwrap();
    assert_eq!(report.succeeded, 4);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["succeeded"], 4);

    let outcome = orchestrator.shutdown(std::time::Duration::from_secs(5));
    assert!(!outcome.timed_out);
    assert_eq!(orchestrator.pool().state(), PoolState::Terminated);
}
