use std::sync::{Arc, Mutex};

use super::*;
use crate::testing::{assert_close, capture_logs, constant_frame, init_tracing, noisy_frames};
use crate::{Buffer2, Frame, Shape, Unit};

fn ones_twos_threes() -> Vec<Frame<f64>> {
    [1.0, 2.0, 3.0]
        .iter()
        .map(|&v| constant_frame(2, 2, v))
        .collect()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-4
}

// ========== Basic methods ==========

#[test]
fn test_median_of_three_frames() {
    init_tracing();
    let combiner = Combiner::<f64>::default();

    let result = combiner
        .combine(&ones_twos_threes(), CombineMethod::Median, CombineOptions::default())
        .unwrap();

    assert_eq!(result.shape(), Shape::new(2, 2));
    assert!(result.data().iter().all(|&v| v == 2.0));
    let unct = result.uncertainty().unwrap();
    assert!(unct.iter().all(|&u| approx(u, 0.4714)));
    assert!(result.mask().iter().all(|&m| !m));
    assert_eq!(result.metadata.combined_count, Some(3));
    assert_eq!(result.metadata.combine_method, Some(CombineMethod::Median));
    assert_eq!(result.metadata.all_rejected, 0);
}

#[test]
fn test_sum_without_uncertainty_uses_std_fallback() {
    init_tracing();
    let result = combine(&ones_twos_threes(), CombineMethod::Sum, CombineConfig::default()).unwrap();

    assert!(result.data().iter().all(|&v| v == 6.0));
    // population std of [1, 2, 3] times sqrt(3)
    let unct = result.uncertainty().unwrap();
    assert!(unct.iter().all(|&u| approx(u, 2.0f64.sqrt())));
}

#[test]
fn test_sum_without_uncertainty_logs_fallback_notice() {
    let (result, logs) =
        capture_logs(|| combine(&ones_twos_threes(), CombineMethod::Sum, CombineConfig::default()));
    assert!(result.is_ok());
    assert!(logs.contains("One or more frames have no uncertainty"), "{logs}");
    assert!(logs.contains("Data with no uncertainties"), "{logs}");

    let frames: Vec<Frame<f64>> = ones_twos_threes()
        .into_iter()
        .map(|f| f.with_uncertainty(Buffer2::new_filled(2, 2, 1.0)).unwrap())
        .collect();
    let (_, logs) = capture_logs(|| combine(&frames, CombineMethod::Sum, CombineConfig::default()));
    assert!(!logs.contains("Data with no uncertainties"), "{logs}");
}

#[test]
fn test_mean_matches_manual() {
    let frames = ones_twos_threes();
    let result = combine(&frames, CombineMethod::Mean, CombineConfig::default()).unwrap();
    assert!(result.data().iter().all(|&v| v == 2.0));
}

#[test]
fn test_sum_propagates_input_uncertainty() {
    let frames: Vec<Frame<f64>> = ones_twos_threes()
        .into_iter()
        .map(|f| f.with_uncertainty(Buffer2::new_filled(2, 2, 2.0)).unwrap())
        .collect();

    let result = combine(&frames, CombineMethod::Sum, CombineConfig::default()).unwrap();

    // sqrt(3 * 2^2)
    let unct = result.uncertainty().unwrap();
    assert!(unct.iter().all(|&u| approx(u, 12.0f64.sqrt())));
}

#[test]
fn test_combine_named() {
    let combiner = Combiner::<f64>::default();
    let frames = ones_twos_threes();

    let result = combiner
        .combine_named(&frames, "mean", CombineOptions::default())
        .unwrap();
    assert_eq!(result.metadata.combine_method, Some(CombineMethod::Mean));

    let err = combiner
        .combine_named(&frames, "bogus", CombineOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMethod(name) if name == "bogus"));
}

#[test]
fn test_output_shape_matches_input_for_every_method() {
    let frames = noisy_frames(7, 5, 6, 9, 100.0);
    let combiner = Combiner::<f64>::default();
    for method in [CombineMethod::Mean, CombineMethod::Median, CombineMethod::Sum] {
        let result = combiner
            .combine(&frames, method, CombineOptions::default())
            .unwrap();
        assert_eq!(result.shape(), Shape::new(6, 9));
        assert_eq!(result.mask().shape(), Shape::new(6, 9));
        assert_eq!(result.uncertainty().unwrap().shape(), Shape::new(6, 9));
        assert_eq!(result.unit(), &Unit::named("adu"));
    }
}

// ========== Masks and rejection ==========

#[test]
fn test_all_masked_position() {
    init_tracing();
    let frames: Vec<Frame<f64>> = [1.0, 2.0, 3.0]
        .iter()
        .map(|&v| {
            let mut f = constant_frame(2, 2, v);
            f.mask_mut()[3] = true;
            f
        })
        .collect();

    let result = combine(&frames, CombineMethod::Median, CombineConfig::default()).unwrap();

    assert!(result.data()[(1, 1)].is_nan());
    assert!(result.uncertainty().unwrap()[(1, 1)].is_nan());
    assert!(result.mask()[(1, 1)]);
    assert!(!result.mask()[(0, 0)]);
    assert_eq!(result.data()[(0, 0)], 2.0);
    assert_eq!(result.metadata.all_rejected, 1);
}

#[test]
fn test_output_mask_iff_all_inputs_masked_after_clipping() {
    let frames = noisy_frames(11, 6, 5, 5, 50.0);
    let mut combiner = Combiner::<f64>::default();
    combiner.set_minmax_clip(Some(0.0), Some(1000.0)).unwrap();

    let result = combiner
        .combine(&frames, CombineMethod::Mean, CombineOptions::default())
        .unwrap();

    for pos in 0..25 {
        let all_out = frames.iter().all(|f| {
            let v = f.data().pixels()[pos];
            f.mask().pixels()[pos] || !(0.0..=1000.0).contains(&v)
        });
        assert_eq!(result.mask().pixels()[pos], all_out, "position {pos}");
    }
}

#[test]
fn test_sum_normalize_property() {
    let mut frames = ones_twos_threes();
    frames.push(constant_frame(2, 2, 100.0));
    frames[3].mask_mut()[0] = true;

    let normalized = combine(&frames, CombineMethod::Sum, CombineConfig::default()).unwrap();
    let raw = Combiner::<f64>::default()
        .combine(
            &frames,
            CombineMethod::Sum,
            CombineOptions {
                sum_normalize: false,
            },
        )
        .unwrap();

    // position 0: 6 * 4 / 3 with normalization, plain 6 without
    assert!(approx(normalized.data().pixels()[0], 8.0));
    assert_eq!(raw.data().pixels()[0], 6.0);
    // unmasked positions are unaffected
    assert_eq!(normalized.data().pixels()[1], 106.0);
    assert_eq!(raw.data().pixels()[1], 106.0);
}

#[test]
fn test_sigma_clip_rejects_outlier() {
    init_tracing();
    let mut frames: Vec<Frame<f64>> = (0..99)
        .map(|i| constant_frame(1, 2, 100.0 + (i % 7) as f64))
        .collect();
    frames.push(constant_frame(1, 2, 10000.0));

    let mut combiner = Combiner::<f64>::default();
    combiner
        .set_sigma_clip(Some(3.0.into()), CenterFn::Median, DeviationFn::MadStd)
        .unwrap();
    let clipped = combiner
        .combine(&frames, CombineMethod::Mean, CombineOptions::default())
        .unwrap();
    let plain = Combiner::<f64>::default()
        .combine(&frames, CombineMethod::Mean, CombineOptions::default())
        .unwrap();

    assert!(clipped.data().pixels()[0] < 110.0);
    assert!(plain.data().pixels()[0] > 190.0);
}

#[test]
fn test_minmax_runs_before_sigma_clip() {
    // Without minmax the 5000 inflates std enough to hide the 200.
    let mut frames: Vec<Frame<f64>> = (0..8).map(|i| constant_frame(1, 1, 100.0 + i as f64)).collect();
    frames.push(constant_frame(1, 1, 200.0));
    frames.push(constant_frame(1, 1, 5000.0));

    let mut combiner = Combiner::<f64>::default();
    combiner
        .set_sigma_clip(Some(2.0.into()), CenterFn::Mean, DeviationFn::Std)
        .unwrap();
    let sigma_only = combiner
        .combine(&frames, CombineMethod::Sum, CombineOptions { sum_normalize: false })
        .unwrap();

    combiner.set_minmax_clip(None, Some(1000.0)).unwrap();
    let both = combiner
        .combine(&frames, CombineMethod::Sum, CombineOptions { sum_normalize: false })
        .unwrap();

    // 8 ordinary values sum to 828
    assert_eq!(sigma_only.data().pixels()[0], 828.0 + 200.0);
    assert_eq!(both.data().pixels()[0], 828.0);
}

#[test]
fn test_custom_center_function() {
    let frames = ones_twos_threes();
    let mut combiner = Combiner::<f64>::default();
    // Center at the max with zero spread: everything below it is rejected.
    combiner
        .set_sigma_clip(
            Some(SigmaLimits::asymmetric(0.0, 0.0)),
            CenterFn::custom(|v| v.iter().copied().fold(f64::MIN, f64::max)),
            DeviationFn::custom(|_| 0.0),
        )
        .unwrap();

    let result = combiner
        .combine(&frames, CombineMethod::Mean, CombineOptions::default())
        .unwrap();

    assert!(result.data().iter().all(|&v| v == 3.0));
}

// ========== Chunking ==========

#[test]
fn test_chunking_is_transparent() {
    init_tracing();
    let frames = noisy_frames(42, 7, 13, 17, 1000.0);

    for method in [CombineMethod::Mean, CombineMethod::Median, CombineMethod::Sum] {
        let mut large = Combiner::<f64>::default();
        large.set_sigma_clip(Some(3.0.into()), CenterFn::Median, DeviationFn::MadStd).unwrap();
        large.set_minmax_clip(Some(0.0), Some(20000.0)).unwrap();

        let mut tiny = large.clone();
        tiny.set_memory_budget(64).unwrap();

        let a = large.combine(&frames, method, CombineOptions::default()).unwrap();
        let b = tiny.combine(&frames, method, CombineOptions::default()).unwrap();

        assert_close(b.data(), a.data(), 1e-9);
        assert_close(b.uncertainty().unwrap(), a.uncertainty().unwrap(), 1e-9);
        assert_eq!(a.mask(), b.mask());
        assert_eq!(a.metadata.all_rejected, b.metadata.all_rejected);
    }
}

#[test]
fn test_progress_reports_every_tile() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut combiner = Combiner::<f64>::default();
    combiner.set_memory_budget(1).unwrap();
    combiner.set_progress(Some(Arc::new(move |p: CombineProgress| {
        sink.lock().unwrap().push(p);
    })));

    combiner
        .combine(&ones_twos_threes(), CombineMethod::Mean, CombineOptions::default())
        .unwrap();

    let seen = seen.lock().unwrap();
    let combining: Vec<usize> = seen
        .iter()
        .filter(|p| p.stage == CombineStage::Combining)
        .map(|p| p.current)
        .collect();
    assert_eq!(combining, vec![0, 1, 2, 3, 4]);
    assert!(seen.iter().all(|p| p.stage != CombineStage::Combining || p.total == 4));
    assert!(seen.iter().any(|p| p.stage == CombineStage::Loading));
}

// ========== Storage and precision ==========

#[test]
fn test_disk_backed_matches_in_memory_and_cleans_up() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let frames = noisy_frames(3, 4, 8, 8, 500.0);

    let memory = Combiner::<f64>::default();
    let mut disk = Combiner::<f64>::default();
    disk.set_cache(CacheConfig::disk_backed(dir.path().to_path_buf()));
    disk.set_memory_budget(2000).unwrap();

    for method in [CombineMethod::Median, CombineMethod::Sum] {
        let a = memory.combine(&frames, method, CombineOptions::default()).unwrap();
        let b = disk.combine(&frames, method, CombineOptions::default()).unwrap();
        assert_close(b.data(), a.data(), 1e-12);
        assert_close(b.uncertainty().unwrap(), a.uncertainty().unwrap(), 1e-12);
        assert_eq!(a.mask(), b.mask());
    }

    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0, "disk working storage must be removed");
}

#[test]
fn test_default_storage_respects_memory_budget() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<Frame<f64>> = (0..8).map(|i| constant_frame(64, 64, i as f64)).collect();

    let mut combiner = Combiner::<f64>::default();
    assert_eq!(combiner.config().cache.storage, StorageMode::Auto);
    let cache = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        ..combiner.config().cache.clone()
    };
    combiner.set_cache(cache);
    combiner.set_memory_budget(1024).unwrap();

    let (result, logs) = capture_logs(|| {
        combiner.combine(&frames, CombineMethod::Median, CombineOptions::default())
    });
    let result = result.unwrap();

    assert!(logs.contains("resolved=DiskBacked"), "{logs}");
    assert!(result.data().iter().all(|&v| v == 3.5));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    // Same stack under a budget it fits in stays on the heap.
    combiner.set_memory_budget(8 * 64 * 64 * 9).unwrap();
    let (_, logs) = capture_logs(|| {
        combiner.combine(&frames, CombineMethod::Median, CombineOptions::default())
    });
    assert!(logs.contains("resolved=InMemory"), "{logs}");
}

#[test]
fn test_raw_arrays() {
    init_tracing();
    let arrays: Vec<Buffer2<f32>> = [1.0f32, 2.0, 3.0]
        .iter()
        .map(|&v| Buffer2::new_filled(3, 2, v))
        .collect();

    let result = Combiner::<f64>::default()
        .combine(&arrays, CombineMethod::Mean, CombineOptions::default())
        .unwrap();

    assert!(result.data().iter().all(|&v| v == 2.0));
    assert_eq!(result.unit(), &Unit::Dimensionless);
}

#[test]
fn test_raw_arrays_log_warning() {
    let arrays = vec![Buffer2::new_filled(2, 2, 1.0f64), Buffer2::new_filled(2, 2, 3.0)];
    let (result, logs) = capture_logs(|| {
        Combiner::<f64>::default().combine(&arrays, CombineMethod::Mean, CombineOptions::default())
    });
    assert!(result.is_ok());
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("not full frames"), "{logs}");

    let (_, logs) = capture_logs(|| {
        Combiner::<f64>::default().combine(
            &ones_twos_threes(),
            CombineMethod::Mean,
            CombineOptions::default(),
        )
    });
    assert!(!logs.contains("not full frames"), "{logs}");
}

#[test]
fn test_frame_references() {
    let frames = ones_twos_threes();
    let refs: Vec<&Frame<f64>> = frames.iter().collect();
    let result = combine(&refs, CombineMethod::Median, CombineConfig::default()).unwrap();
    assert!(result.data().iter().all(|&v| v == 2.0));
}

#[test]
fn test_f32_working_precision() {
    let result: Frame<f32> = Combiner::<f32>::default()
        .combine(&ones_twos_threes(), CombineMethod::Sum, CombineOptions::default())
        .unwrap();

    assert!(result.data().iter().all(|&v| v == 6.0f32));
    let unct = result.uncertainty().unwrap();
    assert!(unct.iter().all(|&u| (u - 2.0f32.sqrt()).abs() < 1e-5));
}

#[test]
fn test_inputs_are_not_modified() {
    let frames = noisy_frames(5, 3, 4, 4, 10.0);
    let before = frames.clone();
    let mut combiner = Combiner::<f64>::default();
    combiner.set_minmax_clip(Some(5.0), Some(15.0)).unwrap();

    combiner
        .combine(&frames, CombineMethod::Median, CombineOptions::default())
        .unwrap();

    assert_eq!(frames, before);
}

// ========== Errors ==========

#[test]
fn test_empty_input() {
    let frames: Vec<Frame<f64>> = Vec::new();
    let err = combine(&frames, CombineMethod::Mean, CombineConfig::default()).unwrap_err();
    assert!(matches!(err, Error::EmptyInput));
}

#[test]
fn test_shape_mismatch() {
    let frames = vec![constant_frame(2, 2, 1.0), constant_frame(3, 2, 1.0)];
    let err = combine(&frames, CombineMethod::Mean, CombineConfig::default()).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { index: 1, .. }));
}

#[test]
fn test_unit_mismatch() {
    let frames = vec![
        Frame::new(Buffer2::new_filled(2, 2, 1.0), Unit::named("adu")),
        Frame::new(Buffer2::new_filled(2, 2, 1.0), Unit::named("electron")),
    ];
    let err = combine(&frames, CombineMethod::Mean, CombineConfig::default()).unwrap_err();
    assert!(matches!(err, Error::UnitMismatch { index: 1, .. }));
}

#[test]
fn test_invalid_config_rejected() {
    let config = CombineConfig {
        memory_budget: 0,
        ..Default::default()
    };
    assert!(matches!(
        Combiner::<f64>::new(config),
        Err(Error::InvalidConfig(_))
    ));

    let mut combiner = Combiner::<f64>::default();
    assert!(combiner.set_memory_budget(0).is_err());
    assert!(combiner.set_sigma_clip_named(Some(3.0.into()), "mode", "std").is_err());
    assert!(combiner.set_minmax_clip(Some(f64::NAN), None).is_err());
}
