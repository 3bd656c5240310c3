//! Property checks for the AugMix sampler across its parameter space.

use augmix_augment::{
    is_unit_range, AugMixSampler, AugmentError, BatchViewGenerator, DepthPolicy, MixtureSpec,
    OperationSet, PrefetchConfig, PrefetchPipeline, Severity,
};
use scirs2_core::ndarray::{Array3, Array4};
use scirs2_core::random::{SeedableRng, StdRng};
use std::sync::Arc;

fn noisy_image(h: usize, w: usize, seed: u64) -> Array3<f64> {
    Array3::from_shape_fn((h, w, 3), |(y, x, c)| {
        let v = (y * 31 + x * 17 + c * 7) as u64 ^ seed;
        (v % 256) as f64 / 255.0
    })
}

#[test]
fn test_zero_image_scenario() -> Result<(), AugmentError> {
    let spec = MixtureSpec::new(2, DepthPolicy::from_config(1)?, 1.0, Severity::new(3)?)?;
    let sampler = AugMixSampler::new(spec)?;
    let image = Array3::<f64>::zeros((4, 4, 3));
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..50 {
        let out = sampler.augment(&image.view(), &mut rng)?;
        assert_eq!(out.shape(), &[4, 4, 3]);
        assert!(is_unit_range(&out.view()));
        assert!(out.iter().all(|&v| v.abs() < 1e-9));
    }
    Ok(())
}

#[test]
fn test_invariants_over_parameter_grid() -> Result<(), AugmentError> {
    let mut rng = StdRng::seed_from_u64(7);
    let image = noisy_image(10, 12, 3);

    for severity in [1u8, 3, 6, 10] {
        for depth in [-1, 1, 2, 3] {
            for alpha in [0.05, 1.0, 8.0] {
                let spec = MixtureSpec::new(3, DepthPolicy::from_config(depth)?, alpha, Severity::new(severity)?)?
                    .with_operations(OperationSet::All)?;
                let sampler = AugMixSampler::new(spec)?;
                let mixed = sampler.sample_chain(&image.view(), &mut rng)?;

                assert_eq!(mixed.image.shape(), image.shape());
                assert!(is_unit_range(&mixed.image.view()));
                assert!(mixed.weights.iter().all(|&w| w >= 0.0));
                assert!((mixed.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                assert!((0.0..=1.0).contains(&mixed.blend));
            }
        }
    }
    Ok(())
}

#[test]
fn test_unknown_operation_is_configuration_error() {
    let err = OperationSet::from_names(["rotate", "gaussian_noise"]).unwrap_err();
    assert!(matches!(err, AugmentError::UnknownOperation(ref name) if name == "gaussian_noise"));
    assert!(err.is_configuration());
}

#[test]
fn test_independent_streams_give_independent_views() -> Result<(), AugmentError> {
    let sampler = AugMixSampler::new(MixtureSpec::default())?;
    let image = noisy_image(8, 8, 11);

    let a = sampler.augment(&image.view(), &mut StdRng::seed_from_u64(1))?;
    let b = sampler.augment(&image.view(), &mut StdRng::seed_from_u64(2))?;
    assert_ne!(a, b);
    Ok(())
}

#[test]
fn test_sampler_shared_across_threads() -> Result<(), AugmentError> {
    let sampler = Arc::new(AugMixSampler::new(MixtureSpec::default())?);
    let image = Arc::new(noisy_image(6, 6, 5));

    let handles: Vec<_> = (0..4)
        .map(|k| {
            let sampler = Arc::clone(&sampler);
            let image = Arc::clone(&image);
            std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(k);
                sampler.augment(&image.view(), &mut rng)
            })
        })
        .collect();

    for handle in handles {
        let out = handle
            .join()
            .map_err(|_| AugmentError::WorkerError("thread panicked".to_string()))??;
        assert!(is_unit_range(&out.view()));
    }
    Ok(())
}

#[test]
fn test_prefetch_matches_batch_count() -> Result<(), AugmentError> {
    let images = Arc::new(Array4::from_shape_fn((10, 4, 4, 3), |(n, y, x, c)| {
        ((n * 3 + y + x + c) % 9) as f64 / 9.0
    }));
    let batches: Vec<Vec<usize>> = vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]];
    let generator = Arc::new(BatchViewGenerator::new(Some(MixtureSpec::default()), true)?);

    let pipeline = PrefetchPipeline::spawn(
        images,
        batches,
        generator,
        PrefetchConfig {
            workers: 2,
            depth: 1,
            seed: 3,
        },
    )?;

    let mut sizes: Vec<usize> = pipeline
        .map(|prepared| prepared.map(|p| p.views.len()))
        .collect::<Result<_, _>>()?;
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 4, 4]);
    Ok(())
}
