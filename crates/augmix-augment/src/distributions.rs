//! Random variates used by the mixing step.
//!
//! All samplers draw from an explicit `&mut StdRng` so callers control
//! seeding and can give every worker its own stream.

use crate::{AugmentError, AugmentResult};
use scirs2_core::random::{Distribution, Gamma, RandBeta, StdRng};

fn check_concentration(alpha: f64) -> AugmentResult<()> {
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(AugmentError::InvalidParameter(format!(
            "concentration must be positive and finite, got {}",
            alpha
        )));
    }
    Ok(())
}

/// Beta(alpha, beta) variate in `[0, 1]`.
pub fn sample_beta(alpha: f64, beta: f64, rng: &mut StdRng) -> AugmentResult<f64> {
    check_concentration(alpha)?;
    check_concentration(beta)?;

    let dist = RandBeta::new(alpha, beta)
        .map_err(|e| AugmentError::InvalidParameter(format!("beta({}, {}): {}", alpha, beta, e)))?;
    let m = dist.sample(rng);
    if !m.is_finite() {
        return Err(AugmentError::InvalidParameter(format!(
            "beta({}, {}) produced {}",
            alpha, beta, m
        )));
    }
    Ok(m.clamp(0.0, 1.0))
}

/// Symmetric Dirichlet(alpha, …, alpha) weights of length `k`.
///
/// The result is non-negative and sums to one. If every Gamma underflows the
/// weights fall on a uniformly chosen vertex of the simplex.
pub fn sample_dirichlet(alpha: f64, k: usize, rng: &mut StdRng) -> AugmentResult<Vec<f64>> {
    check_concentration(alpha)?;
    if k == 0 {
        return Ok(Vec::new());
    }

    let gamma = Gamma::new(alpha, 1.0)
        .map_err(|e| AugmentError::InvalidParameter(format!("gamma({}, 1): {}", alpha, e)))?;
    let mut weights: Vec<f64> = (0..k).map(|_| gamma.sample(rng)).collect();
    let sum: f64 = weights.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        weights.iter_mut().for_each(|w| *w /= sum);
    } else {
        let vertex = rng.random_range(0..k);
        weights.iter_mut().enumerate().for_each(|(i, w)| {
            *w = if i == vertex { 1.0 } else { 0.0 };
        });
    }

    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use scirs2_core::random::SeedableRng;

    fn create_test_rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_rejects_bad_concentration() {
        let mut rng = create_test_rng();
        for alpha in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                sample_dirichlet(alpha, 3, &mut rng),
                Err(AugmentError::InvalidParameter(_))
            ));
            assert!(matches!(
                sample_beta(alpha, 1.0, &mut rng),
                Err(AugmentError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_beta_in_unit_interval() {
        let mut rng = create_test_rng();
        for alpha in [0.01, 0.5, 1.0, 10.0] {
            for _ in 0..500 {
                let m = sample_beta(alpha, alpha, &mut rng).unwrap();
                assert!((0.0..=1.0).contains(&m));
            }
        }
    }

    #[test]
    fn test_symmetric_beta_mean() {
        let mut rng = create_test_rng();
        let n = 10_000;
        let mean = (0..n)
            .map(|_| sample_beta(2.0, 2.0, &mut rng).unwrap())
            .sum::<f64>()
            / n as f64;
        assert_abs_diff_eq!(mean, 0.5, epsilon = 0.02);
    }

    #[test]
    fn test_dirichlet_on_simplex() {
        let mut rng = create_test_rng();
        for alpha in [0.001, 0.1, 1.0, 5.0] {
            for k in 1..6 {
                let w = sample_dirichlet(alpha, k, &mut rng).unwrap();
                assert_eq!(w.len(), k);
                assert!(w.iter().all(|&x| x >= 0.0));
                assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_dirichlet_weights_are_exchangeable() {
        let mut rng = create_test_rng();
        let n = 5_000;
        let mut totals = [0.0; 3];
        for _ in 0..n {
            let w = sample_dirichlet(1.0, 3, &mut rng).unwrap();
            for (t, x) in totals.iter_mut().zip(w) {
                *t += x;
            }
        }
        for t in totals {
            assert_abs_diff_eq!(t / n as f64, 1.0 / 3.0, epsilon = 0.02);
        }
    }

    #[test]
    fn test_dirichlet_empty() {
        let mut rng = create_test_rng();
        assert!(sample_dirichlet(1.0, 0, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn test_same_seed_same_draws() {
        let mut a = create_test_rng();
        let mut b = create_test_rng();
        assert_eq!(
            sample_dirichlet(1.0, 3, &mut a).unwrap(),
            sample_dirichlet(1.0, 3, &mut b).unwrap()
        );
        assert_eq!(
            sample_beta(1.0, 1.0, &mut a).unwrap(),
            sample_beta(1.0, 1.0, &mut b).unwrap()
        );
    }
}
