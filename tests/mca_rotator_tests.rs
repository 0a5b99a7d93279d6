use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rotated_eof::{
    ComplexMca, ComplexMcaRotator, ComputePolicy, Mca, McaConfig, McaRotator, ModeSelection, RotationError,
    RotatorConfig,
};
use std::f64::consts::PI;

const N_SAMPLES: usize = 240;

fn bump(n: usize, center: f64, width: f64) -> Array1<f64> {
    let v = Array1::from_shape_fn(n, |j| (-((j as f64 - center) / width).powi(2)).exp());
    let norm = v.dot(&v).sqrt();
    v / norm
}

/// Two fields of rank two driven by the same pair of time series, plus a small
/// amount of independent noise in the right field.
fn coupled_fields() -> (Array2<f64>, Array2<f64>) {
    let left_a = bump(20, 4.0, 2.0);
    let left_b = bump(20, 14.0, 3.0);
    let right_a = bump(12, 2.0, 1.5);
    let right_b = bump(12, 9.0, 2.0);
    let series = |i: usize| {
        let theta = 2.0 * PI * i as f64 / N_SAMPLES as f64;
        let t1 = (2.0 * theta).sin() + 0.6 * (5.0 * theta).cos();
        let t2 = 0.7 * (2.0 * theta).sin() + (9.0 * theta).sin();
        (t1, t2)
    };
    let left = Array2::from_shape_fn((N_SAMPLES, 20), |(i, j)| {
        let (t1, t2) = series(i);
        t1 * left_a[j] + t2 * left_b[j] + 1.5
    });
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let noise = Array2::random_using((N_SAMPLES, 12), Normal::new(0.0, 0.01).unwrap(), &mut rng);
    let right = Array2::from_shape_fn((N_SAMPLES, 12), |(i, j)| {
        let (t1, t2) = series(i);
        2.0 * t1 * right_a[j] - t2 * right_b[j]
    }) + noise;
    (left, right)
}

fn config(power: u32, compute: ComputePolicy) -> RotatorConfig {
    RotatorConfig {
        n_modes: 2,
        power,
        compute,
        ..RotatorConfig::default()
    }
}

fn fit_mca(left: &Array2<f64>, right: &Array2<f64>) -> Mca<f64> {
    Mca::<f64>::fit(left.view(), right.view(), &McaConfig { n_modes: 2, ..McaConfig::default() }).unwrap()
}

#[test]
fn test_rotated_mca_orders_by_squared_covariance() {
    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    for power in [1, 3] {
        let mut rotator = McaRotator::new(config(power, ComputePolicy::Eager));
        rotator.fit(&mca).unwrap();
        let squared = rotator.squared_covariance().unwrap();
        assert!(squared[0] >= squared[1]);
        let fraction = rotator.squared_covariance_fraction().unwrap();
        assert!(fraction.iter().all(|&f| f > 0.0));

        let (left_components, right_components) = rotator.components().unwrap();
        assert_eq!(left_components.dim(), (20, 2));
        assert_eq!(right_components.dim(), (12, 2));
        for col in left_components.columns().into_iter().chain(right_components.columns()) {
            assert_abs_diff_eq!(col.dot(&col).sqrt(), 1.0, epsilon = 1e-10);
        }
        let (left_norms, right_norms) = rotator.norms().unwrap();
        let singular_values = rotator.singular_values().unwrap();
        for k in 0..2 {
            assert_abs_diff_eq!(singular_values[k], left_norms[k] * right_norms[k], epsilon = 1e-12);
        }
    }
}

#[test]
fn test_varimax_preserves_stacked_loading_variance() {
    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    let mut rotator = McaRotator::new(config(1, ComputePolicy::Eager));
    rotator.fit(&mca).unwrap();
    let (left_norms, right_norms) = rotator.norms().unwrap();
    let rotated_total: f64 = left_norms.iter().chain(right_norms.iter()).map(|n| n * n).sum();
    // Each unrotated mode contributes σ to both fields.
    let unrotated_total = 2.0 * mca.singular_values().sum();
    assert_abs_diff_eq!(rotated_total, unrotated_total, epsilon = 1e-8 * unrotated_total);
}

#[test]
fn test_transform_reproduces_fit_scores() {
    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    for power in [1, 4] {
        let mut rotator = McaRotator::new(config(power, ComputePolicy::Eager));
        rotator.fit(&mca).unwrap();
        let (left_scores, right_scores) = rotator.scores().unwrap();
        let (left_projected, right_projected) = rotator.transform(Some(left.view()), Some(right.view())).unwrap();
        for (a, b) in left_projected.unwrap().iter().zip(left_scores.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
        for (a, b) in right_projected.unwrap().iter().zip(right_scores.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
        let (only_left, no_right) = rotator.transform(Some(left.view()), None).unwrap();
        assert!(only_left.is_some());
        assert!(no_right.is_none());
    }
}

#[test]
fn test_inverse_transform_rebuilds_rank_two_field() {
    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    for power in [1, 2] {
        let mut rotator = McaRotator::new(config(power, ComputePolicy::Deferred));
        rotator.fit(&mca).unwrap();
        let (left_rebuilt, right_rebuilt) = rotator.inverse_transform(&ModeSelection::All).unwrap();
        // The left field is exactly rank two.
        for (a, b) in left_rebuilt.iter().zip(left.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
        // The right field carries noise outside the retained subspace.
        for (a, b) in right_rebuilt.iter().zip(right.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 0.1);
        }
    }
}

#[test]
fn test_patterns_are_correlations() {
    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    let mut rotator = McaRotator::new(config(1, ComputePolicy::Eager));
    rotator.fit(&mca).unwrap();

    let (left_homogeneous, right_homogeneous) = rotator.homogeneous_patterns().unwrap();
    let (left_heterogeneous, right_heterogeneous) = rotator.heterogeneous_patterns().unwrap();
    assert_eq!(left_homogeneous.dim(), (20, 2));
    assert_eq!(right_homogeneous.dim(), (12, 2));
    assert_eq!(left_heterogeneous.dim(), (20, 2));
    assert_eq!(right_heterogeneous.dim(), (12, 2));
    for pattern in [&left_homogeneous, &right_homogeneous, &left_heterogeneous, &right_heterogeneous] {
        assert!(pattern.iter().all(|c| c.abs() <= 1.0 + 1e-12));
    }
    // Some feature of each field is strongly tied to its own leading rotated mode.
    assert!(left_homogeneous.column(0).iter().any(|c| c.abs() > 0.9));
    assert!(right_homogeneous.column(0).iter().any(|c| c.abs() > 0.9));
}

#[test]
fn test_errors_before_fit_and_on_bad_configuration() {
    let rotator = McaRotator::<f64>::new(config(1, ComputePolicy::Eager));
    assert!(matches!(rotator.scores(), Err(RotationError::NotFitted(_))));
    assert!(matches!(
        rotator.inverse_transform(&ModeSelection::All),
        Err(RotationError::NotFitted(_))
    ));
    assert!(matches!(rotator.homogeneous_patterns(), Err(RotationError::NotFitted(_))));

    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    let mut too_many = McaRotator::new(RotatorConfig { n_modes: 5, ..RotatorConfig::default() });
    assert!(matches!(too_many.fit(&mca), Err(RotationError::InvalidConfig(_))));
}

#[test]
fn test_unfitted_complex_rotator_reports_not_fitted() {
    let rotator = ComplexMcaRotator::new(config(1, ComputePolicy::Eager));
    assert!(matches!(rotator.homogeneous_patterns(), Err(RotationError::NotFitted(_))));
    assert!(matches!(rotator.heterogeneous_patterns(), Err(RotationError::NotFitted(_))));
    let (left, right) = coupled_fields();
    assert!(matches!(
        rotator.transform(Some(left.view()), Some(right.view())),
        Err(RotationError::NotFitted(_))
    ));
}

#[test]
fn test_deferred_scores_match_eager_scores() {
    let (left, right) = coupled_fields();
    let mca = fit_mca(&left, &right);
    let mut eager = McaRotator::new(config(3, ComputePolicy::Eager));
    eager.fit(&mca).unwrap();
    let mut deferred = McaRotator::new(config(3, ComputePolicy::Deferred));
    deferred.fit(&mca).unwrap();
    deferred.compute().unwrap();
    let (eager_left, eager_right) = eager.scores().unwrap();
    let (deferred_left, deferred_right) = deferred.scores().unwrap();
    for (a, b) in deferred_left.iter().zip(eager_left.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
    for (a, b) in deferred_right.iter().zip(eager_right.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn test_complex_mca_refuses_real_only_operations() {
    let (left, right) = coupled_fields();
    let mca = ComplexMca::fit(left.view(), right.view(), &McaConfig { n_modes: 2, ..McaConfig::default() }).unwrap();
    let mut rotator = ComplexMcaRotator::new(config(1, ComputePolicy::Eager));
    rotator.fit(&mca).unwrap();

    assert!(matches!(
        rotator.transform(Some(left.view()), None),
        Err(RotationError::NotImplemented(_))
    ));
    assert!(matches!(rotator.homogeneous_patterns(), Err(RotationError::NotImplemented(_))));
    assert!(matches!(rotator.heterogeneous_patterns(), Err(RotationError::NotImplemented(_))));

    let (left_rebuilt, _) = rotator.inverse_transform(&ModeSelection::All).unwrap();
    for (a, b) in left_rebuilt.iter().zip(left.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
    let (left_phase, right_phase) = rotator.scores_phase().unwrap();
    assert_eq!(left_phase.dim(), (N_SAMPLES, 2));
    assert_eq!(right_phase.dim(), (N_SAMPLES, 2));
}
