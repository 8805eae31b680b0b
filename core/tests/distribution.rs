use riskquant_core::{
    distribution::{
        clamp, kurtosis, mean, percentile, sample_bounded, sample_lognormal, sample_normal,
        sample_triangular, sample_uniform, skewness, sorted_ascending, standard_deviation,
        Distribution,
    },
    error::StatsError,
    rng::{RngBank, SampleRng},
};

#[test]
fn percentile_endpoints_are_first_and_last() {
    let sorted = sorted_ascending(&[5.0, 1.0, 4.0, 2.0, 3.0]);
    assert_eq!(percentile(&sorted, 0.0).unwrap(), 1.0);
    assert_eq!(percentile(&sorted, 1.0).unwrap(), 5.0);

    let single = [42.0];
    assert_eq!(percentile(&single, 0.0).unwrap(), 42.0);
    assert_eq!(percentile(&single, 1.0).unwrap(), 42.0);
}

#[test]
fn percentile_is_nearest_rank_by_floor_index() {
    let sorted: Vec<f64> = (0..10).map(f64::from).collect();
    // floor(0.5 * 10) = 5, floor(0.95 * 10) = 9
    assert_eq!(percentile(&sorted, 0.5).unwrap(), 5.0);
    assert_eq!(percentile(&sorted, 0.95).unwrap(), 9.0);
    assert_eq!(percentile(&sorted, 0.25).unwrap(), 2.0);
}

#[test]
fn percentile_rejects_bad_input() {
    assert_eq!(
        percentile(&[], 0.5),
        Err(StatsError::InsufficientData { needed: 1, got: 0 })
    );
    assert!(matches!(percentile(&[1.0], 1.5), Err(StatsError::InvalidProbability(_))));
    assert!(matches!(percentile(&[1.0], -0.1), Err(StatsError::InvalidProbability(_))));
    assert!(percentile(&[1.0], f64::NAN).is_err());
}

#[test]
fn descriptive_statistics() {
    let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    assert!((mean(&values).unwrap() - 5.0).abs() < 1e-12);
    // Sample standard deviation: sqrt(32 / 7)
    assert!((standard_deviation(&values).unwrap() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);

    let symmetric = [1.0, 2.0, 3.0, 4.0, 5.0];
    assert!(skewness(&symmetric).unwrap().abs() < 1e-12);
    // Uniform-ish samples are platykurtic.
    assert!(kurtosis(&symmetric).unwrap() < 0.0);
}

#[test]
fn zero_variance_moments_are_zero() {
    let flat = [3.0; 6];
    assert_eq!(standard_deviation(&flat).unwrap(), 0.0);
    assert_eq!(skewness(&flat).unwrap(), 0.0);
    assert_eq!(kurtosis(&flat).unwrap(), 0.0);
}

#[test]
fn statistics_need_enough_samples() {
    assert!(mean(&[]).is_err());
    assert!(standard_deviation(&[1.0]).is_err());
    assert!(skewness(&[1.0, 2.0]).is_err());
    assert!(kurtosis(&[1.0, 2.0]).is_err());
}

#[test]
fn unknown_family_falls_back_to_uniform() {
    assert_eq!(Distribution::parse("normal"), Distribution::Normal);
    assert_eq!(Distribution::parse(" LogNormal "), Distribution::Lognormal);
    assert_eq!(Distribution::parse("cauchy"), Distribution::Uniform);
    assert_eq!(Distribution::lookup("cauchy"), None);
}

#[test]
fn samplers_respect_their_ranges() {
    let mut rng = SampleRng::new(11);
    for _ in 0..2_000 {
        let u = sample_uniform(&mut rng, -2.0, 3.0).unwrap();
        assert!((-2.0..3.0).contains(&u));
        let t = sample_triangular(&mut rng, 1.0, 4.0, 2.0).unwrap();
        assert!((1.0..=4.0).contains(&t));
        let l = sample_lognormal(&mut rng, 0.0, 0.5).unwrap();
        assert!(l > 0.0);
    }
    assert!(sample_uniform(&mut rng, 3.0, 1.0).is_err());
    assert!(sample_normal(&mut rng, 0.0, -1.0).is_err());
}

#[test]
fn bounded_normal_centres_on_midpoint() {
    let mut rng = SampleRng::new(5);
    let draws: Vec<f64> = (0..20_000)
        .map(|_| sample_bounded(&mut rng, Distribution::Normal, 10.0, 40.0).unwrap())
        .collect();
    let m = mean(&draws).unwrap();
    let sd = standard_deviation(&draws).unwrap();
    assert!((m - 25.0).abs() < 0.2, "mean {m}");
    assert!((sd - 5.0).abs() < 0.2, "stddev {sd}");
}

#[test]
fn bounded_lognormal_with_non_positive_midpoint_returns_midpoint() {
    let mut rng = SampleRng::new(5);
    let x = sample_bounded(&mut rng, Distribution::Lognormal, -4.0, 2.0).unwrap();
    assert_eq!(x, -1.0);
}

#[test]
fn same_seed_same_stream() {
    let mut a = SampleRng::new(99);
    let mut b = SampleRng::new(99);
    for _ in 0..100 {
        assert_eq!(
            sample_bounded(&mut a, Distribution::Triangular, 0.0, 1.0).unwrap(),
            sample_bounded(&mut b, Distribution::Triangular, 0.0, 1.0).unwrap()
        );
    }

    let bank = RngBank::new(42);
    assert_eq!(bank.seed_for(0), 42);
    assert_ne!(bank.next_seed(), bank.next_seed());
}

#[test]
fn clamp_never_panics() {
    assert_eq!(clamp(1.5, 0.0, 1.0), 1.0);
    assert_eq!(clamp(-0.5, 0.0, 1.0), 0.0);
    assert_eq!(clamp(0.25, 0.0, 1.0), 0.25);
}
