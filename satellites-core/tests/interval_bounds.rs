use core::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use satellites_core::interval::{Interval, IntervalConfig, choose_weighted, sample_random};
use satellites_core::port::RngSource;

fn config_ms(fixed: u64, mean: u64, lower: u64, upper: u64) -> IntervalConfig {
    IntervalConfig {
        fixed: Duration::from_millis(fixed),
        mean_random: Duration::from_millis(mean),
        lower_limit: Duration::from_millis(lower),
        upper_limit: Duration::from_millis(upper),
    }
}

#[test]
fn samples_always_land_inside_the_window() {
    let configs = [
        config_ms(0, 2_000, 0, 6_000),
        config_ms(0, 500, 250, 1_000),
        config_ms(0, 10_000, 100, 200),
        config_ms(0, 50, 0, 1),
    ];

    for seed in 0..16 {
        let mut rng = RngSource::new(SmallRng::seed_from_u64(seed));
        for config in &configs {
            for _ in 0..200 {
                let sample = sample_random(config, &mut rng).expect("window reachable");
                assert!(
                    sample >= config.lower_limit && sample <= config.upper_limit,
                    "seed {seed}: {sample:?} outside {config:?}"
                );
            }
        }
    }
}

#[test]
fn totals_include_the_fixed_portion() {
    let mut rng = RngSource::new(SmallRng::seed_from_u64(7));
    let mut interval = Interval::new(config_ms(1_500, 800, 0, 3_000));

    for _ in 0..100 {
        let total = interval.next_total(&mut rng).expect("window reachable");
        assert_eq!(total, Duration::from_millis(1_500) + interval.last_random());
        assert!(interval.last_random() <= Duration::from_millis(3_000));
    }
}

#[test]
fn sample_mean_tracks_the_truncated_distribution() {
    // Wide window relative to the mean, so truncation barely shifts it.
    let mut rng = RngSource::new(SmallRng::seed_from_u64(42));
    let config = config_ms(0, 1_000, 0, 60_000);

    let draws = 4_000u32;
    let total: u128 = (0..draws)
        .map(|_| sample_random(&config, &mut rng).expect("window reachable").as_millis())
        .sum();
    let mean = total / u128::from(draws);

    assert!((850..=1_150).contains(&mean), "mean {mean} ms");
}

#[test]
fn weighted_choice_respects_zero_weights() {
    let mut rng = RngSource::new(SmallRng::seed_from_u64(3));
    let weights = [0, 60, 0, 40];

    for _ in 0..500 {
        let picked = choose_weighted(&weights, &mut rng).expect("non-empty weights");
        assert!(picked == 1 || picked == 3, "picked zero-weight index {picked}");
    }
}
