use std::time::Duration;

use rand::Rng;

use crate::config::RefreshConfig;

/// Delay until the next regular refresh: the nominal rate pulled forward by
/// a random amount in `[0, max_earlier]`. Never later than the nominal rate.
pub fn next_refresh_delay(cfg: &RefreshConfig) -> Duration {
    next_refresh_delay_with(cfg, &mut rand::thread_rng())
}

pub fn next_refresh_delay_with<R: Rng>(cfg: &RefreshConfig, rng: &mut R) -> Duration {
    let rate = cfg.policy_refresh_rate_ms;
    let max_earlier = cfg.policy_refresh_max_earlier_ms.min(rate);
    let earlier = if max_earlier == 0 {
        0
    } else {
        rng.gen_range(0..=max_earlier)
    };
    Duration::from_millis(rate - earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rate: u64, earlier: u64) -> RefreshConfig {
        RefreshConfig {
            policy_refresh_rate_ms: rate,
            policy_refresh_max_earlier_ms: earlier,
            ..RefreshConfig::default()
        }
    }

    #[test]
    fn jitter_only_pulls_refresh_earlier() {
        let c = cfg(10_000, 2_000);
        for _ in 0..500 {
            let d = next_refresh_delay(&c).as_millis() as u64;
            assert!((8_000..=10_000).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        assert_eq!(next_refresh_delay(&cfg(1234, 0)), Duration::from_millis(1234));
    }

    #[test]
    fn jitter_larger_than_rate_is_clamped() {
        let c = cfg(100, 5_000);
        for _ in 0..100 {
            assert!(next_refresh_delay(&c) <= Duration::from_millis(100));
        }
    }
}
