use std::time::Duration;

use rand::Rng;

/// Pacing between job-status polls: exponential growth from a floor to a
/// ceiling, with full jitter so a fleet of clients does not poll in step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollPacing {
    floor: Duration,
    ceiling: Duration,
}

impl PollPacing {
    pub(crate) fn new(floor: Duration, ceiling: Duration) -> Self {
        Self { floor, ceiling }
    }

    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let floor_ms = self.floor.as_millis().min(u128::from(u64::MAX)) as u64;
        let ceiling_ms = self.ceiling.as_millis().min(u128::from(u64::MAX)) as u64;
        let grown = floor_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(ceiling_ms);
        Duration::from_millis(rng.gen_range(floor_ms.min(grown)..=grown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn delays_stay_between_floor_and_ceiling() {
        let pacing = PollPacing::new(Duration::from_millis(500), Duration::from_secs(8));
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..12 {
            let delay = pacing.delay_with_rng(attempt, &mut rng);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_secs(8));
        }
    }
}
