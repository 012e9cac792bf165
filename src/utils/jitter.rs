//! Jitter helpers for spreading retries
//!
//! Retries from many jobs that fail together (a proxy outage, a rate limit
//! wave) must not come back in lockstep.

use rand::Rng;

/// Uniform jitter in `[0, max_jitter_secs)` drawn from the given generator
pub fn generate_jitter_secs_with<R: Rng + ?Sized>(rng: &mut R, max_jitter_secs: u64) -> u64 {
    if max_jitter_secs == 0 {
        return 0;
    }
    rng.random_range(0..max_jitter_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_jitter_secs() {
        let mut rng = rand::rng();
        assert_eq!(generate_jitter_secs_with(&mut rng, 0), 0);

        for _ in 0..200 {
            let jitter = generate_jitter_secs_with(&mut rng, 30);
            assert!(jitter < 30);
        }
    }
}
