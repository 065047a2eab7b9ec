// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Jittered spacing between update cycles

use rand::Rng;
use std::time::Duration;

/// `base` plus a uniformly drawn offset in `[0, jitter)`.
/// Spreads checks of identically configured hosts over the jitter window.
pub fn next_delay<R: Rng + ?Sized>(base: Duration, jitter: Duration, rng: &mut R) -> Duration {
    let window = jitter.as_secs();
    if window == 0 {
        return base;
    }
    base + Duration::from_secs(rng.gen_range(0..window))
}
