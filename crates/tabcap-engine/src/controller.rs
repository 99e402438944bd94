//! Proportional gain controller.
//!
//! Converts the user-facing cap (0-130) onto the tap's magnitude range and
//! reacts to the instantaneous average only: no integral or derivative term,
//! no hysteresis.  Gain values are a signed bias on the output path
//! (0.0 = neutral, negative = attenuation).

use tabcap_proto::protocol::MAX_CAP;
use tracing::trace;

use crate::spectrum::NATIVE_MAX;

/// Attenuation bias present in every overshoot correction.
pub const BASELINE_GAIN: f32 = -0.5;

/// Gain applied while the average sits at or below the scaled cap.  Slightly
/// below neutral: the capper never fully removes its bias.
pub const RESTING_GAIN: f32 = -0.25;

/// Hard lower bound on emitted gain.
pub const GAIN_FLOOR: f32 = -2.0;

#[derive(Debug, Clone, Copy)]
pub struct GainController {
    baseline: f32,
    resting: f32,
    floor: f32,
}

impl Default for GainController {
    fn default() -> Self {
        Self::new(BASELINE_GAIN, RESTING_GAIN, GAIN_FLOOR)
    }
}

impl GainController {
    pub fn new(baseline: f32, resting: f32, floor: f32) -> Self {
        Self {
            baseline,
            resting,
            floor,
        }
    }

    /// The cap mapped linearly onto the tap's 0-255 magnitude range.
    /// Monotonic in `cap`; 130 maps to the top of the range.
    pub fn scaled_cap(cap: u8) -> f32 {
        NATIVE_MAX * cap as f32 / MAX_CAP as f32
    }

    /// Next gain for one tick.
    ///
    /// Overshoot (`average > scaled_cap`) attenuates proportionally:
    /// `baseline - scaled_cap / average`, floored at `GAIN_FLOOR`.  The
    /// division is safe: the branch implies `average > 0`.  Anything at or
    /// below the cap relaxes to `resting` exactly, regardless of `average`.
    ///
    /// Memoryless; `previous` only feeds the trace log.
    pub fn next(&self, average: f32, cap: u8, previous: f32) -> f32 {
        let scaled = Self::scaled_cap(cap);
        let next = if average > scaled {
            (self.baseline - scaled / average).max(self.floor)
        } else {
            self.resting
        };
        if next != previous {
            trace!(
                "gain {:.4} -> {:.4} (average {:.1}, scaled cap {:.1})",
                previous,
                next,
                average,
                scaled
            );
        }
        next
    }
}
