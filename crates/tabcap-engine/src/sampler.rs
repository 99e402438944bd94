//! Level sampler: reduces a magnitude snapshot to one scalar per tick.

use crate::spectrum::{LevelSample, NATIVE_MAX};

/// Fraction of leading bins that contribute to the average.  The top of the
/// spectrum is mostly noise floor at music/speech content; it is excluded
/// from the sum but still counts toward the divisor (see `average`).
pub const SPECTRUM_CUTOFF: f32 = 0.7125;

/// Number of leading bins below the cutoff for a snapshot of `len` bins.
pub fn cutoff_len(len: usize) -> usize {
    ((len as f32 * SPECTRUM_CUTOFF).ceil() as usize).min(len)
}

/// Mean magnitude of the snapshot, 0.0..=255.0.
///
/// Sums bins below `len * SPECTRUM_CUTOFF` and divides by the full bin
/// count.  The excluded tail dilutes the mean; the cap tuning bakes that
/// dilution in, so the divisor is deliberately not the summed count.
pub fn average(sample: &LevelSample) -> f32 {
    let bins = &sample.bins;
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins[..cutoff_len(bins.len())].iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32
}

/// The average as it would read after the output path's gain bias.  The
/// output carries `1 + gain` of the source (direct path plus gain path), so
/// this is the level the listener actually gets, clamped to the tap range.
pub fn corrected_average(average: f32, gain: f32) -> f32 {
    (average * (1.0 + gain)).clamp(0.0, NATIVE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_of(bins: Vec<u8>) -> LevelSample {
        LevelSample { bins }
    }

    #[test]
    fn empty_snapshot_averages_zero() {
        assert_eq!(average(&sample_of(vec![])), 0.0);
    }

    #[test]
    fn cutoff_rounds_up_and_never_exceeds_len() {
        assert_eq!(cutoff_len(8), 6); // ceil(5.7)
        assert_eq!(cutoff_len(1024), 730); // ceil(729.6)
        assert_eq!(cutoff_len(0), 0);
        assert_eq!(cutoff_len(1), 1);
    }

    #[test]
    fn uniform_snapshot_is_diluted_by_tail() {
        // 8 bins, all 80: cutoff ceil(8 * 0.7125) = 6 bins summed, divided by 8
        let avg = average(&sample_of(vec![80; 8]));
        assert!((avg - (6.0 * 80.0 / 8.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn trailing_bins_do_not_contribute() {
        let mut bins = vec![0u8; 8];
        bins[6] = 255;
        bins[7] = 255;
        assert_eq!(average(&sample_of(bins)), 0.0);
    }

    #[test]
    fn leading_bins_do_contribute() {
        let mut bins = vec![0u8; 8];
        bins[0] = 160;
        assert!((average(&sample_of(bins)) - 20.0).abs() < f32::EPSILON);
    }

    #[test]
    fn average_bounded_by_native_range() {
        let avg = average(&sample_of(vec![255; 1024]));
        assert!(avg > 0.0 && avg <= NATIVE_MAX);
    }

    #[test]
    fn corrected_average_applies_output_bias() {
        // Neutral gain leaves the level untouched
        assert_eq!(corrected_average(200.0, 0.0), 200.0);
        // Resting bias trims it
        assert!((corrected_average(200.0, -0.25) - 150.0).abs() < f32::EPSILON);
        // Deep attenuation clamps at silence, not negative
        assert_eq!(corrected_average(200.0, -1.5), 0.0);
    }
}
