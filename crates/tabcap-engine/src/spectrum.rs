//! Frequency-analysis tap.
//!
//! Mirrors a byte-frequency analyser: a fixed-size window over the most
//! recent samples, Hann-windowed forward FFT, magnitudes mapped from
//! decibels onto 0-255.  One tap per audio graph, transform size fixed.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub const FFT_SIZE: usize = 2048;
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Decibel range mapped onto the byte scale.  Magnitudes at or below
/// `MIN_DB` read as 0, at `MAX_DB` as 255.
pub const MIN_DB: f32 = -130.0;
pub const MAX_DB: f32 = 0.0;

/// Top of the tap's magnitude range.
pub const NATIVE_MAX: f32 = 255.0;

/// Magnitude snapshot, refreshed in place each tick.  `bins` always holds
/// `BIN_COUNT` values while attached to a tap.
#[derive(Debug, Clone, Default)]
pub struct LevelSample {
    pub bins: Vec<u8>,
}

impl LevelSample {
    fn zeroed() -> Self {
        Self {
            bins: vec![0; BIN_COUNT],
        }
    }
}

pub struct SpectrumTap {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    ring: VecDeque<f32>,
    scratch: Vec<Complex<f32>>,
    sample: LevelSample,
}

impl SpectrumTap {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos())
            })
            .collect();
        Self {
            fft,
            window,
            ring: std::iter::repeat(0.0).take(FFT_SIZE).collect(),
            scratch: vec![Complex::default(); FFT_SIZE],
            sample: LevelSample::zeroed(),
        }
    }

    /// Feed raw samples.  Only the newest `FFT_SIZE` are kept.
    pub fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            self.ring.push_back(s);
        }
        while self.ring.len() > FFT_SIZE {
            self.ring.pop_front();
        }
    }

    /// Recompute byte magnitudes from the current window.
    pub fn snapshot(&mut self) -> &LevelSample {
        for ((slot, &s), &w) in self.scratch.iter_mut().zip(&self.ring).zip(&self.window) {
            *slot = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let norm = 1.0 / FFT_SIZE as f32;
        for (bin, c) in self.sample.bins.iter_mut().zip(&self.scratch[..BIN_COUNT]) {
            let mag = c.norm() * norm;
            let db = 20.0 * mag.max(1e-12).log10();
            let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB) * NATIVE_MAX;
            *bin = scaled.clamp(0.0, NATIVE_MAX) as u8;
        }
        &self.sample
    }

    /// The most recently computed snapshot, without recomputing.
    pub fn last(&self) -> &LevelSample {
        &self.sample
    }
}

impl Default for SpectrumTap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_zero() {
        let mut tap = SpectrumTap::new();
        tap.push(&vec![0.0; FFT_SIZE]);
        let sample = tap.snapshot();
        assert_eq!(sample.bins.len(), BIN_COUNT);
        assert!(sample.bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let mut tap = SpectrumTap::new();
        // Full-scale tone landing exactly on bin 32
        let tone: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * 32.0 * i as f32 / FFT_SIZE as f32).sin())
            .collect();
        tap.push(&tone);
        let sample = tap.snapshot();

        let peak_bin = sample
            .bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, 32);
        assert!(sample.bins[32] > 200, "peak bin is {}", sample.bins[32]);
        // Far away from the tone the spectrum is quiet
        assert!(sample.bins[600] < sample.bins[32] / 2);
    }

    #[test]
    fn push_keeps_newest_window() {
        let mut tap = SpectrumTap::new();
        // Loud tone first, then a full window of silence on top of it
        let tone: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * 32.0 * i as f32 / FFT_SIZE as f32).sin())
            .collect();
        tap.push(&tone);
        tap.push(&vec![0.0; FFT_SIZE]);
        let sample = tap.snapshot();
        assert!(sample.bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn louder_signal_reads_higher() {
        let mut quiet_tap = SpectrumTap::new();
        let mut loud_tap = SpectrumTap::new();
        let tone = |amp: f32| -> Vec<f32> {
            (0..FFT_SIZE)
                .map(|i| {
                    amp * (2.0 * std::f32::consts::PI * 32.0 * i as f32 / FFT_SIZE as f32).sin()
                })
                .collect()
        };
        quiet_tap.push(&tone(0.01));
        loud_tap.push(&tone(0.9));
        let quiet = quiet_tap.snapshot().bins[32];
        let loud = loud_tap.snapshot().bins[32];
        assert!(loud > quiet);
    }
}
