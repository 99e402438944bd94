//! Capture and playback capability seams.
//!
//! The engine never acquires tab audio itself; it consumes streams from a
//! `StreamBroker` and writes the gain-biased copy to an `OutputSink`.  Real
//! capture backends live outside this crate.  The built-in `SyntheticBroker`
//! serves deterministic test tones so the daemon and TUI work out of the box.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::EngineError;

/// Generator rate for synthetic streams, matching a typical capture context.
pub const SAMPLE_RATE: u32 = 44_100;

/// Largest block one `read` call will hand over.  Keeps a stalled loop from
/// materialising minutes of backlog in one tick.
const MAX_BLOCK: u64 = 4 * 4096;

/// One acquired audio stream.  Mono f32 samples, -1.0..1.0.
pub trait AudioStream: Send {
    /// Append any newly available samples to `out`.  Non-blocking: returns
    /// 0 when nothing is pending.  `Err` means the stream has ended.
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize, EngineError>;

    /// Stop the underlying tracks.  Idempotent.
    fn stop(&mut self);
}

impl std::fmt::Debug for dyn AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AudioStream")
    }
}

/// Hands out streams by id.  Acquisition happens once per capture start,
/// never inside the control loop.
pub trait StreamBroker: Send + Sync {
    fn acquire(&self, stream_id: &str) -> Result<Box<dyn AudioStream>, EngineError>;
}

/// Destination for the gain-biased output path.
pub trait OutputSink: Send {
    fn write(&mut self, block: &[f32]);
}

/// Discards audio.  Stands in for the playback device in headless runs.
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&mut self, _block: &[f32]) {}
}

// ── synthetic streams ─────────────────────────────────────────────────────────

/// Broker for generated signals.  Stream ids:
///
///   silence
///   noise                      white noise at a fixed amplitude
///   sine:<hz>                  pure tone
///   step:<quiet>,<loud>,<ms>   tone alternating between two amplitudes
///
/// Anything else fails with `StreamUnavailable`.
pub struct SyntheticBroker;

impl StreamBroker for SyntheticBroker {
    fn acquire(&self, stream_id: &str) -> Result<Box<dyn AudioStream>, EngineError> {
        let signal = Signal::parse(stream_id).ok_or_else(|| {
            EngineError::StreamUnavailable(format!("unknown synthetic stream '{stream_id}'"))
        })?;
        Ok(Box::new(SyntheticStream::new(signal)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Signal {
    Silence,
    Noise { amplitude: f32 },
    Sine { hz: f32, amplitude: f32 },
    Step { quiet: f32, loud: f32, period: Duration },
}

impl Signal {
    fn parse(id: &str) -> Option<Self> {
        if id == "silence" {
            return Some(Signal::Silence);
        }
        if id == "noise" {
            return Some(Signal::Noise { amplitude: 0.5 });
        }
        if let Some(hz) = id.strip_prefix("sine:") {
            let hz: f32 = hz.parse().ok()?;
            if hz <= 0.0 {
                return None;
            }
            return Some(Signal::Sine {
                hz,
                amplitude: 0.5,
            });
        }
        if let Some(rest) = id.strip_prefix("step:") {
            let mut parts = rest.splitn(3, ',');
            let quiet: f32 = parts.next()?.parse().ok()?;
            let loud: f32 = parts.next()?.parse().ok()?;
            let ms: u64 = parts.next()?.parse().ok()?;
            if ms == 0 {
                return None;
            }
            return Some(Signal::Step {
                quiet,
                loud,
                period: Duration::from_millis(ms),
            });
        }
        None
    }
}

/// Wall-clock-paced generator: each `read` yields the samples that elapsed
/// since the previous one, so the control loop sees realistic block sizes.
struct SyntheticStream {
    signal: Signal,
    started: Instant,
    generated: u64,
    stopped: bool,
}

impl SyntheticStream {
    fn new(signal: Signal) -> Self {
        Self {
            signal,
            started: Instant::now(),
            generated: 0,
            stopped: false,
        }
    }

    fn value_at(&self, sample_idx: u64, rng: &mut impl Rng) -> f32 {
        let t = sample_idx as f32 / SAMPLE_RATE as f32;
        match &self.signal {
            Signal::Silence => 0.0,
            Signal::Noise { amplitude } => (rng.gen::<f32>() * 2.0 - 1.0) * amplitude,
            Signal::Sine { hz, amplitude } => {
                (2.0 * std::f32::consts::PI * hz * t).sin() * amplitude
            }
            Signal::Step {
                quiet,
                loud,
                period,
            } => {
                let phase = (t / period.as_secs_f32()) as u64;
                let amplitude = if phase % 2 == 0 { *quiet } else { *loud };
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * amplitude
            }
        }
    }
}

impl AudioStream for SyntheticStream {
    fn read(&mut self, out: &mut Vec<f32>) -> Result<usize, EngineError> {
        if self.stopped {
            return Err(EngineError::StreamUnavailable("stream stopped".into()));
        }
        let target = (self.started.elapsed().as_secs_f64() * SAMPLE_RATE as f64) as u64;
        let n = target.saturating_sub(self.generated).min(MAX_BLOCK);
        let mut rng = rand::thread_rng();
        out.reserve(n as usize);
        for i in 0..n {
            out.push(self.value_at(self.generated + i, &mut rng));
        }
        self.generated += n;
        Ok(n as usize)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
