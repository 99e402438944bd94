//! Audio graph: one captured stream, one analysis tap, one gain-biased
//! output path.
//!
//! ```text
//!   stream ──► tap (FFT magnitudes)
//!      └─────► output sink, biased by (1 + gain)
//! ```
//!
//! The pull-based shape of the engine collapses the wiring into `pump`:
//! each tick drains the stream once, feeding the tap and the sink from the
//! same block.  A graph is inert once closed and is never reused.

use crate::error::EngineError;
use crate::spectrum::{LevelSample, SpectrumTap};
use crate::stream::{AudioStream, OutputSink};

pub struct AudioGraph {
    stream: Box<dyn AudioStream>,
    tap: SpectrumTap,
    sink: Box<dyn OutputSink>,
    gain: f32,
    buf: Vec<f32>,
    biased: Vec<f32>,
    closed: bool,
}

impl AudioGraph {
    /// Wire a fresh graph onto `stream`.  Fails with `StreamUnavailable`
    /// when the stream is already dead; the probe block it reads on success
    /// is not lost, it seeds the tap and the sink.
    pub fn open(
        mut stream: Box<dyn AudioStream>,
        sink: Box<dyn OutputSink>,
        initial_gain: f32,
    ) -> Result<Self, EngineError> {
        let mut probe = Vec::new();
        stream.read(&mut probe)?;
        let mut graph = Self {
            stream,
            tap: SpectrumTap::new(),
            sink,
            gain: initial_gain,
            buf: Vec::new(),
            biased: Vec::new(),
            closed: false,
        };
        graph.feed(&probe);
        Ok(graph)
    }

    /// Drain newly available samples into the tap and the output path.
    /// Returns how many arrived; `Err` when the stream has ended.
    pub fn pump(&mut self) -> Result<usize, EngineError> {
        if self.closed {
            debug_assert!(false, "pump on closed graph");
            return Err(EngineError::GraphClosed);
        }
        self.buf.clear();
        let n = self.stream.read(&mut self.buf)?;
        if n > 0 {
            let block = std::mem::take(&mut self.buf);
            self.feed(&block);
            self.buf = block;
        }
        Ok(n)
    }

    fn feed(&mut self, block: &[f32]) {
        if block.is_empty() {
            return;
        }
        self.tap.push(block);
        let bias = 1.0 + self.gain;
        self.biased.clear();
        self.biased.extend(block.iter().map(|&s| s * bias));
        self.sink.write(&self.biased);
    }

    /// Current magnitude snapshot from the tap.  Side-effect-free with
    /// respect to gain.  Inert on a closed graph.
    pub fn sample(&mut self) -> &LevelSample {
        if self.closed {
            debug_assert!(false, "sample on closed graph");
            return self.tap.last();
        }
        self.tap.snapshot()
    }

    /// Set the output-path bias.  Applies to blocks pumped after this call,
    /// never retroactively to audio already written.
    pub fn set_gain(&mut self, gain: f32) {
        if self.closed {
            debug_assert!(false, "set_gain on closed graph");
            return;
        }
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Stop the stream's tracks and release the graph.  Closing twice is a
    /// no-op, not an error.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.stop();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedStream {
        blocks: VecDeque<Vec<f32>>,
        die_when_empty: bool,
        stops: Arc<AtomicUsize>,
    }

    impl ScriptedStream {
        fn new(blocks: Vec<Vec<f32>>) -> (Self, Arc<AtomicUsize>) {
            let stops = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    blocks: blocks.into(),
                    die_when_empty: false,
                    stops: Arc::clone(&stops),
                },
                stops,
            )
        }

        fn dead() -> Self {
            Self {
                blocks: VecDeque::new(),
                die_when_empty: true,
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl AudioStream for ScriptedStream {
        fn read(&mut self, out: &mut Vec<f32>) -> Result<usize, EngineError> {
            match self.blocks.pop_front() {
                Some(block) => {
                    let n = block.len();
                    out.extend(block);
                    Ok(n)
                }
                None if self.die_when_empty => {
                    Err(EngineError::StreamUnavailable("scripted death".into()))
                }
                None => Ok(0),
            }
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Vec<f32>>>>);

    impl OutputSink for RecordingSink {
        fn write(&mut self, block: &[f32]) {
            self.0.lock().unwrap().push(block.to_vec());
        }
    }

    #[test]
    fn open_fails_on_dead_stream() {
        let result = AudioGraph::open(Box::new(ScriptedStream::dead()), Box::new(RecordingSink::default()), 0.0);
        assert!(matches!(result, Err(EngineError::StreamUnavailable(_))));
    }

    #[test]
    fn close_is_idempotent_and_stops_once() {
        let (stream, stops) = ScriptedStream::new(vec![vec![0.0; 4]]);
        let mut graph =
            AudioGraph::open(Box::new(stream), Box::new(RecordingSink::default()), 0.0).unwrap();
        graph.close();
        graph.close();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_the_stream() {
        let (stream, stops) = ScriptedStream::new(vec![]);
        let graph =
            AudioGraph::open(Box::new(stream), Box::new(RecordingSink::default()), 0.0).unwrap();
        drop(graph);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gain_applies_to_next_block_not_retroactively() {
        let (stream, _) = ScriptedStream::new(vec![vec![], vec![1.0, 1.0], vec![1.0, 1.0]]);
        let sink = RecordingSink::default();
        let written = Arc::clone(&sink.0);
        let mut graph = AudioGraph::open(Box::new(stream), Box::new(sink), 0.0).unwrap();

        graph.pump().unwrap();
        graph.set_gain(-0.5);
        graph.pump().unwrap();

        let blocks = written.lock().unwrap();
        // First block at neutral bias (1 + 0.0), second at 1 + (-0.5)
        assert_eq!(blocks[0], vec![1.0, 1.0]);
        assert_eq!(blocks[1], vec![0.5, 0.5]);
    }

    #[test]
    fn idle_stream_pumps_zero() {
        let (stream, _) = ScriptedStream::new(vec![]);
        let mut graph =
            AudioGraph::open(Box::new(stream), Box::new(RecordingSink::default()), 0.0).unwrap();
        assert_eq!(graph.pump().unwrap(), 0);
    }

    #[test]
    fn pump_surfaces_stream_end() {
        let (mut stream, _) = ScriptedStream::new(vec![vec![0.0; 4]]);
        stream.die_when_empty = true;
        let mut graph =
            AudioGraph::open(Box::new(stream), Box::new(RecordingSink::default()), 0.0).unwrap();
        // The open probe consumed the only block; the next pump hits the end
        assert!(matches!(
            graph.pump(),
            Err(EngineError::StreamUnavailable(_))
        ));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "pump on closed graph")]
    fn pump_after_close_asserts() {
        let (stream, _) = ScriptedStream::new(vec![]);
        let mut graph =
            AudioGraph::open(Box::new(stream), Box::new(RecordingSink::default()), 0.0).unwrap();
        graph.close();
        let _ = graph.pump();
    }

    #[test]
    fn sample_reflects_pumped_audio() {
        use crate::spectrum::FFT_SIZE;
        let tone: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * 32.0 * i as f32 / FFT_SIZE as f32).sin())
            .collect();
        let (stream, _) = ScriptedStream::new(vec![tone]);
        let mut graph =
            AudioGraph::open(Box::new(stream), Box::new(RecordingSink::default()), 0.0).unwrap();
        graph.pump().unwrap();
        let sample = graph.sample();
        assert!(sample.bins.iter().any(|&b| b > 0));
    }
}
