//! Per-session control loop.
//!
//! `Stopped → Running → Stopped` around one spawned task that owns the
//! session's audio graph exclusively.  Each tick, in order: pump the graph,
//! sample, decide the next gain, apply it, then (visuals permitting) publish
//! a spectrum frame.  The tick body has no await points, so a tick that has
//! begun always runs to completion; cancellation lands on the clock wait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use tabcap_proto::protocol::{TabId, VisualFrame};

use crate::controller::GainController;
use crate::core::{EngineBroadcast, EngineEvent};
use crate::graph::AudioGraph;
use crate::sampler;
use crate::session::SharedControls;

/// Frame-cadence capability the loop consumes, not implements.
pub trait FrameClock: Send + 'static {
    fn tick(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Wall-clock frame timer.  A tick that overruns its slot drops the missed
/// frames instead of queueing a backlog; only the most recent sample is
/// meaningful.
pub struct IntervalClock {
    interval: tokio::time::Interval,
}

impl IntervalClock {
    pub fn new(hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / hz.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl FrameClock for IntervalClock {
    fn tick(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.interval.tick().await;
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

pub struct ControlLoop {
    task: Option<JoinHandle<()>>,
}

impl ControlLoop {
    /// Consume the graph and start ticking.  Returns with the loop already
    /// `Running`; the handle is the cancellation token `stop` uses.
    pub fn start<C: FrameClock>(
        tab_id: TabId,
        mut graph: AudioGraph,
        controls: Arc<SharedControls>,
        controller: GainController,
        mut clock: C,
        event_tx: mpsc::Sender<EngineEvent>,
        broadcast_tx: broadcast::Sender<EngineBroadcast>,
    ) -> Self {
        let task = tokio::spawn(async move {
            debug!("control loop for tab {}: running", tab_id);
            loop {
                clock.tick().await;

                if let Err(e) = graph.pump() {
                    info!("control loop for tab {}: stream ended: {}", tab_id, e);
                    graph.close();
                    let _ = event_tx
                        .send(EngineEvent::LoopEnded {
                            tab_id,
                            reason: e.to_string(),
                        })
                        .await;
                    break;
                }

                let visuals_on = !controls.visual_hidden();
                let (average, bins) = {
                    let sample = graph.sample();
                    let shown = sampler::cutoff_len(sample.bins.len());
                    (
                        sampler::average(sample),
                        visuals_on.then(|| sample.bins[..shown].to_vec()),
                    )
                };

                let cap = controls.cap();
                let gain = controller.next(average, cap, controls.gain());
                graph.set_gain(gain);
                controls.store_gain(gain);

                if let Some(bins) = bins {
                    let frame = VisualFrame {
                        tab_id,
                        bins,
                        average,
                        corrected: sampler::corrected_average(average, gain),
                        scaled_cap: GainController::scaled_cap(cap),
                        gain,
                    };
                    let _ = broadcast_tx.send(EngineBroadcast::Visual(Arc::new(frame)));
                }
            }
        });
        Self { task: Some(task) }
    }

    pub fn state(&self) -> LoopState {
        match &self.task {
            Some(task) if !task.is_finished() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Cancel the loop and wait for the task to wind down.  The graph drops
    /// with the task, which closes its stream.  After this returns no
    /// further sampler or gain calls happen for the session.  Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::graph::AudioGraph;
    use crate::spectrum::FFT_SIZE;
    use crate::stream::{AudioStream, NullSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits the same block on every read; optionally dies after a number
    /// of reads.  Counts reads and stops.
    struct RepeatingStream {
        block: Vec<f32>,
        die_after_reads: Option<usize>,
        reads: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl RepeatingStream {
        fn tone() -> Self {
            let block = (0..FFT_SIZE)
                .map(|i| (2.0 * std::f32::consts::PI * 32.0 * i as f32 / FFT_SIZE as f32).sin())
                .collect();
            Self {
                block,
                die_after_reads: None,
                reads: Arc::new(AtomicUsize::new(0)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl AudioStream for RepeatingStream {
        fn read(&mut self, out: &mut Vec<f32>) -> Result<usize, EngineError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(limit) = self.die_after_reads {
                if n > limit {
                    return Err(EngineError::StreamUnavailable("test stream ended".into()));
                }
            }
            out.extend(&self.block);
            Ok(self.block.len())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn harness() -> (
        Arc<SharedControls>,
        mpsc::Receiver<EngineEvent>,
        mpsc::Sender<EngineEvent>,
        broadcast::Sender<EngineBroadcast>,
        broadcast::Receiver<EngineBroadcast>,
    ) {
        let controls = Arc::new(SharedControls::new(130, false));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(512);
        (controls, event_rx, event_tx, broadcast_tx, broadcast_rx)
    }

    fn start_loop(
        stream: RepeatingStream,
        controls: &Arc<SharedControls>,
        event_tx: mpsc::Sender<EngineEvent>,
        broadcast_tx: broadcast::Sender<EngineBroadcast>,
    ) -> (ControlLoop, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let reads = Arc::clone(&stream.reads);
        let stops = Arc::clone(&stream.stops);
        let graph = AudioGraph::open(Box::new(stream), Box::new(NullSink), 0.0).unwrap();
        let control_loop = ControlLoop::start(
            1,
            graph,
            Arc::clone(controls),
            GainController::default(),
            IntervalClock::new(60),
            event_tx,
            broadcast_tx,
        );
        (control_loop, reads, stops)
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let (controls, _event_rx, event_tx, broadcast_tx, _broadcast_rx) = harness();
        let (mut control_loop, reads, stops) =
            start_loop(RepeatingStream::tone(), &controls, event_tx, broadcast_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(control_loop.state(), LoopState::Running);
        assert!(reads.load(Ordering::SeqCst) > 1);

        control_loop.stop().await;
        assert_eq!(control_loop.state(), LoopState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1, "graph closed on stop");
        let reads_at_stop = reads.load(Ordering::SeqCst);

        // Stopping again is a no-op, and no tick ever runs afterwards
        control_loop.stop().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(control_loop.state(), LoopState::Stopped);
        assert_eq!(reads.load(Ordering::SeqCst), reads_at_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_death_ends_loop_and_reports() {
        let (controls, mut event_rx, event_tx, broadcast_tx, _broadcast_rx) = harness();
        let mut stream = RepeatingStream::tone();
        stream.die_after_reads = Some(3);
        let (control_loop, _reads, stops) = start_loop(stream, &controls, event_tx, broadcast_tx);

        let event = event_rx.recv().await.expect("loop reports its end");
        match event {
            EngineEvent::LoopEnded { tab_id, .. } => assert_eq!(tab_id, 1),
            other => panic!("unexpected event: {:?}", other),
        }
        // The loop closed its graph on the way out
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(control_loop.state(), LoopState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn visual_toggle_felt_next_tick_without_restart() {
        let (controls, _event_rx, event_tx, broadcast_tx, mut broadcast_rx) = harness();
        let (control_loop, _reads, _stops) =
            start_loop(RepeatingStream::tone(), &controls, event_tx, broadcast_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut saw_frame = false;
        while let Ok(msg) = broadcast_rx.try_recv() {
            if matches!(msg, EngineBroadcast::Visual(_)) {
                saw_frame = true;
            }
        }
        assert!(saw_frame, "frames flow while visuals are on");

        controls.set_visual_hidden(true);
        // Let any in-flight tick complete, then drain what it produced
        tokio::time::sleep(Duration::from_millis(50)).await;
        while broadcast_rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            broadcast_rx.try_recv().is_err(),
            "no frames while visuals are hidden"
        );
        assert_eq!(control_loop.state(), LoopState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn cap_change_reaches_gain_next_tick() {
        let (controls, _event_rx, event_tx, broadcast_tx, _broadcast_rx) = harness();
        let (_control_loop, _reads, _stops) =
            start_loop(RepeatingStream::tone(), &controls, event_tx, broadcast_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Tone average is far below a wide-open cap
        assert_eq!(controls.gain(), crate::controller::RESTING_GAIN);

        // A zero cap makes any audible average an overshoot
        controls.set_cap(0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controls.gain(), crate::controller::BASELINE_GAIN);
    }
}
