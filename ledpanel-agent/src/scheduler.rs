//! Fixed-interval frame driver
//!
//! Handles:
//! - Picking up the latest compiled program at the start of every tick
//! - Pulling a metrics snapshot only when a slot is metric-keyed
//! - Evaluating every slot and publishing the frame to a sink
//! - Restarting the animation clock when the timing parameters change
//!
//! The stop signal is honored at the sleep boundary, never mid-tick.

use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::color::{ColorSampler, OsRandomSampler, Rgb};
use crate::metrics::{MetricsCache, MetricsSnapshot};
use crate::program::{evaluate_tick_into, PanelProgram};

/// One published color array
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub tick: u64,
    pub elapsed_secs: f64,
    pub leds: Vec<Rgb>,
    /// Readings used for this frame, in presentation units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

/// Outward hand-off for frames
pub trait FrameSink: Send {
    fn publish(&mut self, frame: &Frame) -> anyhow::Result<()>;
}

/// One JSON frame per line. Lines are handed to a writer task so a slow
/// consumer never stalls the tick loop.
pub struct JsonLinesSink {
    lines: mpsc::UnboundedSender<Vec<u8>>,
}

impl JsonLinesSink {
    /// Spawn the writer task. It finishes, returning the writer, once the sink is dropped.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<std::io::Result<W>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_lines(writer, rx));
        (Self { lines: tx }, task)
    }
}

async fn write_lines<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<Vec<u8>>) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(writer)
}

impl FrameSink for JsonLinesSink {
    fn publish(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.lines
            .send(line)
            .map_err(|_| anyhow::anyhow!("Frame writer stopped"))
    }
}

/// Logs frames at debug level
#[derive(Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn publish(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let leds: Vec<String> = frame.leds.iter().map(Rgb::to_string).collect();
        debug!("Frame {} at {:.2}s: {}", frame.tick, frame.elapsed_secs, leds.join(" "));
        Ok(())
    }
}

impl FrameSink for mpsc::UnboundedSender<Frame> {
    fn publish(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.send(frame.clone())
            .map_err(|_| anyhow::anyhow!("Frame receiver closed"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

pub struct UpdateScheduler {
    programs: watch::Receiver<Arc<PanelProgram>>,
    cache: Arc<MetricsCache>,
    sink: Box<dyn FrameSink>,
    sampler: Box<dyn ColorSampler + Send>,
}

impl UpdateScheduler {
    pub fn new(
        programs: watch::Receiver<Arc<PanelProgram>>,
        cache: Arc<MetricsCache>,
        sink: impl FrameSink + 'static,
    ) -> Self {
        Self {
            programs,
            cache,
            sink: Box::new(sink),
            sampler: Box::new(OsRandomSampler),
        }
    }

    /// Replace the source of `random` colors
    pub fn with_sampler(mut self, sampler: impl ColorSampler + Send + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Spawn the tick loop
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let task = tokio::spawn(self.run(stop_rx, state_tx));
        SchedulerHandle {
            stop: Some(stop_tx),
            state: state_rx,
            task,
        }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>, state: watch::Sender<SchedulerState>) {
        let mut program = self.programs.borrow_and_update().clone();
        let mut started = Instant::now();
        let mut leds = Vec::with_capacity(program.led_count());
        let mut tick: u64 = 0;

        state.send_replace(SchedulerState::Running);
        info!(
            "Scheduler running: {} LEDs every {:?}, {}s cycle",
            program.led_count(),
            program.update_interval(),
            program.cycle_duration()
        );

        loop {
            if self.programs.has_changed().unwrap_or(false) {
                let next = self.programs.borrow_and_update().clone();
                if next.timing() != program.timing() {
                    info!("Timing changed to {:?}, restarting animation clock", next.timing());
                    started = Instant::now();
                }
                program = next;
            }

            let metrics = if program.needs_metrics() {
                Some(self.cache.get_metrics_snapshot(program.units()).await)
            } else {
                None
            };

            let elapsed = started.elapsed().as_secs_f64();
            let failures = evaluate_tick_into(
                &program,
                metrics.as_ref(),
                elapsed,
                &mut leds,
                self.sampler.as_mut(),
            );
            if failures > 0 {
                debug!("Tick {}: {} LEDs kept their previous color", tick, failures);
            }

            let frame = Frame {
                tick,
                elapsed_secs: elapsed,
                leds: leds.clone(),
                metrics,
            };
            if let Err(e) = self.sink.publish(&frame) {
                error!("Failed to publish frame {}: {}", tick, e);
            }
            tick += 1;

            tokio::select! {
                _ = &mut stop => break,
                _ = sleep(program.update_interval()) => {}
            }
        }

        state.send_replace(SchedulerState::Stopped);
        info!("Scheduler stopped after {} ticks", tick);
    }
}

/// Dropping the handle also stops the scheduler
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    state: watch::Receiver<SchedulerState>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Signal stop and wait for the current tick to finish
    pub async fn stop(mut self) -> SchedulerState {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("Scheduler task failed: {}", e);
        }
        *self.state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use crate::layout::LayoutMode;
    use crate::metrics::testing::{boxed, StubProbe};
    use crate::metrics::{Candidates, MetricsRegistry, Signal};
    use crate::store::PanelStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const RED: Rgb = Rgb::new(0xFF, 0, 0);
    const GREEN: Rgb = Rgb::new(0, 0xFF, 0);

    fn small_store(colors: &[&str], cycle_duration: f64) -> PanelStore {
        let mut config = PanelConfig {
            layout_mode: LayoutMode::Small,
            cycle_duration,
            ..PanelConfig::default()
        };
        config.metrics.colors = colors.iter().map(|c| c.to_string()).collect();
        PanelStore::new(config)
    }

    async fn cache() -> (Arc<MetricsCache>, Arc<AtomicUsize>) {
        let probe = StubProbe::value("cpu", 55.0);
        let calls = probe.calls();
        let mut candidates = Candidates::new();
        candidates.insert(Signal::CpuTemp, vec![boxed(probe)]);
        let registry = Arc::new(MetricsRegistry::resolve(candidates).await);
        (Arc::new(MetricsCache::new(registry, Duration::ZERO)), calls)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
        rx.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_frames_each_tick() {
        let store = small_store(&["FF0000", "00FF00"], 5.0);
        let (cache, calls) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();

        for expected in 0..3 {
            let frame = next(&mut rx).await;
            assert_eq!(frame.tick, expected);
            assert_eq!(frame.leds.len(), 30);
            assert_eq!(frame.leds[0], RED);
            assert_eq!(frame.leds[1], GREEN);
            assert!(frame.metrics.is_none());
        }
        // no metric-keyed slots, so only the resolution read
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(handle.stop().await, SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metric_keyed_program_pulls_snapshots() {
        let store = small_store(&["FF0000-0000FF-cpu_temp"], 5.0);
        let (cache, calls) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();

        for _ in 0..3 {
            let frame = next(&mut rx).await;
            assert_eq!(frame.metrics.unwrap().cpu_temp, 55);
        }
        assert!(calls.load(Ordering::SeqCst) >= 3);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_led_keeps_prior_color() {
        // a zero cycle makes every timed expression fail
        let store = small_store(&["FF0000-0000FF", "00FF00"], 0.0);
        let (cache, _) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();

        for _ in 0..2 {
            let frame = next(&mut rx).await;
            assert_eq!(frame.leds[0], Rgb::BLACK);
            assert_eq!(frame.leds[1], GREEN);
        }
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_changes_apply_on_next_tick() {
        let store = small_store(&["FF0000"], 5.0);
        let (cache, _) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();

        next(&mut rx).await;
        next(&mut rx).await;
        let before = next(&mut rx).await;
        assert!(before.elapsed_secs > 0.0);

        // colors only: the clock keeps running
        store.set_led_color(0, "00FF00").unwrap();
        let frame = next(&mut rx).await;
        assert_eq!(frame.leds[0], GREEN);
        assert!(frame.elapsed_secs > before.elapsed_secs);

        // new cycle duration restarts the clock
        store
            .update(|config| {
                config.cycle_duration = 8.0;
                Ok(())
            })
            .unwrap();
        let frame = next(&mut rx).await;
        assert_eq!(frame.elapsed_secs, 0.0);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let store = small_store(&["FF0000"], 5.0);
        let (cache, _) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();
        assert_eq!(handle.state(), SchedulerState::Idle);

        next(&mut rx).await;
        assert_eq!(handle.state(), SchedulerState::Running);

        let mut state = handle.state_receiver();
        assert_eq!(handle.stop().await, SchedulerState::Stopped);
        assert_eq!(*state.borrow_and_update(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_errors_do_not_stop_the_loop() {
        let store = small_store(&["FF0000"], 5.0);
        let (cache, _) = cache().await;
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        drop(rx);

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(handle.state(), SchedulerState::Running);
        assert_eq!(handle.stop().await, SchedulerState::Stopped);
    }

    struct Constant(Rgb);

    impl ColorSampler for Constant {
        fn sample(&mut self) -> Rgb {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_slots_use_injected_sampler() {
        let store = small_store(&["random", "random"], 5.0);
        let (cache, _) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx)
            .with_sampler(Constant(RED))
            .start();

        let frame = next(&mut rx).await;
        assert_eq!(&frame.leds[..2], &[RED, RED]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_sink_drives_scheduler() {
        let store = small_store(&["random"], 5.0);
        let (cache, _) = cache().await;

        let handle = UpdateScheduler::new(store.subscribe(), cache, LogSink).start();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(handle.stop().await, SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_scheduler() {
        let store = small_store(&["FF0000"], 5.0);
        let (cache, _) = cache().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = UpdateScheduler::new(store.subscribe(), cache, tx).start();
        next(&mut rx).await;
        let mut state = handle.state_receiver();
        assert_eq!(*state.borrow(), SchedulerState::Running);

        drop(handle);

        state.wait_for(|s| *s == SchedulerState::Stopped).await.unwrap();
        // the loop has exited, so the frame channel closes
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_json_lines_sink() {
        let (mut sink, writer) = JsonLinesSink::spawn(Vec::new());
        let frame = Frame {
            tick: 7,
            elapsed_secs: 0.5,
            leds: vec![RED, GREEN],
            metrics: None,
        };
        sink.publish(&frame).unwrap();
        sink.publish(&frame).unwrap();
        drop(sink);

        let output = String::from_utf8(writer.await.unwrap().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["tick"], 7);
        assert_eq!(value["leds"][1], "00FF00");
        assert!(value.get("metrics").is_none());
    }
}
