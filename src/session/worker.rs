//! The processing loop and the thread that runs it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use image::DynamicImage;

use super::slot::FrameSlot;
use crate::capture::{CaptureBackend, Device, Frame};
use crate::compose::compose;
use crate::config::{PreviewMode, SessionConfig};
use crate::detection::{ColorRange, Detector};
use crate::encoding::{EncodedFrame, JpegCodec};
use crate::error::{CloakError, Result};
use crate::output::{LoopbackOutput, OutputSink};

/// State shared between the loop and the session's readers.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) slot: FrameSlot,
    pub(crate) active: AtomicBool,
    /// Bumped each time a run goes live.
    run: AtomicU64,
}

impl Shared {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn current_run(&self) -> u64 {
        self.run.load(Ordering::SeqCst)
    }

    /// Whether `run` is the run currently live.
    pub(crate) fn is_live(&self, run: u64) -> bool {
        self.is_active() && self.current_run() == run
    }

    fn begin_run(&self) {
        self.run.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    /// Mark the run finished and wake every reader.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.slot.notify();
    }
}

/// Cooperative stop request. Raised when the session drops its sender.
pub(crate) struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    pub(crate) fn is_raised(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep up to `timeout`, returning early with `true` if stop is raised.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.is_raised();
        }
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

/// Handle on a running processing thread.
pub(crate) struct Worker {
    stop: Option<Sender<()>>,
    done: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn the loop. The returned receiver yields the camera resolution
    /// once the device is open, or the error that prevented opening it.
    pub(crate) fn spawn(
        backend: Arc<dyn CaptureBackend>,
        config: SessionConfig,
        ranges: Vec<ColorRange>,
        shared: Arc<Shared>,
    ) -> Result<(Self, Receiver<Result<(u32, u32)>>)> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded(1);

        let processing = ProcessingLoop {
            backend,
            config,
            ranges,
            shared,
            stop: StopSignal { rx: stop_rx },
        };

        let handle = thread::Builder::new()
            .name("arcnet-processing".into())
            .spawn(move || {
                processing.run(ready_tx);
                drop(done_tx);
            })
            .map_err(|e| CloakError::Unrecoverable(format!("cannot spawn processing thread: {e}")))?;

        Ok((
            Self {
                stop: Some(stop_tx),
                done: done_rx,
                handle: Some(handle),
            },
            ready_rx,
        ))
    }

    pub(crate) fn signal_stop(&mut self) {
        self.stop.take();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait up to `timeout` for the thread to exit, joining it if it did.
    pub(crate) fn wait(&mut self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            _ => {
                self.join();
                true
            }
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Processing thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Clears the active flag and the published frame however the loop exits.
struct ActiveGuard<'a>(&'a Shared);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::SeqCst);
        self.0.slot.clear();
    }
}

enum Step {
    Published,
    Skipped,
    Reopened,
    Stop,
}

struct ProcessingLoop {
    backend: Arc<dyn CaptureBackend>,
    config: SessionConfig,
    ranges: Vec<ColorRange>,
    shared: Arc<Shared>,
    stop: StopSignal,
}

impl ProcessingLoop {
    fn run(self, ready: Sender<Result<(u32, u32)>>) {
        let _guard = ActiveGuard(&self.shared);

        let mut device = match Device::open(self.backend.clone(), self.config.device, self.config.mirror) {
            Ok(device) => device,
            Err(err) => {
                tracing::error!("Cannot start processing: {}", err);
                let _ = ready.send(Err(err));
                return;
            }
        };

        self.shared.begin_run();
        let resolution = device.resolution().unwrap_or((0, 0));
        let _ = ready.send(Ok(resolution));
        drop(ready);

        match self.process(&mut device) {
            Ok(()) => tracing::info!("Processing loop stopped"),
            Err(err) => tracing::error!("Processing loop aborted: {}", err),
        }

        device.close();
        tracing::info!("Camera released");
    }

    fn process(&self, device: &mut Device) -> Result<()> {
        let background = match self
            .config
            .background
            .capture(device, |d| self.stop.wait(d))
            .map_err(|e| CloakError::Unrecoverable(format!("background capture failed: {e}")))?
        {
            Some(background) => background,
            None => return Ok(()),
        };

        let detector = Detector::new(self.config.refinement);
        let codec = JpegCodec::new(self.config.jpeg_quality);
        let mut sink = self.open_sink();
        let interval = self.config.frame_interval();
        let mut stats = LoopStats::default();
        let mut sequence = 0u64;

        tracing::info!(
            "Processing {} color range(s) at up to {} fps",
            self.ranges.len(),
            self.config.target_fps
        );

        loop {
            let started = Instant::now();

            let step = self.step(
                device,
                &background,
                &detector,
                &codec,
                &mut sink,
                &mut sequence,
                &mut stats,
            )?;
            if let Step::Stop = step {
                break;
            }
            if let Step::Published = step {
                stats.maybe_log(self.config.stats_interval);
            }

            let elapsed = started.elapsed();
            let pause = interval.saturating_sub(elapsed);
            if self.stop.wait(pause) {
                break;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        device: &mut Device,
        background: &Frame,
        detector: &Detector,
        codec: &JpegCodec,
        sink: &mut Option<Box<dyn OutputSink>>,
        sequence: &mut u64,
        stats: &mut LoopStats,
    ) -> Result<Step> {
        if self.stop.is_raised() {
            return Ok(Step::Stop);
        }

        let t0 = Instant::now();
        let frame = match device.read() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("Capture failed ({}), reopening camera", err);
                return Ok(if self.reopen(device)? { Step::Reopened } else { Step::Stop });
            }
        };
        let t1 = Instant::now();

        let mask = match detector.detect_all(&frame, &self.ranges) {
            Ok(mask) => mask,
            Err(err) => {
                tracing::warn!("Detection failed, skipping frame: {}", err);
                return Ok(Step::Skipped);
            }
        };
        let t2 = Instant::now();

        let output = match self.config.preview {
            PreviewMode::Composite => match compose(&frame, background, &mask) {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!("Compositing failed, skipping frame: {}", err);
                    return Ok(Step::Skipped);
                }
            },
            PreviewMode::Mask => DynamicImage::ImageLuma8(mask).to_rgb8(),
        };
        let t3 = Instant::now();

        if let Some(out) = sink.as_mut() {
            if let Err(err) = out.write_frame(&output) {
                tracing::warn!("Disabling loopback output: {}", err);
                *sink = None;
            }
        }

        let jpeg = match codec.encode(&output) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                tracing::warn!("Skipping frame: {}", err);
                return Ok(Step::Skipped);
            }
        };
        let t4 = Instant::now();

        *sequence += 1;
        self.shared.slot.publish(EncodedFrame {
            jpeg,
            sequence: *sequence,
            width: output.width(),
            height: output.height(),
        });

        stats.record(t1 - t0, t2 - t1, t3 - t2, t4 - t3);
        Ok(Step::Published)
    }

    /// Reopen the camera, retrying a bounded number of times. Returns
    /// `false` if stop was requested while waiting.
    fn reopen(&self, device: &mut Device) -> Result<bool> {
        let attempts = self.config.reconnect.max_attempts.max(1);
        for attempt in 1..=attempts {
            match device.reopen() {
                Ok(()) => {
                    tracing::info!("Camera reopened (attempt {}/{})", attempt, attempts);
                    return Ok(true);
                }
                Err(err) => {
                    tracing::warn!("Reopen attempt {}/{} failed: {}", attempt, attempts, err)
                }
            }
            if self.stop.wait(self.config.reconnect.delay) {
                return Ok(false);
            }
        }
        Err(CloakError::Unrecoverable(format!(
            "camera {} could not be reopened after {} attempts",
            device.request().index,
            attempts
        )))
    }

    fn open_sink(&self) -> Option<Box<dyn OutputSink>> {
        let path = self.config.loopback.as_ref()?;
        let request = self.config.device;
        match LoopbackOutput::open(path, request.width, request.height) {
            Ok(sink) => {
                let (width, height) = sink.resolution();
                tracing::info!("Loopback output ready at {}x{}", width, height);
                Some(Box::new(sink))
            }
            Err(err) => {
                tracing::warn!("Continuing without loopback output: {}", err);
                None
            }
        }
    }
}

/// Rolling per-stage timings for the periodic log line.
#[derive(Default)]
struct LoopStats {
    frames: u64,
    capture: Duration,
    detect: Duration,
    compose: Duration,
    encode: Duration,
}

impl LoopStats {
    fn record(&mut self, capture: Duration, detect: Duration, compose: Duration, encode: Duration) {
        self.frames += 1;
        self.capture += capture;
        self.detect += detect;
        self.compose += compose;
        self.encode += encode;
    }

    fn maybe_log(&self, every: u64) {
        if every == 0 || self.frames == 0 || self.frames % every != 0 {
            return;
        }
        let avg = |d: Duration| d.as_secs_f64() * 1000.0 / self.frames as f64;
        let total = avg(self.capture) + avg(self.detect) + avg(self.compose) + avg(self.encode);
        tracing::info!(
            "Frame {}: capture={:.1}ms, detect={:.1}ms, compose={:.1}ms, encode={:.1}ms, total={:.1}ms, fps={:.1}",
            self.frames,
            avg(self.capture),
            avg(self.detect),
            avg(self.compose),
            avg(self.encode),
            total,
            if total > 0.0 { 1000.0 / total } else { 0.0 }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_fires_when_sender_drops() {
        let (tx, rx) = bounded::<()>(1);
        let stop = StopSignal { rx };
        assert!(!stop.is_raised());
        assert!(!stop.wait(Duration::from_millis(5)));

        drop(tx);
        assert!(stop.is_raised());
        let started = Instant::now();
        assert!(stop.wait(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stats_average_over_frames() {
        let mut stats = LoopStats::default();
        stats.record(
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(1),
            Duration::from_millis(3),
        );
        stats.record(
            Duration::from_millis(4),
            Duration::from_millis(4),
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.capture, Duration::from_millis(6));
        stats.maybe_log(2);
    }
}
