//! Session controller: owns the processing thread and the latest output
//! frame, and exposes start/stop/read to the serving layer.
//!
//! Lifecycle is `Idle → Starting → Running → Stopping → Idle`. `Starting`
//! covers the camera open, which happens without the control lock held. A
//! loop that dies on its own (camera gone for good) drops the session back
//! to `Idle`; it can always be started again.

mod slot;
mod stream;
mod worker;

pub use slot::FrameSlot;

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use futures_util::Stream;
use parking_lot::Mutex;
use serde::Serialize;

use crate::capture::{CaptureBackend, Frame};
use crate::config::SessionConfig;
use crate::detection::ColorRange;
use crate::encoding::{EncodedFrame, JpegCodec};
use crate::error::{CloakError, Result};
use worker::{Shared, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// The camera is being opened.
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    /// Nothing was running, another caller is already stopping it, or a
    /// start is still opening the camera.
    AlreadyStopped,
    /// The loop did not exit in time. It has been told to stop and will
    /// release the camera on its own; `start` refuses until it has.
    TimedOut,
}

struct Control {
    state: SessionState,
    worker: Option<Worker>,
    draining: Option<Worker>,
}

impl Control {
    /// Fold in threads that exited without a `stop`.
    fn reap(&mut self) {
        if self.state == SessionState::Running
            && self.worker.as_ref().map_or(true, Worker::is_finished)
        {
            if let Some(mut worker) = self.worker.take() {
                worker.join();
            }
            tracing::warn!("Processing loop exited on its own, session is idle");
            self.state = SessionState::Idle;
        }
        if self.draining.as_ref().is_some_and(Worker::is_finished) {
            if let Some(mut worker) = self.draining.take() {
                worker.join();
                tracing::info!("Previous processing loop has released the camera");
            }
        }
    }
}

struct Inner {
    backend: Arc<dyn CaptureBackend>,
    config: SessionConfig,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

/// One cloak session. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                shared: Arc::new(Shared::default()),
                control: Mutex::new(Control {
                    state: SessionState::Idle,
                    worker: None,
                    draining: None,
                }),
            }),
        }
    }

    /// Start the effect for `ranges`.
    ///
    /// Blocks until the camera is open so that an unusable device is
    /// reported as `DeviceUnavailable` instead of a silent start. The session
    /// reads as `Starting` meanwhile. Every start samples a fresh background.
    pub fn start(&self, ranges: Vec<ColorRange>) -> Result<StartOutcome> {
        if ranges.is_empty() {
            return Err(CloakError::InvalidRange(
                "at least one color range is required".into(),
            ));
        }

        let config = &self.inner.config;
        let (mut worker, ready) = {
            let mut control = self.inner.control.lock();
            control.reap();
            match control.state {
                SessionState::Running | SessionState::Starting => {
                    tracing::info!("Start requested but the session is already running");
                    return Ok(StartOutcome::AlreadyRunning);
                }
                SessionState::Stopping => return Err(CloakError::Busy),
                SessionState::Idle => {}
            }
            if control.draining.is_some() {
                return Err(CloakError::Busy);
            }

            tracing::info!("Starting session with {} color range(s)", ranges.len());
            self.inner.shared.slot.clear();

            let spawned = Worker::spawn(
                self.inner.backend.clone(),
                config.clone(),
                ranges,
                self.inner.shared.clone(),
            )?;
            control.state = SessionState::Starting;
            spawned
        };

        let mut parked = None;
        let failure = match ready.recv_timeout(config.open_timeout) {
            Ok(Ok((width, height))) => {
                tracing::info!("Session running, camera delivers {}x{}", width, height);
                let mut control = self.inner.control.lock();
                control.state = SessionState::Running;
                control.worker = Some(worker);
                return Ok(StartOutcome::Started);
            }
            Ok(Err(err)) => {
                if !worker.wait(config.stop_timeout) {
                    parked = Some(worker);
                }
                err
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Camera did not open within {:?}", config.open_timeout);
                worker.signal_stop();
                parked = Some(worker);
                CloakError::device_unavailable(config.device.index, "timed out opening camera")
            }
            Err(RecvTimeoutError::Disconnected) => {
                worker.join();
                CloakError::Unrecoverable("processing thread exited during startup".into())
            }
        };

        let mut control = self.inner.control.lock();
        control.state = SessionState::Idle;
        if parked.is_some() {
            control.draining = parked;
        }
        Err(failure)
    }

    /// Stop the effect, waiting up to the configured timeout for the camera
    /// to be released.
    pub fn stop(&self) -> StopOutcome {
        let mut worker = {
            let mut control = self.inner.control.lock();
            control.reap();
            if control.state != SessionState::Running {
                return StopOutcome::AlreadyStopped;
            }
            match control.worker.take() {
                Some(worker) => {
                    control.state = SessionState::Stopping;
                    worker
                }
                None => {
                    control.state = SessionState::Idle;
                    return StopOutcome::AlreadyStopped;
                }
            }
        };

        tracing::info!("Stopping session");
        worker.signal_stop();
        self.inner.shared.deactivate();
        let finished = worker.wait(self.inner.config.stop_timeout);

        let mut control = self.inner.control.lock();
        control.state = SessionState::Idle;
        if finished {
            tracing::info!("Session stopped");
            StopOutcome::Stopped
        } else {
            tracing::warn!(
                "Processing loop still busy after {:?}; camera will be released when it exits",
                self.inner.config.stop_timeout
            );
            control.draining = Some(worker);
            StopOutcome::TimedOut
        }
    }

    pub fn state(&self) -> SessionState {
        let mut control = self.inner.control.lock();
        control.reap();
        control.state
    }

    /// The most recently published encoded frame, if any.
    pub fn latest_encoded(&self) -> Option<Arc<EncodedFrame>> {
        self.inner.shared.slot.load()
    }

    /// The most recently published frame decoded back to pixels.
    pub fn latest_frame(&self) -> Result<Option<Frame>> {
        match self.latest_encoded() {
            Some(frame) => JpegCodec::default().decode(&frame.jpeg).map(Some),
            None => Ok(None),
        }
    }

    /// MJPEG multipart chunks for as long as the current run lasts. Ends
    /// immediately if nothing is running.
    pub fn frame_stream(&self) -> impl Stream<Item = Bytes> + Send + 'static {
        stream::frame_stream(self.inner.shared.clone())
    }
}
