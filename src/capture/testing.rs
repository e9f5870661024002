//! In-memory capture backend with scripted failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use parking_lot::Mutex;

use super::{CaptureBackend, CaptureSource, DeviceRequest, Frame};
use crate::error::{CloakError, Result};

type Pattern = Box<dyn Fn(u32, u32) -> Rgb<u8> + Send>;

struct Script {
    width: u32,
    height: u32,
    pattern: Pattern,
    read_failures: usize,
    open_failures: usize,
    open_delay: Duration,
    read_delay: Duration,
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    reads: AtomicUsize,
    failed_reads: AtomicUsize,
    live: AtomicUsize,
}

pub(crate) struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub(crate) fn solid(color: [u8; 3]) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(Script {
                width: 32,
                height: 24,
                pattern: Box::new(move |_, _| Rgb(color)),
                read_failures: 0,
                open_failures: 0,
                open_delay: Duration::ZERO,
                read_delay: Duration::from_millis(1),
            })),
            counters: Arc::new(Counters::default()),
        })
    }

    pub(crate) fn set_color(&self, color: [u8; 3]) {
        self.set_pattern(move |_, _| Rgb(color));
    }

    pub(crate) fn set_pattern(&self, pattern: impl Fn(u32, u32) -> Rgb<u8> + Send + 'static) {
        self.script.lock().pattern = Box::new(pattern);
    }

    /// The next `n` reads fail, across reopened sources.
    pub(crate) fn fail_reads(&self, n: usize) {
        self.script.lock().read_failures = n;
    }

    /// Every open blocks this long first, like a slow camera driver.
    pub(crate) fn set_open_delay(&self, delay: Duration) {
        self.script.lock().open_delay = delay;
    }

    /// The next `n` opens fail.
    pub(crate) fn fail_opens(&self, n: usize) {
        self.script.lock().open_failures = n;
    }

    pub(crate) fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn failed_reads(&self) -> usize {
        self.counters.failed_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn live_sources(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self, request: &DeviceRequest) -> Result<Box<dyn CaptureSource>> {
        let delay = self.script.lock().open_delay;
        std::thread::sleep(delay);
        {
            let mut script = self.script.lock();
            if script.open_failures > 0 {
                script.open_failures -= 1;
                return Err(CloakError::device_unavailable(request.index, "scripted open failure"));
            }
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script: self.script.clone(),
            counters: self.counters.clone(),
            open: true,
        }))
    }
}

struct ScriptedSource {
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
    open: bool,
}

impl CaptureSource for ScriptedSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let delay = self.script.lock().read_delay;
        std::thread::sleep(delay);

        let mut script = self.script.lock();
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if !self.open {
            return Err(CloakError::CaptureFailure("source closed".into()));
        }
        if script.read_failures > 0 {
            script.read_failures -= 1;
            self.counters.failed_reads.fetch_add(1, Ordering::SeqCst);
            return Err(CloakError::CaptureFailure("scripted read failure".into()));
        }
        let pattern = &script.pattern;
        Ok(RgbImage::from_fn(script.width, script.height, |x, y| pattern(x, y)))
    }

    fn resolution(&self) -> (u32, u32) {
        let script = self.script.lock();
        (script.width, script.height)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.close();
    }
}
