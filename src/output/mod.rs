mod loopback;

pub use loopback::LoopbackOutput;

use crate::capture::Frame;
use crate::error::Result;

/// Local destination for composited frames, alongside the MJPEG feed.
pub trait OutputSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    fn resolution(&self) -> (u32, u32);
}
