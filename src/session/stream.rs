use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, Stream};

use super::worker::Shared;
use crate::encoding::frame_chunk;

/// Multipart MJPEG chunks of the latest frame, one per publish, until the
/// run that was live when the stream was created ends.
///
/// Waits on the slot's publish notifications. A reader that falls behind
/// skips straight to the newest frame.
pub(crate) fn frame_stream(shared: Arc<Shared>) -> impl Stream<Item = Bytes> + Send + 'static {
    let rx = shared.slot.subscribe();
    let run = shared.current_run();

    stream::unfold((shared, rx, true), move |(shared, mut rx, mut fresh)| async move {
        loop {
            if !fresh && rx.changed().await.is_err() {
                return None;
            }
            fresh = false;

            // mark seen before checking liveness so a final wake-up is not lost
            rx.borrow_and_update();
            if !shared.is_live(run) {
                return None;
            }
            if let Some(frame) = shared.slot.load() {
                return Some((frame_chunk(&frame.jpeg), (shared, rx, false)));
            }
        }
    })
}
