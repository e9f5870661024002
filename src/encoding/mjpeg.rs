use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary token shared by the header and every chunk.
pub const BOUNDARY: &str = "frame";

/// Response content type for the MJPEG feed.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Wrap one JPEG in multipart framing:
/// `--frame CRLF Content-Type: image/jpeg CRLF CRLF <jpeg> CRLF`.
pub fn frame_chunk(jpeg: &[u8]) -> Bytes {
    let mut chunk = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + 2);
    chunk.put_slice(PART_HEADER);
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}
