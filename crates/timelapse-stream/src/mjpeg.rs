use std::{convert::Infallible, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use tokio::time::MissedTickBehavior;

pub const BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=frame";

/// One multipart section carrying a single JPEG.
pub fn encode_part(frame: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Paces `frames` at one part per `interval`; the first part goes out
/// immediately.
pub fn mjpeg_body(
    mut frames: BoxStream<'static, Bytes>,
    interval: Duration,
) -> BoxStream<'static, Result<Bytes, Infallible>> {
    async_stream::stream! {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match frames.next().await {
                Some(frame) => yield Ok(encode_part(&frame)),
                None => break,
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn part_layout() {
        let part = encode_part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
        assert!(MJPEG_CONTENT_TYPE.ends_with(BOUNDARY));
    }

    #[tokio::test]
    async fn body_ends_with_the_frames() {
        let frames = stream::iter(vec![Bytes::from_static(b"a"), Bytes::from_static(b"bb")]).boxed();
        let parts: Vec<Bytes> = mjpeg_body(frames, Duration::from_millis(1))
            .map(|part| part.unwrap_or_default())
            .collect()
            .await;
        assert_eq!(parts.len(), 2);
        assert!(parts[1].ends_with(b"bb\r\n"));
    }
}
