//! Replays a frame store as a lazy sequence of JPEG frames, and frames that
//! sequence as an MJPEG multipart body.

pub mod cursor;
pub mod mjpeg;

pub use cursor::{frame_stream, FrameCursor};
pub use mjpeg::{mjpeg_body, MJPEG_CONTENT_TYPE};
