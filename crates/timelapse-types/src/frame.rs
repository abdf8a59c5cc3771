use std::{fmt, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FRAME_EXTENSION: &str = "jpg";

/// Capture timestamp of a stored frame, in whole seconds since the epoch.
///
/// Doubles as the on-disk file stem, so ordering frames by id orders them
/// by capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub i64);

impl FrameId {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp())
    }

    pub fn timestamp(self) -> i64 {
        self.0
    }

    pub fn file_name(self) -> String {
        format!("{}.{}", self.0, FRAME_EXTENSION)
    }

    /// Parses `<decimal timestamp>.jpg`; anything else is not a frame.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.extension()?.to_str()? != FRAME_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok().map(Self)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_frame_file_names() {
        let id = FrameId::from_path(&PathBuf::from("/tmp/x/1700000000.jpg"));
        assert_eq!(id, Some(FrameId(1_700_000_000)));
        assert_eq!(FrameId(42).file_name(), "42.jpg");
    }

    #[test]
    fn rejects_foreign_files() {
        assert_eq!(FrameId::from_path(&PathBuf::from("1700000000.png")), None);
        assert_eq!(FrameId::from_path(&PathBuf::from(".1700000000.jpg.tmp")), None);
        assert_eq!(FrameId::from_path(&PathBuf::from("latest.jpg")), None);
        assert_eq!(FrameId::from_path(&PathBuf::from("-5.jpg")), None);
    }
}
