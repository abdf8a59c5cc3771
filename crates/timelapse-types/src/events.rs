use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{frame::FrameId, status::CameraStatus};

/// What happened to a camera, as published on the host event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CameraEventKind {
    StateChanged { status: Box<CameraStatus> },
    FrameStored { frame: FrameId },
    Unreachable { reason: String },
    Cleared,
    Removed,
}

/// Immutable event envelope for logging and host notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEvent {
    pub id: Uuid,
    pub camera: String,
    pub timestamp: DateTime<Utc>,
    pub kind: CameraEventKind,
}

impl CameraEvent {
    pub fn new(camera: impl Into<String>, kind: CameraEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera: camera.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}
