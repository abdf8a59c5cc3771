use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Stopped,
    Running,
    Paused,
}

/// Attribute snapshot exposed to the host for a single camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatus {
    pub name: String,
    pub image_url: String,
    pub fetch_interval: f64,
    pub framerate: f64,
    pub max_frames: usize,
    pub quality: u32,
    #[serde(rename = "loop")]
    pub loop_frames: bool,
    pub headers: BTreeMap<String, String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub state: PowerState,
    pub on: bool,
    pub paused: bool,
    pub running: bool,
    pub available: bool,
    /// Effective capture window, `HH:MM:SS`, defaults filled in.
    pub start_time: String,
    pub end_time: String,
    pub max_duration_minutes: Option<u64>,
    pub enabling_entity_id: Option<String>,
    pub frame_count: usize,
}
