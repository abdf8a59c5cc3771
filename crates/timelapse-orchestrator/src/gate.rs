use chrono::{DateTime, Local, NaiveTime};
use timelapse_types::{config::SourceConfig, window::TimeWindow, Result};

use crate::host::Host;

/// Source of local wall-clock time for window checks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    OutsideWindow,
    SignalOff,
}

/// Per-tick checks that run before any fetch.
#[derive(Debug, Clone)]
pub struct Gate {
    window: TimeWindow,
    enabling_entity: Option<String>,
}

impl Gate {
    pub fn from_source(source: &SourceConfig) -> Result<Self> {
        Ok(Self {
            window: source.time_window()?,
            enabling_entity: source.enabling_entity().map(str::to_owned),
        })
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn enabling_entity(&self) -> Option<&str> {
        self.enabling_entity.as_deref()
    }

    /// Window first, then the enabling entity, which must read exactly "on".
    pub fn evaluate<H: Host + ?Sized>(&self, now: NaiveTime, host: &H) -> GateDecision {
        if !self.window.contains(now) {
            return GateDecision::OutsideWindow;
        }
        if let Some(id) = &self.enabling_entity {
            if host.read_external_signal(id) != Some(true) {
                return GateDecision::SignalOff;
            }
        }
        GateDecision::Open
    }
}
