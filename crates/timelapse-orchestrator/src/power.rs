use timelapse_types::status::PowerState;

/// What the caller must do with the periodic timer after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Stop,
    Keep,
}

/// Power flags of one camera.
///
/// Capture runs iff `on && !paused && !signal_off`. The enabling signal is
/// tracked separately so it never rewrites the user's on/off choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerFlags {
    pub on: bool,
    pub paused: bool,
    pub running: bool,
    pub signal_off: bool,
}

impl PowerFlags {
    pub fn state(&self) -> PowerState {
        if !self.on {
            PowerState::Stopped
        } else if self.paused {
            PowerState::Paused
        } else if self.running {
            PowerState::Running
        } else {
            PowerState::Stopped
        }
    }

    fn should_run(&self) -> bool {
        self.on && !self.paused && !self.signal_off
    }

    /// Brings `running` in line with the other flags.
    pub fn sync(&mut self) -> TimerAction {
        let want = self.should_run();
        let action = match (self.running, want) {
            (false, true) => TimerAction::Start,
            (true, false) => TimerAction::Stop,
            _ => TimerAction::Keep,
        };
        self.running = want;
        action
    }

    pub fn turn_on(&mut self) -> TimerAction {
        self.on = true;
        self.sync()
    }

    pub fn turn_off(&mut self) -> TimerAction {
        self.on = false;
        self.running = false;
        TimerAction::Stop
    }

    pub fn pause(&mut self) -> TimerAction {
        self.paused = true;
        self.sync()
    }

    pub fn resume(&mut self) -> TimerAction {
        self.paused = false;
        self.sync()
    }

    pub fn signal_changed(&mut self, signal_on: bool) -> TimerAction {
        self.signal_off = !signal_on;
        self.sync()
    }
}
