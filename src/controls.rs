//! Manual controls: two buttons and a one-character console command channel.
//!
//! A button released before the hold time is a short press; holding it for
//! the hold time fires a long hold once, while still pressed.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const DEFAULT_HOLD_MS: i64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Short press sends a relay test line.
    Primary,
    /// Short press clears history and refetches.
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    ShortPress,
    LongHold,
}

#[derive(Debug, Clone)]
pub struct ButtonTracker {
    hold: Duration,
    pressed_since: Option<DateTime<Utc>>,
    hold_fired: bool,
}

impl Default for ButtonTracker {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_HOLD_MS))
    }
}

impl ButtonTracker {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            pressed_since: None,
            hold_fired: false,
        }
    }

    /// Feed the current level of the button.
    pub fn update(&mut self, pressed: bool, now: DateTime<Utc>) -> Option<ButtonEvent> {
        if pressed {
            match self.pressed_since {
                None => {
                    self.pressed_since = Some(now);
                    None
                }
                Some(start) if !self.hold_fired && now - start >= self.hold => {
                    self.hold_fired = true;
                    Some(ButtonEvent::LongHold)
                }
                Some(_) => None,
            }
        } else {
            let event = match self.pressed_since {
                Some(start) if !self.hold_fired && now - start < self.hold => {
                    Some(ButtonEvent::ShortPress)
                }
                _ => None,
            };
            self.pressed_since = None;
            self.hold_fired = false;
            event
        }
    }
}

/// Source of button levels.
pub trait ButtonInput {
    fn is_pressed(&mut self, button: Button) -> bool;
}

/// Host builds have no buttons.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoButtons;

impl ButtonInput for NoButtons {
    fn is_pressed(&mut self, _button: Button) -> bool {
        false
    }
}

/// Button levels set from outside; clones share state.
#[derive(Debug, Default, Clone)]
pub struct ScriptedButtons {
    levels: Arc<Mutex<[bool; 2]>>,
}

impl ScriptedButtons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, button: Button, pressed: bool) {
        if let Ok(mut levels) = self.levels.lock() {
            levels[button as usize] = pressed;
        }
    }
}

impl ButtonInput for ScriptedButtons {
    fn is_pressed(&mut self, button: Button) -> bool {
        self.levels
            .lock()
            .map(|levels| levels[button as usize])
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `C`: clear history and refetch.
    Clear,
    /// `T`: send a relay test line.
    Test,
    /// `M`: memory and counter report.
    Memory,
    /// `W`: write budget report.
    WriteCount,
    /// `R`: reset the radio link health.
    Reset,
}

impl ConsoleCommand {
    pub fn parse(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(ConsoleCommand::Clear),
            'T' => Some(ConsoleCommand::Test),
            'M' => Some(ConsoleCommand::Memory),
            'W' => Some(ConsoleCommand::WriteCount),
            'R' => Some(ConsoleCommand::Reset),
            _ => None,
        }
    }
}

/// Read stdin on a background task and forward every recognised command
/// character. The channel closes when stdin does.
pub fn spawn_console_reader() -> mpsc::Receiver<ConsoleCommand> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    for c in line.chars().filter(|c| !c.is_whitespace()) {
                        match ConsoleCommand::parse(c) {
                            Some(cmd) => {
                                if tx.send(cmd).await.is_err() {
                                    return;
                                }
                            }
                            None => debug!("[CONSOLE] ignoring '{}'", c.escape_default()),
                        }
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("[CONSOLE] stdin read failed: {}", e);
                    return;
                }
            }
        }
    });
    rx
}
