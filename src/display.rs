//! Screen layouts for the 240x135 landscape panel.
//!
//! Rendering is expressed as discrete draw commands against [`Display`]; the
//! host build logs them ([`LogDisplay`]) and tests record them
//! ([`RecordingDisplay`]).

use log::{debug, info};

use crate::event::{AlertLevel, CanonicalEvent};
use crate::logutil::escape_log;
use crate::mesh::ChatMessage;

pub const SCREEN_WIDTH: i32 = 240;
pub const SCREEN_HEIGHT: i32 = 135;
const CENTER_X: i32 = SCREEN_WIDTH / 2;
const HEADLINE_Y: i32 = 50;
const SUBLINE_Y: i32 = 85;
/// Characters per line of body text at the alert font size.
const BODY_CHARS: usize = 19;
const BODY_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    White,
    Red,
    Orange,
    Green,
    Yellow,
    Cyan,
    DarkCyan,
    Blue,
}

impl From<AlertLevel> for Color {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Red => Color::Red,
            AlertLevel::Orange => Color::Orange,
            AlertLevel::Green => Color::Green,
        }
    }
}

/// Text datum: which point of the text box sits at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopRight,
    MiddleCenter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Small,
    Large,
}

pub trait Display {
    fn clear(&mut self, background: Color);
    fn set_colors(&mut self, foreground: Color, background: Color);
    fn draw_text(&mut self, text: &str, x: i32, y: i32, anchor: Anchor, font: Font);
    fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color);
    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color);
    /// Called once a screen is fully drawn.
    fn present(&mut self, _screen: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Startup,
    Fetching,
    Idle { seen: usize },
    Alert(CanonicalEvent),
    Chat(ChatMessage),
    Error(String),
    EmergencyClear,
}

impl Screen {
    pub fn name(&self) -> &'static str {
        match self {
            Screen::Startup => "startup",
            Screen::Fetching => "fetching",
            Screen::Idle { .. } => "idle",
            Screen::Alert(_) => "alert",
            Screen::Chat(_) => "chat",
            Screen::Error(_) => "error",
            Screen::EmergencyClear => "emergency",
        }
    }
}

/// Greedy word wrap to at most `max_lines` lines of `width` characters.
/// Words longer than a line are split.
pub fn wrap_text(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: &str = word;
        loop {
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed <= width {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                break;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                continue;
            }
            let split = word
                .char_indices()
                .nth(width)
                .map_or(word.len(), |(i, _)| i);
            lines.push(word[..split].to_string());
            word = &word[split..];
            if word.is_empty() {
                break;
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.truncate(max_lines);
    lines
}

fn centered_pair(display: &mut dyn Display, color: Color, top: &str, bottom: &str) {
    display.set_colors(color, Color::Black);
    display.draw_text(top, CENTER_X, HEADLINE_Y, Anchor::MiddleCenter, Font::Large);
    display.draw_text(bottom, CENTER_X, SUBLINE_Y, Anchor::MiddleCenter, Font::Large);
}

pub fn render(display: &mut dyn Display, screen: &Screen) {
    display.clear(Color::Black);
    match screen {
        Screen::Startup => centered_pair(display, Color::Cyan, "DISASTER", "ALERT"),
        Screen::Fetching => centered_pair(display, Color::Orange, "FETCHING", "DATA..."),
        Screen::Idle { seen } => {
            display.draw_rect(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT, Color::Green);
            display.set_colors(Color::Green, Color::Black);
            display.draw_text("MONITORING", CENTER_X, 40, Anchor::MiddleCenter, Font::Large);
            display.set_colors(Color::DarkCyan, Color::Black);
            display.draw_text("NO NEW ALERTS", CENTER_X, 75, Anchor::MiddleCenter, Font::Large);
            display.set_colors(Color::White, Color::Black);
            display.draw_text(
                &format!("{} events seen", seen),
                CENTER_X,
                110,
                Anchor::MiddleCenter,
                Font::Small,
            );
        }
        Screen::Alert(event) => {
            let color = Color::from(event.alert_level);
            display.fill_rect(0, 0, SCREEN_WIDTH, 10, color);
            display.set_colors(color, Color::Black);
            display.draw_text(event.kind_name(), 10, 20, Anchor::TopLeft, Font::Large);
            if event.severity > 0.0 {
                display.set_colors(Color::Yellow, Color::Black);
                display.draw_text(
                    &format!("M{:.1}", event.severity),
                    SCREEN_WIDTH - 10,
                    20,
                    Anchor::TopRight,
                    Font::Large,
                );
            }
            display.set_colors(Color::White, Color::Black);
            for (i, line) in wrap_text(&event.title, BODY_CHARS, BODY_LINES)
                .iter()
                .enumerate()
            {
                display.draw_text(line, 10, 55 + i as i32 * 22, Anchor::TopLeft, Font::Small);
            }
            if event.freshly_observed {
                display.set_colors(Color::Black, color);
                display.draw_text("NEW", SCREEN_WIDTH - 10, 120, Anchor::TopRight, Font::Small);
            }
        }
        Screen::Chat(msg) => {
            display.draw_rect(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT, Color::Blue);
            display.set_colors(Color::Cyan, Color::Black);
            display.draw_text("MESH CHAT", CENTER_X, 20, Anchor::MiddleCenter, Font::Large);
            display.set_colors(Color::White, Color::Black);
            for (i, line) in wrap_text(&msg.text, BODY_CHARS, BODY_LINES).iter().enumerate() {
                display.draw_text(line, 10, 50 + i as i32 * 22, Anchor::TopLeft, Font::Small);
            }
        }
        Screen::Error(message) => {
            display.draw_rect(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT, Color::Red);
            display.set_colors(Color::Red, Color::Black);
            display.draw_text("ERROR", CENTER_X, 45, Anchor::MiddleCenter, Font::Large);
            display.set_colors(Color::White, Color::Black);
            display.draw_text(message, CENTER_X, SUBLINE_Y, Anchor::MiddleCenter, Font::Small);
        }
        Screen::EmergencyClear => {
            centered_pair(display, Color::Red, "EMERGENCY", "CLEAR");
            display.set_colors(Color::White, Color::Black);
            display.draw_text("Restarting...", CENTER_X, 110, Anchor::MiddleCenter, Font::Small);
        }
    }
    display.present(screen.name());
}

/// Display that writes each finished screen's text to the log as one line.
#[derive(Debug, Default)]
pub struct LogDisplay {
    texts: Vec<String>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for LogDisplay {
    fn clear(&mut self, _background: Color) {
        self.texts.clear();
    }

    fn set_colors(&mut self, _foreground: Color, _background: Color) {}

    fn draw_text(&mut self, text: &str, x: i32, y: i32, _anchor: Anchor, _font: Font) {
        debug!("[DISPLAY] text at ({}, {}): {}", x, y, escape_log(text));
        self.texts.push(text.to_string());
    }

    fn draw_rect(&mut self, _x: i32, _y: i32, _w: i32, _h: i32, _color: Color) {}

    fn fill_rect(&mut self, _x: i32, _y: i32, _w: i32, _h: i32, _color: Color) {}

    fn present(&mut self, screen: &str) {
        info!("[DISPLAY] {}: {}", screen, escape_log(&self.texts.join(" | ")));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear(Color),
    SetColors(Color, Color),
    Text {
        text: String,
        x: i32,
        y: i32,
        anchor: Anchor,
        font: Font,
    },
    Rect {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        color: Color,
        filled: bool,
    },
}

/// Display that keeps every command for inspection.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub commands: Vec<DrawCommand>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text drawn since the last clear.
    pub fn texts(&self) -> Vec<&str> {
        let start = self
            .commands
            .iter()
            .rposition(|c| matches!(c, DrawCommand::Clear(_)))
            .map_or(0, |i| i + 1);
        self.commands[start..]
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Display for RecordingDisplay {
    fn clear(&mut self, background: Color) {
        self.commands.push(DrawCommand::Clear(background));
    }

    fn set_colors(&mut self, foreground: Color, background: Color) {
        self.commands.push(DrawCommand::SetColors(foreground, background));
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32, anchor: Anchor, font: Font) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            x,
            y,
            anchor,
            font,
        });
    }

    fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        self.commands.push(DrawCommand::Rect {
            x,
            y,
            w,
            h,
            color,
            filled: false,
        });
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        self.commands.push(DrawCommand::Rect {
            x,
            y,
            w,
            h,
            color,
            filled: true,
        });
    }
}
