//! Shared building blocks for the LED strip pattern player.
//!
//! This module provides the pieces every other module leans on:
//! - Strip configuration
//! - The `Color` type and its colour math (HSV, colour wheel, brightness)
//! - Signal handling and the cancellation signal
//!
//! The engine modules the binary wires together live alongside:
//! the pattern stepper, the registry, the control loop, the remote feed
//! client and the status server.

pub mod clock;
pub mod control;
pub mod effects;
pub mod pattern;
pub mod registry;
pub mod remote;
pub mod server;
pub mod strip;

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Strip configuration ────────────────────────────────────────────

/// Physical properties of the LED strip.
///
/// `brightness` is a percentage (0-100) applied when a frame is committed
/// to the hardware, so patterns always work with full-scale colours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripConfig {
    pub len: usize,
    pub brightness: u8,
}

impl StripConfig {
    pub fn new(len: usize, brightness: u8) -> Self {
        Self {
            len,
            brightness: brightness.min(100),
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            len: 90,
            brightness: 30,
        }
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// An RGB colour, decoupled from any LED driver crate.
///
/// Drivers convert at the hardware boundary (see `strip::SmartLedsDriver`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const RED: Self = Self::new(255, 0, 0);
    pub const GREEN: Self = Self::new(0, 255, 0);
    pub const BLUE: Self = Self::new(0, 0, 255);
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const YELLOW: Self = Self::new(255, 255, 0);
    pub const CYAN: Self = Self::new(0, 255, 255);
    pub const MAGENTA: Self = Self::new(255, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(v: u8) -> Self {
        Self::new(v, v, v)
    }

    /// Convert a 16-bit hue (0-65535 is one revolution) plus saturation and
    /// value into RGB, NeoPixel style.
    ///
    /// The hue is remapped onto 1530 steps (6 sectors of 255) so each primary
    /// and secondary colour lands exactly on full scale.
    pub fn from_hsv(hue: u16, sat: u8, val: u8) -> Self {
        let h = ((u32::from(hue) * 1530 + 32768) / 65536) as u16;

        let (r, g, b): (u16, u16, u16) = match h {
            0..=254 => (255, h, 0),
            255..=509 => (510 - h, 255, 0),
            510..=764 => (0, 255, h - 510),
            765..=1019 => (0, 1020 - h, 255),
            1020..=1274 => (h - 1020, 0, 255),
            1275..=1529 => (255, 0, 1530 - h),
            _ => (255, 0, 0),
        };

        let v1 = 1 + u32::from(val);
        let s1 = 1 + u32::from(sat);
        let s2 = 255 - u32::from(sat);
        let scale = |c: u16| -> u8 { ((((u32::from(c) * s1) >> 8) + s2) * v1 >> 8) as u8 };

        Self::new(scale(r), scale(g), scale(b))
    }

    /// Fully saturated, full brightness colour for a 16-bit hue.
    pub fn from_hue(hue: u16) -> Self {
        Self::from_hsv(hue, 255, 255)
    }

    /// Classic colour wheel: 0-255 walks red → green → blue → red.
    pub fn wheel(pos: u8) -> Self {
        match pos {
            0..=84 => Self::new(pos * 3, 255 - pos * 3, 0),
            85..=169 => {
                let p = pos - 85;
                Self::new(255 - p * 3, 0, p * 3)
            }
            _ => {
                let p = pos - 170;
                Self::new(0, p * 3, 255 - p * 3)
            }
        }
    }

    /// Apply brightness scaling (0-100) to this color.
    pub fn apply_brightness(self, brightness: u8) -> Self {
        if brightness >= 100 {
            return self;
        }
        Self {
            r: ((self.r as u16 * brightness as u16) / 100) as u8,
            g: ((self.g as u16 * brightness as u16) / 100) as u8,
            b: ((self.b as u16 * brightness as u16) / 100) as u8,
        }
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self::new(r, g, b)
    }
}

impl From<Color> for smart_leds::RGB8 {
    fn from(c: Color) -> Self {
        smart_leds::RGB8::new(c.r, c.g, c.b)
    }
}

// ── Cancellation ───────────────────────────────────────────────────

/// Non-blocking check for a local operator interrupt.
pub trait CancelSignal {
    fn pending(&self) -> bool;
}

/// A shared "please stop" flag.
///
/// Cloning shares the flag, so the Ctrl-C handler, the stdin watcher and
/// the status server's shutdown future all see the same value.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Spawn a thread that triggers shutdown as soon as anything arrives on
    /// stdin, the host-side equivalent of bytes waiting on a serial console.
    pub fn watch_stdin(&self) {
        let shutdown = self.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => tracing::debug!("stdin closed, local cancellation disabled"),
                Ok(_) => {
                    tracing::info!("Input received on stdin, stopping");
                    shutdown.trigger();
                }
                Err(e) => tracing::warn!("stdin watcher failed: {}", e),
            }
        });
    }
}

impl CancelSignal for Shutdown {
    fn pending(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Set up a Ctrl+C handler that triggers the returned shutdown flag.
pub fn setup_signal_handler() -> Result<Shutdown, ctrlc::Error> {
    let shutdown = Shutdown::new();
    let s = shutdown.clone();

    ctrlc::set_handler(move || {
        s.trigger();
    })?;

    Ok(shutdown)
}

// ── Tests ──────────────────────────────────────────────────────────
