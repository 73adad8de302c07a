//! Pixel buffer and LED drivers.
//!
//! Patterns only ever talk to the `LedStrip` trait: single-pixel writes into
//! a RAM buffer, then an explicit `commit` that pushes the whole frame to the
//! hardware. `PixelBuffer` is the one implementation; what happens on commit
//! is decided by its `StripDriver`.

use crate::Color;
use smart_leds::{RGB8, SmartLedsWrite};
use std::fmt;

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripError {
    /// The LED device could not be opened or configured.
    Open(String),
    /// Pushing a frame to the device failed.
    Write(String),
}

impl fmt::Display for StripError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(msg) => write!(f, "failed to open LED device: {msg}"),
            Self::Write(msg) => write!(f, "failed to write frame: {msg}"),
        }
    }
}

impl std::error::Error for StripError {}

// ── Strip contract ───────────────────────────────────────────────────

/// An addressable strip with buffered writes.
pub trait LedStrip {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one pixel into the buffer. Out-of-range indices are ignored.
    fn set(&mut self, index: usize, color: Color);

    fn get(&self, index: usize) -> Option<Color>;

    fn fill(&mut self, color: Color) {
        for i in 0..self.len() {
            self.set(i, color);
        }
    }

    fn clear(&mut self) {
        self.fill(Color::BLACK);
    }

    /// Push the buffered frame to the physical strip.
    fn commit(&mut self) -> Result<(), StripError>;
}

/// Where committed frames go.
pub trait StripDriver {
    fn write(&mut self, frame: &[Color]) -> Result<(), StripError>;
}

// ── PixelBuffer ──────────────────────────────────────────────────────

/// Fixed-length RGB buffer in front of a driver.
///
/// Brightness is applied on the way out, so the buffer always holds the
/// colours the patterns asked for.
#[derive(Debug)]
pub struct PixelBuffer<D> {
    pixels: Vec<Color>,
    scaled: Vec<Color>,
    brightness: u8,
    driver: D,
    commits: u64,
}

impl<D: StripDriver> PixelBuffer<D> {
    pub fn new(len: usize, brightness: u8, driver: D) -> Self {
        Self {
            pixels: vec![Color::BLACK; len],
            scaled: Vec::with_capacity(len),
            brightness: brightness.min(100),
            driver,
            commits: 0,
        }
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// Number of successful commits since construction.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: StripDriver> LedStrip for PixelBuffer<D> {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set(&mut self, index: usize, color: Color) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }

    fn get(&self, index: usize) -> Option<Color> {
        self.pixels.get(index).copied()
    }

    fn fill(&mut self, color: Color) {
        self.pixels.fill(color);
    }

    fn commit(&mut self) -> Result<(), StripError> {
        self.scaled.clear();
        let brightness = self.brightness;
        self.scaled
            .extend(self.pixels.iter().map(|c| c.apply_brightness(brightness)));
        self.driver.write(&self.scaled)?;
        self.commits += 1;
        Ok(())
    }
}

// ── Drivers ──────────────────────────────────────────────────────────

/// Dry-run driver: no hardware, frames are only traced.
#[derive(Debug, Default)]
pub struct LogDriver {
    frames: u64,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl StripDriver for LogDriver {
    fn write(&mut self, frame: &[Color]) -> Result<(), StripError> {
        self.frames += 1;
        let lit = frame.iter().filter(|c| **c != Color::BLACK).count();
        tracing::trace!(frame = self.frames, lit, "frame committed");
        Ok(())
    }
}

/// Adapter from any `smart-leds` writer (WS2812 over SPI, RMT, ...).
pub struct SmartLedsDriver<W> {
    writer: W,
}

impl<W> SmartLedsDriver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> StripDriver for SmartLedsDriver<W>
where
    W: SmartLedsWrite<Color = RGB8>,
    W::Error: fmt::Debug,
{
    fn write(&mut self, frame: &[Color]) -> Result<(), StripError> {
        self.writer
            .write(frame.iter().map(|&c| RGB8::from(c)))
            .map_err(|e| StripError::Write(format!("{e:?}")))
    }
}

/// Open a WS2812 strip wired to a Linux SPI device (MOSI drives DIN).
#[cfg(feature = "hardware")]
pub fn open_spi_driver(
    device: &std::path::Path,
) -> Result<SmartLedsDriver<ws2812_spi::Ws2812<linux_embedded_hal::SpidevBus>>, StripError> {
    use linux_embedded_hal::SpidevBus;
    use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};

    let mut bus = SpidevBus::open(device)
        .map_err(|e| StripError::Open(format!("{}: {e:?}", device.display())))?;

    // ws2812-spi encodes each bit as 3 SPI bits, so 3.8 MHz gives ~800 kHz data.
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(3_800_000)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    bus.configure(&options)
        .map_err(|e| StripError::Open(format!("{}: {e}", device.display())))?;

    Ok(SmartLedsDriver::new(ws2812_spi::Ws2812::new(bus)))
}
