//! Effect primitives: the building blocks the pattern step functions call.
//!
//! Single-shot effects (wipes, chases, rainbows, fills) run one bounded
//! animation to completion: a fixed number of frames, each followed by a
//! short wait. They check the cancellation signal between frames and return
//! early when it is pending, so a stop request never waits for a whole effect.
//!
//! Incremental effects (`interleave_increment`, `twinkle_increment`) do one
//! frame's worth of work per call; the caller keeps their progress.

use crate::clock::Clock;
use crate::strip::{LedStrip, StripError};
use crate::{CancelSignal, Color};
use std::time::Duration;

/// Theater-chase passes per effect (each pass is 3 frames).
const CHASE_CYCLES: usize = 5;
/// Passes of the rainbow theater chase.
const RAINBOW_CHASE_CYCLES: usize = 30;
/// The flowing rainbow makes this many full turns of the hue circle.
const RAINBOW_TURNS: u32 = 5;
const RAINBOW_HUE_STEP: usize = 256;

const STRIPE_COLORS: [Color; 6] = [
    Color::RED,
    Color::YELLOW,
    Color::GREEN,
    Color::CYAN,
    Color::BLUE,
    Color::MAGENTA,
];

/// Everything an effect may touch during one step.
pub struct Canvas<'a> {
    strip: &'a mut dyn LedStrip,
    clock: &'a dyn Clock,
    cancel: &'a dyn CancelSignal,
    rng: &'a mut fastrand::Rng,
    wait_percent: u32,
}

impl<'a> Canvas<'a> {
    pub fn new(
        strip: &'a mut dyn LedStrip,
        clock: &'a dyn Clock,
        cancel: &'a dyn CancelSignal,
        rng: &'a mut fastrand::Rng,
    ) -> Self {
        Self {
            strip,
            clock,
            cancel,
            rng,
            wait_percent: 100,
        }
    }

    /// Scale every effect wait; 100 is nominal speed, 0 disables waits.
    pub fn with_wait_percent(mut self, percent: u32) -> Self {
        self.wait_percent = percent;
        self
    }

    pub fn len(&self) -> usize {
        self.strip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strip.is_empty()
    }

    pub fn set(&mut self, index: usize, color: Color) {
        self.strip.set(index, color);
    }

    pub fn fill(&mut self, color: Color) {
        self.strip.fill(color);
    }

    pub fn show(&mut self) -> Result<(), StripError> {
        self.strip.commit()
    }

    pub fn wait(&self, ms: u64) {
        let scaled = ms * u64::from(self.wait_percent) / 100;
        self.clock.sleep(Duration::from_millis(scaled));
    }

    fn show_and_wait(&mut self, ms: u64) -> Result<(), StripError> {
        self.show()?;
        self.wait(ms);
        Ok(())
    }

    pub fn interrupted(&self) -> bool {
        self.cancel.pending()
    }

    /// Uniform random pixel index. Only meaningful on a non-empty strip.
    pub fn random_index(&mut self) -> usize {
        self.rng.usize(..self.strip.len().max(1))
    }

    fn random_u8(&mut self) -> u8 {
        self.rng.u8(..)
    }
}

// ── Single-shot effects ──────────────────────────────────────────────

/// Fill the strip one pixel at a time, showing each pixel.
pub fn color_wipe(c: &mut Canvas<'_>, color: Color, wait_ms: u64) -> Result<(), StripError> {
    for i in 0..c.len() {
        if c.interrupted() {
            break;
        }
        c.set(i, color);
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Theater-style crawling lights: every third pixel lit, shifting by one.
pub fn theater_chase(c: &mut Canvas<'_>, color: Color, wait_ms: u64) -> Result<(), StripError> {
    let n = c.len();
    for _ in 0..CHASE_CYCLES {
        if c.interrupted() {
            break;
        }
        for q in 0..3 {
            for i in (q..n).step_by(3) {
                c.set(i, color);
            }
            c.show_and_wait(wait_ms)?;
            for i in (q..n).step_by(3) {
                c.set(i, Color::BLACK);
            }
        }
    }
    Ok(())
}

/// Flowing rainbow: one hue revolution along the strip, scrolled through
/// several turns of the colour wheel.
pub fn rainbow(c: &mut Canvas<'_>, wait_ms: u64) -> Result<(), StripError> {
    let n = c.len();
    if n == 0 {
        return Ok(());
    }
    for first_hue in (0..RAINBOW_TURNS * 65536).step_by(RAINBOW_HUE_STEP) {
        if c.interrupted() {
            break;
        }
        for i in 0..n {
            let hue = first_hue as usize + i * 65536 / n;
            c.set(i, Color::from_hue(hue as u16));
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Theater chase where each lit pixel carries its own rainbow hue.
pub fn theater_chase_rainbow(c: &mut Canvas<'_>, wait_ms: u64) -> Result<(), StripError> {
    let n = c.len();
    if n == 0 {
        return Ok(());
    }
    let mut first_hue: usize = 0;
    for _ in 0..RAINBOW_CHASE_CYCLES {
        for b in 0..3 {
            if c.interrupted() {
                return Ok(());
            }
            c.fill(Color::BLACK);
            for px in (b..n).step_by(3) {
                let hue = first_hue + px * 65536 / n;
                c.set(px, Color::from_hue(hue as u16));
            }
            c.show_and_wait(wait_ms)?;
            // one full turn of the wheel every 90 frames
            first_hue += 65536 / 90;
        }
    }
    Ok(())
}

/// Colour-wheel rainbow spread evenly over the strip, rotated `sets` times.
pub fn rainbow_cycle(c: &mut Canvas<'_>, sets: usize, wait_ms: u64) -> Result<(), StripError> {
    let n = c.len();
    for j in 0..256 * sets {
        if c.interrupted() {
            break;
        }
        for i in 0..n {
            let pos = (i * 256 / n + j) & 255;
            c.set(n - i - 1, Color::wheel(pos as u8));
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Scrolling red and white stripes of `width` pixels.
pub fn candy_cane(
    c: &mut Canvas<'_>,
    sets: usize,
    width: usize,
    wait_ms: u64,
) -> Result<(), StripError> {
    let n = c.len();
    let width = width.max(1);
    for j in 0..sets * width {
        if c.interrupted() {
            break;
        }
        for i in 0..n {
            let color = if (i + j) % (width * 2) < width {
                Color::RED
            } else {
                Color::WHITE
            };
            c.set(n - i - 1, color);
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Scrolling six-colour stripes of `width` pixels.
pub fn rainbow_stripe(
    c: &mut Canvas<'_>,
    sets: usize,
    width: usize,
    wait_ms: u64,
) -> Result<(), StripError> {
    let n = c.len();
    let width = width.max(1);
    for j in 0..sets * width * 6 {
        if c.interrupted() {
            break;
        }
        for i in 0..n {
            let color = STRIPE_COLORS[((i + j) / width) % STRIPE_COLORS.len()];
            c.set(n - i - 1, color);
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// `sets` frames of random grey levels.
pub fn random_white(c: &mut Canvas<'_>, sets: usize, wait_ms: u64) -> Result<(), StripError> {
    for _ in 0..sets {
        if c.interrupted() {
            break;
        }
        for i in 0..c.len() {
            let v = c.random_u8();
            c.set(i, Color::gray(v));
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// `sets` frames of random colours.
pub fn random_color(c: &mut Canvas<'_>, sets: usize, wait_ms: u64) -> Result<(), StripError> {
    for _ in 0..sets {
        if c.interrupted() {
            break;
        }
        for i in 0..c.len() {
            let color = Color::new(c.random_u8(), c.random_u8(), c.random_u8());
            c.set(i, color);
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Even/odd pixels in two colours, then swapped.
pub fn alternate_color(
    c: &mut Canvas<'_>,
    first: Color,
    second: Color,
    wait_ms: u64,
) -> Result<(), StripError> {
    for (even, odd) in [(first, second), (second, first)] {
        if c.interrupted() {
            break;
        }
        for i in 0..c.len() {
            c.set(i, if i % 2 == 0 { even } else { odd });
        }
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Light random unlit pixels one by one until all but one are lit.
///
/// Visits a shuffled index order, so the effect is bounded to `len - 1`
/// frames instead of retrying already-lit positions.
pub fn random_position_fill(
    c: &mut Canvas<'_>,
    color: Color,
    wait_ms: u64,
) -> Result<(), StripError> {
    let mut order: Vec<usize> = (0..c.len()).collect();
    c.rng.shuffle(&mut order);
    order.pop();

    for i in order {
        if c.interrupted() {
            break;
        }
        c.set(i, color);
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Grow from the middle outwards, then clear from the ends inwards.
pub fn middle_fill(c: &mut Canvas<'_>, color: Color, wait_ms: u64) -> Result<(), StripError> {
    let n = c.len();
    let half = n / 2;
    for i in 0..half {
        if c.interrupted() {
            return Ok(());
        }
        c.set(half + i, color);
        c.set(half - i, color);
        c.show_and_wait(wait_ms)?;
    }
    for i in 0..half {
        if c.interrupted() {
            break;
        }
        c.set(i, Color::BLACK);
        c.set(n - i - 1, Color::BLACK);
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

/// Grow from both ends inwards, then clear from the middle outwards.
pub fn side_fill(c: &mut Canvas<'_>, color: Color, wait_ms: u64) -> Result<(), StripError> {
    let n = c.len();
    let half = n / 2;
    for i in 0..half {
        if c.interrupted() {
            return Ok(());
        }
        c.set(i, color);
        c.set(n - i - 1, color);
        c.show_and_wait(wait_ms)?;
    }
    for i in 0..half {
        if c.interrupted() {
            break;
        }
        c.set(half + i, Color::BLACK);
        c.set(half - i, Color::BLACK);
        c.show_and_wait(wait_ms)?;
    }
    Ok(())
}

// ── Incremental effects ──────────────────────────────────────────────

/// Distance each interleave cursor moves per call.
pub const INTERLEAVE_STRIDE: usize = 3;

/// One increment of the three-colour interleaved fill: each cursor still on
/// the strip paints its pixel and moves forward by the stride.
pub fn interleave_increment(
    c: &mut Canvas<'_>,
    cursors: &mut [usize; 3],
    colors: [Color; 3],
) -> Result<(), StripError> {
    let n = c.len();
    for (cursor, color) in cursors.iter_mut().zip(colors) {
        if *cursor < n {
            c.set(*cursor, color);
            *cursor += INTERLEAVE_STRIDE;
        }
    }
    c.show()
}

/// One increment of the twinkle fill: one random pixel per colour.
pub fn twinkle_increment(c: &mut Canvas<'_>, colors: [Color; 3]) -> Result<(), StripError> {
    if c.is_empty() {
        return Ok(());
    }
    for color in colors {
        let i = c.random_index();
        c.set(i, color);
    }
    c.show()
}
