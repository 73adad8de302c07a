//! Pattern stepper: one state machine per named pattern.
//!
//! A pattern is a fixed cycle of phases. Every call to `Pattern::step`
//! either does nothing (called again too soon), runs one whole single-shot
//! effect and moves to the next phase, or does one increment of a multi-call
//! effect. A step never loops to completion of the pattern, so the control
//! loop regains control after at most one effect.
//!
//! ## Cycles
//!
//! | Pattern | Phases | Pace | Content |
//! |---------|--------|------|---------|
//! | fall    | 8  | fast | wipes, chases, interleaved fill, twinkle in autumn colours |
//! | july    | 8  | fast | same structure in red, white and blue |
//! | xmas    | 12 | slow | candy cane, stripes, random, wipes, rainbow, fills |
//! | normal  | 6  | fast | RGB wipes, grey chase, rainbow, rainbow chase |
//! | alert   | 1  | fast | yellow wipe, repeated |
//! | blue    | 1  | slow | blue wipe, repeated |
//! | pink    | 1  | slow | pink wipe, repeated |
//!
//! ## Rust concepts
//! - `SubState` is a tagged union: each variant carries only the progress
//!   its own multi-call effect needs, and `Idle` carries nothing
//! - step functions are plain `fn` pointers picked once per `PatternKind`,
//!   so dispatch is a single indirect call with no boxing

use crate::Color;
use crate::effects::{self, Canvas};
use crate::strip::StripError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Calls an interleaved fill runs before its phase ends (≈5 s at 50 ms).
pub const INTERLEAVE_BUDGET: u32 = 100;
/// Calls a twinkle fill runs before its phase ends (≈10 s at 50 ms).
pub const TWINKLE_BUDGET: u32 = 200;

const FAST_WIPE_MS: u64 = 20;
const CHASE_MS: u64 = 30;
const XMAS_MS: u64 = 30;
const SOLID_WIPE_MS: u64 = 50;

const ORANGE: Color = Color::new(255, 35, 0);
const AUTUMN_YELLOW: Color = Color::new(255, 255, 15);
const PINK: Color = Color::new(255, 0, 255);

// ── Identity ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Fall,
    July,
    Xmas,
    Normal,
    Alert,
    Blue,
    Pink,
}

/// Which minimum inter-frame interval governs a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Fast,
    Slow,
}

impl PatternKind {
    pub const ALL: [Self; 7] = [
        Self::Fall,
        Self::July,
        Self::Xmas,
        Self::Normal,
        Self::Alert,
        Self::Blue,
        Self::Pink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Fall => "fall",
            Self::July => "july",
            Self::Xmas => "xmas",
            Self::Normal => "normal",
            Self::Alert => "alert",
            Self::Blue => "blue",
            Self::Pink => "pink",
        }
    }

    pub fn cycle_len(self) -> u32 {
        match self {
            Self::Fall | Self::July => 8,
            Self::Xmas => 12,
            Self::Normal => 6,
            Self::Alert | Self::Blue | Self::Pink => 1,
        }
    }

    pub fn pace(self) -> Pace {
        match self {
            Self::Fall | Self::July | Self::Normal | Self::Alert => Pace::Fast,
            Self::Xmas | Self::Blue | Self::Pink => Pace::Slow,
        }
    }

    fn step_fn(self) -> StepFn {
        match self {
            Self::Fall => step_fall,
            Self::July => step_july,
            Self::Xmas => step_xmas,
            Self::Normal => step_normal,
            Self::Alert => step_alert,
            Self::Blue => step_blue,
            Self::Pink => step_pink,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPattern(pub String);

impl fmt::Display for UnknownPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown pattern name: {:?}", self.0)
    }
}

impl std::error::Error for UnknownPattern {}

impl FromStr for PatternKind {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| UnknownPattern(s.to_string()))
    }
}

// ── Timing ───────────────────────────────────────────────────────────

/// Frame-rate limits for the step functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
}

impl Timing {
    pub fn min_interval(&self, pace: Pace) -> Duration {
        match pace {
            Pace::Fast => self.fast_interval,
            Pace::Slow => self.slow_interval,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_millis(50),
            slow_interval: Duration::from_millis(100),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Progress inside the current phase, for effects that span several steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubState {
    #[default]
    Idle,
    Interleave { sub_step: u32, cursors: [usize; 3] },
    Twinkle { sub_step: u32 },
}

/// Mutable progress of the one pattern that is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternState {
    pattern: usize,
    phase: u32,
    last_update: Option<Duration>,
    sub: SubState,
}

impl PatternState {
    pub fn new(pattern: usize) -> Self {
        Self {
            pattern,
            phase: 0,
            last_update: None,
            sub: SubState::Idle,
        }
    }

    /// Index of the pattern this state belongs to.
    pub fn pattern(&self) -> usize {
        self.pattern
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn last_update(&self) -> Option<Duration> {
        self.last_update
    }

    pub fn sub(&self) -> SubState {
        self.sub
    }

    fn advance(&mut self, cycle: u32) -> StepOutcome {
        self.sub = SubState::Idle;
        self.phase = (self.phase + 1) % cycle.max(1);
        StepOutcome::Advanced
    }
}

// ── Step results ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Called again inside the minimum interval; nothing was drawn.
    Throttled,
    /// Work was done but the phase did not finish: a sub-step, or a
    /// repeating effect.
    Continue,
    /// The current phase completed and `phase` moved on.
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFault {
    Strip(StripError),
    PhaseOutOfRange { phase: u32, cycle: u32 },
}

impl fmt::Display for StepFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strip(e) => write!(f, "strip: {e}"),
            Self::PhaseOutOfRange { phase, cycle } => {
                write!(f, "phase {phase} outside cycle of {cycle}")
            }
        }
    }
}

impl std::error::Error for StepFault {}

impl From<StripError> for StepFault {
    fn from(e: StripError) -> Self {
        Self::Strip(e)
    }
}

type StepFn = fn(&mut Canvas<'_>, &mut PatternState) -> Result<StepOutcome, StepFault>;

// ── Pattern ──────────────────────────────────────────────────────────

/// A registered pattern: identity plus the step function resolved for it.
#[derive(Clone, Copy)]
pub struct Pattern {
    kind: PatternKind,
    index: usize,
    step: StepFn,
}

impl Pattern {
    pub fn new(kind: PatternKind, index: usize) -> Self {
        Self {
            kind,
            index,
            step: kind.step_fn(),
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cycle_len(&self) -> u32 {
        self.kind.cycle_len()
    }

    /// Advance this pattern by at most one frame.
    ///
    /// A state left over from another pattern is discarded first, so progress
    /// never leaks between patterns.
    pub fn step(
        &self,
        canvas: &mut Canvas<'_>,
        state: &mut PatternState,
        timing: &Timing,
        now: Duration,
    ) -> Result<StepOutcome, StepFault> {
        if state.pattern != self.index {
            *state = PatternState::new(self.index);
        }

        let interval = timing.min_interval(self.kind.pace());
        if let Some(last) = state.last_update {
            if now.saturating_sub(last) < interval {
                return Ok(StepOutcome::Throttled);
            }
        }
        state.last_update = Some(now);

        (self.step)(canvas, state)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .finish()
    }
}

// ── Seasonal patterns (fall, july) ───────────────────────────────────

/// Colours for the shared 8-phase seasonal cycle.
struct Seasonal {
    kind: PatternKind,
    wipes: [Color; 3],
    chases: [Color; 3],
    interleave: [Color; 3],
    twinkle: [Color; 3],
}

const FALL: Seasonal = Seasonal {
    kind: PatternKind::Fall,
    wipes: [Color::RED, AUTUMN_YELLOW, ORANGE],
    chases: [AUTUMN_YELLOW, Color::RED, ORANGE],
    interleave: [Color::RED, ORANGE, AUTUMN_YELLOW],
    twinkle: [Color::RED, AUTUMN_YELLOW, ORANGE],
};

const JULY: Seasonal = Seasonal {
    kind: PatternKind::July,
    wipes: [Color::RED, Color::WHITE, Color::BLUE],
    chases: [Color::WHITE, Color::RED, Color::BLUE],
    interleave: [Color::RED, Color::BLUE, Color::WHITE],
    twinkle: [Color::RED, Color::WHITE, Color::BLUE],
};

fn step_fall(c: &mut Canvas<'_>, state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    step_seasonal(&FALL, c, state)
}

fn step_july(c: &mut Canvas<'_>, state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    step_seasonal(&JULY, c, state)
}

fn step_seasonal(
    p: &Seasonal,
    c: &mut Canvas<'_>,
    state: &mut PatternState,
) -> Result<StepOutcome, StepFault> {
    let cycle = p.kind.cycle_len();
    match state.phase % cycle {
        ph @ 0..=2 => effects::color_wipe(c, p.wipes[ph as usize], FAST_WIPE_MS)?,
        ph @ 3..=5 => effects::theater_chase(c, p.chases[ph as usize - 3], CHASE_MS)?,
        6 => return interleave_fill(c, state, p.interleave, cycle),
        7 => return twinkle_fill(c, state, p.twinkle, cycle),
        phase => return Err(StepFault::PhaseOutOfRange { phase, cycle }),
    }
    Ok(state.advance(cycle))
}

fn interleave_fill(
    c: &mut Canvas<'_>,
    state: &mut PatternState,
    colors: [Color; 3],
    cycle: u32,
) -> Result<StepOutcome, StepFault> {
    let (sub_step, mut cursors) = match state.sub {
        SubState::Interleave { sub_step, cursors } => (sub_step, cursors),
        _ => (0, [0, 1, 2]),
    };

    effects::interleave_increment(c, &mut cursors, colors)?;

    let sub_step = sub_step + 1;
    if sub_step >= INTERLEAVE_BUDGET {
        return Ok(state.advance(cycle));
    }
    state.sub = SubState::Interleave { sub_step, cursors };
    Ok(StepOutcome::Continue)
}

fn twinkle_fill(
    c: &mut Canvas<'_>,
    state: &mut PatternState,
    colors: [Color; 3],
    cycle: u32,
) -> Result<StepOutcome, StepFault> {
    let sub_step = match state.sub {
        SubState::Twinkle { sub_step } => sub_step,
        _ => 0,
    };

    effects::twinkle_increment(c, colors)?;

    let sub_step = sub_step + 1;
    if sub_step >= TWINKLE_BUDGET {
        return Ok(state.advance(cycle));
    }
    state.sub = SubState::Twinkle { sub_step };
    Ok(StepOutcome::Continue)
}

// ── xmas ─────────────────────────────────────────────────────────────

fn step_xmas(c: &mut Canvas<'_>, state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    let cycle = PatternKind::Xmas.cycle_len();
    match state.phase % cycle {
        0 => effects::candy_cane(c, 5, 8, XMAS_MS)?,
        1 => effects::rainbow_stripe(c, 2, 4, 50)?,
        2 => effects::random_white(c, 10, 100)?,
        3 => effects::random_color(c, 10, 100)?,
        4 => effects::color_wipe(c, Color::RED, XMAS_MS)?,
        5 => effects::color_wipe(c, Color::GREEN, XMAS_MS)?,
        6 => effects::color_wipe(c, Color::WHITE, XMAS_MS)?,
        7 => effects::rainbow_cycle(c, 3, 5)?,
        8 => effects::alternate_color(c, Color::RED, Color::GREEN, 50)?,
        9 => effects::random_position_fill(c, Color::RED, XMAS_MS)?,
        10 => effects::middle_fill(c, Color::GREEN, XMAS_MS)?,
        11 => effects::side_fill(c, Color::WHITE, XMAS_MS)?,
        phase => return Err(StepFault::PhaseOutOfRange { phase, cycle }),
    }
    Ok(state.advance(cycle))
}

// ── normal ───────────────────────────────────────────────────────────

fn step_normal(c: &mut Canvas<'_>, state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    let cycle = PatternKind::Normal.cycle_len();
    match state.phase % cycle {
        0 => effects::color_wipe(c, Color::RED, FAST_WIPE_MS)?,
        1 => effects::color_wipe(c, Color::GREEN, FAST_WIPE_MS)?,
        2 => effects::color_wipe(c, Color::BLUE, FAST_WIPE_MS)?,
        3 => effects::theater_chase(c, Color::gray(127), CHASE_MS)?,
        4 => effects::rainbow(c, 5)?,
        5 => effects::theater_chase_rainbow(c, CHASE_MS)?,
        phase => return Err(StepFault::PhaseOutOfRange { phase, cycle }),
    }
    Ok(state.advance(cycle))
}

// ── Single-colour patterns ───────────────────────────────────────────

fn step_alert(c: &mut Canvas<'_>, _state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    effects::color_wipe(c, Color::YELLOW, FAST_WIPE_MS)?;
    Ok(StepOutcome::Continue)
}

fn step_blue(c: &mut Canvas<'_>, _state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    effects::color_wipe(c, Color::BLUE, SOLID_WIPE_MS)?;
    Ok(StepOutcome::Continue)
}

fn step_pink(c: &mut Canvas<'_>, _state: &mut PatternState) -> Result<StepOutcome, StepFault> {
    effects::color_wipe(c, PINK, SOLID_WIPE_MS)?;
    Ok(StepOutcome::Continue)
}
