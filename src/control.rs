//! Control loop: owns the strip, polls the remote selection and steps the
//! active pattern.
//!
//! Everything runs on one thread. A tick is:
//!
//! 1. poll the remote feed if the poll interval has elapsed, and switch
//!    patterns if the resolved selection changed;
//! 2. stop if cancellation is pending;
//! 3. step the running pattern once.
//!
//! A switch always blanks the strip first. Switching to a pattern also waits
//! the settle delay and discards the old pattern's progress, so the new one
//! starts at phase 0. Step faults are logged and followed by a short backoff;
//! the loop itself never fails.
//!
//! A tick that drew nothing (off, or a throttled step) yields for the idle
//! interval so the thread does not spin.
//!
//! ## Rust concepts
//! - Generic over its strip, remote, clock and cancel signal, so tests plug
//!   in a virtual clock and a scripted feed with no dynamic dispatch
//! - `Option<PatternState>` makes "no pattern progress yet" explicit; a
//!   switch is just `self.state = None`

use crate::clock::Clock;
use crate::effects::Canvas;
use crate::pattern::{PatternState, StepOutcome, Timing};
use crate::registry::{PatternRegistry, Selection};
use crate::remote::RemoteSelector;
use crate::strip::LedStrip;
use crate::CancelSignal;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Minimum time between two remote polls.
    pub poll_interval: Duration,
    /// Pause after blanking the strip when switching to a pattern.
    pub settle_delay: Duration,
    /// Pause after a failed step.
    pub fault_backoff: Duration,
    /// Yield when a tick drew nothing (off, or throttled step).
    pub idle_interval: Duration,
    /// Effect speed scaling, 100 = nominal.
    pub wait_percent: u32,
    /// Selection assumed before the first poll.
    pub initial: Selection,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(200),
            fault_backoff: Duration::from_millis(100),
            idle_interval: Duration::from_millis(10),
            wait_percent: 100,
            initial: Selection::Pattern(0),
        }
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// What the loop is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Starting,
    Running,
    Off,
    Stopped,
}

/// Snapshot the loop publishes after every tick for the status API.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct LoopStatus {
    pub state: LoopState,
    /// Name of the running pattern, if any
    #[schema(example = "fall")]
    pub pattern: Option<String>,
    /// Current phase of the running pattern
    pub phase: Option<u32>,
    /// Remote polls since startup
    pub polls: u64,
    /// Step faults since startup
    pub faults: u64,
    pub version: String,
}

impl LoopStatus {
    pub fn new() -> Self {
        Self {
            state: LoopState::Starting,
            pattern: None,
            phase: None,
            polls: 0,
            faults: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Loop ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Cancelled,
}

pub struct ControlLoop<S, R, C, X> {
    registry: PatternRegistry,
    strip: S,
    remote: R,
    clock: C,
    cancel: X,
    rng: fastrand::Rng,
    timing: Timing,
    config: LoopConfig,
    selection: Selection,
    state: Option<PatternState>,
    last_poll: Option<Duration>,
    polls: u64,
    faults: u64,
    status: Option<Arc<Mutex<LoopStatus>>>,
}

impl<S, R, C, X> ControlLoop<S, R, C, X>
where
    S: LedStrip,
    R: RemoteSelector,
    C: Clock,
    X: CancelSignal,
{
    pub fn new(
        registry: PatternRegistry,
        strip: S,
        remote: R,
        clock: C,
        cancel: X,
        timing: Timing,
        config: LoopConfig,
    ) -> Self {
        let selection = match config.initial {
            Selection::Pattern(i) if registry.get(i).is_none() => {
                tracing::warn!("Initial pattern {} not registered, using 0", i);
                Selection::Pattern(0)
            }
            other => other,
        };

        Self {
            registry,
            strip,
            remote,
            clock,
            cancel,
            rng: fastrand::Rng::new(),
            timing,
            config,
            selection,
            state: None,
            last_poll: None,
            polls: 0,
            faults: 0,
            status: None,
        }
    }

    /// Share a status snapshot, refreshed after every tick.
    pub fn with_status(mut self, status: Arc<Mutex<LoopStatus>>) -> Self {
        self.status = Some(status);
        self
    }

    /// Seed the random source used by the random effects.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn strip(&self) -> &S {
        &self.strip
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn state(&self) -> Option<&PatternState> {
        self.state.as_ref()
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Blank the strip before the first tick.
    pub fn start(&mut self) {
        tracing::info!(
            "Starting with {} on {} pixels",
            self.registry.display_name(self.selection),
            self.strip.len()
        );
        self.blank();
        self.sync_status(self.running_state());
    }

    /// Run until cancelled. The strip is left as it is on return.
    pub fn run(&mut self) {
        self.start();
        while self.tick() == Tick::Continue {}
        tracing::info!("Pattern loop stopped");
    }

    pub fn tick(&mut self) -> Tick {
        let started = self.clock.now();

        if self.poll_due(started) {
            self.last_poll = Some(started);
            self.poll();
        }

        if self.cancel.pending() {
            self.sync_status(LoopState::Stopped);
            return Tick::Cancelled;
        }

        let drew = match self.selection {
            Selection::Pattern(index) => self.step(index),
            Selection::Off => false,
        };

        if !drew {
            self.clock.sleep(self.config.idle_interval);
        }

        self.sync_status(self.running_state());
        Tick::Continue
    }

    fn poll_due(&self, now: Duration) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.config.poll_interval,
        }
    }

    fn poll(&mut self) {
        let token = self.remote.get();
        self.polls += 1;

        let next = self.registry.resolve(&token).or_keep(self.selection);
        tracing::debug!(token = %token.trim(), ?next, "Polled feed");

        if next != self.selection {
            self.switch_to(next);
        }
    }

    fn switch_to(&mut self, next: Selection) {
        match next {
            Selection::Off => {
                tracing::info!("Turning off all pixels");
                self.blank();
            }
            Selection::Pattern(i) => {
                tracing::info!(
                    "Switching to pattern {}: {}",
                    i,
                    self.registry.display_name(next)
                );
                self.blank();
                self.clock.sleep(self.config.settle_delay);
            }
        }

        self.state = None;
        self.selection = next;
        self.remote.publish(self.registry.display_name(next));
    }

    /// Step the selected pattern; false when the step was throttled.
    fn step(&mut self, index: usize) -> bool {
        let Some(pattern) = self.registry.get(index).copied() else {
            return false;
        };

        let now = self.clock.now();
        let state = self
            .state
            .get_or_insert_with(|| PatternState::new(index));
        let mut canvas = Canvas::new(&mut self.strip, &self.clock, &self.cancel, &mut self.rng)
            .with_wait_percent(self.config.wait_percent);

        match pattern.step(&mut canvas, state, &self.timing, now) {
            Ok(StepOutcome::Throttled) => false,
            Ok(StepOutcome::Advanced) => {
                tracing::trace!(pattern = pattern.name(), phase = state.phase(), "Phase done");
                true
            }
            Ok(StepOutcome::Continue) => true,
            Err(fault) => {
                self.faults += 1;
                tracing::error!("Error in pattern {}: {}", pattern.name(), fault);
                self.clock.sleep(self.config.fault_backoff);
                true
            }
        }
    }

    fn blank(&mut self) {
        self.strip.clear();
        if let Err(e) = self.strip.commit() {
            tracing::error!("Could not blank strip: {}", e);
        }
    }

    fn running_state(&self) -> LoopState {
        match self.selection {
            Selection::Off => LoopState::Off,
            Selection::Pattern(_) => LoopState::Running,
        }
    }

    fn sync_status(&self, state: LoopState) {
        let Some(status) = &self.status else {
            return;
        };
        let mut s = status.lock().unwrap_or_else(PoisonError::into_inner);
        s.state = state;
        s.polls = self.polls;
        s.faults = self.faults;
        match self.selection {
            Selection::Off => {
                s.pattern = None;
                s.phase = None;
            }
            Selection::Pattern(i) => {
                s.pattern = self.registry.get(i).map(|p| p.name().to_string());
                s.phase = Some(self.state.as_ref().map_or(0, PatternState::phase));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::pattern::SubState;
    use crate::remote::StaticSelector;
    use crate::strip::PixelBuffer;
    use crate::strip::testing::{RecordingDriver, recording_strip};
    use crate::{Color, Shutdown};
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const NAMES: [&str; 7] = ["fall", "july", "xmas", "normal", "alert", "blue", "pink"];

    #[derive(Default)]
    struct FeedLog {
        token: String,
        gets: usize,
        published: Vec<String>,
    }

    /// Remote stand-in whose token the test can change between ticks.
    #[derive(Clone, Default)]
    struct FeedStub(Rc<RefCell<FeedLog>>);

    impl FeedStub {
        fn new(token: &str) -> Self {
            let stub = Self::default();
            stub.set(token);
            stub
        }

        fn set(&self, token: &str) {
            self.0.borrow_mut().token = token.to_string();
        }

        fn gets(&self) -> usize {
            self.0.borrow().gets
        }

        fn published(&self) -> Vec<String> {
            self.0.borrow().published.clone()
        }
    }

    impl RemoteSelector for FeedStub {
        fn get(&mut self) -> String {
            let mut log = self.0.borrow_mut();
            log.gets += 1;
            log.token.clone()
        }

        fn publish(&mut self, name: &str) {
            self.0.borrow_mut().published.push(name.to_string());
        }
    }

    struct CancelAfter(Cell<usize>);

    impl CancelSignal for CancelAfter {
        fn pending(&self) -> bool {
            let left = self.0.get();
            self.0.set(left.saturating_sub(1));
            left == 0
        }
    }

    type TestLoop<'c, X = Shutdown> =
        ControlLoop<PixelBuffer<RecordingDriver>, FeedStub, &'c ManualClock, X>;

    fn test_loop<'c>(
        feed: &FeedStub,
        clock: &'c ManualClock,
        cancel: &Shutdown,
        config: LoopConfig,
    ) -> TestLoop<'c> {
        ControlLoop::new(
            PatternRegistry::from_names(&NAMES).unwrap(),
            recording_strip(4),
            feed.clone(),
            clock,
            cancel.clone(),
            Timing::default(),
            config,
        )
        .with_seed(7)
    }

    /// Tick until `done` holds, returning the number of ticks taken.
    fn tick_until<X: CancelSignal>(
        lp: &mut TestLoop<'_, X>,
        limit: usize,
        done: impl Fn(&TestLoop<'_, X>) -> bool,
    ) -> usize {
        for n in 1..=limit {
            assert_eq!(lp.tick(), Tick::Continue);
            if done(&*lp) {
                return n;
            }
        }
        panic!("condition not reached in {limit} ticks");
    }

    fn frames<'a>(lp: &'a TestLoop<'_>) -> &'a [Vec<Color>] {
        &lp.strip().driver().frames
    }

    #[test]
    fn start_blanks_and_commits() {
        let (feed, clock, cancel) = (FeedStub::new("fall"), ManualClock::new(), Shutdown::new());
        let mut lp = test_loop(&feed, &clock, &cancel, LoopConfig::default());

        lp.start();

        assert_eq!(frames(&lp), &[vec![Color::BLACK; 4]]);
        assert_eq!(lp.selection(), Selection::Pattern(0));
        assert!(feed.published().is_empty());
    }

    #[test]
    fn fall_off_xmas_blanks_at_each_transition_and_restarts_xmas() {
        let (feed, clock, cancel) = (FeedStub::new("fall"), ManualClock::new(), Shutdown::new());
        let mut lp = test_loop(&feed, &clock, &cancel, LoopConfig::default());
        lp.start();

        lp.tick();
        assert_eq!(lp.state().map(PatternState::phase), Some(1));
        assert_eq!(lp.strip().pixels(), &[Color::RED; 4]);

        feed.set("off");
        let before = frames(&lp).len();
        tick_until(&mut lp, 100, |lp| lp.selection() == Selection::Off);
        assert_eq!(frames(&lp)[before..].last(), Some(&vec![Color::BLACK; 4]));
        assert!(lp.state().is_none());

        // nothing is drawn while off
        let off_frames = frames(&lp).len();
        for _ in 0..20 {
            lp.tick();
        }
        assert_eq!(frames(&lp).len(), off_frames);

        feed.set(" XMAS ");
        tick_until(&mut lp, 100, |lp| lp.selection() == Selection::Pattern(2));
        assert_eq!(frames(&lp)[off_frames], vec![Color::BLACK; 4]);
        let state = lp.state().unwrap();
        assert_eq!(state.pattern(), 2);
        assert_eq!(state.phase(), 1, "xmas restarts at phase 0");

        assert_eq!(feed.published(), vec!["off".to_string(), "xmas".to_string()]);
    }

    #[test]
    fn xmas_returns_to_zero_after_re_selection() {
        let (feed, clock, cancel) = (FeedStub::new("xmas"), ManualClock::new(), Shutdown::new());
        let config = LoopConfig {
            initial: Selection::Pattern(2),
            ..LoopConfig::default()
        };
        let mut lp = test_loop(&feed, &clock, &cancel, config);
        lp.start();

        tick_until(&mut lp, 100, |lp| lp.state().map(PatternState::phase) == Some(7));

        feed.set("normal");
        tick_until(&mut lp, 100, |lp| lp.selection() == Selection::Pattern(3));
        feed.set("2");
        tick_until(&mut lp, 100, |lp| lp.selection() == Selection::Pattern(2));

        assert_eq!(lp.state().map(PatternState::phase), Some(1));
    }

    #[test]
    fn switch_waits_the_settle_delay() {
        let (feed, clock, cancel) = (FeedStub::new("blue"), ManualClock::new(), Shutdown::new());
        let config = LoopConfig {
            wait_percent: 0,
            ..LoopConfig::default()
        };
        let mut lp = test_loop(&feed, &clock, &cancel, config);
        lp.start();

        lp.tick();

        assert_eq!(lp.selection(), Selection::Pattern(5));
        assert_eq!(clock.now(), Duration::from_millis(200));
        assert_eq!(lp.strip().pixels(), &[Color::BLUE; 4]);
    }

    /// Virtual clock that moves forward by 1 ns whenever it is read, like a
    /// real monotonic clock does between two calls.
    #[derive(Default)]
    struct CreepingClock(ManualClock);

    impl Clock for CreepingClock {
        fn now(&self) -> Duration {
            self.0.advance(Duration::from_nanos(1));
            self.0.now()
        }

        fn sleep(&self, duration: Duration) {
            self.0.sleep(duration);
        }
    }

    fn creeping_loop<'c>(
        token: &str,
        clock: &'c CreepingClock,
        config: LoopConfig,
    ) -> ControlLoop<PixelBuffer<RecordingDriver>, StaticSelector, &'c CreepingClock, Shutdown>
    {
        ControlLoop::new(
            PatternRegistry::from_names(&NAMES).unwrap(),
            recording_strip(4),
            StaticSelector::new(token),
            clock,
            Shutdown::new(),
            Timing::default(),
            config,
        )
    }

    #[test]
    fn off_ticks_yield_even_when_time_moves_on_its_own() {
        let clock = CreepingClock::default();
        let mut lp = creeping_loop("off", &clock, LoopConfig::default());
        lp.start();

        for _ in 0..50 {
            lp.tick();
        }

        assert_eq!(lp.selection(), Selection::Off);
        assert!(clock.0.now() >= Duration::from_millis(500));
    }

    #[test]
    fn throttled_tick_yields_but_drawing_tick_does_not() {
        let clock = CreepingClock::default();
        let config = LoopConfig {
            wait_percent: 0,
            initial: Selection::Pattern(5),
            ..LoopConfig::default()
        };
        let mut lp = creeping_loop("blue", &clock, config);
        lp.start();

        // first step draws the whole wipe without waiting
        lp.tick();
        assert_eq!(lp.strip().pixels(), &[Color::BLUE; 4]);
        assert!(clock.0.now() < Duration::from_millis(1));

        // second step falls inside the slow interval
        let commits = lp.strip().commits();
        lp.tick();
        assert_eq!(lp.strip().commits(), commits);
        assert!(clock.0.now() >= Duration::from_millis(10));
    }

    #[test]
    fn off_loop_sleeps_on_the_system_clock() {
        let config = LoopConfig {
            idle_interval: Duration::from_millis(2),
            ..LoopConfig::default()
        };
        let mut lp = ControlLoop::new(
            PatternRegistry::from_names(&NAMES).unwrap(),
            recording_strip(4),
            StaticSelector::new("off"),
            SystemClock::new(),
            Shutdown::new(),
            Timing::default(),
            config,
        );
        lp.start();

        let started = std::time::Instant::now();
        for _ in 0..20 {
            assert_eq!(lp.tick(), Tick::Continue);
        }

        assert_eq!(lp.selection(), Selection::Off);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn polls_are_rate_limited() {
        let (feed, clock, cancel) = (FeedStub::new("off"), ManualClock::new(), Shutdown::new());
        let mut lp = test_loop(&feed, &clock, &cancel, LoopConfig::default());
        lp.start();

        // off: every tick only yields for the idle interval
        for _ in 0..100 {
            lp.tick();
        }
        assert_eq!(clock.now(), Duration::from_millis(1000));
        assert_eq!(feed.gets(), 2);
    }

    #[test]
    fn unresolved_tokens_keep_the_selection() {
        let (feed, clock, cancel) = (FeedStub::new("xmas"), ManualClock::new(), Shutdown::new());
        let mut lp = test_loop(&feed, &clock, &cancel, LoopConfig::default());
        lp.start();
        lp.tick();
        assert_eq!(lp.selection(), Selection::Pattern(2));

        for token in ["disco", "99", "", "-1"] {
            feed.set(token);
            let polls = feed.gets();
            tick_until(&mut lp, 100, |_| feed.gets() > polls);
            assert_eq!(lp.selection(), Selection::Pattern(2));
        }
        assert_eq!(feed.published(), vec!["xmas".to_string()]);
    }

    #[test]
    fn switch_leaves_no_sub_state_behind() {
        let (feed, clock, cancel) = (FeedStub::new("fall"), ManualClock::new(), Shutdown::new());
        let mut lp = test_loop(&feed, &clock, &cancel, LoopConfig::default());
        lp.start();

        tick_until(&mut lp, 500, |lp| {
            matches!(lp.state().map(PatternState::sub), Some(SubState::Interleave { .. }))
        });

        feed.set("july");
        tick_until(&mut lp, 100, |lp| lp.selection() == Selection::Pattern(1));

        let state = lp.state().unwrap();
        assert_eq!(state.pattern(), 1);
        assert_eq!(state.phase(), 1);
        assert_eq!(state.sub(), SubState::Idle);
    }

    #[test]
    fn step_fault_backs_off_and_continues() {
        let (feed, clock, cancel) = (FeedStub::new("fall"), ManualClock::new(), Shutdown::new());
        let status = Arc::new(Mutex::new(LoopStatus::new()));
        let mut lp =
            test_loop(&feed, &clock, &cancel, LoopConfig::default()).with_status(status.clone());
        lp.strip.driver_mut().fail = true;
        lp.start();

        assert_eq!(lp.tick(), Tick::Continue);
        assert_eq!(clock.now(), Duration::from_millis(100));
        assert_eq!(lp.faults(), 1);

        assert_eq!(lp.tick(), Tick::Continue);
        assert_eq!(lp.faults(), 2);
        assert_eq!(lp.state().map(PatternState::phase), Some(0));
        assert_eq!(status.lock().unwrap().faults, 2);
    }

    #[test]
    fn cancellation_stops_before_stepping() {
        let (feed, clock, cancel) = (FeedStub::new("off"), ManualClock::new(), Shutdown::new());
        let status = Arc::new(Mutex::new(LoopStatus::new()));
        let mut lp =
            test_loop(&feed, &clock, &cancel, LoopConfig::default()).with_status(status.clone());
        lp.start();

        cancel.trigger();

        assert_eq!(lp.tick(), Tick::Cancelled);
        assert_eq!(lp.selection(), Selection::Off, "poll still happens first");
        assert_eq!(status.lock().unwrap().state, LoopState::Stopped);
    }

    #[test]
    fn run_returns_once_cancelled() {
        let feed = FeedStub::new("normal");
        let clock = ManualClock::new();
        let mut lp = ControlLoop::new(
            PatternRegistry::from_names(&NAMES).unwrap(),
            recording_strip(4),
            feed.clone(),
            &clock,
            CancelAfter(Cell::new(50)),
            Timing::default(),
            LoopConfig::default(),
        );

        lp.run();

        assert_eq!(lp.selection(), Selection::Pattern(3));
        assert!(lp.strip().commits() > 1);
    }

    #[test]
    fn status_tracks_pattern_and_phase() {
        let (feed, clock, cancel) = (FeedStub::new("normal"), ManualClock::new(), Shutdown::new());
        let status = Arc::new(Mutex::new(LoopStatus::new()));
        let mut lp =
            test_loop(&feed, &clock, &cancel, LoopConfig::default()).with_status(status.clone());
        lp.start();
        assert_eq!(status.lock().unwrap().state, LoopState::Running);

        lp.tick();
        {
            let s = status.lock().unwrap();
            assert_eq!(s.pattern.as_deref(), Some("normal"));
            assert_eq!(s.phase, Some(1));
            assert_eq!(s.polls, 1);
        }

        feed.set("OFF");
        tick_until(&mut lp, 100, |lp| lp.selection() == Selection::Off);
        let s = status.lock().unwrap();
        assert_eq!(s.state, LoopState::Off);
        assert_eq!(s.pattern, None);
    }

    #[test]
    fn unknown_initial_pattern_falls_back_to_first() {
        let (feed, clock, cancel) = (FeedStub::new(""), ManualClock::new(), Shutdown::new());
        let config = LoopConfig {
            initial: Selection::Pattern(42),
            ..LoopConfig::default()
        };
        let lp = test_loop(&feed, &clock, &cancel, config);
        assert_eq!(lp.selection(), Selection::Pattern(0));
    }
}
