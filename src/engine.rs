//! The coordination engine: owns every component, pumps the scheduler, and
//! routes state changes between them.
//!
//! Components compute; the engine commits. Every write to [`PetState`] goes
//! through [`PetEngine::apply`], which hands the resulting changes to the
//! components that react to them. The host drives everything with a
//! monotonic millisecond clock.

use std::fmt;

use glam::Vec2;

use crate::click::{ClickKind, ClickTracker};
use crate::config::PetConfig;
use crate::pet::animation::{AnimationCoordinator, AnimationEvent, AnimationName, Channel};
use crate::pet::behavior::{BehaviorStateMachine, Decision, Rejection, Trigger};
use crate::pet::drag::{DisplayBounds, DragSampler, PointerButton};
use crate::pet::energy::{EnergyLevel, EnergyReport, EnergyResource, InteractionOutcome, LOW_ENERGY};
use crate::pet::motion::{MoveRefusal, Mover};
use crate::pet::state::{
    Behavior, HistoryEntry, Listener, PetState, StateChange, StateKey, StatePatch, StateStore,
    SubscriptionId, LEVEL_MAX,
};
use crate::sched::{Millis, Scheduler, TaskHandle};
use crate::telemetry::batcher::{ChatRole, InteractionBatcher, SessionStats};
use crate::telemetry::collector::Collector;

/// What the engine needs from the window it lives in.
pub trait WindowHost {
    /// Fire-and-forget window move, in screen pixels.
    fn request_move(&mut self, pos: Vec2);
    fn window_position(&self) -> Option<Vec2>;
    fn cursor_position(&self) -> Option<Vec2>;
    fn display_size(&self) -> Vec2;
    fn window_size(&self) -> Vec2;
}

/// Everything that can be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    DecayTick,
    RecoveryTick,
    ProximityCheck,
    CursorPoll,
    MoveStep,
    AnimationDone { channel: Channel, token: u64 },
    DragSettle,
    FlushTimer,
    Heartbeat,
}

/// User-facing notices. The engine never fails a request; it explains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feedback {
    Transition {
        from: Behavior,
        to: Behavior,
        trigger: Trigger,
    },
    Rejected(Rejection),
    /// Interaction inside the energy cooldown.
    TooSoon { remaining_ms: Millis },
    AlreadyAwake,
    EnergyLow(EnergyLevel),
    EnergyRecovered { energy: f64 },
    Exhausted,
    TooTiredToMove { energy: f64 },
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feedback::Transition { from, to, trigger } => {
                write!(f, "{} -> {} ({trigger:?})", from.label(), to.label())
            }
            Feedback::Rejected(rejection) => write!(f, "Refused: {rejection}"),
            Feedback::TooSoon { remaining_ms } => {
                write!(f, "Needs a rest, try again in {}s", remaining_ms.div_ceil(1_000))
            }
            Feedback::AlreadyAwake => f.write_str("Already awake"),
            Feedback::EnergyLow(level) => write!(f, "Energy is getting low ({level:?})"),
            Feedback::EnergyRecovered { energy } => write!(f, "Feeling better at {energy:.0}%"),
            Feedback::Exhausted => f.write_str("Out of energy, falling asleep"),
            Feedback::TooTiredToMove { energy } => {
                write!(f, "Too tired to move ({energy:.0}% energy)")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionOutcome {
    Unchanged,
    Rejected(Rejection),
    Committed {
        from: Behavior,
        to: Behavior,
        forced: bool,
    },
}

pub struct PetEngine<H: WindowHost> {
    host: H,
    cfg: PetConfig,
    sched: Scheduler<Task>,
    store: StateStore,
    energy: EnergyResource,
    behavior: BehaviorStateMachine,
    anim: AnimationCoordinator,
    drag: DragSampler,
    mover: Mover,
    clicks: ClickTracker,
    batcher: InteractionBatcher,
    rng: fastrand::Rng,
    feedback: Vec<Feedback>,
    hover_since: Option<Millis>,
    shut_down: bool,
}

impl<H: WindowHost> PetEngine<H> {
    pub fn new(host: H, collector: Box<dyn Collector>, cfg: PetConfig, now: Millis) -> Self {
        Self::with_rng(host, collector, cfg, now, fastrand::Rng::new())
    }

    pub fn with_rng(
        host: H,
        collector: Box<dyn Collector>,
        cfg: PetConfig,
        now: Millis,
        mut rng: fastrand::Rng,
    ) -> Self {
        let mut sched = Scheduler::new(now);
        let mut store = StateStore::new(now);
        if let Some(pos) = host.window_position() {
            store.update(StatePatch::new().position(pos));
        }

        let mut energy = EnergyResource::new(cfg.energy.clone());
        energy.start_decay(&mut sched);

        let mut batcher = InteractionBatcher::new(&cfg.telemetry, collector, now, &mut rng);
        batcher.start(&mut sched);

        let mut anim = AnimationCoordinator::new(cfg.drag.settle_ms);
        let state = store.get();
        anim.play(&mut sched, AnimationName::for_behavior(state.behavior));
        anim.on_energy(&mut sched, state.energy);

        let bounds = DisplayBounds::new(host.display_size(), host.window_size());
        log::info!(
            "Pet engine started at {} ({} energy, {:.0}% mood)",
            state.position,
            state.energy,
            state.mood
        );

        Self {
            behavior: BehaviorStateMachine::new(cfg.behavior.clone(), cfg.energy.wake_threshold),
            drag: DragSampler::new(bounds),
            mover: Mover::new(cfg.motion.clone()),
            clicks: ClickTracker::new(cfg.behavior.double_click_ms),
            host,
            cfg,
            sched,
            store,
            energy,
            anim,
            batcher,
            rng,
            feedback: Vec::new(),
            hover_since: None,
            shut_down: false,
        }
    }

    // ---- Clock ----

    /// Run every task due by `now`, then pick up delivery results.
    pub fn advance(&mut self, now: Millis) {
        if self.shut_down {
            return;
        }
        while let Some((handle, task)) = self.sched.pop_due(now) {
            self.dispatch(handle, task);
        }
        self.sched.advance_to(now);
        self.batcher.poll();
    }

    /// When the host next needs to call [`advance`](Self::advance).
    pub fn next_deadline(&mut self) -> Option<Millis> {
        self.sched.next_due()
    }

    /// Whether the host should be calling [`on_frame`](Self::on_frame).
    pub fn wants_frames(&self) -> bool {
        self.drag.is_active()
    }

    /// Once per display refresh while dragging. Sends at most one move.
    pub fn on_frame(&mut self) {
        if self.shut_down {
            return;
        }
        if let Some(pos) = self.drag.frame() {
            self.host.request_move(pos);
            self.apply(StatePatch::new().position(pos));
        }
    }

    fn dispatch(&mut self, handle: TaskHandle, task: Task) {
        let now = self.sched.now();
        let state = self.store.get();
        match task {
            Task::DecayTick => {
                if let Some(step) = self.energy.on_decay_tick(&mut self.sched, handle, &state, now) {
                    if step.exhausted() {
                        log::info!("Energy ran out while {}", state.behavior.label());
                    }
                    self.apply(step.patch);
                }
            }
            Task::RecoveryTick => {
                if let Some(step) = self.energy.on_recovery_tick(&mut self.sched, handle, &state) {
                    self.apply(step.patch);
                }
            }
            Task::ProximityCheck => {
                if self.behavior.on_proximity_check(&mut self.sched, handle, &state, now) {
                    self.wander(now);
                }
            }
            Task::CursorPoll => {
                if self.behavior.on_cursor_poll(&mut self.sched, handle, &state) {
                    // Keep the last known spot when the host cannot say.
                    if let Some(cursor) = self.host.cursor_position() {
                        self.apply(StatePatch::new().mouse(Some(cursor)));
                    }
                }
            }
            Task::MoveStep => self.glide_step(handle, &state),
            Task::AnimationDone { channel, token } => self.anim.on_finished(channel, token),
            Task::DragSettle => self.anim.on_settle(&mut self.sched, handle, &state),
            Task::FlushTimer => self.batcher.on_flush_timer(&mut self.sched, handle),
            Task::Heartbeat => self.batcher.on_heartbeat(&mut self.sched, handle, now),
        }
    }

    // ---- Commit and react ----

    /// The only path into the store.
    fn apply(&mut self, patch: StatePatch) -> Vec<StateChange> {
        let changes = self.store.update(patch);
        self.react(&changes);
        changes
    }

    fn react(&mut self, changes: &[StateChange]) {
        for change in changes {
            match change.key {
                StateKey::Behavior => {
                    let state = self.store.get();
                    self.anim.on_behavior(&mut self.sched, &state);
                }
                StateKey::Energy => {
                    let before = change.old.as_level().unwrap_or_default();
                    let after = change.new.as_level().unwrap_or_default();
                    self.on_energy_changed(before, after);
                }
                StateKey::IsDragging => {
                    let dragging = change.new.as_flag().unwrap_or_default();
                    self.anim.on_drag(&mut self.sched, dragging);
                }
                _ => {}
            }
        }
    }

    fn on_energy_changed(&mut self, before: f64, after: f64) {
        self.anim.on_energy(&mut self.sched, after);

        let (was, is) = (EnergyLevel::of(before), EnergyLevel::of(after));
        if is < was && is.is_warning() {
            log::info!("Energy low: {after:.1}% ({is:?})");
            self.feedback.push(Feedback::EnergyLow(is));
        }

        if before > 0.0 && after <= 0.0 {
            self.exhaust();
        }

        let state = self.store.get();
        if state.behavior == Behavior::Sleeping
            && state.energy < LEVEL_MAX
            && !self.energy.recovery_active(&self.sched)
        {
            self.energy.start_recovery(&mut self.sched);
        }
    }

    fn exhaust(&mut self) {
        let state = self.store.get();
        let decision = self.behavior.exhaustion(&state);
        if decision != Decision::Unchanged {
            log::info!("Energy exhausted, forcing sleep");
        }
        self.resolve(decision, Trigger::Exhausted);
    }

    fn transition(&mut self, requested: Behavior, trigger: Trigger) -> TransitionOutcome {
        let state = self.store.get();
        let decision = self.behavior.evaluate(&state, requested);
        let decision = self.chat_guard(decision, trigger);
        self.resolve(decision, trigger)
    }

    /// Only the chat lifecycle moves into Chatting, or out of it while the
    /// window is open. The exhaustion override still goes through.
    fn chat_guard(&self, decision: Decision, trigger: Trigger) -> Decision {
        match decision {
            Decision::Commit {
                from,
                to,
                forced: false,
            } if trigger != Trigger::Chat
                && (to == Behavior::Chatting
                    || (from == Behavior::Chatting && self.batcher.chat_open())) =>
            {
                Decision::Rejected(Rejection::ChatOnly)
            }
            other => other,
        }
    }

    fn resolve(&mut self, decision: Decision, trigger: Trigger) -> TransitionOutcome {
        match decision {
            Decision::Unchanged => TransitionOutcome::Unchanged,
            Decision::Rejected(rejection) => {
                log::info!("Transition rejected: {rejection:?}");
                self.feedback.push(Feedback::Rejected(rejection));
                TransitionOutcome::Rejected(rejection)
            }
            Decision::Commit { from, to, forced } => {
                let trigger = if forced { Trigger::Exhausted } else { trigger };
                let mut patch = self.behavior.commit(&mut self.sched, &mut self.energy, from, to);
                if forced {
                    if self.mover.cancel(&mut self.sched) {
                        patch = patch.moving(false);
                    }
                    self.feedback.push(Feedback::Exhausted);
                }
                self.apply(patch);

                let now = self.sched.now();
                self.batcher.track_state_change(from, to, trigger, now);
                self.feedback.push(Feedback::Transition { from, to, trigger });
                TransitionOutcome::Committed { from, to, forced }
            }
        }
    }

    fn abort_glide(&mut self) {
        if self.mover.cancel(&mut self.sched) {
            self.apply(StatePatch::new().moving(false));
        }
    }

    // ---- Transition requests ----

    /// Switch behavior on the user's behalf. Aborts a glide first.
    pub fn request(&mut self, behavior: Behavior, now: Millis) -> TransitionOutcome {
        self.advance(now);
        self.abort_glide();
        self.transition(behavior, Trigger::Manual)
    }

    /// Take a nap; refused while there is plenty of energy left.
    pub fn request_nap(&mut self, now: Millis) -> TransitionOutcome {
        self.advance(now);
        let state = self.store.get();
        if state.behavior != Behavior::Sleeping && state.energy > self.cfg.behavior.nap_max_energy {
            let rejection = Rejection::NotSleepy {
                energy: state.energy,
            };
            log::info!("Not sleepy at {:.0}% energy", state.energy);
            self.feedback.push(Feedback::Rejected(rejection));
            return TransitionOutcome::Rejected(rejection);
        }
        self.abort_glide();
        self.transition(Behavior::Sleeping, Trigger::Manual)
    }

    pub fn wake(&mut self, now: Millis) -> TransitionOutcome {
        self.advance(now);
        if self.store.get().behavior != Behavior::Sleeping {
            self.feedback.push(Feedback::AlreadyAwake);
            return TransitionOutcome::Unchanged;
        }
        self.transition(Behavior::Idle, Trigger::Manual)
    }

    // ---- Pointer ----

    pub fn on_pointer_down(&mut self, button: PointerButton, pointer: Vec2, now: Millis) {
        self.advance(now);
        let window = self.store.get().position;
        if self.drag.pointer_down(button, pointer, window, now) {
            self.abort_glide();
            self.apply(StatePatch::new().dragging(true));
        }
    }

    pub fn on_pointer_move(&mut self, pointer: Vec2) {
        self.drag.pointer_move(pointer);
    }

    /// Ends a drag. A press that barely moved counts as a click.
    pub fn on_pointer_up(&mut self, now: Millis) {
        self.advance(now);
        let Some(summary) = self.drag.pointer_up(now) else {
            return;
        };
        let mut patch = StatePatch::new().dragging(false);
        if summary.end != self.store.get().position {
            self.host.request_move(summary.end);
            patch = patch.position(summary.end);
        }
        self.apply(patch);

        if summary.is_click(self.cfg.drag.click_slop_px) {
            self.click(now);
        } else {
            log::debug!("Dragged {:.0}px in {}ms", summary.distance(), summary.duration);
            self.batcher.track_drag(&summary, now);
        }
    }

    /// A click on the pet. Ignored mid-drag.
    pub fn click(&mut self, now: Millis) -> Option<ClickKind> {
        self.advance(now);
        let state = self.store.get();
        if state.is_dragging {
            return None;
        }
        let kind = self.clicks.register(now);
        match kind {
            ClickKind::Single => {
                self.apply(
                    StatePatch::new()
                        .mood(state.mood + self.cfg.behavior.mood_per_click)
                        .interacted_at(now),
                );
                self.interact(now);
                let state = self.store.get();
                self.batcher.track_click(&state, now);
                self.abort_glide();
                self.transition(Behavior::Excited, Trigger::Interaction);
            }
            ClickKind::Double => {
                self.batcher.track_double_click(&state, now);
                let target = match state.behavior {
                    Behavior::Idle => Some(Behavior::Excited),
                    Behavior::Excited | Behavior::Sleeping => Some(Behavior::Idle),
                    Behavior::Chatting => None,
                };
                if let Some(target) = target {
                    self.abort_glide();
                    self.transition(target, Trigger::Interaction);
                }
            }
        }
        Some(kind)
    }

    /// Interaction-driven energy recovery. Inside the cooldown this only
    /// produces a "too soon" notice.
    pub fn interact(&mut self, now: Millis) -> InteractionOutcome {
        self.advance(now);
        let state = self.store.get();
        let (patch, outcome) = self.energy.on_interaction(&state, now);
        match outcome {
            InteractionOutcome::Cooldown { remaining_ms } => {
                self.feedback.push(Feedback::TooSoon { remaining_ms });
            }
            InteractionOutcome::Recovered { before, after } => {
                self.apply(patch);
                if before <= LOW_ENERGY && after > LOW_ENERGY {
                    self.feedback.push(Feedback::EnergyRecovered { energy: after });
                    self.anim.flash_recovery(&mut self.sched);
                }
            }
        }
        outcome
    }

    pub fn on_hover_start(&mut self, now: Millis) {
        self.hover_since.get_or_insert(now);
    }

    pub fn on_hover_end(&mut self, now: Millis) {
        self.advance(now);
        if let Some(since) = self.hover_since.take() {
            self.batcher.track_hover(now.saturating_sub(since), now);
        }
    }

    // ---- Window ----

    /// Host reports where the window actually is. Ignored while the engine
    /// itself is moving it.
    pub fn on_window_moved(&mut self, pos: Vec2) {
        let state = self.store.get();
        if state.is_dragging || state.is_moving {
            return;
        }
        self.apply(StatePatch::new().position(pos));
    }

    pub fn set_bounds(&mut self, display: Vec2, window: Vec2) {
        self.drag.set_bounds(DisplayBounds::new(display, window));
    }

    /// Glide to `target` (clamped on screen).
    pub fn move_to(&mut self, target: Vec2, now: Millis) -> Result<Millis, MoveRefusal> {
        self.advance(now);
        self.start_glide(target)
    }

    fn start_glide(&mut self, target: Vec2) -> Result<Millis, MoveRefusal> {
        let target = if target.is_finite() {
            self.drag.bounds().clamp(target)
        } else {
            target
        };
        let state = self.store.get();
        let enough = self.energy.can_move(&state);
        match self.mover.begin(&mut self.sched, &state, target, enough) {
            Ok(duration) => {
                self.apply(StatePatch::new().moving(true));
                Ok(duration)
            }
            Err(refusal) => {
                if refusal == MoveRefusal::LowEnergy {
                    self.feedback.push(Feedback::TooTiredToMove {
                        energy: state.energy,
                    });
                }
                log::debug!("Glide refused: {refusal:?}");
                Err(refusal)
            }
        }
    }

    /// Excited and left alone: wander over to the cursor.
    fn wander(&mut self, now: Millis) {
        let state = self.store.get();
        let cursor = state.mouse_position.or_else(|| self.host.cursor_position());
        let display = self.host.display_size();
        let target = self.mover.target_near(cursor, display, &mut self.rng);
        // Quiet period restarts even when the glide is refused.
        self.apply(StatePatch::new().interacted_at(now));
        let _ = self.start_glide(target);
    }

    fn glide_step(&mut self, handle: TaskHandle, state: &PetState) {
        let Some(step) = self.mover.on_step(&mut self.sched, handle) else {
            return;
        };
        self.host.request_move(step.position);
        let mut patch = StatePatch::new().position(step.position);
        if let Some(distance) = step.finished {
            let cost = self
                .energy
                .move_cost(distance, self.cfg.motion.cost_base_distance);
            log::debug!("Glide of {distance:.0}px cost {cost:.1}% energy");
            patch = patch.moving(false).energy(state.energy - cost);
            self.anim.flash_move(&mut self.sched);
        }
        self.apply(patch);
    }

    // ---- Chat lifecycle ----

    pub fn on_chat_opened(&mut self, now: Millis) -> TransitionOutcome {
        self.advance(now);
        self.batcher.start_chat(now);
        self.abort_glide();
        self.transition(Behavior::Chatting, Trigger::Chat)
    }

    pub fn on_chat_message(&mut self, role: ChatRole, now: Millis) {
        self.advance(now);
        self.batcher.chat_message(role, now);
    }

    pub fn on_chat_closed(&mut self, now: Millis) -> TransitionOutcome {
        self.advance(now);
        self.batcher.end_chat(now);
        if self.store.get().behavior != Behavior::Chatting {
            return TransitionOutcome::Unchanged;
        }
        self.transition(Behavior::Idle, Trigger::Chat)
    }

    pub fn chat_open(&self) -> bool {
        self.batcher.chat_open()
    }

    // ---- Observation ----

    pub fn subscribe(&mut self, key: StateKey, listener: Listener) -> SubscriptionId {
        self.store.subscribe(key, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn state(&self) -> PetState {
        self.store.get()
    }

    pub fn energy_report(&self) -> EnergyReport {
        self.energy.report(&self.store.get())
    }

    pub fn animation(&self, channel: Channel) -> Option<AnimationName> {
        self.anim.active(channel)
    }

    pub fn drain_animation_events(&mut self) -> Vec<AnimationEvent> {
        self.anim.drain_events()
    }

    pub fn drain_feedback(&mut self) -> Vec<Feedback> {
        std::mem::take(&mut self.feedback)
    }

    pub fn stats(&self) -> SessionStats {
        self.batcher.stats()
    }

    pub fn session_id(&self) -> &str {
        self.batcher.session_id()
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.store.history()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Cancel every loop, try one last flush, and drop all listeners.
    /// Further calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.mover.cancel(&mut self.sched);
        self.drag.cancel();
        self.energy.shutdown(&mut self.sched);
        self.behavior.shutdown(&mut self.sched);
        self.anim.shutdown(&mut self.sched);
        self.batcher.shutdown(&mut self.sched);
        self.store.clear_subscribers();
        let dropped = self.sched.len();
        self.sched.clear();
        log::info!("Pet engine shut down, {dropped} tasks dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::telemetry::collector::scripted::{Script, ScriptedCollector};
    use crate::telemetry::events::EventKind;

    #[derive(Default)]
    struct RecordingHost {
        moves: Vec<Vec2>,
        cursor: Option<Vec2>,
    }

    impl WindowHost for RecordingHost {
        fn request_move(&mut self, pos: Vec2) {
            self.moves.push(pos);
        }

        fn window_position(&self) -> Option<Vec2> {
            Some(Vec2::new(100.0, 100.0))
        }

        fn cursor_position(&self) -> Option<Vec2> {
            self.cursor
        }

        fn display_size(&self) -> Vec2 {
            Vec2::new(1920.0, 1080.0)
        }

        fn window_size(&self) -> Vec2 {
            Vec2::new(250.0, 250.0)
        }
    }

    type Engine = PetEngine<RecordingHost>;

    fn engine_with(cfg: PetConfig) -> (Engine, Rc<RefCell<Script>>) {
        let (collector, script) = ScriptedCollector::new();
        let engine = PetEngine::with_rng(
            RecordingHost::default(),
            Box::new(collector),
            cfg,
            0,
            fastrand::Rng::with_seed(42),
        );
        (engine, script)
    }

    fn engine() -> (Engine, Rc<RefCell<Script>>) {
        engine_with(PetConfig::default())
    }

    /// Energy only changes when a test says so.
    fn no_decay() -> PetConfig {
        let mut cfg = PetConfig::default();
        cfg.energy.idle_minutes = 0.0;
        cfg.energy.excited_minutes = 0.0;
        cfg.energy.chatting_minutes = 0.0;
        cfg.behavior.proximity_idle_ms = 3_600_000;
        cfg
    }

    fn set_energy(e: &mut Engine, energy: f64) {
        e.apply(StatePatch::new().energy(energy));
    }

    fn assert_invariants(e: &Engine) {
        let s = e.state();
        assert!((0.0..=LEVEL_MAX).contains(&s.energy), "energy {}", s.energy);
        assert!((0.0..=LEVEL_MAX).contains(&s.mood), "mood {}", s.mood);
        if s.energy <= 0.0 {
            assert_eq!(s.behavior, Behavior::Sleeping);
        }
        if s.behavior == Behavior::Sleeping && s.energy < LEVEL_MAX {
            assert!(e.energy.recovery_active(&e.sched));
        }
        if s.behavior != Behavior::Sleeping {
            assert!(!e.energy.recovery_active(&e.sched));
        }
        if s.behavior != Behavior::Excited {
            assert!(!e.behavior.excited_timers_active(&e.sched));
        }
        assert_eq!(s.is_moving, e.mover.is_active());
        assert_eq!(s.is_dragging, e.drag.is_active());
    }

    #[test]
    fn starts_idle_at_host_position() {
        let (e, _) = engine();
        let s = e.state();
        assert_eq!(s.behavior, Behavior::Idle);
        assert_eq!(s.position, Vec2::new(100.0, 100.0));
        assert_eq!(e.animation(Channel::State), Some(AnimationName::Breathe));
        assert_eq!(e.animation(Channel::Energy), None);
        assert!(e.session_id().starts_with("session_"));
    }

    #[test]
    fn sleeping_with_low_energy_rejects_wake() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 25.0);
        assert!(matches!(
            e.request(Behavior::Sleeping, 0),
            TransitionOutcome::Committed {
                to: Behavior::Sleeping,
                forced: false,
                ..
            }
        ));

        set_energy(&mut e, 10.0);
        e.drain_feedback();
        assert_eq!(
            e.request(Behavior::Idle, 0),
            TransitionOutcome::Rejected(Rejection::StillSleeping { energy: 10.0 })
        );
        assert_eq!(e.state().behavior, Behavior::Sleeping);
        assert_eq!(
            e.drain_feedback(),
            vec![Feedback::Rejected(Rejection::StillSleeping { energy: 10.0 })]
        );
        assert_invariants(&e);
    }

    #[test]
    fn decay_to_zero_forces_sleep() {
        let mut cfg = PetConfig::default();
        cfg.behavior.proximity_idle_ms = 3_600_000;
        let (mut e, _) = engine_with(cfg);
        e.request(Behavior::Excited, 0);
        set_energy(&mut e, 0.5);

        // Excited drains 0.5% in 12s.
        e.advance(13_000);
        let s = e.state();
        assert_eq!(s.energy, 0.0);
        assert_eq!(s.behavior, Behavior::Sleeping);
        assert!(e.drain_feedback().contains(&Feedback::Transition {
            from: Behavior::Excited,
            to: Behavior::Sleeping,
            trigger: Trigger::Exhausted,
        }));
        assert_invariants(&e);
    }

    #[test]
    fn decay_sleep_recover_wake_round_trip() {
        let (mut e, _) = engine();
        set_energy(&mut e, 1.0);
        e.advance(40_000);
        assert_eq!(e.state().behavior, Behavior::Sleeping);

        assert!(matches!(
            e.request(Behavior::Idle, 100_000),
            TransitionOutcome::Rejected(Rejection::StillSleeping { .. })
        ));

        e.advance(300_000);
        assert!(e.state().energy >= 20.0);
        assert!(matches!(
            e.request(Behavior::Idle, 300_000),
            TransitionOutcome::Committed {
                from: Behavior::Sleeping,
                to: Behavior::Idle,
                forced: false
            }
        ));
        assert_eq!(e.state().behavior, Behavior::Idle);
        assert_invariants(&e);
    }

    #[test]
    fn recovery_stops_at_full() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 40.0);
        e.request_nap(0);
        set_energy(&mut e, 98.0);
        e.advance(100_000);
        assert_eq!(e.state().energy, 100.0);
        assert!(!e.energy.recovery_active(&e.sched));
        assert_invariants(&e);
    }

    #[test]
    fn interaction_cooldown_gives_one_increment() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 50.0);
        e.interact(5_000);
        e.interact(6_000);
        assert_eq!(e.state().energy, 51.0);
        assert!(e
            .drain_feedback()
            .contains(&Feedback::TooSoon { remaining_ms: 1_000 }));
        e.interact(7_000);
        assert_eq!(e.state().energy, 52.0);
    }

    #[test]
    fn recovery_across_low_threshold_flashes() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 30.0);
        assert_eq!(e.animation(Channel::Energy), Some(AnimationName::LowEnergy));
        e.interact(5_000);
        assert_eq!(e.animation(Channel::Energy), None);
        assert_eq!(e.animation(Channel::Effect), Some(AnimationName::EnergyRecovery));
        assert!(e
            .drain_feedback()
            .contains(&Feedback::EnergyRecovered { energy: 31.0 }));
    }

    #[test]
    fn falling_energy_warns_once_per_band() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 29.0);
        set_energy(&mut e, 28.0);
        set_energy(&mut e, 14.0);
        let lows: Vec<_> = e
            .drain_feedback()
            .into_iter()
            .filter(|f| matches!(f, Feedback::EnergyLow(_)))
            .collect();
        assert_eq!(
            lows,
            vec![
                Feedback::EnergyLow(EnergyLevel::Low),
                Feedback::EnergyLow(EnergyLevel::VeryLow)
            ]
        );
        assert_eq!(e.animation(Channel::Energy), Some(AnimationName::VeryLowEnergy));
    }

    #[test]
    fn drag_moves_coalesce_per_frame() {
        let (mut e, _) = engine_with(no_decay());
        e.on_pointer_down(PointerButton::Primary, Vec2::new(10.0, 10.0), 0);
        assert!(e.state().is_dragging);
        assert!(e.wants_frames());

        for i in 0..100 {
            e.on_pointer_move(Vec2::new(10.0 + i as f32, 10.0));
        }
        e.on_frame();
        e.on_frame();
        assert_eq!(e.host().moves, vec![Vec2::new(199.0, 100.0)]);
        assert_eq!(e.state().position, Vec2::new(199.0, 100.0));
        assert_invariants(&e);
    }

    #[test]
    fn secondary_button_does_not_drag() {
        let (mut e, _) = engine_with(no_decay());
        e.on_pointer_down(PointerButton::Secondary, Vec2::ZERO, 0);
        assert!(!e.state().is_dragging);
        assert!(!e.wants_frames());
    }

    #[test]
    fn drag_suspends_state_animation_and_resumes_current_behavior() {
        let (mut e, _) = engine_with(no_decay());
        e.request(Behavior::Excited, 0);
        assert_eq!(e.animation(Channel::State), Some(AnimationName::Bounce));

        e.on_pointer_down(PointerButton::Primary, Vec2::ZERO, 0);
        assert_eq!(e.animation(Channel::State), None);
        assert_eq!(e.animation(Channel::Drag), Some(AnimationName::Drag));

        // Exhausted mid-drag: forced sleep goes through despite the drag.
        set_energy(&mut e, 0.0);
        assert_eq!(e.state().behavior, Behavior::Sleeping);
        assert_eq!(e.animation(Channel::State), None);

        e.on_pointer_move(Vec2::new(200.0, 200.0));
        e.on_frame();
        e.on_pointer_up(1_000);
        assert!(!e.state().is_dragging);
        assert_eq!(e.animation(Channel::Drag), None);

        e.advance(1_199);
        assert_eq!(e.animation(Channel::State), None);
        e.advance(1_200);
        assert_eq!(e.animation(Channel::State), Some(AnimationName::Sleep));
        assert_eq!(e.stats().drags, 1);
        assert_invariants(&e);
    }

    #[test]
    fn transitions_rejected_while_dragging() {
        let (mut e, _) = engine_with(no_decay());
        e.on_pointer_down(PointerButton::Primary, Vec2::ZERO, 0);
        assert_eq!(
            e.request(Behavior::Excited, 10),
            TransitionOutcome::Rejected(Rejection::Busy)
        );
        assert_eq!(e.state().behavior, Behavior::Idle);
    }

    #[test]
    fn still_press_is_a_click() {
        let (mut e, _) = engine_with(no_decay());
        e.on_pointer_down(PointerButton::Primary, Vec2::new(50.0, 50.0), 5_000);
        e.on_pointer_move(Vec2::new(51.0, 50.0));
        e.on_pointer_up(5_080);
        let s = e.state();
        assert_eq!(s.behavior, Behavior::Excited);
        assert_eq!(s.mood, 90.0);
        assert_eq!(e.stats().clicks, 1);
        assert_eq!(e.stats().drags, 0);
    }

    #[test]
    fn single_then_double_click() {
        let (mut e, _) = engine_with(no_decay());
        assert_eq!(e.click(5_000), Some(ClickKind::Single));
        assert_eq!(e.state().behavior, Behavior::Excited);
        assert_eq!(e.state().last_interaction_time, 5_000);

        assert_eq!(e.click(5_100), Some(ClickKind::Double));
        let s = e.state();
        assert_eq!(s.behavior, Behavior::Idle);
        assert_eq!(s.mood, 90.0);
        assert_eq!(e.stats().clicks, 1);
    }

    #[test]
    fn double_click_wakes_only_with_energy() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 10.0);
        e.request_nap(0);
        e.click(5_000);
        e.click(5_100);
        assert_eq!(e.state().behavior, Behavior::Sleeping);
    }

    #[test]
    fn proximity_glide_toward_cursor_then_stops_when_calm() {
        let mut cfg = no_decay();
        cfg.behavior.proximity_idle_ms = 5_000;
        let (mut e, _) = engine_with(cfg);
        e.host.cursor = Some(Vec2::new(800.0, 400.0));
        e.request(Behavior::Excited, 0);

        e.advance(5_000);
        let s = e.state();
        assert!(s.is_moving);
        assert_eq!(s.mouse_position, Some(Vec2::new(800.0, 400.0)));
        assert_eq!(s.last_interaction_time, 5_000);

        // A ~760px glide takes 1140ms; the move flash lasts a second after.
        e.advance(6_500);
        let s = e.state();
        assert!(!s.is_moving);
        assert_eq!(e.host().moves.len(), 30);
        let landed = *e.host().moves.last().unwrap();
        assert_eq!(s.position, landed);
        let offset = landed.distance(Vec2::new(800.0, 400.0));
        assert!((19.0..=101.0).contains(&offset), "landed {offset}px away");
        assert!(s.energy < 100.0 && s.energy >= 95.0);
        assert_eq!(e.animation(Channel::Effect), Some(AnimationName::Move));

        e.request(Behavior::Idle, 6_500);
        let moves = e.host().moves.len();
        e.advance(60_000);
        assert_eq!(e.host().moves.len(), moves);
        assert_invariants(&e);
    }

    #[test]
    fn user_request_aborts_glide() {
        let (mut e, _) = engine_with(no_decay());
        assert!(e.move_to(Vec2::new(900.0, 600.0), 0).is_ok());
        assert!(e.state().is_moving);
        assert_eq!(
            e.move_to(Vec2::new(10.0, 10.0), 10),
            Err(MoveRefusal::AlreadyMoving)
        );

        assert!(matches!(
            e.request(Behavior::Excited, 100),
            TransitionOutcome::Committed { .. }
        ));
        assert!(!e.state().is_moving);
        let moves = e.host().moves.len();
        e.advance(5_000);
        assert_eq!(e.host().moves.len(), moves);
        assert_invariants(&e);
    }

    #[test]
    fn tired_pet_refuses_to_glide() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 2.5);
        e.drain_feedback();
        assert_eq!(
            e.move_to(Vec2::new(500.0, 500.0), 0),
            Err(MoveRefusal::LowEnergy)
        );
        assert_eq!(
            e.drain_feedback(),
            vec![Feedback::TooTiredToMove { energy: 2.5 }]
        );
        assert_eq!(
            e.move_to(Vec2::new(f32::NAN, 500.0), 0),
            Err(MoveRefusal::LowEnergy)
        );
    }

    #[test]
    fn refused_wander_waits_a_full_quiet_period() {
        let mut cfg = no_decay();
        cfg.behavior.proximity_idle_ms = 5_000;
        let (mut e, _) = engine_with(cfg);
        e.host.cursor = Some(Vec2::new(800.0, 400.0));
        set_energy(&mut e, 2.0);
        e.request(Behavior::Excited, 0);
        e.drain_feedback();

        e.advance(30_000);
        let tired = e
            .drain_feedback()
            .into_iter()
            .filter(|f| matches!(f, Feedback::TooTiredToMove { .. }))
            .count();
        assert!((1..=6).contains(&tired), "{tired} notices in 30s");
        assert_eq!(e.state().last_interaction_time, 30_000);
        assert!(e.host().moves.is_empty());
        assert_invariants(&e);
    }

    #[test]
    fn glide_cost_can_exhaust() {
        let (mut e, _) = engine_with(no_decay());
        set_energy(&mut e, 3.0);
        e.move_to(Vec2::new(1_200.0, 100.0), 0).unwrap();
        e.advance(5_000);
        let s = e.state();
        assert_eq!(s.energy, 0.0);
        assert_eq!(s.behavior, Behavior::Sleeping);
        assert_invariants(&e);
    }

    #[test]
    fn nap_and_wake_rules() {
        let (mut e, _) = engine_with(no_decay());
        assert_eq!(
            e.request_nap(0),
            TransitionOutcome::Rejected(Rejection::NotSleepy { energy: 100.0 })
        );
        set_energy(&mut e, 40.0);
        assert!(matches!(e.request_nap(0), TransitionOutcome::Committed { .. }));
        assert!(matches!(e.wake(0), TransitionOutcome::Committed { .. }));
        assert_eq!(e.wake(0), TransitionOutcome::Unchanged);
        assert!(e.drain_feedback().contains(&Feedback::AlreadyAwake));
    }

    #[test]
    fn chat_lifecycle_records_one_session() {
        let (mut e, _) = engine_with(no_decay());
        assert!(matches!(
            e.on_chat_opened(1_000),
            TransitionOutcome::Committed {
                to: Behavior::Chatting,
                ..
            }
        ));
        assert_eq!(e.animation(Channel::State), Some(AnimationName::Breathe));
        e.on_chat_message(ChatRole::User, 2_000);
        e.on_chat_message(ChatRole::Assistant, 3_000);
        e.on_chat_closed(4_000);

        assert_eq!(e.state().behavior, Behavior::Idle);
        let kinds: Vec<_> = e.batcher.queued().map(|ev| ev.kind()).collect();
        assert_eq!(
            kinds,
            vec![EventKind::StateChange, EventKind::ChatSession, EventKind::StateChange]
        );
        assert!(!e.chat_open());
    }

    #[test]
    fn only_the_chat_window_leaves_chatting() {
        let (mut e, script) = engine_with(no_decay());
        e.on_chat_opened(1_000);
        e.drain_feedback();

        assert_eq!(e.click(5_000), Some(ClickKind::Single));
        assert_eq!(e.state().behavior, Behavior::Chatting);
        assert!(e.drain_feedback().contains(&Feedback::Rejected(Rejection::ChatOnly)));
        assert_eq!(
            e.request(Behavior::Idle, 6_000),
            TransitionOutcome::Rejected(Rejection::ChatOnly)
        );
        assert_eq!(e.state().behavior, Behavior::Chatting);
        assert!(e.chat_open());

        e.on_chat_closed(7_000);
        assert_eq!(e.state().behavior, Behavior::Idle);
        e.shutdown();
        let kinds: Vec<_> = script
            .borrow()
            .batches
            .iter()
            .flatten()
            .map(|ev| ev.kind())
            .collect();
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::ChatSession).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::StateChange).count(), 2);
    }

    #[test]
    fn chatting_needs_the_chat_window_but_exhaustion_still_wins() {
        let (mut e, _) = engine_with(no_decay());
        assert_eq!(
            e.request(Behavior::Chatting, 0),
            TransitionOutcome::Rejected(Rejection::ChatOnly)
        );
        assert_eq!(e.state().behavior, Behavior::Idle);

        e.on_chat_opened(1_000);
        set_energy(&mut e, 0.0);
        assert_eq!(e.state().behavior, Behavior::Sleeping);
        assert_eq!(e.on_chat_closed(2_000), TransitionOutcome::Unchanged);
        assert_eq!(e.state().behavior, Behavior::Sleeping);
        assert_invariants(&e);
    }

    #[test]
    fn window_moves_ignored_while_dragging_and_non_finite_dropped() {
        let (mut e, _) = engine_with(no_decay());
        e.on_window_moved(Vec2::new(300.0, 300.0));
        assert_eq!(e.state().position, Vec2::new(300.0, 300.0));

        e.on_window_moved(Vec2::new(f32::NAN, 10.0));
        assert_eq!(e.state().position, Vec2::new(300.0, 10.0));

        e.on_pointer_down(PointerButton::Primary, Vec2::ZERO, 0);
        e.on_window_moved(Vec2::new(700.0, 700.0));
        assert_eq!(e.state().position, Vec2::new(300.0, 10.0));
    }

    #[test]
    fn transitions_become_events_in_order() {
        let (mut e, script) = engine_with(no_decay());
        e.request(Behavior::Excited, 0);
        e.request(Behavior::Idle, 0);
        set_energy(&mut e, 30.0);
        e.request(Behavior::Sleeping, 0);
        e.advance(10_000);

        let s = script.borrow();
        let changes: Vec<_> = s
            .batches
            .iter()
            .flatten()
            .filter_map(|ev| match ev.metadata() {
                crate::telemetry::events::EventPayload::StateChange(m) => {
                    Some((m.from_state, m.to_state))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (Behavior::Idle, Behavior::Excited),
                (Behavior::Excited, Behavior::Idle),
                (Behavior::Idle, Behavior::Sleeping),
            ]
        );
    }

    #[test]
    fn failed_flush_keeps_order_for_retry() {
        let (mut e, script) = engine_with(no_decay());
        script.borrow_mut().outcomes.push_back(false);
        e.on_hover_start(0);
        e.on_hover_end(1_001);
        e.on_hover_start(2_000);
        e.on_hover_end(3_500);
        e.advance(10_000);
        e.on_hover_start(11_000);
        e.on_hover_end(13_000);

        let hovers: Vec<_> = e
            .batcher
            .queued()
            .map(|ev| match ev.metadata() {
                crate::telemetry::events::EventPayload::Hover(h) => h.duration,
                _ => 0,
            })
            .collect();
        assert_eq!(hovers, vec![1_001, 1_500, 2_000]);
    }

    #[test]
    fn listener_failure_is_isolated() {
        let (mut e, _) = engine_with(no_decay());
        let seen = Rc::new(RefCell::new(Vec::new()));
        e.subscribe(StateKey::Behavior, Box::new(|_, _, _, _| Err("boom".into())));
        {
            let seen = seen.clone();
            e.subscribe(
                StateKey::Behavior,
                Box::new(move |new, old, _, _| {
                    seen.borrow_mut()
                        .push((old.as_behavior().unwrap(), new.as_behavior().unwrap()));
                    Ok(())
                }),
            );
        }
        e.request(Behavior::Excited, 0);
        assert_eq!(*seen.borrow(), vec![(Behavior::Idle, Behavior::Excited)]);
    }

    #[test]
    fn energy_report_tracks_behavior() {
        let (mut e, _) = engine();
        assert!((e.energy_report().decay_per_minute - 100.0 / 60.0).abs() < 1e-9);
        e.request(Behavior::Excited, 0);
        assert!((e.energy_report().decay_per_minute - 2.5).abs() < 1e-9);
        set_energy(&mut e, 10.0);
        e.request(Behavior::Sleeping, 0);
        let report = e.energy_report();
        assert_eq!(report.minutes_to_empty, None);
        assert!(!report.can_wake);
    }

    #[test]
    fn shutdown_cancels_everything_and_flushes() {
        let (mut e, script) = engine_with(no_decay());
        e.request(Behavior::Excited, 0);
        e.move_to(Vec2::new(800.0, 800.0), 0).unwrap();
        e.shutdown();

        assert_eq!(e.sched.len(), 0);
        assert_eq!(e.next_deadline(), None);
        assert_eq!(script.borrow().batches.len(), 1);
        let moves = e.host().moves.len();
        e.advance(100_000);
        assert_eq!(e.host().moves.len(), moves);
        e.shutdown();
    }

    #[test]
    fn feedback_reads_as_a_notice() {
        assert_eq!(
            Feedback::Rejected(Rejection::NotSleepy { energy: 80.0 }).to_string(),
            "Refused: not sleepy at 80% energy"
        );
        assert_eq!(
            Feedback::TooSoon { remaining_ms: 1_500 }.to_string(),
            "Needs a rest, try again in 2s"
        );
        assert_eq!(
            Feedback::Transition {
                from: Behavior::Idle,
                to: Behavior::Excited,
                trigger: Trigger::Interaction,
            }
            .to_string(),
            "idle -> excited (Interaction)"
        );
    }

    #[test]
    fn random_input_keeps_invariants() {
        let (mut e, _) = engine();
        let mut rng = fastrand::Rng::with_seed(9);
        let mut now = 0;

        for _ in 0..2_000 {
            now += rng.u64(0..3_000);
            match rng.u8(0..10) {
                0 => e.advance(now),
                1 => {
                    e.click(now);
                }
                2 => e.on_pointer_down(
                    PointerButton::Primary,
                    Vec2::new(rng.f32() * 50.0, rng.f32() * 50.0),
                    now,
                ),
                3 => {
                    e.on_pointer_move(Vec2::new(rng.f32() * 2_000.0, rng.f32() * 1_200.0));
                    e.on_frame();
                }
                4 => e.on_pointer_up(now),
                5 => set_energy(&mut e, rng.f64() * 200.0 - 50.0),
                6 => {
                    let b = Behavior::ALL[rng.usize(..Behavior::ALL.len())];
                    e.request(b, now);
                }
                7 => {
                    let _ = e.move_to(Vec2::new(rng.f32() * 1_900.0, rng.f32() * 1_000.0), now);
                }
                8 => {
                    e.request_nap(now);
                }
                _ => {
                    e.wake(now);
                }
            }
            assert_invariants(&e);
        }
    }
}
