use std::collections::VecDeque;

use glam::Vec2;
use serde::Serialize;

use crate::error::ListenerError;
use crate::sched::Millis;

/// Upper bound for mood and energy.
pub const LEVEL_MAX: f64 = 100.0;
/// Field changes kept for diagnostics.
const HISTORY_SIZE: usize = 50;

const DEFAULT_MOOD: f64 = 80.0;
const DEFAULT_POSITION: Vec2 = Vec2::new(100.0, 100.0);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The pet's current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    #[default]
    Idle,
    Excited,
    Sleeping,
    Chatting,
}

impl Behavior {
    pub const ALL: [Behavior; 4] = [
        Behavior::Idle,
        Behavior::Excited,
        Behavior::Sleeping,
        Behavior::Chatting,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Behavior::Idle => "idle",
            Behavior::Excited => "excited",
            Behavior::Sleeping => "sleeping",
            Behavior::Chatting => "chatting",
        }
    }
}

/// Everything the engine knows about the pet. Owned by [`StateStore`];
/// everyone else sees copies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PetState {
    pub behavior: Behavior,
    pub mood: f64,
    pub energy: f64,
    /// Last known window position.
    pub position: Vec2,
    /// A programmatic glide is in progress.
    pub is_moving: bool,
    /// A user pointer drag is in progress.
    pub is_dragging: bool,
    pub last_interaction_time: Millis,
    pub last_interaction_for_energy: Millis,
    pub last_energy_update_time: Millis,
    /// Last polled global cursor position.
    pub mouse_position: Option<Vec2>,
}

impl PetState {
    pub fn new(now: Millis) -> Self {
        Self {
            behavior: Behavior::Idle,
            mood: DEFAULT_MOOD,
            energy: LEVEL_MAX,
            position: DEFAULT_POSITION,
            is_moving: false,
            is_dragging: false,
            last_interaction_time: now,
            last_interaction_for_energy: now,
            last_energy_update_time: now,
            mouse_position: None,
        }
    }

    pub fn value(&self, key: StateKey) -> FieldValue {
        match key {
            StateKey::Behavior => FieldValue::Behavior(self.behavior),
            StateKey::Mood => FieldValue::Level(self.mood),
            StateKey::Energy => FieldValue::Level(self.energy),
            StateKey::Position => FieldValue::Point(self.position),
            StateKey::IsMoving => FieldValue::Flag(self.is_moving),
            StateKey::IsDragging => FieldValue::Flag(self.is_dragging),
            StateKey::LastInteractionTime => FieldValue::Time(self.last_interaction_time),
            StateKey::LastInteractionForEnergy => {
                FieldValue::Time(self.last_interaction_for_energy)
            }
            StateKey::LastEnergyUpdateTime => FieldValue::Time(self.last_energy_update_time),
            StateKey::MousePosition => FieldValue::Pointer(self.mouse_position),
        }
    }
}

/// Subscribable fields of [`PetState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Behavior,
    Mood,
    Energy,
    Position,
    IsMoving,
    IsDragging,
    LastInteractionTime,
    LastInteractionForEnergy,
    LastEnergyUpdateTime,
    MousePosition,
}

impl StateKey {
    pub const ALL: [StateKey; 10] = [
        StateKey::Behavior,
        StateKey::Mood,
        StateKey::Energy,
        StateKey::Position,
        StateKey::IsMoving,
        StateKey::IsDragging,
        StateKey::LastInteractionTime,
        StateKey::LastInteractionForEnergy,
        StateKey::LastEnergyUpdateTime,
        StateKey::MousePosition,
    ];
}

/// A single field's value, as handed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Behavior(Behavior),
    Level(f64),
    Point(Vec2),
    Flag(bool),
    Time(Millis),
    Pointer(Option<Vec2>),
}

impl FieldValue {
    pub fn as_behavior(&self) -> Option<Behavior> {
        match *self {
            FieldValue::Behavior(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<f64> {
        match *self {
            FieldValue::Level(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match *self {
            FieldValue::Flag(v) => Some(v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Per-axis position update; unset axes keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionPatch {
    pub x: Option<f32>,
    pub y: Option<f32>,
}

impl From<Vec2> for PositionPatch {
    fn from(p: Vec2) -> Self {
        Self {
            x: Some(p.x),
            y: Some(p.y),
        }
    }
}

/// Partial update to [`PetState`]. Unset fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatePatch {
    behavior: Option<Behavior>,
    mood: Option<f64>,
    energy: Option<f64>,
    position: Option<PositionPatch>,
    is_moving: Option<bool>,
    is_dragging: Option<bool>,
    last_interaction_time: Option<Millis>,
    last_interaction_for_energy: Option<Millis>,
    last_energy_update_time: Option<Millis>,
    mouse_position: Option<Option<Vec2>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the behavior state machine builds these.
    pub(super) fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn mood(mut self, mood: f64) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn position(mut self, position: impl Into<PositionPatch>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn moving(mut self, moving: bool) -> Self {
        self.is_moving = Some(moving);
        self
    }

    pub fn dragging(mut self, dragging: bool) -> Self {
        self.is_dragging = Some(dragging);
        self
    }

    pub fn interacted_at(mut self, at: Millis) -> Self {
        self.last_interaction_time = Some(at);
        self
    }

    pub fn energy_interaction_at(mut self, at: Millis) -> Self {
        self.last_interaction_for_energy = Some(at);
        self
    }

    pub fn energy_updated_at(mut self, at: Millis) -> Self {
        self.last_energy_update_time = Some(at);
        self
    }

    pub fn mouse(mut self, mouse: Option<Vec2>) -> Self {
        self.mouse_position = Some(mouse);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `state`, clamping levels and dropping non-finite input.
    fn apply_to(&self, state: &mut PetState) {
        if let Some(b) = self.behavior {
            state.behavior = b;
        }
        if let Some(mood) = self.mood {
            match clamp_level(mood) {
                Some(v) => state.mood = v,
                None => log::warn!("Discarding non-finite mood {mood}"),
            }
        }
        if let Some(energy) = self.energy {
            match clamp_level(energy) {
                Some(v) => state.energy = v,
                None => log::warn!("Discarding non-finite energy {energy}"),
            }
        }
        if let Some(p) = self.position {
            merge_axis(&mut state.position.x, p.x, "x");
            merge_axis(&mut state.position.y, p.y, "y");
        }
        if let Some(v) = self.is_moving {
            state.is_moving = v;
        }
        if let Some(v) = self.is_dragging {
            state.is_dragging = v;
        }
        if let Some(t) = self.last_interaction_time {
            state.last_interaction_time = t;
        }
        if let Some(t) = self.last_interaction_for_energy {
            state.last_interaction_for_energy = t;
        }
        if let Some(t) = self.last_energy_update_time {
            state.last_energy_update_time = t;
        }
        if let Some(m) = self.mouse_position {
            match m {
                Some(p) if !p.is_finite() => log::warn!("Discarding non-finite cursor {p}"),
                other => state.mouse_position = other,
            }
        }
    }
}

fn clamp_level(v: f64) -> Option<f64> {
    v.is_finite().then(|| v.clamp(0.0, LEVEL_MAX))
}

fn merge_axis(slot: &mut f32, value: Option<f32>, axis: &str) {
    match value {
        Some(v) if v.is_finite() => *slot = v,
        Some(v) => log::warn!("Discarding non-finite position {axis}={v}"),
        None => {}
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// One field that changed during an update pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateChange {
    pub key: StateKey,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// History record for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub pass: u64,
    pub key: StateKey,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// Updates a subscriber wants applied after the current pass finishes.
#[derive(Debug, Default)]
pub struct Deferred {
    patches: Vec<StatePatch>,
}

impl Deferred {
    pub fn update(&mut self, patch: StatePatch) {
        self.patches.push(patch);
    }
}

/// `(new, old, full_state, deferred)`.
pub type Listener =
    Box<dyn FnMut(&FieldValue, &FieldValue, &PetState, &mut Deferred) -> Result<(), ListenerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    key: StateKey,
    callback: Listener,
}

/// Single source of truth for [`PetState`] with keyed change subscriptions.
pub struct StateStore {
    state: PetState,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    passes: u64,
    /// Newest at the back, at most `HISTORY_SIZE` entries.
    history: VecDeque<HistoryEntry>,
}

impl StateStore {
    pub fn new(now: Millis) -> Self {
        Self {
            state: PetState::new(now),
            subscribers: Vec::new(),
            next_id: 0,
            passes: 0,
            history: VecDeque::with_capacity(HISTORY_SIZE),
        }
    }

    /// Immutable snapshot.
    pub fn get(&self) -> PetState {
        self.state
    }

    pub fn subscribe(&mut self, key: StateKey, callback: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, key, callback });
        id
    }

    /// Returns false when `id` was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    /// Merge `patch` and notify subscribers of changed keys, in registration
    /// order. Updates deferred by subscribers run afterwards as their own
    /// passes, never folded into the current one. Returns every change from
    /// every pass, in order.
    pub fn update(&mut self, patch: StatePatch) -> Vec<StateChange> {
        let mut all = Vec::new();
        let mut pending = VecDeque::from([patch]);

        while let Some(next) = pending.pop_front() {
            let mut deferred = Deferred::default();
            let changes = self.run_pass(next, &mut deferred);
            all.extend(changes);
            pending.extend(deferred.patches);
        }
        all
    }

    fn run_pass(&mut self, patch: StatePatch, deferred: &mut Deferred) -> Vec<StateChange> {
        let old = self.state;
        patch.apply_to(&mut self.state);

        let changes: Vec<StateChange> = StateKey::ALL
            .iter()
            .filter_map(|&key| {
                let (before, after) = (old.value(key), self.state.value(key));
                (before != after).then_some(StateChange {
                    key,
                    old: before,
                    new: after,
                })
            })
            .collect();
        if changes.is_empty() {
            return changes;
        }

        self.passes += 1;
        for c in &changes {
            if self.history.len() == HISTORY_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(HistoryEntry {
                pass: self.passes,
                key: c.key,
                old: c.old,
                new: c.new,
            });
        }

        for sub in self.subscribers.iter_mut() {
            let Some(change) = changes.iter().find(|c| c.key == sub.key) else {
                continue;
            };
            if let Err(e) = (sub.callback)(&change.new, &change.old, &self.state, deferred) {
                log::warn!("State listener on {:?} failed: {e}", sub.key);
            }
        }
        changes
    }

    /// Oldest to newest.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }
}
