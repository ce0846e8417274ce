use crate::config::EnergyConfig;
use crate::engine::Task;
use crate::pet::state::{Behavior, PetState, StatePatch, LEVEL_MAX};
use crate::sched::{Millis, Scheduler, TaskHandle};

/// Level at or below which the low-energy overlay shows.
pub const LOW_ENERGY: f64 = 30.0;
/// Level at or below which the very-low overlay shows.
pub const VERY_LOW_ENERGY: f64 = 15.0;
const CRITICAL_ENERGY: f64 = 5.0;
const FULL_ENERGY: f64 = 80.0;

const MS_PER_MINUTE: f64 = 60.0 * 1000.0;

// ---------------------------------------------------------------------------
// Decay profile
// ---------------------------------------------------------------------------

/// Percent of the tank lost per millisecond, per behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayProfile {
    idle: f64,
    excited: f64,
    chatting: f64,
}

impl DecayProfile {
    /// Rates that empty a full tank in the given number of minutes.
    pub fn from_minutes(idle: f64, excited: f64, chatting: f64) -> Self {
        let rate = |minutes: f64| {
            if minutes > 0.0 {
                LEVEL_MAX / (minutes * MS_PER_MINUTE)
            } else {
                0.0
            }
        };
        Self {
            idle: rate(idle),
            excited: rate(excited),
            chatting: rate(chatting),
        }
    }

    pub fn rate(&self, behavior: Behavior) -> f64 {
        match behavior {
            Behavior::Idle => self.idle,
            Behavior::Excited => self.excited,
            Behavior::Sleeping => 0.0,
            Behavior::Chatting => self.chatting,
        }
    }

    pub fn per_minute(&self, behavior: Behavior) -> f64 {
        self.rate(behavior) * MS_PER_MINUTE
    }
}

impl Default for DecayProfile {
    fn default() -> Self {
        Self::from_minutes(60.0, 40.0, 120.0)
    }
}

// ---------------------------------------------------------------------------
// Levels and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnergyLevel {
    Empty,
    Critical,
    VeryLow,
    Low,
    Normal,
    Full,
}

impl EnergyLevel {
    pub fn of(energy: f64) -> Self {
        if energy <= 0.0 {
            EnergyLevel::Empty
        } else if energy <= CRITICAL_ENERGY {
            EnergyLevel::Critical
        } else if energy <= VERY_LOW_ENERGY {
            EnergyLevel::VeryLow
        } else if energy <= LOW_ENERGY {
            EnergyLevel::Low
        } else if energy >= FULL_ENERGY {
            EnergyLevel::Full
        } else {
            EnergyLevel::Normal
        }
    }

    /// Worth warning about when entered from above.
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            EnergyLevel::Low | EnergyLevel::VeryLow | EnergyLevel::Critical
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyReport {
    pub energy: f64,
    pub behavior: Behavior,
    pub decay_per_minute: f64,
    /// `None` while the current behavior does not drain energy.
    pub minutes_to_empty: Option<f64>,
    pub level: EnergyLevel,
    pub can_wake: bool,
}

/// Result of one decay or recovery step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyStep {
    pub patch: StatePatch,
    pub before: f64,
    pub after: f64,
}

impl EnergyStep {
    /// Crossed from positive to empty on this step.
    pub fn exhausted(&self) -> bool {
        self.before > 0.0 && self.after <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionOutcome {
    /// Inside the cooldown window; nothing changed.
    Cooldown { remaining_ms: Millis },
    Recovered { before: f64, after: f64 },
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// Owns the decay and sleep-recovery loops. Computes patches; the engine
/// commits them.
pub struct EnergyResource {
    profile: DecayProfile,
    cfg: EnergyConfig,
    decay_loop: Option<TaskHandle>,
    recovery_loop: Option<TaskHandle>,
}

impl EnergyResource {
    pub fn new(cfg: EnergyConfig) -> Self {
        Self {
            profile: DecayProfile::from_minutes(
                cfg.idle_minutes,
                cfg.excited_minutes,
                cfg.chatting_minutes,
            ),
            cfg,
            decay_loop: None,
            recovery_loop: None,
        }
    }

    pub fn start_decay(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.decay_loop);
        self.decay_loop = Some(sched.schedule_in(self.cfg.decay_tick_ms, Task::DecayTick));
        log::info!("Energy decay started");
    }

    /// One decay tick. The rate is looked up from the behavior at this
    /// instant, never from when the loop started.
    pub fn on_decay_tick(
        &mut self,
        sched: &mut Scheduler<Task>,
        handle: TaskHandle,
        state: &PetState,
        now: Millis,
    ) -> Option<EnergyStep> {
        if self.decay_loop != Some(handle) {
            return None;
        }
        self.decay_loop = Some(sched.schedule_in(self.cfg.decay_tick_ms, Task::DecayTick));

        let elapsed = now.saturating_sub(state.last_energy_update_time) as f64;
        let rate = self.profile.rate(state.behavior);
        let before = state.energy;
        let after = if rate > 0.0 && before > 0.0 {
            (before - rate * elapsed).max(0.0)
        } else {
            before
        };

        if after != before && (before / 10.0).floor() != (after / 10.0).floor() {
            log::info!(
                "Energy {after:.1}% ({}, {:.3}%/s)",
                state.behavior.label(),
                rate * 1000.0
            );
        } else if after != before {
            log::debug!("Energy {before:.3} -> {after:.3} over {elapsed}ms");
        }

        Some(EnergyStep {
            patch: StatePatch::new().energy(after).energy_updated_at(now),
            before,
            after,
        })
    }

    pub fn start_recovery(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.recovery_loop);
        self.recovery_loop =
            Some(sched.schedule_in(self.cfg.recovery_tick_ms, Task::RecoveryTick));
        log::debug!("Sleep recovery scheduled");
    }

    /// Safe to call when the loop is not running.
    pub fn stop_recovery(&mut self, sched: &mut Scheduler<Task>) {
        if sched.cancel_slot(&mut self.recovery_loop) {
            log::debug!("Sleep recovery cancelled");
        }
    }

    pub fn recovery_active(&self, sched: &Scheduler<Task>) -> bool {
        self.recovery_loop.is_some_and(|h| sched.is_scheduled(h))
    }

    /// One recovery tick. Keeps itself scheduled until the tank is full.
    pub fn on_recovery_tick(
        &mut self,
        sched: &mut Scheduler<Task>,
        handle: TaskHandle,
        state: &PetState,
    ) -> Option<EnergyStep> {
        if self.recovery_loop != Some(handle) {
            return None;
        }
        self.recovery_loop = None;
        if state.behavior != Behavior::Sleeping {
            return None;
        }

        let before = state.energy;
        let after = (before + self.cfg.recovery_step).min(LEVEL_MAX);
        log::info!("Sleep recovery: {after:.1}%");
        if before < self.cfg.wake_threshold && after >= self.cfg.wake_threshold {
            log::info!("Energy back to {:.0}%, the pet can be woken", self.cfg.wake_threshold);
        }

        if after < LEVEL_MAX {
            self.recovery_loop =
                Some(sched.schedule_in(self.cfg.recovery_tick_ms, Task::RecoveryTick));
        } else {
            log::info!("Energy full, sleep recovery finished");
        }

        Some(EnergyStep {
            patch: StatePatch::new().energy(after),
            before,
            after,
        })
    }

    /// Interaction-driven recovery, rate limited by the cooldown. Never
    /// fails: a call inside the window just reports how long is left.
    pub fn on_interaction(&self, state: &PetState, now: Millis) -> (StatePatch, InteractionOutcome) {
        let since = now.saturating_sub(state.last_interaction_for_energy);
        if since < self.cfg.interaction_cooldown_ms {
            let remaining_ms = self.cfg.interaction_cooldown_ms - since;
            log::debug!("Interaction too soon, {remaining_ms}ms of cooldown left");
            return (StatePatch::new(), InteractionOutcome::Cooldown { remaining_ms });
        }

        let before = state.energy;
        let after = (before + self.cfg.interaction_recovery).min(LEVEL_MAX);
        if after > before {
            log::info!("Interaction restored {:.1}% energy ({after:.1}%)", after - before);
        }
        (
            StatePatch::new().energy(after).energy_interaction_at(now),
            InteractionOutcome::Recovered { before, after },
        )
    }

    /// Glide cost: base at `base_distance`, rising linearly to the max at
    /// three times that.
    pub fn move_cost(&self, distance: f32, base_distance: f32) -> f64 {
        let (min, max) = (self.cfg.move_cost_min, self.cfg.move_cost_max);
        let ratio = (distance / base_distance.max(1.0)).min(3.0) as f64;
        let cost = min + (max - min) * (ratio - 1.0) / 2.0;
        cost.clamp(min, max)
    }

    pub fn can_move(&self, state: &PetState) -> bool {
        state.energy >= self.cfg.min_move_energy
    }

    pub fn report(&self, state: &PetState) -> EnergyReport {
        let per_minute = self.profile.per_minute(state.behavior);
        EnergyReport {
            energy: state.energy,
            behavior: state.behavior,
            decay_per_minute: per_minute,
            minutes_to_empty: (per_minute > 0.0).then(|| state.energy / per_minute),
            level: EnergyLevel::of(state.energy),
            can_wake: state.energy >= self.cfg.wake_threshold,
        }
    }

    pub fn shutdown(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.decay_loop);
        sched.cancel_slot(&mut self.recovery_loop);
    }
}
