//! Transition rules between behaviors and the timers owned by each one.
//!
//! The machine never touches the store directly: [`BehaviorStateMachine::evaluate`]
//! decides, [`BehaviorStateMachine::commit`] swaps timers and hands back the
//! patch that writes `behavior`. It is the only place that patch is built.

use std::fmt;

use serde::Serialize;

use crate::config::BehaviorConfig;
use crate::engine::Task;
use crate::pet::energy::EnergyResource;
use crate::pet::state::{Behavior, PetState, StatePatch};
use crate::sched::{Millis, Scheduler, TaskHandle};

/// What asked for a transition. Recorded on `state_change` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Interaction,
    Chat,
    Exhausted,
}

/// Why a request was turned down. Never an error; the state is untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Leaving Sleeping below the wake threshold.
    StillSleeping { energy: f64 },
    /// A drag or glide is in progress.
    Busy,
    /// Nap asked for with plenty of energy left.
    NotSleepy { energy: f64 },
    /// Chatting is entered and left only with the chat window.
    ChatOnly,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::StillSleeping { energy } => {
                write!(f, "still too sleepy to get up ({energy:.0}% energy)")
            }
            Rejection::Busy => f.write_str("busy being dragged or moving"),
            Rejection::NotSleepy { energy } => write!(f, "not sleepy at {energy:.0}% energy"),
            Rejection::ChatOnly => f.write_str("chatting follows the chat window"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Already in the requested state.
    Unchanged,
    Rejected(Rejection),
    /// `forced` marks the exhaustion override.
    Commit {
        from: Behavior,
        to: Behavior,
        forced: bool,
    },
}

pub struct BehaviorStateMachine {
    cfg: BehaviorConfig,
    wake_threshold: f64,
    proximity: Option<TaskHandle>,
    cursor_poll: Option<TaskHandle>,
}

impl BehaviorStateMachine {
    pub fn new(cfg: BehaviorConfig, wake_threshold: f64) -> Self {
        Self {
            cfg,
            wake_threshold,
            proximity: None,
            cursor_poll: None,
        }
    }

    /// Apply the transition rules in order. Pure: nothing is scheduled or
    /// written until [`commit`](Self::commit).
    pub fn evaluate(&self, state: &PetState, requested: Behavior) -> Decision {
        let from = state.behavior;
        if requested == from {
            return Decision::Unchanged;
        }
        if from == Behavior::Sleeping && state.energy < self.wake_threshold {
            return Decision::Rejected(Rejection::StillSleeping {
                energy: state.energy,
            });
        }
        if state.energy <= 0.0 {
            // Exhaustion overrides whatever was asked for, busy or not.
            return Decision::Commit {
                from,
                to: Behavior::Sleeping,
                forced: true,
            };
        }
        if state.is_dragging || state.is_moving {
            return Decision::Rejected(Rejection::Busy);
        }
        Decision::Commit {
            from,
            to: requested,
            forced: false,
        }
    }

    /// Forced sleep after the tank hits zero, or `Unchanged` if the pet is
    /// already asleep or still has energy.
    pub fn exhaustion(&self, state: &PetState) -> Decision {
        if state.energy > 0.0 || state.behavior == Behavior::Sleeping {
            return Decision::Unchanged;
        }
        Decision::Commit {
            from: state.behavior,
            to: Behavior::Sleeping,
            forced: true,
        }
    }

    /// Stop the outgoing state's timers, start the incoming state's, and
    /// return the patch that writes the new behavior. Outgoing timers are
    /// always cancelled first so no loop writes twice in one tick.
    pub fn commit(
        &mut self,
        sched: &mut Scheduler<Task>,
        energy: &mut EnergyResource,
        from: Behavior,
        to: Behavior,
    ) -> StatePatch {
        match from {
            Behavior::Excited => self.stop_excited_timers(sched),
            Behavior::Sleeping => energy.stop_recovery(sched),
            Behavior::Idle | Behavior::Chatting => {}
        }
        match to {
            Behavior::Excited => {
                self.proximity =
                    Some(sched.schedule_in(self.cfg.proximity_check_ms, Task::ProximityCheck));
                self.cursor_poll =
                    Some(sched.schedule_in(self.cfg.cursor_poll_ms, Task::CursorPoll));
            }
            Behavior::Sleeping => energy.start_recovery(sched),
            Behavior::Idle | Behavior::Chatting => {}
        }
        log::info!("Behavior {} -> {}", from.label(), to.label());
        StatePatch::new().behavior(to)
    }

    fn stop_excited_timers(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.proximity);
        sched.cancel_slot(&mut self.cursor_poll);
    }

    /// Returns true when the pet has been left alone long enough to go
    /// looking for the cursor.
    pub fn on_proximity_check(
        &mut self,
        sched: &mut Scheduler<Task>,
        handle: TaskHandle,
        state: &PetState,
        now: Millis,
    ) -> bool {
        if self.proximity != Some(handle) || state.behavior != Behavior::Excited {
            return false;
        }
        self.proximity = Some(sched.schedule_in(self.cfg.proximity_check_ms, Task::ProximityCheck));

        let quiet = now.saturating_sub(state.last_interaction_time);
        quiet >= self.cfg.proximity_idle_ms && !state.is_moving && !state.is_dragging
    }

    /// Returns true when the cursor should be polled now.
    pub fn on_cursor_poll(
        &mut self,
        sched: &mut Scheduler<Task>,
        handle: TaskHandle,
        state: &PetState,
    ) -> bool {
        if self.cursor_poll != Some(handle) || state.behavior != Behavior::Excited {
            return false;
        }
        self.cursor_poll = Some(sched.schedule_in(self.cfg.cursor_poll_ms, Task::CursorPoll));
        true
    }

    #[cfg(test)]
    pub fn excited_timers_active(&self, sched: &Scheduler<Task>) -> bool {
        self.proximity.is_some_and(|h| sched.is_scheduled(h))
            || self.cursor_poll.is_some_and(|h| sched.is_scheduled(h))
    }

    pub fn shutdown(&mut self, sched: &mut Scheduler<Task>) {
        self.stop_excited_timers(sched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyConfig;

    fn machine() -> BehaviorStateMachine {
        BehaviorStateMachine::new(BehaviorConfig::default(), 20.0)
    }

    fn state(behavior: Behavior, energy: f64) -> PetState {
        let mut s = PetState::new(0);
        s.behavior = behavior;
        s.energy = energy;
        s
    }

    #[test]
    fn same_state_is_unchanged() {
        let m = machine();
        assert_eq!(
            m.evaluate(&state(Behavior::Idle, 50.0), Behavior::Idle),
            Decision::Unchanged
        );
        assert_eq!(
            m.evaluate(&state(Behavior::Sleeping, 0.0), Behavior::Sleeping),
            Decision::Unchanged
        );
    }

    #[test]
    fn low_energy_sleeper_cannot_leave() {
        let m = machine();
        for target in [Behavior::Idle, Behavior::Excited, Behavior::Chatting] {
            assert_eq!(
                m.evaluate(&state(Behavior::Sleeping, 19.9), target),
                Decision::Rejected(Rejection::StillSleeping { energy: 19.9 })
            );
        }
        assert!(matches!(
            m.evaluate(&state(Behavior::Sleeping, 20.0), Behavior::Idle),
            Decision::Commit { forced: false, .. }
        ));
    }

    #[test]
    fn entering_sleep_is_never_gated_by_energy() {
        let m = machine();
        assert_eq!(
            m.evaluate(&state(Behavior::Idle, 25.0), Behavior::Sleeping),
            Decision::Commit {
                from: Behavior::Idle,
                to: Behavior::Sleeping,
                forced: false
            }
        );
    }

    #[test]
    fn empty_tank_overrides_request() {
        let m = machine();
        let mut s = state(Behavior::Excited, 0.0);
        s.is_dragging = true;
        assert_eq!(
            m.evaluate(&s, Behavior::Idle),
            Decision::Commit {
                from: Behavior::Excited,
                to: Behavior::Sleeping,
                forced: true
            }
        );
        assert!(matches!(m.exhaustion(&s), Decision::Commit { forced: true, .. }));
        assert_eq!(
            m.exhaustion(&state(Behavior::Sleeping, 0.0)),
            Decision::Unchanged
        );
        assert_eq!(m.exhaustion(&state(Behavior::Idle, 0.1)), Decision::Unchanged);
    }

    #[test]
    fn busy_while_dragging_or_moving() {
        let m = machine();
        let mut s = state(Behavior::Idle, 60.0);
        s.is_moving = true;
        assert_eq!(
            m.evaluate(&s, Behavior::Excited),
            Decision::Rejected(Rejection::Busy)
        );
        s.is_moving = false;
        s.is_dragging = true;
        assert_eq!(
            m.evaluate(&s, Behavior::Excited),
            Decision::Rejected(Rejection::Busy)
        );
    }

    #[test]
    fn commit_swaps_state_owned_timers() {
        let mut m = machine();
        let mut energy = EnergyResource::new(EnergyConfig::default());
        let mut sched = Scheduler::new(0);

        let patch = m.commit(&mut sched, &mut energy, Behavior::Idle, Behavior::Excited);
        assert!(!patch.is_empty());
        assert!(m.excited_timers_active(&sched));

        m.commit(&mut sched, &mut energy, Behavior::Excited, Behavior::Sleeping);
        assert!(!m.excited_timers_active(&sched));
        assert!(energy.recovery_active(&sched));

        m.commit(&mut sched, &mut energy, Behavior::Sleeping, Behavior::Idle);
        assert!(!energy.recovery_active(&sched));
        assert_eq!(sched.len(), 0);
    }

    #[test]
    fn proximity_fires_after_quiet_period_only() {
        let mut m = machine();
        let mut energy = EnergyResource::new(EnergyConfig::default());
        let mut sched = Scheduler::new(0);
        m.commit(&mut sched, &mut energy, Behavior::Idle, Behavior::Excited);

        let mut s = state(Behavior::Excited, 80.0);
        s.last_interaction_time = 0;

        let mut wanders = Vec::new();
        while let Some((handle, task)) = sched.pop_due(6_000) {
            let now = sched.now();
            match task {
                Task::ProximityCheck => {
                    if m.on_proximity_check(&mut sched, handle, &s, now) {
                        wanders.push(now);
                    }
                }
                Task::CursorPoll => {
                    assert!(m.on_cursor_poll(&mut sched, handle, &s));
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(wanders, vec![5_000, 6_000]);
    }
}
