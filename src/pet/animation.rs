//! Maps state and energy changes onto named animations, one per channel.

use crate::engine::Task;
use crate::pet::energy::{LOW_ENERGY, VERY_LOW_ENERGY};
use crate::pet::state::{Behavior, PetState};
use crate::sched::{Millis, Scheduler, TaskHandle};

/// Independent visual slot. Playing on one channel never touches another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Looping body animation tied to `behavior`.
    State,
    /// Low / very-low energy overlay.
    Energy,
    /// Lift effect held for the length of a drag.
    Drag,
    /// One-shot flashes (transition, recovery, move bounce).
    Effect,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::State, Channel::Energy, Channel::Drag, Channel::Effect];

    fn index(self) -> usize {
        match self {
            Channel::State => 0,
            Channel::Energy => 1,
            Channel::Drag => 2,
            Channel::Effect => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    Linear,
    EaseInOut,
    EaseOut,
    /// cubic-bezier(0.4, 0, 0.2, 1)
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Loop,
    /// Clears its channel when done.
    Once,
    /// Stays until replaced or stopped.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationSpec {
    pub channel: Channel,
    pub duration_ms: Millis,
    pub easing: Easing,
    pub playback: Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationName {
    Breathe,
    Bounce,
    Sleep,
    Drag,
    StateTransition,
    EnergyRecovery,
    LowEnergy,
    VeryLowEnergy,
    Move,
}

impl AnimationName {
    pub fn spec(self) -> AnimationSpec {
        use AnimationName::*;
        let (channel, duration_ms, easing, playback) = match self {
            Breathe => (Channel::State, 2_000, Easing::EaseInOut, Playback::Loop),
            Bounce => (Channel::State, 600, Easing::EaseInOut, Playback::Loop),
            Sleep => (Channel::State, 3_000, Easing::EaseInOut, Playback::Loop),
            Drag => (Channel::Drag, 0, Easing::Linear, Playback::Hold),
            StateTransition => (Channel::Effect, 500, Easing::Standard, Playback::Once),
            EnergyRecovery => (Channel::Effect, 800, Easing::EaseOut, Playback::Once),
            LowEnergy => (Channel::Energy, 2_500, Easing::EaseInOut, Playback::Loop),
            VeryLowEnergy => (Channel::Energy, 3_000, Easing::EaseInOut, Playback::Loop),
            Move => (Channel::Effect, 1_000, Easing::EaseInOut, Playback::Once),
        };
        AnimationSpec {
            channel,
            duration_ms,
            easing,
            playback,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnimationName::Breathe => "breathe",
            AnimationName::Bounce => "bounce",
            AnimationName::Sleep => "sleep",
            AnimationName::Drag => "drag",
            AnimationName::StateTransition => "state_transition",
            AnimationName::EnergyRecovery => "energy_recovery",
            AnimationName::LowEnergy => "low_energy",
            AnimationName::VeryLowEnergy => "very_low_energy",
            AnimationName::Move => "move",
        }
    }

    /// State-channel loop for a behavior.
    pub fn for_behavior(behavior: Behavior) -> Self {
        match behavior {
            Behavior::Idle | Behavior::Chatting => AnimationName::Breathe,
            Behavior::Excited => AnimationName::Bounce,
            Behavior::Sleeping => AnimationName::Sleep,
        }
    }

    /// Energy overlay for a level, if any.
    pub fn for_energy(energy: f64) -> Option<Self> {
        if energy <= VERY_LOW_ENERGY {
            Some(AnimationName::VeryLowEnergy)
        } else if energy <= LOW_ENERGY {
            Some(AnimationName::LowEnergy)
        } else {
            None
        }
    }
}

/// Lifecycle notifications for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationEvent {
    Started { channel: Channel, name: AnimationName },
    Finished { channel: Channel, name: AnimationName },
    Cancelled { channel: Channel, name: AnimationName },
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    name: AnimationName,
    token: u64,
    done: Option<TaskHandle>,
}

pub struct AnimationCoordinator {
    slots: [Option<Slot>; 4],
    next_token: u64,
    settle: Option<TaskHandle>,
    settle_ms: Millis,
    events: Vec<AnimationEvent>,
}

impl AnimationCoordinator {
    pub fn new(settle_ms: Millis) -> Self {
        Self {
            slots: [None; 4],
            next_token: 0,
            settle: None,
            settle_ms,
            events: Vec::new(),
        }
    }

    /// Play `name` on its channel, replacing whatever that channel held.
    pub fn play(&mut self, sched: &mut Scheduler<Task>, name: AnimationName) {
        let spec = name.spec();
        let channel = spec.channel;
        self.stop(sched, channel);

        let token = self.next_token;
        self.next_token += 1;
        let done = (spec.playback == Playback::Once)
            .then(|| sched.schedule_in(spec.duration_ms, Task::AnimationDone { channel, token }));

        self.slots[channel.index()] = Some(Slot { name, token, done });
        self.events.push(AnimationEvent::Started { channel, name });
        log::debug!("Animation {} on {channel:?}", name.as_str());
    }

    /// Clear one channel. Returns what was playing there.
    pub fn stop(&mut self, sched: &mut Scheduler<Task>, channel: Channel) -> Option<AnimationName> {
        let slot = self.slots[channel.index()].take()?;
        if let Some(handle) = slot.done {
            sched.cancel(handle);
        }
        self.events.push(AnimationEvent::Cancelled {
            channel,
            name: slot.name,
        });
        Some(slot.name)
    }

    /// Natural completion of a one-shot. Stale tokens are ignored.
    pub fn on_finished(&mut self, channel: Channel, token: u64) {
        let idx = channel.index();
        match self.slots[idx] {
            Some(slot) if slot.token == token => {
                self.slots[idx] = None;
                self.events.push(AnimationEvent::Finished {
                    channel,
                    name: slot.name,
                });
            }
            _ => {}
        }
    }

    /// Behavior changed: flash, then loop the new state's animation unless
    /// a drag has the state channel suspended.
    pub fn on_behavior(&mut self, sched: &mut Scheduler<Task>, state: &PetState) {
        self.play(sched, AnimationName::StateTransition);
        if !state.is_dragging {
            self.play(sched, AnimationName::for_behavior(state.behavior));
        }
    }

    /// Energy changed: swap the overlay only when the band changes.
    pub fn on_energy(&mut self, sched: &mut Scheduler<Task>, energy: f64) {
        let wanted = AnimationName::for_energy(energy);
        if self.active(Channel::Energy) == wanted {
            return;
        }
        match wanted {
            Some(name) => self.play(sched, name),
            None => {
                self.stop(sched, Channel::Energy);
            }
        }
    }

    pub fn flash_recovery(&mut self, sched: &mut Scheduler<Task>) {
        self.play(sched, AnimationName::EnergyRecovery);
    }

    pub fn flash_move(&mut self, sched: &mut Scheduler<Task>) {
        self.play(sched, AnimationName::Move);
    }

    /// Drag flag flipped. Starting suspends the state loop; ending resumes
    /// it after the settle delay.
    pub fn on_drag(&mut self, sched: &mut Scheduler<Task>, dragging: bool) {
        sched.cancel_slot(&mut self.settle);
        if dragging {
            self.stop(sched, Channel::State);
            self.play(sched, AnimationName::Drag);
        } else {
            self.stop(sched, Channel::Drag);
            self.settle = Some(sched.schedule_in(self.settle_ms, Task::DragSettle));
        }
    }

    /// Settle delay elapsed. Reads behavior now, since it may have changed
    /// mid-drag.
    pub fn on_settle(&mut self, sched: &mut Scheduler<Task>, handle: TaskHandle, state: &PetState) {
        if self.settle != Some(handle) {
            return;
        }
        self.settle = None;
        if !state.is_dragging {
            self.play(sched, AnimationName::for_behavior(state.behavior));
        }
    }

    pub fn active(&self, channel: Channel) -> Option<AnimationName> {
        self.slots[channel.index()].map(|s| s.name)
    }

    pub fn drain_events(&mut self) -> Vec<AnimationEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn shutdown(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.settle);
        for channel in Channel::ALL {
            self.stop(sched, channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_due(anim: &mut AnimationCoordinator, sched: &mut Scheduler<Task>, until: Millis, state: &PetState) {
        while let Some((handle, task)) = sched.pop_due(until) {
            match task {
                Task::AnimationDone { channel, token } => anim.on_finished(channel, token),
                Task::DragSettle => anim.on_settle(sched, handle, state),
                _ => {}
            }
        }
    }

    #[test]
    fn channels_do_not_cancel_each_other() {
        let mut anim = AnimationCoordinator::new(200);
        let mut sched = Scheduler::new(0);
        anim.play(&mut sched, AnimationName::Breathe);
        anim.play(&mut sched, AnimationName::LowEnergy);
        anim.play(&mut sched, AnimationName::Drag);
        anim.play(&mut sched, AnimationName::StateTransition);

        assert_eq!(anim.active(Channel::State), Some(AnimationName::Breathe));
        assert_eq!(anim.active(Channel::Energy), Some(AnimationName::LowEnergy));
        assert_eq!(anim.active(Channel::Drag), Some(AnimationName::Drag));
        assert_eq!(anim.active(Channel::Effect), Some(AnimationName::StateTransition));

        anim.play(&mut sched, AnimationName::Bounce);
        assert_eq!(anim.active(Channel::Energy), Some(AnimationName::LowEnergy));
        let events = anim.drain_events();
        assert!(events.contains(&AnimationEvent::Cancelled {
            channel: Channel::State,
            name: AnimationName::Breathe
        }));
    }

    #[test]
    fn one_shots_clear_themselves_loops_persist() {
        let mut anim = AnimationCoordinator::new(200);
        let mut sched = Scheduler::new(0);
        let state = PetState::new(0);
        anim.play(&mut sched, AnimationName::Sleep);
        anim.play(&mut sched, AnimationName::EnergyRecovery);

        run_due(&mut anim, &mut sched, 799, &state);
        assert_eq!(anim.active(Channel::Effect), Some(AnimationName::EnergyRecovery));
        run_due(&mut anim, &mut sched, 10_000, &state);
        assert_eq!(anim.active(Channel::Effect), None);
        assert_eq!(anim.active(Channel::State), Some(AnimationName::Sleep));
    }

    #[test]
    fn replaced_one_shot_does_not_clear_its_successor() {
        let mut anim = AnimationCoordinator::new(200);
        let mut sched = Scheduler::new(0);
        let state = PetState::new(0);
        anim.play(&mut sched, AnimationName::StateTransition);
        sched.advance_to(400);
        anim.play(&mut sched, AnimationName::Move);

        run_due(&mut anim, &mut sched, 600, &state);
        assert_eq!(anim.active(Channel::Effect), Some(AnimationName::Move));
        run_due(&mut anim, &mut sched, 1_400, &state);
        assert_eq!(anim.active(Channel::Effect), None);
    }

    #[test]
    fn energy_overlay_follows_bands() {
        let mut anim = AnimationCoordinator::new(200);
        let mut sched = Scheduler::new(0);
        anim.on_energy(&mut sched, 50.0);
        assert_eq!(anim.active(Channel::Energy), None);
        anim.on_energy(&mut sched, 30.0);
        assert_eq!(anim.active(Channel::Energy), Some(AnimationName::LowEnergy));
        anim.drain_events();
        anim.on_energy(&mut sched, 25.0);
        assert!(anim.drain_events().is_empty());
        anim.on_energy(&mut sched, 15.0);
        assert_eq!(anim.active(Channel::Energy), Some(AnimationName::VeryLowEnergy));
        anim.on_energy(&mut sched, 31.0);
        assert_eq!(anim.active(Channel::Energy), None);
    }

    #[test]
    fn drag_end_resumes_current_behavior_after_settle() {
        let mut anim = AnimationCoordinator::new(200);
        let mut sched = Scheduler::new(0);
        let mut state = PetState::new(0);
        anim.play(&mut sched, AnimationName::Breathe);

        state.is_dragging = true;
        anim.on_drag(&mut sched, true);
        assert_eq!(anim.active(Channel::State), None);
        assert_eq!(anim.active(Channel::Drag), Some(AnimationName::Drag));

        // Forced asleep mid-drag; the state loop stays suspended.
        state.behavior = Behavior::Sleeping;
        anim.on_behavior(&mut sched, &state);
        assert_eq!(anim.active(Channel::State), None);

        state.is_dragging = false;
        anim.on_drag(&mut sched, false);
        assert_eq!(anim.active(Channel::Drag), None);
        run_due(&mut anim, &mut sched, 199, &state);
        assert_eq!(anim.active(Channel::State), None);
        run_due(&mut anim, &mut sched, 200, &state);
        assert_eq!(anim.active(Channel::State), Some(AnimationName::Sleep));
    }

    #[test]
    fn shutdown_clears_everything() {
        let mut anim = AnimationCoordinator::new(200);
        let mut sched = Scheduler::new(0);
        anim.play(&mut sched, AnimationName::Bounce);
        anim.play(&mut sched, AnimationName::Move);
        anim.on_drag(&mut sched, false);
        anim.shutdown(&mut sched);
        assert!(Channel::ALL.iter().all(|&c| anim.active(c).is_none()));
        assert_eq!(sched.len(), 0);
    }
}
