//! The pet's behavior core: state, energy, transitions, animation, input.

pub mod animation;
pub mod behavior;
pub mod drag;
pub mod energy;
pub mod motion;
pub mod state;
