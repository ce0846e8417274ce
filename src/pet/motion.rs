//! Programmatic glides: the pet walking itself across the screen.

use glam::Vec2;

use crate::config::MotionConfig;
use crate::engine::Task;
use crate::pet::state::PetState;
use crate::sched::{Millis, Scheduler, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRefusal {
    AlreadyMoving,
    Dragging,
    LowEnergy,
    /// Non-finite coordinates.
    InvalidTarget,
}

/// One eased step of a glide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlideStep {
    pub position: Vec2,
    /// Set on the last step: the straight-line distance covered.
    pub finished: Option<f32>,
}

struct Glide {
    from: Vec2,
    to: Vec2,
    step: u32,
    steps: u32,
    step_ms: Millis,
    handle: Option<TaskHandle>,
}

pub struct Mover {
    cfg: MotionConfig,
    glide: Option<Glide>,
}

impl Mover {
    pub fn new(cfg: MotionConfig) -> Self {
        Self { cfg, glide: None }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.glide.is_some()
    }

    pub fn duration_for(&self, distance: f32) -> Millis {
        let raw = (distance as f64 * self.cfg.ms_per_px).round() as Millis;
        raw.clamp(self.cfg.min_duration_ms, self.cfg.max_duration_ms)
    }

    /// Start gliding from the current position to `to`. The caller asserts
    /// `is_moving` on success.
    pub fn begin(
        &mut self,
        sched: &mut Scheduler<Task>,
        state: &PetState,
        to: Vec2,
        enough_energy: bool,
    ) -> Result<Millis, MoveRefusal> {
        if self.glide.is_some() || state.is_moving {
            return Err(MoveRefusal::AlreadyMoving);
        }
        if state.is_dragging {
            return Err(MoveRefusal::Dragging);
        }
        if !enough_energy {
            return Err(MoveRefusal::LowEnergy);
        }
        if !to.is_finite() {
            log::warn!("Discarding glide to non-finite {to}");
            return Err(MoveRefusal::InvalidTarget);
        }

        let from = state.position;
        let duration = self.duration_for(from.distance(to));
        let steps = self.cfg.steps.max(1);
        let step_ms = (duration / steps as Millis).max(1);
        self.glide = Some(Glide {
            from,
            to,
            step: 0,
            steps,
            step_ms,
            handle: Some(sched.schedule_in(step_ms, Task::MoveStep)),
        });
        log::info!("Gliding {from} -> {to} over {duration}ms");
        Ok(duration)
    }

    pub fn on_step(&mut self, sched: &mut Scheduler<Task>, handle: TaskHandle) -> Option<GlideStep> {
        let g = self.glide.as_mut()?;
        if g.handle != Some(handle) {
            return None;
        }
        g.step += 1;
        let t = g.step as f32 / g.steps as f32;
        let position = g.from.lerp(g.to, ease_in_out_quad(t)).round();

        if g.step < g.steps {
            g.handle = Some(sched.schedule_in(g.step_ms, Task::MoveStep));
            return Some(GlideStep {
                position,
                finished: None,
            });
        }
        let distance = g.from.distance(g.to);
        self.glide = None;
        Some(GlideStep {
            position,
            finished: Some(distance),
        })
    }

    /// Abort an in-flight glide. Returns whether one was running.
    pub fn cancel(&mut self, sched: &mut Scheduler<Task>) -> bool {
        match self.glide.take() {
            Some(mut g) => {
                sched.cancel_slot(&mut g.handle);
                log::debug!("Glide aborted at step {}/{}", g.step, g.steps);
                true
            }
            None => false,
        }
    }

    /// A spot near the cursor that keeps the pet on screen. Without a
    /// cursor, somewhere around the middle of the display.
    pub fn target_near(&self, cursor: Option<Vec2>, display: Vec2, rng: &mut fastrand::Rng) -> Vec2 {
        let cfg = &self.cfg;
        let lo = Vec2::splat(cfg.safe_margin);
        let hi = (display - Vec2::splat(cfg.pet_extent + cfg.safe_margin)).max(lo);

        let target = match cursor {
            Some(c) => {
                let angle = rng.f32() * std::f32::consts::TAU;
                let offset = cfg.offset_min + rng.f32() * (cfg.offset_max - cfg.offset_min);
                c + Vec2::from_angle(angle) * offset
            }
            None => {
                let jitter = Vec2::new(rng.f32() * 200.0 - 100.0, rng.f32() * 200.0 - 100.0);
                display * 0.5 + jitter
            }
        };
        target.clamp(lo, hi).round()
    }
}

pub fn ease_in_out_quad(t: f32) -> f32 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}
