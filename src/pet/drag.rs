//! Pointer drag → window position, coalesced to one move per frame.

use glam::Vec2;

use crate::sched::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
    Touch,
}

impl PointerButton {
    pub fn starts_drag(self) -> bool {
        matches!(self, PointerButton::Primary | PointerButton::Touch)
    }
}

/// Display and window extents, for keeping the window fully on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayBounds {
    pub display: Vec2,
    pub window: Vec2,
}

impl DisplayBounds {
    pub fn new(display: Vec2, window: Vec2) -> Self {
        Self { display, window }
    }

    /// Clamp to `[0, display - window]` per axis, in whole pixels.
    pub fn clamp(&self, pos: Vec2) -> Vec2 {
        let max = (self.display - self.window).max(Vec2::ZERO);
        pos.clamp(Vec2::ZERO, max).round()
    }
}

/// What a finished gesture looked like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSummary {
    /// Window position at press.
    pub start: Vec2,
    /// Window position at release.
    pub end: Vec2,
    pub duration: Millis,
    /// Furthest the pointer travelled from where it was pressed.
    pub travel: f32,
}

impl DragSummary {
    pub fn distance(&self) -> f32 {
        self.start.distance(self.end)
    }

    pub fn is_click(&self, slop_px: f32) -> bool {
        self.travel < slop_px
    }
}

struct Gesture {
    start_pointer: Vec2,
    start_window: Vec2,
    started_at: Millis,
    /// Latest clamped target not yet handed to the host.
    pending: Option<Vec2>,
    /// Last position handed to the host.
    sent: Vec2,
    travel: f32,
}

pub struct DragSampler {
    gesture: Option<Gesture>,
    bounds: DisplayBounds,
}

impl DragSampler {
    pub fn new(bounds: DisplayBounds) -> Self {
        Self {
            gesture: None,
            bounds,
        }
    }

    pub fn set_bounds(&mut self, bounds: DisplayBounds) {
        self.bounds = bounds;
    }

    pub fn bounds(&self) -> DisplayBounds {
        self.bounds
    }

    pub fn is_active(&self) -> bool {
        self.gesture.is_some()
    }

    /// Begin a gesture. Only primary button and touch start one; returns
    /// whether this press did.
    pub fn pointer_down(
        &mut self,
        button: PointerButton,
        pointer: Vec2,
        window: Vec2,
        now: Millis,
    ) -> bool {
        if !button.starts_drag() || self.gesture.is_some() {
            return false;
        }
        if !pointer.is_finite() || !window.is_finite() {
            log::warn!("Ignoring pointer down at non-finite {pointer} / {window}");
            return false;
        }
        self.gesture = Some(Gesture {
            start_pointer: pointer,
            start_window: window,
            started_at: now,
            pending: None,
            sent: window,
            travel: 0.0,
        });
        true
    }

    /// Record where the window should be. Nothing is sent until the next
    /// [`frame`](Self::frame).
    pub fn pointer_move(&mut self, pointer: Vec2) {
        let bounds = self.bounds;
        let Some(g) = self.gesture.as_mut() else {
            return;
        };
        if !pointer.is_finite() {
            log::warn!("Ignoring non-finite pointer {pointer}");
            return;
        }
        let delta = pointer - g.start_pointer;
        g.travel = g.travel.max(delta.length());
        g.pending = Some(bounds.clamp(g.start_window + delta));
    }

    /// Once per display refresh. Yields at most one position, and nothing
    /// when the target has not changed since the last one sent.
    pub fn frame(&mut self) -> Option<Vec2> {
        let g = self.gesture.as_mut()?;
        let target = g.pending.take()?;
        if target == g.sent {
            return None;
        }
        g.sent = target;
        Some(target)
    }

    /// End the gesture. Any move still pending is folded into the summary
    /// end position; the caller should send it if it differs.
    pub fn pointer_up(&mut self, now: Millis) -> Option<DragSummary> {
        let g = self.gesture.take()?;
        let end = g.pending.unwrap_or(g.sent);
        Some(DragSummary {
            start: g.start_window,
            end,
            duration: now.saturating_sub(g.started_at),
            travel: g.travel,
        })
    }

    /// Drop the gesture without a summary (window lost focus, shutdown).
    pub fn cancel(&mut self) -> bool {
        self.gesture.take().is_some()
    }
}
