use crate::sched::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Single,
    Double,
}

/// Tells single clicks from double clicks by the gap between them.
pub struct ClickTracker {
    window_ms: Millis,
    last_click: Option<Millis>,
}

impl ClickTracker {
    pub fn new(window_ms: Millis) -> Self {
        Self {
            window_ms,
            last_click: None,
        }
    }

    /// Classify a click at `now`. A double consumes both clicks, so a third
    /// quick click starts a new pair.
    pub fn register(&mut self, now: Millis) -> ClickKind {
        match self.last_click {
            Some(prev) if now.saturating_sub(prev) < self.window_ms => {
                self.last_click = None;
                ClickKind::Double
            }
            _ => {
                self.last_click = Some(now);
                ClickKind::Single
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_within_window() {
        let mut clicks = ClickTracker::new(300);
        assert_eq!(clicks.register(1_000), ClickKind::Single);
        assert_eq!(clicks.register(1_250), ClickKind::Double);
        assert_eq!(clicks.register(1_400), ClickKind::Single);
        assert_eq!(clicks.register(1_700), ClickKind::Single);
    }
}
