//! Ordered, retry-safe queue of interaction events.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike, Utc};

use crate::config::TelemetryConfig;
use crate::engine::Task;
use crate::pet::behavior::Trigger;
use crate::pet::drag::DragSummary;
use crate::pet::state::{Behavior, PetState};
use crate::sched::{Millis, Scheduler, TaskHandle};
use crate::telemetry::collector::{Collector, Delivery};
use crate::telemetry::events::{
    ActiveMeta, ChatMeta, ClickMeta, DoubleClickMeta, DragMeta, EventPayload, HoverMeta,
    InteractionEvent, StateChangeMeta,
};

/// Hovers shorter than this are noise.
const MIN_HOVER_MS: Millis = 1_000;
const SESSION_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub clicks: u64,
    pub drags: u64,
    pub state_changes: u64,
    pub chats: u64,
    pub total_interactions: u64,
    pub started_at: Millis,
    pub last_event_at: Millis,
}

#[derive(Debug, Clone, Copy)]
struct ChatTally {
    started_at: Millis,
    user: u32,
    assistant: u32,
}

/// What `flush` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStart {
    Empty,
    /// A previous batch has not settled yet; nothing new was sent.
    InFlight,
    Sent(usize),
    /// The collector refused to start; the batch is back in the queue.
    Failed,
}

/// A settled send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Delivered(usize),
    Requeued(usize),
}

pub struct InteractionBatcher {
    queue: VecDeque<InteractionEvent>,
    in_flight: Option<Vec<InteractionEvent>>,
    collector: Box<dyn Collector>,
    max_queue: usize,
    max_backlog: usize,
    flush_interval_ms: Millis,
    heartbeat_ms: Millis,
    shutdown_wait: Duration,
    session_id: String,
    stats: SessionStats,
    chat: Option<ChatTally>,
    flush_timer: Option<TaskHandle>,
    heartbeat_timer: Option<TaskHandle>,
}

impl InteractionBatcher {
    pub fn new(
        cfg: &TelemetryConfig,
        collector: Box<dyn Collector>,
        now: Millis,
        rng: &mut fastrand::Rng,
    ) -> Self {
        let session_id = session_id(Utc::now().timestamp_millis(), rng);
        log::info!("Tracking session {session_id}");
        Self {
            queue: VecDeque::with_capacity(cfg.max_queue.max(1) * 2),
            in_flight: None,
            collector,
            max_queue: cfg.max_queue.max(1),
            max_backlog: cfg.max_backlog.max(cfg.max_queue).max(1),
            flush_interval_ms: cfg.flush_interval_ms,
            heartbeat_ms: cfg.heartbeat_ms,
            shutdown_wait: Duration::from_millis(cfg.shutdown_wait_ms),
            session_id,
            stats: SessionStats {
                started_at: now,
                last_event_at: now,
                ..SessionStats::default()
            },
            chat: None,
            flush_timer: None,
            heartbeat_timer: None,
        }
    }

    pub fn start(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.flush_timer);
        sched.cancel_slot(&mut self.heartbeat_timer);
        self.flush_timer = Some(sched.schedule_in(self.flush_interval_ms, Task::FlushTimer));
        self.heartbeat_timer = Some(sched.schedule_in(self.heartbeat_ms, Task::Heartbeat));
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Events waiting, not counting a batch in flight.
    #[cfg(test)]
    pub fn queued(&self) -> impl Iterator<Item = &InteractionEvent> {
        self.queue.iter()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.as_ref().map_or(0, Vec::len)
    }

    /// The single way into the queue. A full queue flushes immediately.
    pub fn record(&mut self, payload: EventPayload, now: Millis) {
        let event = InteractionEvent::new(payload, self.session_id.clone(), Utc::now());
        log::debug!("Recorded {:?}", event.kind());
        self.queue.push_back(event);
        self.stats.last_event_at = now;
        self.trim_backlog();

        if self.queue.len() >= self.max_queue {
            self.flush();
        }
    }

    /// Send everything queued as one batch, unless a batch is already out.
    pub fn flush(&mut self) -> FlushStart {
        if self.in_flight.is_some() {
            return FlushStart::InFlight;
        }
        if self.queue.is_empty() {
            return FlushStart::Empty;
        }
        let batch: Vec<InteractionEvent> = self.queue.drain(..).collect();
        match self.collector.begin(&batch) {
            Ok(()) => {
                let n = batch.len();
                self.in_flight = Some(batch);
                FlushStart::Sent(n)
            }
            Err(e) => {
                log::warn!("Could not send {} events: {e}", batch.len());
                self.requeue(batch);
                FlushStart::Failed
            }
        }
    }

    /// Pick up the result of the batch in flight, if it has settled.
    pub fn poll(&mut self) -> Option<FlushOutcome> {
        self.in_flight.as_ref()?;
        let delivery = self.collector.poll()?;
        Some(self.settle(delivery))
    }

    fn settle(&mut self, delivery: Delivery) -> FlushOutcome {
        let batch = self.in_flight.take().unwrap_or_default();
        let n = batch.len();
        match delivery {
            Ok(()) => {
                log::info!("Sent {n} interaction events");
                FlushOutcome::Delivered(n)
            }
            Err(e) => {
                log::warn!("Batch of {n} events failed, requeued: {e}");
                self.requeue(batch);
                FlushOutcome::Requeued(n)
            }
        }
    }

    /// Put a failed batch back in front, original order intact.
    fn requeue(&mut self, batch: Vec<InteractionEvent>) {
        for event in batch.into_iter().rev() {
            self.queue.push_front(event);
        }
        self.trim_backlog();
    }

    fn trim_backlog(&mut self) {
        let retained = self.queue.len() + self.in_flight_len();
        if retained <= self.max_backlog {
            return;
        }
        let excess = (retained - self.max_backlog).min(self.queue.len());
        self.queue.drain(..excess);
        log::warn!("Collector backlog full, dropped {excess} oldest events");
    }

    pub fn on_flush_timer(&mut self, sched: &mut Scheduler<Task>, handle: TaskHandle) {
        if self.flush_timer != Some(handle) {
            return;
        }
        self.flush_timer = Some(sched.schedule_in(self.flush_interval_ms, Task::FlushTimer));
        self.flush();
    }

    pub fn on_heartbeat(&mut self, sched: &mut Scheduler<Task>, handle: TaskHandle, now: Millis) {
        if self.heartbeat_timer != Some(handle) {
            return;
        }
        self.heartbeat_timer = Some(sched.schedule_in(self.heartbeat_ms, Task::Heartbeat));
        if self.stats.total_interactions > 0 {
            self.track_active_session(now);
        }
    }

    // ---- Tracking ----

    pub fn track_click(&mut self, state: &PetState, now: Millis) {
        self.stats.clicks += 1;
        self.stats.total_interactions += 1;
        self.record(
            EventPayload::Click(ClickMeta {
                click_count: self.stats.clicks,
                position: state.position,
                pet_state: state.behavior,
                mood: state.mood,
                energy: state.energy,
            }),
            now,
        );
    }

    pub fn track_double_click(&mut self, state: &PetState, now: Millis) {
        self.stats.total_interactions += 1;
        self.record(
            EventPayload::DoubleClick(DoubleClickMeta {
                position: state.position,
                pet_state: state.behavior,
            }),
            now,
        );
    }

    pub fn track_drag(&mut self, summary: &DragSummary, now: Millis) {
        self.stats.drags += 1;
        self.stats.total_interactions += 1;
        let distance = summary.distance();
        let speed = if summary.duration > 0 {
            (distance as f64 / summary.duration as f64 * 1000.0).round() as u32
        } else {
            0
        };
        self.record(
            EventPayload::Drag(DragMeta {
                drag_count: self.stats.drags,
                start_position: summary.start,
                end_position: summary.end,
                distance: distance.round() as u32,
                duration: summary.duration,
                speed,
            }),
            now,
        );
    }

    pub fn track_state_change(&mut self, from: Behavior, to: Behavior, trigger: Trigger, now: Millis) {
        self.stats.state_changes += 1;
        self.stats.total_interactions += 1;
        self.record(
            EventPayload::StateChange(StateChangeMeta {
                from_state: from,
                to_state: to,
                trigger,
                state_change_count: self.stats.state_changes,
            }),
            now,
        );
    }

    pub fn track_hover(&mut self, duration: Millis, now: Millis) {
        if duration < MIN_HOVER_MS {
            return;
        }
        self.record(EventPayload::Hover(HoverMeta { duration }), now);
    }

    pub fn start_chat(&mut self, now: Millis) {
        if self.chat.is_some() {
            log::warn!("Chat session already open");
            return;
        }
        self.chat = Some(ChatTally {
            started_at: now,
            user: 0,
            assistant: 0,
        });
    }

    pub fn chat_message(&mut self, role: ChatRole, now: Millis) {
        let tally = self.chat.get_or_insert(ChatTally {
            started_at: now,
            user: 0,
            assistant: 0,
        });
        match role {
            ChatRole::User => tally.user += 1,
            ChatRole::Assistant => tally.assistant += 1,
        }
    }

    /// Records one `chat_session` event for the whole conversation.
    pub fn end_chat(&mut self, now: Millis) {
        let Some(tally) = self.chat.take() else {
            log::warn!("No chat session to close");
            return;
        };
        self.stats.chats += 1;
        let duration = now.saturating_sub(tally.started_at);
        let messages = tally.user + tally.assistant;
        self.record(
            EventPayload::Chat(ChatMeta {
                duration,
                message_count: messages,
                user_messages: tally.user,
                ai_messages: tally.assistant,
                avg_response_time: duration / Millis::from(messages.max(1)),
                chat_session_count: self.stats.chats,
            }),
            now,
        );
        log::info!("Chat session closed: {duration}ms, {messages} messages");
    }

    pub fn chat_open(&self) -> bool {
        self.chat.is_some()
    }

    fn track_active_session(&mut self, now: Millis) {
        let local = Local::now();
        let meta = ActiveMeta {
            session_duration: now.saturating_sub(self.stats.started_at),
            inactive_duration: now.saturating_sub(self.stats.last_event_at),
            total_interactions: self.stats.total_interactions,
            clicks: self.stats.clicks,
            drags: self.stats.drags,
            chats: self.stats.chats,
            hour: local.hour(),
            day_of_week: local.weekday().num_days_from_sunday(),
        };
        log::info!(
            "Active session: {}s, {} interactions",
            meta.session_duration / 1000,
            meta.total_interactions
        );
        self.record(EventPayload::Active(meta), now);
    }

    /// Best effort: settle anything in flight, send what is left, and wait
    /// briefly. Events still unsent afterwards are dropped.
    pub fn shutdown(&mut self, sched: &mut Scheduler<Task>) {
        sched.cancel_slot(&mut self.flush_timer);
        sched.cancel_slot(&mut self.heartbeat_timer);
        if self.chat.is_some() {
            self.end_chat(sched.now());
        }

        if self.in_flight.is_some() {
            if let Some(delivery) = self.collector.wait(self.shutdown_wait) {
                self.settle(delivery);
            }
        }
        if let FlushStart::Sent(_) = self.flush() {
            if let Some(delivery) = self.collector.wait(self.shutdown_wait) {
                self.settle(delivery);
            }
        }

        let lost = self.queue.len() + self.in_flight_len();
        if lost > 0 {
            log::warn!("Dropping {lost} unsent interaction events");
        }
        self.queue.clear();
        self.in_flight = None;
    }
}

/// `session_<unix ms>_<9 base36 chars>`.
fn session_id(unix_ms: i64, rng: &mut fastrand::Rng) -> String {
    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = (0..SESSION_SUFFIX_LEN)
        .map(|_| BASE36[rng.usize(..BASE36.len())] as char)
        .collect();
    format!("session_{unix_ms}_{suffix}")
}
