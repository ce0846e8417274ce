//! Interaction event schema, as posted to the collector.

use chrono::{DateTime, Utc};
use glam::Vec2;
use serde::Serialize;

use crate::pet::behavior::Trigger;
use crate::pet::state::Behavior;
use crate::sched::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PetClick,
    DoubleClick,
    PetDrag,
    StateChange,
    ChatSession,
    Hover,
    ActiveSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickMeta {
    pub click_count: u64,
    pub position: Vec2,
    pub pet_state: Behavior,
    pub mood: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoubleClickMeta {
    pub position: Vec2,
    pub pet_state: Behavior,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DragMeta {
    pub drag_count: u64,
    pub start_position: Vec2,
    pub end_position: Vec2,
    pub distance: u32,
    pub duration: Millis,
    /// Pixels per second.
    pub speed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChangeMeta {
    pub from_state: Behavior,
    pub to_state: Behavior,
    pub trigger: Trigger,
    pub state_change_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMeta {
    pub duration: Millis,
    pub message_count: u32,
    pub user_messages: u32,
    pub ai_messages: u32,
    pub avg_response_time: Millis,
    pub chat_session_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoverMeta {
    pub duration: Millis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveMeta {
    pub session_duration: Millis,
    pub inactive_duration: Millis,
    pub total_interactions: u64,
    pub clicks: u64,
    pub drags: u64,
    pub chats: u64,
    pub hour: u32,
    /// 0 = Sunday.
    pub day_of_week: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Click(ClickMeta),
    DoubleClick(DoubleClickMeta),
    Drag(DragMeta),
    StateChange(StateChangeMeta),
    Chat(ChatMeta),
    Hover(HoverMeta),
    Active(ActiveMeta),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Click(_) => EventKind::PetClick,
            EventPayload::DoubleClick(_) => EventKind::DoubleClick,
            EventPayload::Drag(_) => EventKind::PetDrag,
            EventPayload::StateChange(_) => EventKind::StateChange,
            EventPayload::Chat(_) => EventKind::ChatSession,
            EventPayload::Hover(_) => EventKind::Hover,
            EventPayload::Active(_) => EventKind::ActiveSession,
        }
    }
}

/// One recorded interaction. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    metadata: EventPayload,
    session_id: String,
    timestamp: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(metadata: EventPayload, session_id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: metadata.kind(),
            metadata,
            session_id,
            timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn metadata(&self) -> &EventPayload {
        &self.metadata
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Request body: `{"events": [...]}`.
#[derive(Debug, Serialize)]
pub struct EventBatch<'a> {
    pub events: &'a [InteractionEvent],
}
