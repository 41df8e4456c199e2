use std::sync::{Mutex, MutexGuard, PoisonError};

use fitroom_contracts::events::EventWriter;
use fitroom_contracts::slots::SlotKind;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Must be acknowledged by the user (alert-style).
    Blocking,
    /// Shown without interrupting the user.
    Info,
}

impl NoticeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NoticeLevel::Blocking => "blocking",
            NoticeLevel::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub slot: Option<SlotKind>,
    pub message: String,
}

/// Collects user-facing notices for the surface to show, mirroring each
/// one (and every other session event) into the optional event log.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    pending: Mutex<Vec<Notice>>,
    events: Option<EventWriter>,
}

impl NoticeBoard {
    pub fn new(events: Option<EventWriter>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn blocking(&self, slot: Option<SlotKind>, message: impl Into<String>) {
        self.post(NoticeLevel::Blocking, slot, message.into());
    }

    pub fn info(&self, slot: Option<SlotKind>, message: impl Into<String>) {
        self.post(NoticeLevel::Info, slot, message.into());
    }

    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.pending())
    }

    /// Writes an event; a failing log never interrupts the session.
    pub fn emit(&self, event_type: &str, payload: Value) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.emit_value(event_type, payload);
        }
    }

    fn post(&self, level: NoticeLevel, slot: Option<SlotKind>, message: String) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.record_notice(level.as_str(), slot, &message);
        }
        let notice = Notice {
            level,
            slot,
            message,
        };
        self.pending().push(notice);
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Notice>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
