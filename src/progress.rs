//! Fire-and-forget progress notifications.
//!
//! Long scans push human-readable status strings (project being walked,
//! session being parsed, final cache summary) into a [`ProgressSink`]. The
//! pipeline never waits on the sink: every provided impl is non-blocking
//! and silently drops messages nobody is listening for.

/// One-way status stream from the scan pipeline to a consumer.
pub trait ProgressSink {
    fn notify(&self, message: &str);
}

/// Sink that discards everything. The default when no consumer cares.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn notify(&self, _message: &str) {}
}

/// Std channel senders are valid sinks; a dropped receiver just means the
/// messages go nowhere.
impl ProgressSink for std::sync::mpsc::Sender<String> {
    fn notify(&self, message: &str) {
        let _ = self.send(message.to_string());
    }
}

/// Tokio unbounded senders never block, so an async consumer can drain at
/// its own pace.
impl ProgressSink for tokio::sync::mpsc::UnboundedSender<String> {
    fn notify(&self, message: &str) {
        let _ = self.send(message.to_string());
    }
}

/// Shorten a session id for progress display.
pub(crate) fn abbreviate_session(session_id: &str) -> String {
    if session_id.len() > 12 {
        format!("{}...", &session_id[..12])
    } else {
        session_id.to_string()
    }
}
