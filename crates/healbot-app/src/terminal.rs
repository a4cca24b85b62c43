//! Terminal rendering of the conversation widget.

use std::io::Write;

use healbot_chat::UiSurface;
use healbot_core::types::{Message, MessageOrigin, MessageStatus, Role};

/// Prints the conversation to stdout.
#[derive(Debug)]
pub struct TerminalSurface {
    assistant_name: String,
}

impl TerminalSurface {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }

    pub fn format_message(&self, message: &Message) -> String {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => self.assistant_name.as_str(),
        };
        let marker = match (message.status, message.origin) {
            (MessageStatus::Error, _) => " (error)",
            (_, MessageOrigin::Voice) => " (voice)",
            _ => "",
        };
        let mut line = format!("[{}]{} {}", speaker, marker, message.content);
        if let Some(url) = &message.audio_url {
            line.push_str(&format!("  <audio: {}>", url));
        }
        line
    }

    fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout leaves nothing to report to.
        let _ = writeln!(out, "{}", text);
        let _ = out.flush();
    }
}

impl UiSurface for TerminalSurface {
    fn append_message(&self, message: &Message) {
        self.print(&self.format_message(message));
    }

    fn update_message(&self, message: &Message) {
        self.print(&format!("  -> {}", self.format_message(message)));
    }

    fn clear_messages(&self) {
        self.print("----------------------------------------");
    }

    fn show_identity_modal(&self, prefill: Option<&str>) {
        match prefill {
            Some(name) => self.print(&format!(
                "Welcome! Type /new {name} to start over or /load {name} to continue."
            )),
            None => self.print("Welcome! Type /new <your name> or /load <your name> to begin."),
        }
    }

    fn hide_identity_modal(&self) {}

    fn set_recording_indicator(&self, active: bool) {
        if active {
            self.print("* Recording... (/stop to send, /cancel to discard)");
        } else {
            self.print("* Recording stopped");
        }
    }

    fn show_patient_name(&self, name: &str) {
        self.print(&format!("Patient: {}", name));
    }

    fn scroll_to_latest(&self) {}

    fn alert(&self, text: &str) {
        self.print(&format!("!! {}", text));
    }
}
