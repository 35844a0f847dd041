//! Byte-level Server-Sent-Events line parser, shared by every driver that
//! hand-parses its own wire protocol (§6: "Only the Responses-API WebSocket
//! and the OpenAI SSE stream are hand-parsed").

/// One `data:`/`event:`/`id:` line, or a merged multi-line event once a
/// blank line closes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    fn apply_field(&mut self, field: &str, value: &str) {
        match field {
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Incrementally parses an SSE byte stream into complete events, buffering
/// any trailing incomplete line between calls.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: SseEvent,
    has_fields: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-received bytes, returning every event completed by a
    /// blank line within them. Invalid UTF-8 is replaced lossily, matching
    /// the tolerant behaviour real SSE producers expect from consumers.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() {
                if self.has_fields {
                    events.push(std::mem::take(&mut self.current));
                    self.has_fields = false;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            self.current.apply_field(field, value);
            self.has_fields = true;
        }

        events
    }

    /// Whether `[DONE]` (OpenAI-family stream terminator) was carried as
    /// this event's data.
    pub fn is_done_marker(event: &SseEvent) -> bool {
        event.data.trim() == "[DONE]"
    }
}
