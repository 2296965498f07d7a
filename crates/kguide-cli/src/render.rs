use std::io::{self, Write};

use kguide_core::{MessageId, Transcript};

/// Prints the newest assistant message incrementally as snapshots arrive.
#[derive(Debug, Default)]
pub struct Renderer {
    current: Option<MessageId>,
    printed: String,
    status: Option<String>,
    finished: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, transcript: &Transcript, out: &mut impl Write) -> io::Result<()> {
        let Some(message) = transcript.last() else {
            return Ok(());
        };
        if message.is_user {
            return Ok(());
        }

        if self.current != Some(message.id) {
            self.current = Some(message.id);
            self.printed.clear();
            self.status = None;
            self.finished = false;
        }
        if self.finished {
            return Ok(());
        }

        if message.status != self.status {
            if let Some(status) = &message.status {
                if !self.printed.is_empty() {
                    writeln!(out)?;
                }
                writeln!(out, "  {status}")?;
            }
            self.status = message.status.clone();
        }

        if message.is_streaming {
            if let Some(delta) = message.text.strip_prefix(self.printed.as_str()) {
                if !delta.is_empty() {
                    write!(out, "{delta}")?;
                    self.printed.push_str(delta);
                }
            }
            return out.flush();
        }

        // The final text replaces whatever was streamed when the two disagree.
        match message.text.strip_prefix(self.printed.as_str()) {
            Some(rest) if !message.is_error => write!(out, "{rest}")?,
            _ => {
                if !self.printed.is_empty() {
                    writeln!(out)?;
                }
                if message.is_error {
                    write!(out, "✖ {}", message.text)?;
                } else {
                    write!(out, "{}", message.text)?;
                }
            }
        }
        writeln!(out)?;
        self.finished = true;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kguide_core::{reduce, DonePayload, ErrorPayload, StreamEvent};

    fn chunk(content: &str) -> StreamEvent {
        StreamEvent::Chunk {
            content: content.to_string(),
        }
    }

    fn output(buf: &[u8]) -> String {
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_streams_deltas_then_final() {
        let (transcript, _) = Transcript::new().push_user("hi");
        let (mut transcript, id) = transcript.push_placeholder();
        let mut renderer = Renderer::new();
        let mut out = Vec::new();

        renderer.render(&transcript, &mut out).unwrap();
        for event in [chunk("Hel"), chunk("lo")] {
            transcript = reduce(transcript, id, &event);
            renderer.render(&transcript, &mut out).unwrap();
        }
        transcript = reduce(
            transcript,
            id,
            &StreamEvent::Done(DonePayload {
                full_response: "Hello there".to_string(),
                ..Default::default()
            }),
        );
        renderer.render(&transcript, &mut out).unwrap();
        renderer.render(&transcript, &mut out).unwrap();

        assert_eq!(output(&out), "  🔍 Searching...\nHello there\n");
    }

    #[test]
    fn test_diverging_final_text_is_reprinted() {
        let (transcript, id) = Transcript::new().push_placeholder();
        let mut renderer = Renderer::new();
        let mut out = Vec::new();

        let transcript = reduce(transcript, id, &chunk("Helo"));
        renderer.render(&transcript, &mut out).unwrap();
        let transcript = reduce(
            transcript,
            id,
            &StreamEvent::Done(DonePayload {
                full_response: "Hello!".to_string(),
                ..Default::default()
            }),
        );
        renderer.render(&transcript, &mut out).unwrap();

        assert_eq!(output(&out), "Helo\nHello!\n");
    }

    #[test]
    fn test_error_is_marked() {
        let (transcript, id) = Transcript::new().push_placeholder();
        let transcript = reduce(
            transcript,
            id,
            &StreamEvent::Error(ErrorPayload {
                message: "backend down".to_string(),
                code: None,
            }),
        );
        let mut out = Vec::new();
        Renderer::new().render(&transcript, &mut out).unwrap();
        assert_eq!(output(&out), "✖ backend down\n");
    }
}
