//! Incremental classification of a token stream into visible text and a
//! single `<think>…</think>` reasoning block.
//!
//! Markers may be split across fragments (`"<th"` + `"ink>"`), so the tail
//! of each fragment that could still turn into a marker is held back and
//! re-evaluated together with the next fragment.

use tracing::{debug, warn};

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Scan mode of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Plain,
    InThought,
}

/// Unusual input the classifier degraded on instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierAnomaly {
    /// A `</think>` appeared with no open reasoning block; passed through.
    StrayClosingMarker,
    /// The stream ended inside a reasoning block; it was force-closed.
    UnclosedThought,
}

/// What one fragment (or the end of the stream) produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierOutput {
    /// Newly visible text, possibly empty.
    pub visible: String,
    /// The completed reasoning block, trimmed. Emitted once per generation.
    pub thought: Option<String>,
    pub anomaly: Option<ClassifierAnomaly>,
}

/// Streaming `<think>` classifier for one generation.
#[derive(Debug, Default)]
pub struct ResponseClassifier {
    mode: ScanMode,
    thought_buffer: String,
    visible_buffer: String,
    partial_tag_buffer: String,
    thought_emitted: bool,
}

impl ResponseClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: &str) -> ClassifierOutput {
        let mut out = ClassifierOutput::default();
        if fragment.is_empty() {
            return out;
        }

        let mut buffer = std::mem::take(&mut self.partial_tag_buffer);
        buffer.push_str(fragment);
        let mut rest = buffer.as_str();

        loop {
            match self.mode {
                ScanMode::Plain if self.thought_emitted => {
                    // Only one block per generation; later markers are text.
                    self.emit_visible(&mut out, rest);
                    break;
                }
                ScanMode::Plain => {
                    if let Some(start) = rest.find(OPEN) {
                        self.note_stray_close(&mut out, &rest[..start]);
                        self.emit_visible(&mut out, &rest[..start]);
                        rest = &rest[start + OPEN.len()..];
                        self.mode = ScanMode::InThought;
                        continue;
                    }
                    let held = marker_prefix_suffix(rest, OPEN);
                    let (emit, hold) = rest.split_at(rest.len() - held);
                    self.note_stray_close(&mut out, emit);
                    self.emit_visible(&mut out, emit);
                    self.partial_tag_buffer.push_str(hold);
                    break;
                }
                ScanMode::InThought => {
                    if let Some(end) = rest.find(CLOSE) {
                        self.thought_buffer.push_str(&rest[..end]);
                        rest = &rest[end + CLOSE.len()..];
                        out.thought = Some(self.complete_thought());
                        continue;
                    }
                    let held = marker_prefix_suffix(rest, CLOSE);
                    let (thought, hold) = rest.split_at(rest.len() - held);
                    self.thought_buffer.push_str(thought);
                    self.partial_tag_buffer.push_str(hold);
                    break;
                }
            }
        }

        out
    }

    /// Signal the end of the stream and flush anything still held.
    ///
    /// An unterminated reasoning block is force-closed and reported rather
    /// than dropped.
    pub fn finish(&mut self) -> ClassifierOutput {
        let mut out = ClassifierOutput::default();
        let held = std::mem::take(&mut self.partial_tag_buffer);
        match self.mode {
            ScanMode::Plain => self.emit_visible(&mut out, &held),
            ScanMode::InThought => {
                self.thought_buffer.push_str(&held);
                warn!(
                    buffered = self.thought_buffer.len(),
                    "stream ended inside a reasoning block, force-closing it"
                );
                out.thought = Some(self.complete_thought());
                out.anomaly = Some(ClassifierAnomaly::UnclosedThought);
            }
        }
        out
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// All visible text emitted so far.
    pub fn visible_text(&self) -> &str {
        &self.visible_buffer
    }

    /// Whether the reasoning block has already been emitted.
    pub fn thought_emitted(&self) -> bool {
        self.thought_emitted
    }

    fn emit_visible(&mut self, out: &mut ClassifierOutput, text: &str) {
        out.visible.push_str(text);
        self.visible_buffer.push_str(text);
    }

    fn complete_thought(&mut self) -> String {
        let thought = self.thought_buffer.trim().to_owned();
        self.thought_buffer.clear();
        self.mode = ScanMode::Plain;
        self.thought_emitted = true;
        thought
    }

    /// Flag a `</think>` in text about to be emitted as visible, including
    /// one that started in previously emitted text.
    fn note_stray_close(&self, out: &mut ClassifierOutput, text: &str) {
        let emitted = &self.visible_buffer;
        let mut start = emitted.len().saturating_sub(CLOSE.len() - 1);
        while !emitted.is_char_boundary(start) {
            start += 1;
        }
        let window = format!("{}{text}", &emitted[start..]);
        if window.contains(CLOSE) {
            debug!("closing think marker without an opening one, passing through");
            out.anomaly = Some(ClassifierAnomaly::StrayClosingMarker);
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn marker_prefix_suffix(text: &str, marker: &str) -> usize {
    let max = text.len().min(marker.len() - 1);
    (1..=max)
        .rev()
        .find(|&n| {
            let start = text.len() - n;
            text.is_char_boundary(start) && marker.starts_with(&text[start..])
        })
        .unwrap_or(0)
}
