//! WebVTT transcript parsing.
//!
//! Transcripts are stored as WebVTT documents. Clip extraction needs the
//! cue timings so model output can be anchored to real positions in the
//! video timeline.

use regex::Regex;

/// A single timed cue from a WebVTT document.
#[derive(Debug, Clone, PartialEq)]
pub struct VttCue {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// WebVTT document parser.
pub struct VttParser {
    timing_regex: Regex,
}

impl VttParser {
    pub fn new() -> Self {
        // Matches cue timing lines: 00:01:30.500 --> 00:01:33.000
        let timing_regex = Regex::new(
            r"(\d{2}):(\d{2}):(\d{2})\.(\d{3})\s+-->\s+(\d{2}):(\d{2}):(\d{2})\.(\d{3})",
        )
        .expect("Invalid regex");

        Self { timing_regex }
    }

    /// Parse a WebVTT document into timed cues.
    ///
    /// The WEBVTT header, cue identifiers, and blank lines are skipped.
    /// Cue text may span multiple lines; a cue ends at a blank line or the
    /// next timing line. Cues without any text are dropped.
    pub fn parse(&self, content: &str) -> Vec<VttCue> {
        let lines: Vec<&str> = content.lines().collect();
        let mut cues = Vec::new();

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim();

            if line.is_empty() || line == "WEBVTT" {
                i += 1;
                continue;
            }

            let Some(caps) = self.timing_regex.captures(line) else {
                // Cue identifier or other non-timing line
                i += 1;
                continue;
            };

            let start_seconds = capture_seconds(&caps, 1);
            let end_seconds = capture_seconds(&caps, 5);

            // Collect text lines until a blank line or the next timing line
            let mut text_lines = Vec::new();
            i += 1;

            while i < lines.len() {
                let text_line = lines[i].trim();
                if text_line.is_empty() || self.timing_regex.is_match(text_line) {
                    break;
                }
                text_lines.push(text_line);
                i += 1;
            }

            if !text_lines.is_empty() {
                cues.push(VttCue {
                    start_seconds,
                    end_seconds,
                    text: text_lines.join(" "),
                });
            }
        }

        cues
    }
}

impl Default for VttParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert the four captured timestamp fields starting at `first_group`
/// (hours, minutes, seconds, milliseconds) into seconds.
fn capture_seconds(caps: &regex::Captures, first_group: usize) -> f64 {
    let field = |offset: usize| -> f64 {
        caps.get(first_group + offset)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    field(0) * 3600.0 + field(1) * 60.0 + field(2) + field(3) / 1000.0
}

/// Upper bound of the transcript timeline (end of the last cue).
pub fn transcript_duration(cues: &[VttCue]) -> f64 {
    cues.iter().map(|c| c.end_seconds).fold(0.0, f64::max)
}

/// Render cues as timestamped lines for a model prompt.
///
/// Timestamps are plain seconds so the model can echo them back directly
/// as clip boundaries.
pub fn format_cues_for_prompt(cues: &[VttCue]) -> String {
    cues.iter()
        .map(|cue| {
            format!(
                "[{:.1}s - {:.1}s] {}",
                cue.start_seconds, cue.end_seconds, cue.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
