//! CLI output formatting utilities.

use crate::extraction::{Clip, Relevance};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a ranked video result line.
    pub fn video_result(rank: usize, title: &str, similarity: f32, clip_count: usize) {
        let clips = match clip_count {
            0 => style("no clips".to_string()).dim(),
            1 => style("1 clip".to_string()).cyan(),
            n => style(format!("{} clips", n)).cyan(),
        };
        println!(
            "\n{} {} (score: {:.2}, {})",
            style(format!("{}.", rank)).green().bold(),
            style(title).bold(),
            similarity,
            clips
        );
    }

    /// Print a single extracted clip under its video.
    pub fn clip_result(clip: &Clip) {
        let marker = match clip.relevance {
            Relevance::Exact => style("exact").green(),
            Relevance::Related => style("related").yellow(),
        };
        println!(
            "   {} - {} [{}]",
            style(format_timestamp(clip.start_time_seconds)).cyan(),
            style(format_timestamp(clip.end_time_seconds)).cyan(),
            marker
        );
        println!("   {}", content_preview(&clip.snippet, 200));
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format seconds as h:mm:ss or m:ss.
fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_len: usize) -> String {
    let content = content.replace('\n', " ");
    if content.len() <= max_len {
        content
    } else {
        let cut = content
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &content[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(65.4), "1:05");
        assert_eq!(format_timestamp(3725.0), "1:02:05");
        assert_eq!(format_timestamp(0.0), "0:00");
    }

    #[test]
    fn test_content_preview_truncates() {
        assert_eq!(content_preview("short", 200), "short");
        let long = "x".repeat(300);
        assert_eq!(content_preview(&long, 200).len(), 203);
    }
}
