//! Search command implementation.
//!
//! Submits a search, subscribes to its channel, and renders the merged view
//! once every candidate has settled. Clip extraction streams in per video,
//! so the final listing can mix videos with and without clips.

use crate::cli::Output;
use crate::config::Settings;
use crate::merge::SearchView;
use crate::orchestrator::{Orchestrator, SearchRequest};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait on the channel before giving up on a stuck search.
const SEARCH_DEADLINE: Duration = Duration::from_secs(300);

/// Run the search command.
pub async fn run_search(query: &str, top: Option<usize>, mut settings: Settings) -> Result<()> {
    if let Some(top) = top {
        settings.retrieval.top_videos = top;
    }

    let orchestrator = Arc::new(Orchestrator::new(settings)?);
    let broker = orchestrator.broker();

    let request = SearchRequest::new(query);
    let token = broker.issue_token(request.search_id);
    let mut subscription = broker.subscribe(&token)?;

    let spinner = Output::spinner("Searching...");

    {
        let orchestrator = orchestrator.clone();
        let request = request.clone();
        tokio::spawn(async move {
            // Failures surface on the channel's error topic
            let _ = orchestrator.run(request).await;
        });
    }

    let mut view = SearchView::new();
    let deadline = tokio::time::Instant::now() + SEARCH_DEADLINE;

    while !view.is_complete() && !view.search_failed() {
        let event = tokio::time::timeout_at(deadline, subscription.recv()).await;
        match event {
            Ok(Some(envelope)) => {
                view.apply(&envelope.event);
                let settled = view
                    .results()
                    .iter()
                    .filter(|r| !r.clips.is_empty())
                    .count();
                spinner.set_message(format!(
                    "Extracting clips ({}/{} videos)...",
                    settled,
                    view.results().len()
                ));
            }
            Ok(None) => break,
            Err(_) => {
                spinner.finish_and_clear();
                Output::error("Timed out waiting for search results.");
                anyhow::bail!("Search timed out after {:?}", SEARCH_DEADLINE);
            }
        }
    }

    spinner.finish_and_clear();

    if view.search_failed() {
        let message = view
            .errors()
            .iter()
            .find(|e| e.video_id.is_none())
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Search failed".to_string());
        Output::error(&format!("Search failed: {}", message));
        anyhow::bail!("{}", message);
    }

    if view.results().is_empty() {
        Output::warning("No videos found matching your query.");
        return Ok(());
    }

    Output::success(&format!("Found {} videos", view.results().len()));

    for (i, result) in view.results().iter().enumerate() {
        Output::video_result(
            i + 1,
            &result.video.title,
            result.video.top_similarity,
            result.clips.len(),
        );
        for clip in &result.clips {
            Output::clip_result(clip);
        }
    }

    // Per-video failures are non-fatal but worth surfacing
    for err in view.errors() {
        if let Some(video_id) = &err.video_id {
            Output::warning(&format!("Clip extraction failed for {}: {}", video_id, err.message));
        }
    }

    Ok(())
}
