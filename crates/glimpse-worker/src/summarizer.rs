//! Cross-source summarization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use glimpse_media::write_atomic;
use glimpse_models::frame::FRAME_TIMESTAMP_FORMAT;
use tokio::fs;
use tracing::debug;

use crate::captioner::expand_prompt;
use crate::collaborators::{CaptionOutcome, Captioner, SourceStore};
use crate::cooldown::CaptionCooldown;
use crate::error::WorkerResult;
use crate::logging::CycleLogger;
use crate::metrics;

/// Summarizes the latest caption of every source into one text file.
pub struct Summarizer {
    store: Arc<dyn SourceStore>,
    captioner: Arc<dyn Captioner>,
    cooldown: Arc<CaptionCooldown>,
    summary_dir: PathBuf,
    prompt: String,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(
        store: Arc<dyn SourceStore>,
        captioner: Arc<dyn Captioner>,
        cooldown: Arc<CaptionCooldown>,
        summary_dir: impl Into<PathBuf>,
        prompt: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            captioner,
            cooldown,
            summary_dir: summary_dir.into(),
            prompt: prompt.into(),
            timeout,
        }
    }

    /// Caption log lines, oldest first: `name @ time: caption`.
    async fn caption_log(&self) -> WorkerResult<Vec<String>> {
        let mut captioned: Vec<(DateTime<Utc>, String, String)> = self
            .store
            .list()
            .await?
            .into_values()
            .filter(|s| s.has_caption())
            .map(|s| {
                let at = s.last_caption_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
                (at, s.name, s.last_caption)
            })
            .collect();
        captioned.sort();

        Ok(captioned
            .into_iter()
            .map(|(at, name, caption)| {
                format!("{name} @ {}: {caption}", at.to_rfc3339_opts(SecondsFormat::Secs, true))
            })
            .collect())
    }

    /// Text of the newest summary written before `now`, if any.
    async fn previous_summary(&self, now: DateTime<Utc>) -> Option<String> {
        let current = summary_file_name(now);
        let mut entries = fs::read_dir(&self.summary_dir).await.ok()?;
        let mut newest: Option<String> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("summary_") || !name.ends_with(".txt") || name >= current {
                continue;
            }
            if newest.as_ref().map_or(true, |n| name > *n) {
                newest = Some(name);
            }
        }

        let name = newest?;
        match fs::read_to_string(self.summary_dir.join(&name)).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!("Cannot read previous summary {}: {}", name, e);
                None
            }
        }
    }

    /// Write `summary_<timestamp>.txt`, or nothing when there is nothing to
    /// summarize or the captioner declines.
    pub async fn run(&self, now: DateTime<Utc>) -> WorkerResult<Option<PathBuf>> {
        let logger = CycleLogger::new("all", "summary");
        let lines = self.caption_log().await?;
        if lines.is_empty() {
            logger.log_progress("no captions to summarize");
            return Ok(None);
        }
        if let Some(left) = self.cooldown.remaining_at(now) {
            logger.log_progress(&format!("cooling down for {}s", left.as_secs()));
            return Ok(None);
        }

        let mut prompt = format!("{}\n\n{}", expand_prompt(&self.prompt, now), lines.join("\n"));
        if let Some(history) = self.previous_summary(now).await {
            prompt.push_str("\n\nPrevious summary, build on it without repeating it:\n");
            prompt.push_str(history.trim());
        }
        let outcome = tokio::time::timeout(self.timeout, self.captioner.caption(&prompt, &[])).await;
        let text = match outcome {
            Ok(CaptionOutcome::Text(text)) => text,
            Ok(CaptionOutcome::RateLimited) => {
                metrics::record_rate_limit_hit();
                self.cooldown.trip_at(now);
                logger.log_warning("rate limited");
                return Ok(None);
            }
            Ok(CaptionOutcome::Failed(reason)) => {
                logger.log_warning(&reason);
                return Ok(None);
            }
            Err(_) => {
                logger.log_warning("summary timed out");
                return Ok(None);
            }
        };

        let path = self.summary_dir.join(summary_file_name(now));
        write_atomic(&path, text).await?;
        logger.log_completion(&format!("{} sources into {}", lines.len(), path.display()));
        Ok(Some(path))
    }
}

fn summary_file_name(at: DateTime<Utc>) -> String {
    format!("summary_{}.txt", at.format(FRAME_TIMESTAMP_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileSourceStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use glimpse_models::{Source, SourceUpdate};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedCaptioner {
        reply: CaptionOutcome,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Captioner for ScriptedCaptioner {
        async fn caption(&self, prompt: &str, frames: &[PathBuf]) -> CaptionOutcome {
            assert!(frames.is_empty());
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    async fn setup(reply: CaptionOutcome) -> (TempDir, Arc<ScriptedCaptioner>, Arc<CaptionCooldown>, Summarizer) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileSourceStore::open(dir.path().join("s.json")).await.unwrap());
        for name in ["a", "b", "c"] {
            store.upsert(Source::new(name, "")).await.unwrap();
        }
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        for (name, caption, minutes) in [("b", "Rain on the lens", 5), ("a", "Truck at gate", 10)] {
            store
                .save(
                    name,
                    &SourceUpdate {
                        last_caption: Some(caption.into()),
                        last_caption_time: Some(at + chrono::Duration::minutes(minutes)),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let captioner = Arc::new(ScriptedCaptioner {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let cooldown = Arc::new(CaptionCooldown::new(Duration::from_secs(900)));
        let summarizer = Summarizer::new(
            store,
            captioner.clone(),
            cooldown.clone(),
            dir.path().join("summaries"),
            "Summarize at $datetime.",
            Duration::from_secs(5),
        );
        (dir, captioner, cooldown, summarizer)
    }

    #[tokio::test]
    async fn test_summary_written() {
        let (_dir, captioner, _, summarizer) =
            setup(CaptionOutcome::Text("All quiet.".into())).await;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        let path = summarizer.run(now).await.unwrap().unwrap();
        assert!(path.ends_with("summary_20240601100000.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "All quiet.");

        let prompt = captioner.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Summarize at 2024-06-01T10:00:00Z."));
        let b = prompt.find("b @ 2024-06-01T09:05:00Z: Rain on the lens").unwrap();
        let a = prompt.find("a @ 2024-06-01T09:10:00Z: Truck at gate").unwrap();
        assert!(b < a);
        assert!(!prompt.contains("c @"));
        assert!(!prompt.contains("Previous summary"));
    }

    #[tokio::test]
    async fn test_newest_earlier_summary_is_history() {
        let (dir, captioner, _, summarizer) =
            setup(CaptionOutcome::Text("Still quiet.".into())).await;
        let summaries = dir.path().join("summaries");
        std::fs::create_dir_all(&summaries).unwrap();
        std::fs::write(summaries.join("summary_20240601080000.txt"), "Morning fog.").unwrap();
        std::fs::write(summaries.join("summary_20240601090000.txt"), "Fog lifted.\n").unwrap();
        std::fs::write(summaries.join("summary_20240601110000.txt"), "Not yet written.").unwrap();
        std::fs::write(summaries.join("notes.txt"), "Unrelated.").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        summarizer.run(now).await.unwrap().unwrap();

        let prompt = captioner.prompts.lock().unwrap()[0].clone();
        assert!(prompt.ends_with("Previous summary, build on it without repeating it:\nFog lifted."));
        assert!(!prompt.contains("Morning fog."));
        assert!(!prompt.contains("Not yet written."));
        assert!(!prompt.contains("Unrelated."));
    }

    #[tokio::test]
    async fn test_rate_limit_trips_cooldown() {
        let (_dir, captioner, cooldown, summarizer) = setup(CaptionOutcome::RateLimited).await;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        assert!(summarizer.run(now).await.unwrap().is_none());
        assert!(cooldown.is_active_at(now));

        // Suppressed while cooling down.
        assert!(summarizer.run(now).await.unwrap().is_none());
        assert_eq!(captioner.prompts.lock().unwrap().len(), 1);
    }
}
