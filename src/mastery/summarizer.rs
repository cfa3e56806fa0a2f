use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use super::config::SummaryConfig;
use super::error::{PipelineError, PipelineResult};
use super::generation::{GenerationConstraints, GenerationPurpose, GenerationRequest, TextGenerator};
use super::types::{GeneratedNotes, Tier};

const MAX_TITLE_WORDS: usize = 8;

/// Instruction profile applied to every generation call for a tier.
#[derive(Debug, Clone, Copy)]
pub struct TierProfile {
    pub audience: &'static str,
    pub style: &'static str,
    pub max_words: usize,
}

pub fn tier_profile(tier: Tier) -> TierProfile {
    match tier {
        Tier::Standard => TierProfile {
            audience: "a student preparing for an exam",
            style: "Exam-focused study points in Markdown. Short bullet points, keep the \
                    technical vocabulary of the source.",
            max_words: 600,
        },
        Tier::Simplified => TierProfile {
            audience: "a student who found the standard notes too dense",
            style: "Plain-language Markdown notes. Short sentences, define every technical \
                    term the first time it appears, at most 12 bullet points.",
            max_words: 400,
        },
        Tier::MostSimplified => TierProfile {
            audience: "a complete beginner around twelve years old",
            style: "Very simple Markdown notes. Everyday words only, one idea per sentence, \
                    use a concrete analogy for each concept, at most 8 bullet points.",
            max_words: 250,
        },
    }
}

/// Produces notes at a requested tier. Holds no cache; the content cache decides when
/// this runs.
pub struct TieredSummarizer {
    generator: Arc<dyn TextGenerator>,
    config: SummaryConfig,
}

impl TieredSummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: SummaryConfig) -> Self {
        Self { generator, config }
    }

    pub async fn summarize(&self, raw_text: &str, tier: Tier) -> PipelineResult<GeneratedNotes> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Err(PipelineError::invalid_input("nothing to summarize"));
        }

        let chunks = split_chunks(text, self.config.chunk_size);
        let total = chunks.len();
        debug!(%tier, chunks = total, chars = text.len(), "summarizing content");

        let pending: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.summarize_chunk(chunk, index, total, tier))
            .collect();
        let partials: Vec<String> = stream::iter(pending)
            .buffered(self.config.max_parallel.max(1))
            .try_collect()
            .await?;

        let partials: Vec<String> = partials
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if partials.is_empty() {
            return Err(PipelineError::generation("generator returned no usable notes"));
        }
        if partials.len() < total {
            warn!(%tier, dropped = total - partials.len(), "empty partial summaries dropped");
        }

        let merged = partials.join("\n\n");
        let (title, text) = if partials.len() == 1 {
            (self.extract_title(&merged).await, merged)
        } else {
            let (title, refined) =
                tokio::join!(self.extract_title(&merged), self.merge_partials(&merged, tier));
            let refined = refined?;
            let text = if refined.trim().is_empty() {
                warn!(%tier, "merge pass returned empty text, using partial summaries");
                merged
            } else {
                refined.trim().to_string()
            };
            (title, text)
        };

        Ok(GeneratedNotes { title, text })
    }

    async fn summarize_chunk(
        &self,
        chunk: &str,
        index: usize,
        total: usize,
        tier: Tier,
    ) -> PipelineResult<String> {
        let profile = tier_profile(tier);
        let request = GenerationRequest {
            purpose: GenerationPurpose::ChunkSummary,
            system: system_prompt(tier, &profile),
            prompt: format!(
                "Summarize part {} of {} of the material below into study points.\n\n[Material]\n{}",
                index + 1,
                total,
                chunk
            ),
            constraints: GenerationConstraints {
                max_words: Some(profile.max_words),
                json_output: false,
            },
        };
        self.generator.generate(&request).await
    }

    async fn merge_partials(&self, merged: &str, tier: Tier) -> PipelineResult<String> {
        let profile = tier_profile(tier);
        let request = GenerationRequest {
            purpose: GenerationPurpose::MergeSummary,
            system: system_prompt(tier, &profile),
            prompt: format!(
                "Merge these partial summaries into one study note. Remove overlaps, group \
                 related points under headings, keep it concise.\n\n[Partial summaries]\n{merged}"
            ),
            constraints: GenerationConstraints {
                max_words: Some(profile.max_words),
                json_output: false,
            },
        };
        self.generator.generate(&request).await
    }

    /// Title failures are tolerated; notes without a title are still valid.
    async fn extract_title(&self, merged: &str) -> String {
        let request = GenerationRequest {
            purpose: GenerationPurpose::Title,
            system: "You name study notes.".to_string(),
            prompt: format!(
                "Give a title of 3 to 8 words for the main topic of these notes. Output only \
                 the title on one line.\n\n[Notes]\n{merged}"
            ),
            constraints: GenerationConstraints {
                max_words: Some(MAX_TITLE_WORDS),
                json_output: false,
            },
        };
        match self.generator.generate(&request).await {
            Ok(raw) => clean_title(&raw),
            Err(err) => {
                warn!(error = %err, "title extraction failed");
                String::new()
            }
        }
    }
}

fn system_prompt(tier: Tier, profile: &TierProfile) -> String {
    format!(
        "You are an expert tutor writing notes for {}.\nNotes tier: {}\n{}\nStay under {} words.",
        profile.audience,
        tier.as_str(),
        profile.style,
        profile.max_words
    )
}

/// Splits text into windows of at most `chunk_size` characters, preferring to break on
/// whitespace in the second half of a window.
pub fn split_chunks(text: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let Some((hard_end, _)) = rest.char_indices().nth(chunk_size) else {
            chunks.push(rest);
            break;
        };
        let end = rest[..hard_end]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0 && i >= hard_end / 2)
            .unwrap_or(hard_end);
        let (head, tail) = rest.split_at(end);
        let head = head.trim_end();
        if !head.is_empty() {
            chunks.push(head);
        }
        rest = tail.trim_start();
    }

    chunks
}

/// Reduces a raw model reply to a single-line title of at most eight words.
pub fn clean_title(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let line = line
        .strip_prefix("Title:")
        .or_else(|| line.strip_prefix("title:"))
        .unwrap_or(line)
        .trim();
    let line = line.trim_start_matches(|c: char| {
        c.is_ascii_digit() || matches!(c, '-' | '–' | '—' | '*' | '#' | '.' | ')' | ' ')
    });
    let line = line.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'));

    line.split_whitespace()
        .take(MAX_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}
