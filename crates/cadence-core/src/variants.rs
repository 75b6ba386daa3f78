//! Per-platform variant generation for one draft.
//!
//! Eligible platforms come from the strategy, filtered by the topic
//! category and capped per normalized platform name. Each platform runs
//! through the [`ReviewLoop`] independently; a failing platform is logged
//! and counted, never fatal to the others.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_db::models::{
    ContentDraft, DraftStatus, PlatformKind, PlatformStyle, RevisionKind, SuggestedTopic,
};

use crate::context::PipelineContext;
use crate::error::StageError;
use crate::prompts::{PromptRunner, defaults, tasks};
use crate::review::{LoopModels, ReviewLoop, TemplatedPrompts};
use crate::store::{ContentStore, NewRevision, VariantContent};

/// Lowercase alphanumeric form used to group platform names.
pub fn normalize_platform_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Styles a topic is rendered for, in strategy order.
///
/// Keeps styles whose kind serves `kind`, at most `cap` per normalized
/// name (1 when the topic is correlated with a blog topic).
pub fn eligible_platforms(
    platforms: &[PlatformStyle],
    kind: PlatformKind,
    correlated: bool,
    cap: usize,
) -> Vec<PlatformStyle> {
    let cap = if correlated { 1 } else { cap.max(1) };
    let mut per_name: HashMap<String, usize> = HashMap::new();
    platforms
        .iter()
        .filter(|style| style.kind == kind)
        .filter(|style| {
            let n = per_name
                .entry(normalize_platform_name(&style.platform_name))
                .or_default();
            *n += 1;
            *n <= cap
        })
        .cloned()
        .collect()
}

/// Split generated text into body, headline, call to action and hashtags.
///
/// A leading `# ` line becomes the headline of long-form content; a final
/// `CTA:` line becomes the call to action. Both are removed from the body.
pub fn extract_content(raw: &str, long_form: bool) -> VariantContent {
    let mut lines: Vec<&str> = raw.trim().lines().collect();

    let mut headline = None;
    if long_form {
        if let Some(first) = lines.first().and_then(|l| l.trim().strip_prefix("# ")) {
            headline = Some(first.trim().to_string());
            lines.remove(0);
        }
    }

    let mut call_to_action = None;
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if let Some(last) = lines.last() {
        let trimmed = last.trim();
        if trimmed.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("cta:")) {
            call_to_action = Some(trimmed[4..].trim().to_string()).filter(|s| !s.is_empty());
            lines.pop();
        }
    }

    let content = lines.join("\n").trim().to_string();
    let hashtags = hashtags(&content);
    VariantContent {
        content,
        headline,
        call_to_action,
        hashtags,
    }
}

fn hashtags(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let Some(tag) = token.strip_prefix('#') else {
            continue;
        };
        let tag: String = tag
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if tag.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            continue;
        }
        out.push(tag);
    }
    out
}

/// Reviewer input carried into a new draft version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInput {
    pub feedback: Option<String>,
    /// Previous content keyed by normalized platform name.
    pub previous: HashMap<String, String>,
}

impl RevisionInput {
    /// Guidance for one platform: `base` followed by the feedback and the
    /// content being replaced.
    pub fn guidance_for(&self, base: &str, platform_name: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !base.is_empty() {
            parts.push(base.to_string());
        }
        if let Some(feedback) = self.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
            parts.push(format!("Address this reviewer feedback: {}", feedback.trim()));
        }
        if let Some(previous) = self.previous.get(&normalize_platform_name(platform_name)) {
            parts.push(format!("Previous version to improve on:\n{previous}"));
        }
        parts.join("\n\n")
    }
}

/// Outcome of generating every variant of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantReport {
    pub draft_id: Uuid,
    pub created: Vec<Uuid>,
    /// `(platform name, error)` of every platform that failed.
    pub failed: Vec<(String, String)>,
    pub draft_status: DraftStatus,
}

pub struct VariantGenerator {
    store: Arc<dyn ContentStore>,
    runner: Arc<PromptRunner>,
    review: ReviewLoop,
    max_per_platform: usize,
    parallelism: usize,
}

impl VariantGenerator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        runner: Arc<PromptRunner>,
        review_iterations: usize,
        max_per_platform: usize,
        parallelism: usize,
    ) -> Self {
        let review = ReviewLoop::new(runner.generator().clone(), review_iterations);
        Self {
            store,
            runner,
            review,
            max_per_platform,
            parallelism: parallelism.max(1),
        }
    }

    /// Guidance line pointing a correlated topic at its parent article.
    pub async fn correlation_guidance(&self, topic: &SuggestedTopic) -> Result<String, StageError> {
        let Some(parent_id) = topic.parent_topic_id else {
            return Ok(String::new());
        };
        Ok(match self.store.get_topic(parent_id).await? {
            Some(parent) => format!(
                "This post promotes the blog article \"{}\"; tease it and invite readers to read it.",
                parent.title
            ),
            None => String::new(),
        })
    }

    /// Generate and store variants for `draft` on every eligible platform.
    ///
    /// A first draft gets an `initial` revision record; later versions
    /// already had theirs written by the revision trigger.
    pub async fn generate_for_draft(
        &self,
        ctx: &PipelineContext,
        topic: &SuggestedTopic,
        draft: &ContentDraft,
        revision: Option<&RevisionInput>,
    ) -> Result<VariantReport, StageError> {
        let styles = eligible_platforms(
            &ctx.strategy.platforms,
            topic.category.platform_kind(),
            topic.parent_topic_id.is_some(),
            self.max_per_platform,
        );
        let guidance = self.correlation_guidance(topic).await?;

        let results: Vec<(String, Result<VariantContent, StageError>)> =
            futures::stream::iter(styles)
                .map(|style| {
                    let guidance = match revision {
                        Some(input) => input.guidance_for(&guidance, &style.platform_name),
                        None => guidance.clone(),
                    };
                    async move {
                        let result = self.generate_one(ctx, topic, &style, &guidance).await;
                        (style.platform_name, result)
                    }
                })
                .buffer_unordered(self.parallelism)
                .collect()
                .await;

        let mut created = Vec::new();
        let mut failed = Vec::new();
        for (platform, result) in results {
            match result {
                Ok(content) => {
                    let variant = self.store.insert_variant(draft.id, &platform, &content).await?;
                    created.push(variant.id);
                }
                Err(StageError::Persistence(e)) => return Err(StageError::Persistence(e)),
                Err(e) => {
                    warn!(
                        draft_id = %draft.id,
                        platform = %platform,
                        error = %e,
                        "variant generation failed"
                    );
                    failed.push((platform, e.to_string()));
                }
            }
        }

        let draft_status = if created.is_empty() {
            DraftStatus::Failed
        } else {
            DraftStatus::PendingApproval
        };
        self.store.set_draft_status(draft.id, draft_status).await?;
        if revision.is_none() {
            self.store
                .insert_revision(&NewRevision {
                    draft_id: draft.id,
                    variant_id: None,
                    kind: RevisionKind::Initial,
                    feedback: None,
                    previous_content: json!({
                        "created": created,
                        "failed": failed.iter().map(|(p, _)| p).collect::<Vec<_>>(),
                    }),
                })
                .await?;
        }

        info!(
            draft_id = %draft.id,
            topic_id = %topic.id,
            created = created.len(),
            failed = failed.len(),
            status = %draft_status,
            "variants generated"
        );
        Ok(VariantReport {
            draft_id: draft.id,
            created,
            failed,
            draft_status,
        })
    }

    /// Run one platform through the review loop.
    ///
    /// `guidance` is appended to the author prompt (correlation notes,
    /// reviewer feedback on a revision).
    pub async fn generate_one(
        &self,
        ctx: &PipelineContext,
        topic: &SuggestedTopic,
        style: &PlatformStyle,
        guidance: &str,
    ) -> Result<VariantContent, StageError> {
        let org = Some(ctx.organization_id());
        let library = self.runner.library();
        let prompts = TemplatedPrompts {
            author: (
                defaults::VARIANT_AUTHOR.to_string(),
                library.template(defaults::VARIANT_AUTHOR, org).await?,
            ),
            review: (
                defaults::VARIANT_REVIEW.to_string(),
                library.template(defaults::VARIANT_REVIEW, org).await?,
            ),
            improve: (
                defaults::VARIANT_IMPROVE.to_string(),
                library.template(defaults::VARIANT_IMPROVE, org).await?,
            ),
            vars: platform_vars(ctx, topic, style, guidance),
        };
        let models = LoopModels {
            author: self.runner.models().model(tasks::VARIANTS, org).await?,
            review: self.runner.models().model(tasks::REVIEW, org).await?,
        };

        let long_form = style.kind == PlatformKind::Blog;
        let outcome = self.review.run(&prompts, &models, long_form).await?;
        Ok(extract_content(&outcome.content, long_form))
    }
}

/// The configured style for `platform_name`, or a plain one of `kind`.
pub fn style_for(ctx: &PipelineContext, platform_name: &str, kind: PlatformKind) -> PlatformStyle {
    let wanted = normalize_platform_name(platform_name);
    ctx.strategy
        .platforms
        .iter()
        .find(|s| normalize_platform_name(&s.platform_name) == wanted)
        .cloned()
        .unwrap_or_else(|| PlatformStyle {
            platform_name: platform_name.to_string(),
            kind,
            label: None,
            max_length: None,
            style_rules: Vec::new(),
            hashtag_policy: None,
        })
}

fn list_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join("; ")
    }
}

fn platform_vars(
    ctx: &PipelineContext,
    topic: &SuggestedTopic,
    style: &PlatformStyle,
    guidance: &str,
) -> crate::prompts::Vars {
    let s = &ctx.strategy;
    let mut vars = ctx.prompt_vars();
    let platform = match &style.label {
        Some(label) => format!("{} ({label})", style.platform_name),
        None => style.platform_name.clone(),
    };
    vars.extend([
        ("platform".to_string(), platform),
        ("platform_kind".to_string(), style.kind.to_string()),
        ("topic_title".to_string(), topic.title.clone()),
        ("topic_description".to_string(), topic.description.clone()),
        (
            "max_length".to_string(),
            style
                .max_length
                .map(|n| n.to_string())
                .unwrap_or_else(|| "no limit".to_string()),
        ),
        ("style_rules".to_string(), list_or(&style.style_rules, "none")),
        (
            "hashtag_policy".to_string(),
            style.hashtag_policy.clone().unwrap_or_else(|| "none".to_string()),
        ),
        ("preferred_phrases".to_string(), list_or(&s.preferred_phrases, "none")),
        ("forbidden_phrases".to_string(), list_or(&s.forbidden_phrases, "none")),
        ("cta_rules".to_string(), list_or(&s.cta_rules, "none")),
        ("guidance".to_string(), guidance.to_string()),
    ]);
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(name: &str, kind: PlatformKind) -> PlatformStyle {
        PlatformStyle {
            platform_name: name.into(),
            kind,
            label: None,
            max_length: None,
            style_rules: Vec::new(),
            hashtag_policy: None,
        }
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_platform_name(" Linked-In "), "linkedin");
        assert_eq!(normalize_platform_name("X (Twitter)"), "xtwitter");
    }

    #[test]
    fn filters_by_kind_and_caps_per_name() {
        let platforms = vec![
            style("Blog", PlatformKind::Blog),
            style("LinkedIn", PlatformKind::Social),
            style("linkedin", PlatformKind::Social),
            style("Linked In", PlatformKind::Social),
            style("X", PlatformKind::Social),
        ];
        let social = eligible_platforms(&platforms, PlatformKind::Social, false, 2);
        let names: Vec<_> = social.iter().map(|s| s.platform_name.as_str()).collect();
        assert_eq!(names, vec!["LinkedIn", "linkedin", "X"]);

        let correlated = eligible_platforms(&platforms, PlatformKind::Social, true, 2);
        assert_eq!(correlated.len(), 2);

        let blog = eligible_platforms(&platforms, PlatformKind::Blog, false, 2);
        assert_eq!(blog.len(), 1);
    }

    #[test]
    fn extracts_headline_cta_and_hashtags() {
        let raw = "# Cold chain 101\nKeep it cool. #Logistics #coldchain\n## Why\nBecause #logistics.\n\nCTA: Read the guide\n";
        let content = extract_content(raw, true);
        assert_eq!(content.headline.as_deref(), Some("Cold chain 101"));
        assert_eq!(content.call_to_action.as_deref(), Some("Read the guide"));
        assert_eq!(content.hashtags, vec!["Logistics", "coldchain"]);
        assert!(content.content.starts_with("Keep it cool."));
        assert!(!content.content.contains("CTA:"));
    }

    #[test]
    fn revision_guidance_joins_feedback_and_previous() {
        let input = RevisionInput {
            feedback: Some(" shorter please ".into()),
            previous: HashMap::from([("linkedin".to_string(), "old text".to_string())]),
        };
        let g = input.guidance_for("Promote the article.", "LinkedIn");
        assert!(g.starts_with("Promote the article."));
        assert!(g.contains("reviewer feedback: shorter please"));
        assert!(g.ends_with("old text"));

        let none = input.guidance_for("", "X");
        assert_eq!(none, "Address this reviewer feedback: shorter please");
    }

    #[test]
    fn short_form_keeps_hash_line() {
        let content = extract_content("# not a headline here", false);
        assert_eq!(content.headline, None);
        assert_eq!(content.content, "# not a headline here");
    }
}
