//! Author-reviewer refinement loop.
//!
//! An author pass writes the content. Long-form content then goes through
//! at most `iterations` review rounds; each round either ends with an
//! approval signal or produces feedback that an improve pass applies.
//! Short social content returns right after the author pass, trimmed to a
//! single candidate when the generator produced several.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StageError;
use crate::generator::{GenerationRequest, TextGenerator};
use crate::payload::strip_code_fences;
use crate::prompts::{TemplateError, Vars, render};

/// Prompt source for one loop run.
pub trait ReviewPrompts: Send + Sync {
    fn author(&self) -> Result<String, TemplateError>;
    fn review(&self, content: &str) -> Result<String, TemplateError>;
    fn improve(&self, content: &str, feedback: &str) -> Result<String, TemplateError>;
}

/// [`ReviewPrompts`] over three template bodies and shared variables.
///
/// `review` and `improve` receive `{content}` (and `{feedback}`) on top of
/// `vars`.
#[derive(Debug, Clone)]
pub struct TemplatedPrompts {
    pub author: (String, String),
    pub review: (String, String),
    pub improve: (String, String),
    pub vars: Vars,
}

impl ReviewPrompts for TemplatedPrompts {
    fn author(&self) -> Result<String, TemplateError> {
        render(&self.author.0, &self.author.1, &self.vars)
    }

    fn review(&self, content: &str) -> Result<String, TemplateError> {
        let mut vars = self.vars.clone();
        vars.insert("content".into(), content.to_string());
        render(&self.review.0, &self.review.1, &vars)
    }

    fn improve(&self, content: &str, feedback: &str) -> Result<String, TemplateError> {
        let mut vars = self.vars.clone();
        vars.insert("content".into(), content.to_string());
        vars.insert("feedback".into(), feedback.to_string());
        render(&self.improve.0, &self.improve.1, &vars)
    }
}

/// Models used for the author and reviewer roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopModels {
    pub author: String,
    pub review: String,
}

/// What the loop produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub content: String,
    /// Review rounds that ran.
    pub rounds: usize,
    pub approved: bool,
    /// Reviewer feedback, in order.
    pub feedback: Vec<String>,
    /// The author pass returned several candidates and only the first was kept.
    pub trimmed_candidates: bool,
}

pub struct ReviewLoop {
    generator: Arc<dyn TextGenerator>,
    iterations: usize,
}

impl ReviewLoop {
    pub fn new(generator: Arc<dyn TextGenerator>, iterations: usize) -> Self {
        Self {
            generator,
            iterations,
        }
    }

    /// Run the loop. Only the author pass can fail the run; review and
    /// improve failures end the loop with the last good content.
    pub async fn run(
        &self,
        prompts: &dyn ReviewPrompts,
        models: &LoopModels,
        long_form: bool,
    ) -> Result<LoopOutcome, StageError> {
        let prompt = prompts
            .author()
            .map_err(|e| StageError::MalformedResponse(e.to_string()))?;
        let draft = self
            .generator
            .generate(&GenerationRequest::structured(prompt, &models.author))
            .await?;
        let draft = clean(&draft);
        if draft.is_empty() {
            return Err(StageError::MalformedResponse(
                "author pass returned no content".to_string(),
            ));
        }

        let mut outcome = LoopOutcome {
            content: draft,
            rounds: 0,
            approved: false,
            feedback: Vec::new(),
            trimmed_candidates: false,
        };

        if !long_form {
            if let Some(first) = first_candidate(&outcome.content) {
                debug!("multiple candidates in author output, keeping the first");
                outcome.content = first;
                outcome.trimmed_candidates = true;
            }
            return Ok(outcome);
        }

        for round in 1..=self.iterations {
            let Some(review) = self.pass(prompts.review(&outcome.content), &models.review, true).await
            else {
                break;
            };
            outcome.rounds = round;
            if is_approval(&review) {
                outcome.approved = true;
                break;
            }
            let Some(improved) = self
                .pass(prompts.improve(&outcome.content, &review), &models.author, false)
                .await
            else {
                outcome.feedback.push(review);
                break;
            };
            outcome.feedback.push(review);
            outcome.content = improved;
        }
        Ok(outcome)
    }

    /// A review or improve call. `None` ends the loop.
    async fn pass(
        &self,
        prompt: Result<String, TemplateError>,
        model: &str,
        critique: bool,
    ) -> Option<String> {
        let prompt = match prompt {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "review prompt failed to render");
                return None;
            }
        };
        let request = if critique {
            GenerationRequest::creative(prompt, model)
        } else {
            GenerationRequest::structured(prompt, model)
        };
        match self.generator.generate(&request).await {
            Ok(text) => {
                let text = clean(&text);
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                warn!(error = %e, critique, "review round failed, keeping last content");
                None
            }
        }
    }
}

fn clean(raw: &str) -> String {
    strip_code_fences(raw).trim().to_string()
}

/// Whether a reviewer answer approves the content.
pub fn is_approval(review: &str) -> bool {
    review
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '_' | '`'))
        .to_uppercase()
        .starts_with("APPROVED")
}

const CANDIDATE_WORDS: &[&str] = &["post", "option", "variant", "version", "candidate", "draft"];

/// Line looks like `Post 1:`, `**Option 2**`, `### Variant 3 -`.
fn is_candidate_marker(line: &str) -> bool {
    let line = line
        .trim()
        .trim_start_matches(|c: char| matches!(c, '*' | '#' | '_'))
        .trim_start()
        .to_lowercase();
    CANDIDATE_WORDS.iter().any(|word| {
        line.strip_prefix(word).is_some_and(|rest| {
            if !rest.starts_with([' ', '#']) {
                return false;
            }
            let rest = rest.trim_start_matches([' ', '#']);
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            digits > 0
                && rest[digits..]
                    .trim_start()
                    .chars()
                    .next()
                    .is_none_or(|c| matches!(c, ':' | ')' | '.' | '-' | '*' | '('))
        })
    })
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3
        && (line.chars().all(|c| c == '-')
            || line.chars().all(|c| c == '=')
            || line.chars().all(|c| c == '*'))
}

/// Text after the marker on a marker line, e.g. `Post 1: Hello` -> `Hello`.
fn marker_tail(line: &str) -> &str {
    match line.find([':', ')']) {
        Some(pos) => line[pos + 1..].trim().trim_end_matches(['*', '_']).trim(),
        None => "",
    }
}

/// If `text` holds several candidate posts, the first one.
///
/// Detects two shapes: repeated candidate marker lines, and blocks split by
/// `---` style separator lines.
pub fn first_candidate(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();

    let markers: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_candidate_marker(l))
        .map(|(i, _)| i)
        .collect();
    if markers.len() >= 2 {
        let (start, end) = (markers[0], markers[1]);
        let mut parts = Vec::new();
        let tail = marker_tail(lines[start]);
        if !tail.is_empty() {
            parts.push(tail);
        }
        parts.extend(lines[start + 1..end].iter().copied());
        let first = trim_block(&parts);
        if !first.is_empty() {
            return Some(first);
        }
    }

    let blocks: Vec<String> = lines
        .split(|l| is_separator(l))
        .map(trim_block)
        .filter(|b| !b.is_empty())
        .collect();
    if blocks.len() >= 2 {
        return blocks.into_iter().next();
    }
    None
}

fn trim_block(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GenerationError, ScriptedGenerator};
    use crate::prompts::vars;

    fn prompts() -> TemplatedPrompts {
        TemplatedPrompts {
            author: ("a".into(), "Write about {topic}".into()),
            review: ("r".into(), "Review: {content}".into()),
            improve: ("i".into(), "Improve {content} with {feedback}".into()),
            vars: vars([("topic", "ports")]),
        }
    }

    fn models() -> LoopModels {
        LoopModels {
            author: "writer".into(),
            review: "editor".into(),
        }
    }

    #[tokio::test]
    async fn never_approving_reviewer_stops_after_n_rounds() {
        let generator = Arc::new(
            ScriptedGenerator::new([
                Ok("v0".to_string()),
                Ok("too long".to_string()),
                Ok("v1".to_string()),
                Ok("still too long".to_string()),
                Ok("v2".to_string()),
            ])
            .with_fallback(Ok("more notes".to_string())),
        );
        let outcome = ReviewLoop::new(generator.clone(), 2)
            .run(&prompts(), &models(), true)
            .await
            .unwrap();
        assert_eq!(outcome.content, "v2");
        assert_eq!(outcome.rounds, 2);
        assert!(!outcome.approved);
        assert_eq!(outcome.feedback.len(), 2);
        assert_eq!(generator.call_count(), 5);
    }

    #[tokio::test]
    async fn approval_ends_the_loop() {
        let generator = Arc::new(ScriptedGenerator::new([
            Ok("v0".to_string()),
            Ok("**Approved** - ship it".to_string()),
        ]));
        let outcome = ReviewLoop::new(generator.clone(), 3)
            .run(&prompts(), &models(), true)
            .await
            .unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.content, "v0");
        assert_eq!(generator.call_count(), 2);
        let requests = generator.requests();
        assert_eq!(requests[0].model, "writer");
        assert_eq!(requests[1].model, "editor");
        assert_eq!(requests[1].prompt, "Review: v0");
    }

    #[tokio::test]
    async fn failed_improve_keeps_last_good_content() {
        let generator = Arc::new(ScriptedGenerator::new([
            Ok("v0".to_string()),
            Ok("needs work".to_string()),
            Err(GenerationError::Unavailable("down".into())),
        ]));
        let outcome = ReviewLoop::new(generator, 3)
            .run(&prompts(), &models(), true)
            .await
            .unwrap();
        assert_eq!(outcome.content, "v0");
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.feedback, vec!["needs work".to_string()]);
    }

    #[tokio::test]
    async fn short_form_skips_review() {
        let generator = Arc::new(ScriptedGenerator::new([Ok(
            "Post 1: Hello world\n#ports\n\nPost 2: Another one".to_string(),
        )]));
        let outcome = ReviewLoop::new(generator.clone(), 3)
            .run(&prompts(), &models(), false)
            .await
            .unwrap();
        assert_eq!(outcome.content, "Hello world\n#ports");
        assert!(outcome.trimmed_candidates);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn author_failure_is_an_error() {
        let generator = Arc::new(ScriptedGenerator::new([Ok("   ".to_string())]));
        let err = ReviewLoop::new(generator, 2)
            .run(&prompts(), &models(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MalformedResponse(_)));
    }

    #[test]
    fn approval_signal() {
        assert!(is_approval("APPROVED"));
        assert!(is_approval("  approved, nice work"));
        assert!(is_approval("## Approved"));
        assert!(!is_approval("Not approved: fix the intro"));
        assert!(!is_approval(""));
    }

    #[test]
    fn separator_candidates() {
        let text = "First post body\n#tag\n---\nSecond post body";
        assert_eq!(first_candidate(text).as_deref(), Some("First post body\n#tag"));
    }

    #[test]
    fn bold_option_markers() {
        let text = "Here are two options:\n**Option 1:**\nBuy now\n\n**Option 2:**\nSave today";
        assert_eq!(first_candidate(text).as_deref(), Some("Buy now"));
    }

    #[test]
    fn single_post_is_left_alone() {
        assert_eq!(first_candidate("Just one post.\nWith two lines."), None);
        assert_eq!(first_candidate("Tips:\n1. Plan\n2. Ship"), None);
        assert_eq!(first_candidate("Post 1: only one marker"), None);
    }
}
