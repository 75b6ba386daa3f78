//! Publication scheduling of approved variants.
//!
//! The generator proposes one slot per variant. Entries are validated one
//! by one; a bad entry is logged and skipped, the rest are stored.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_db::models::{ApprovedVariant, TopicCategory};

use crate::context::PipelineContext;
use crate::error::StageError;
use crate::payload::{parse_payload, str_field};
use crate::prompts::{PromptRunner, Register, defaults, tasks};
use crate::store::{ContentStore, NewScheduledPost};

/// Hours of the day (and optionally weekdays only) content may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishWindow {
    pub weekdays_only: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PublishWindow {
    fn describe(&self) -> String {
        let days = if self.weekdays_only {
            "Monday to Friday"
        } else {
            "any day"
        };
        format!("{days}, {:02}:00-{:02}:00", self.start_hour, self.end_hour)
    }
}

/// Typed view of a plan's free-form scheduling preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingPreferences {
    pub blog_window: PublishWindow,
    pub social_window: PublishWindow,
    pub min_gap_hours: u32,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl Default for SchedulingPreferences {
    fn default() -> Self {
        Self {
            blog_window: PublishWindow {
                weekdays_only: true,
                start_hour: 9,
                end_hour: 17,
            },
            social_window: PublishWindow {
                weekdays_only: false,
                start_hour: 8,
                end_hour: 20,
            },
            min_gap_hours: 2,
            period_start: None,
            period_end: None,
            notes: None,
        }
    }
}

impl SchedulingPreferences {
    /// Read the plan's JSON; unknown keys are ignored and an unreadable
    /// document falls back to the defaults.
    pub fn from_value(value: &Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        match serde_json::from_value(value.clone()) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(error = %e, "unreadable scheduling preferences, using defaults");
                Self::default()
            }
        }
    }

    /// Rules as sent to the generator.
    pub fn describe(&self, period: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "- Blog content: {}", self.blog_window.describe());
        let _ = writeln!(out, "- Social media content: {}", self.social_window.describe());
        let _ = writeln!(
            out,
            "- At least {} hours between any two publications",
            self.min_gap_hours
        );
        match (self.period_start, self.period_end) {
            (Some(start), Some(end)) => {
                let _ = writeln!(out, "- Spread evenly between {start} and {end}");
            }
            _ => {
                let _ = writeln!(out, "- Spread evenly across the period {period}");
            }
        }
        if let Some(notes) = self.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            let _ = writeln!(out, "- {notes}");
        }
        out
    }
}

/// Why one schedule entry was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("invalid variant id {0:?}")]
    BadVariantId(String),
    #[error("variant {0} is not an approved variant of this plan")]
    UnknownVariant(Uuid),
    #[error("variant {0} scheduled more than once")]
    Duplicate(Uuid),
    #[error("unparsable publication date {0:?}")]
    BadDate(String),
}

/// Parse `YYYY-MM-DD HH:MM` (also `T`-separated, with seconds, or RFC 3339)
/// as UTC.
pub fn parse_publication_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Validate one entry against the plan's variants. `seen` collects the
/// variants already scheduled in this batch.
pub fn parse_entry(
    item: &Value,
    known: &HashSet<Uuid>,
    seen: &mut HashSet<Uuid>,
) -> Result<NewScheduledPost, EntryError> {
    let id = str_field(item, "content_variant_id")
        .or_else(|| str_field(item, "variant_id"))
        .ok_or(EntryError::MissingField("content_variant_id"))?;
    let variant_id = Uuid::parse_str(id).map_err(|_| EntryError::BadVariantId(id.to_string()))?;
    if !known.contains(&variant_id) {
        return Err(EntryError::UnknownVariant(variant_id));
    }
    let date = str_field(item, "publication_date").ok_or(EntryError::MissingField("publication_date"))?;
    let publication_date =
        parse_publication_date(date).ok_or_else(|| EntryError::BadDate(date.to_string()))?;
    if !seen.insert(variant_id) {
        return Err(EntryError::Duplicate(variant_id));
    }
    Ok(NewScheduledPost {
        variant_id,
        publication_date,
        reason: str_field(item, "reason").map(str::to_string),
    })
}

/// Outcome of a scheduling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub approved: usize,
    pub scheduled: usize,
    pub skipped: Vec<String>,
}

fn describe_variants(variants: &[ApprovedVariant]) -> String {
    let mut out = String::new();
    for v in variants {
        let category = match v.topic_category {
            TopicCategory::Blog => "blog",
            TopicCategory::SocialMedia => "social media",
        };
        let _ = write!(
            out,
            "- id: {} | platform: {} | {category} | topic: {}",
            v.variant_id, v.platform_name, v.topic_title
        );
        if let Some(headline) = &v.headline {
            let _ = write!(out, " | headline: {headline}");
        }
        out.push('\n');
    }
    out
}

pub struct Scheduler {
    store: Arc<dyn ContentStore>,
    runner: Arc<PromptRunner>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ContentStore>, runner: Arc<PromptRunner>) -> Self {
        Self { store, runner }
    }

    /// Replace the plan's scheduled posts with a fresh schedule.
    ///
    /// Fails only when the generator call fails or storage fails; the
    /// previous schedule is kept in both cases.
    pub async fn schedule(&self, ctx: &PipelineContext) -> Result<ScheduleReport, StageError> {
        let plan_id = ctx.plan.id;
        let variants = self.store.list_approved_variants(plan_id).await?;
        if variants.is_empty() {
            info!(plan_id = %plan_id, "no approved variants to schedule");
            self.store.replace_scheduled_posts(plan_id, &[]).await?;
            return Ok(ScheduleReport {
                approved: 0,
                scheduled: 0,
                skipped: Vec::new(),
            });
        }

        let prefs = SchedulingPreferences::from_value(&ctx.plan.scheduling_preferences);
        let mut vars = ctx.prompt_vars();
        vars.insert("preferences".into(), prefs.describe(&ctx.plan.period_label));
        vars.insert("count".into(), variants.len().to_string());
        vars.insert("variants".into(), describe_variants(&variants));

        let raw = self
            .runner
            .run(
                defaults::SCHEDULE,
                tasks::SCHEDULE,
                Some(ctx.organization_id()),
                &vars,
                Register::Structured,
            )
            .await?;

        let items = parse_payload(&raw).into_items().unwrap_or_else(|reason| {
            warn!(plan_id = %plan_id, %reason, "unparsable schedule response");
            Vec::new()
        });

        let known: HashSet<Uuid> = variants.iter().map(|v| v.variant_id).collect();
        let mut seen = HashSet::new();
        let mut posts = Vec::new();
        let mut skipped = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match parse_entry(item, &known, &mut seen) {
                Ok(post) => posts.push(post),
                Err(e) => {
                    warn!(plan_id = %plan_id, index, error = %e, "skipping schedule entry");
                    skipped.push(e.to_string());
                }
            }
        }

        let stored = self.store.replace_scheduled_posts(plan_id, &posts).await?;
        info!(
            plan_id = %plan_id,
            approved = variants.len(),
            scheduled = stored.len(),
            skipped = skipped.len(),
            "schedule stored"
        );
        Ok(ScheduleReport {
            approved: variants.len(),
            scheduled: stored.len(),
            skipped,
        })
    }
}
