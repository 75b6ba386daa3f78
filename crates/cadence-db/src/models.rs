use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Declares a text-backed status enum with `Display`, `FromStr` and a
/// dedicated parse error type. Every variant maps to one snake_case string
/// which is also the value stored in the database.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $err:ident, $label:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(type_name = "text", rename_all = "snake_case")]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stored string form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = $err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($err(other.to_owned())),
                }
            }
        }

        #[doc = concat!("Error returned when parsing an invalid [`", stringify!($name), "`] string.")]
        #[derive(Debug, Clone)]
        pub struct $err(pub String);

        impl fmt::Display for $err {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!("invalid ", $label, ": {:?}"), self.0)
            }
        }

        impl std::error::Error for $err {}
    };
}

text_enum! {
    /// Status of a content plan. See `cadence_core::plan_state` for the
    /// transition graph.
    PlanStatus, PlanStatusParseError, "plan status" {
        New => "new",
        GeneratingTopics => "generating_topics",
        PendingBlogTopicApproval => "pending_blog_topic_approval",
        GeneratingSmTopics => "generating_sm_topics",
        PendingFinalScheduling => "pending_final_scheduling",
        Scheduling => "scheduling",
        Complete => "complete",
        Error => "error",
    }
}

impl PlanStatus {
    /// States in which a pipeline stage is running on a worker.
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            Self::GeneratingTopics | Self::GeneratingSmTopics | Self::Scheduling
        )
    }
}

text_enum! {
    /// Category of a suggested topic.
    TopicCategory, TopicCategoryParseError, "topic category" {
        Blog => "blog",
        SocialMedia => "social_media",
    }
}

text_enum! {
    /// Approval status of a suggested topic.
    TopicStatus, TopicStatusParseError, "topic status" {
        Suggested => "suggested",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Status of a content draft.
    DraftStatus, DraftStatusParseError, "draft status" {
        Drafting => "drafting",
        PendingApproval => "pending_approval",
        Approved => "approved",
        Rejected => "rejected",
        Failed => "failed",
    }
}

text_enum! {
    /// Status of a single platform variant.
    VariantStatus, VariantStatusParseError, "variant status" {
        PendingApproval => "pending_approval",
        Approved => "approved",
        Rejected => "rejected",
        NeedsRevision => "needs_revision",
    }
}

text_enum! {
    /// Kind of revision event recorded in the audit trail.
    RevisionKind, RevisionKindParseError, "revision kind" {
        Initial => "initial",
        Feedback => "feedback",
        Regenerate => "regenerate",
    }
}

text_enum! {
    /// Status of a scheduled publication.
    ScheduledPostStatus, ScheduledPostStatusParseError, "scheduled post status" {
        Scheduled => "scheduled",
        Published => "published",
        Failed => "failed",
    }
}

text_enum! {
    /// How publication dates are assigned for a plan.
    SchedulingMode, SchedulingModeParseError, "scheduling mode" {
        Auto => "auto",
        Manual => "manual",
    }
}

text_enum! {
    /// Analysis progress of an uploaded brief.
    BriefAnalysisStatus, BriefAnalysisStatusParseError, "brief analysis status" {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
}

text_enum! {
    /// Broad platform family. Decides which topic category a platform serves.
    PlatformKind, PlatformKindParseError, "platform kind" {
        Blog => "blog",
        Social => "social",
    }
}

impl TopicCategory {
    /// The platform family that renders topics of this category.
    pub fn platform_kind(&self) -> PlatformKind {
        match self {
            Self::Blog => PlatformKind::Blog,
            Self::SocialMedia => PlatformKind::Social,
        }
    }
}

// ---------------------------------------------------------------------------
// Embedded JSON documents
// ---------------------------------------------------------------------------

/// Per-platform style configured on a communication strategy.
///
/// Several styles may share a platform name (for example a company page and
/// a personal profile on the same network).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStyle {
    pub platform_name: String,
    pub kind: PlatformKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub max_length: Option<i32>,
    #[serde(default)]
    pub style_rules: Vec<String>,
    #[serde(default)]
    pub hashtag_policy: Option<String>,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// The organization a plan produces content for.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub website_insights: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An organization's communication strategy. Only the newest active row
/// is used by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommunicationStrategy {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub goals: Vec<String>,
    pub personas: Vec<String>,
    pub tone: Option<String>,
    pub forbidden_phrases: Vec<String>,
    pub preferred_phrases: Vec<String>,
    pub cta_rules: Vec<String>,
    pub platforms: Json<Vec<PlatformStyle>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An uploaded brief attached to a plan, with its extracted insights.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentBrief {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub title: String,
    pub analysis_status: BriefAnalysisStatus,
    pub mandatory_topics: Vec<String>,
    pub content_instructions: Option<String>,
    pub company_news: Vec<String>,
    pub key_messages: Vec<String>,
    pub key_topics: Vec<String>,
    pub priority_items: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One content-production cycle for an organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentPlan {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub period_label: String,
    pub blog_posts_quota: i32,
    pub sm_posts_quota: i32,
    pub correlate_posts: bool,
    pub scheduling_mode: SchedulingMode,
    pub scheduling_preferences: serde_json::Value,
    pub generation_metadata: serde_json::Value,
    pub status: PlanStatus,
    /// Monotonic counter bumped on every status transition.
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate piece of content.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuggestedTopic {
    pub id: Uuid,
    pub plan_id: Uuid,
    /// Set on social topics correlated with a blog topic of the same plan.
    pub parent_topic_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: TopicCategory,
    pub status: TopicStatus,
    pub metadata: serde_json::Value,
    /// Stage job that generated the topic.
    pub job_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// The working unit for one topic's content production.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentDraft {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub status: DraftStatus,
    pub job_id: Option<Uuid>,
    pub revision_number: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One platform-specific rendering of a draft.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentVariant {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub platform_name: String,
    pub content: String,
    pub headline: Option<String>,
    pub call_to_action: Option<String>,
    pub hashtags: Vec<String>,
    pub status: VariantStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record of a revision event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DraftRevision {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub kind: RevisionKind,
    pub feedback: Option<String>,
    pub previous_content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-plan configuration for the correlation engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentCorrelationRule {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub sm_posts_per_blog: i32,
    pub brief_based_sm_posts: i32,
    pub standalone_sm_posts: i32,
    /// Map of platform name to requested post count.
    pub platform_overrides: serde_json::Value,
    pub correlation_strength: Option<String>,
    pub timing_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A publication slot assigned to one approved variant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledPost {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub variant_id: Uuid,
    pub publication_date: DateTime<Utc>,
    pub status: ScheduledPostStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A prompt template; `organization_id = NULL` marks the global default.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromptTemplate {
    pub id: Uuid,
    pub name: String,
    pub organization_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Model chosen for a generation task; `organization_id = NULL` marks the
/// global default.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelAssignment {
    pub id: Uuid,
    pub task_name: String,
    pub organization_id: Option<Uuid>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// An approved variant joined with its topic, as consumed by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovedVariant {
    pub variant_id: Uuid,
    pub platform_name: String,
    pub content: String,
    pub headline: Option<String>,
    pub topic_id: Uuid,
    pub topic_title: String,
    pub topic_category: TopicCategory,
}

// ---------------------------------------------------------------------------
// Topic graph validation
// ---------------------------------------------------------------------------

/// Why a `parent_topic_id` reference was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicLinkError {
    #[error("parent topic {0} does not exist")]
    MissingParent(Uuid),
    #[error("parent topic {parent} belongs to plan {parent_plan}, not {plan}")]
    CrossPlan {
        parent: Uuid,
        parent_plan: Uuid,
        plan: Uuid,
    },
    #[error("parent topic {parent} has category {category}, expected blog")]
    NotBlog {
        parent: Uuid,
        category: TopicCategory,
    },
    #[error("parent topic {0} is no longer active")]
    Inactive(Uuid),
}

/// Validate the edge `child -> parent` for a topic being created in `plan_id`.
///
/// `parent` is the looked-up row for `parent_id` (`None` if absent). The
/// parent must be an active blog topic of the same plan.
pub fn check_parent_link(
    plan_id: Uuid,
    parent_id: Uuid,
    parent: Option<&SuggestedTopic>,
) -> Result<(), TopicLinkError> {
    let parent = parent.ok_or(TopicLinkError::MissingParent(parent_id))?;
    if parent.plan_id != plan_id {
        return Err(TopicLinkError::CrossPlan {
            parent: parent.id,
            parent_plan: parent.plan_id,
            plan: plan_id,
        });
    }
    if parent.category != TopicCategory::Blog {
        return Err(TopicLinkError::NotBlog {
            parent: parent.id,
            category: parent.category,
        });
    }
    if !parent.is_active {
        return Err(TopicLinkError::Inactive(parent.id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_display_roundtrip() {
        for v in PlanStatus::ALL {
            let parsed: PlanStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn plan_status_invalid() {
        let err = "bogus".parse::<PlanStatus>().unwrap_err();
        assert_eq!(err.to_string(), "invalid plan status: \"bogus\"");
    }

    #[test]
    fn generating_states() {
        let generating: Vec<PlanStatus> = PlanStatus::ALL
            .iter()
            .copied()
            .filter(PlanStatus::is_generating)
            .collect();
        assert_eq!(
            generating,
            vec![
                PlanStatus::GeneratingTopics,
                PlanStatus::GeneratingSmTopics,
                PlanStatus::Scheduling
            ]
        );
    }

    #[test]
    fn topic_category_uses_snake_case() {
        assert_eq!(TopicCategory::SocialMedia.to_string(), "social_media");
        assert_eq!(
            "social_media".parse::<TopicCategory>().unwrap(),
            TopicCategory::SocialMedia
        );
        assert!("social".parse::<TopicCategory>().is_err());
    }

    #[test]
    fn category_maps_to_platform_kind() {
        assert_eq!(TopicCategory::Blog.platform_kind(), PlatformKind::Blog);
        assert_eq!(
            TopicCategory::SocialMedia.platform_kind(),
            PlatformKind::Social
        );
    }

    #[test]
    fn variant_status_serde_matches_display() {
        let json = serde_json::to_string(&VariantStatus::NeedsRevision).unwrap();
        assert_eq!(json, "\"needs_revision\"");
    }

    fn topic(plan_id: Uuid, category: TopicCategory) -> SuggestedTopic {
        SuggestedTopic {
            id: Uuid::new_v4(),
            plan_id,
            parent_topic_id: None,
            title: "Quarterly outlook".to_string(),
            description: String::new(),
            category,
            status: TopicStatus::Approved,
            metadata: serde_json::json!({}),
            job_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parent_link_accepts_blog_in_same_plan() {
        let plan = Uuid::new_v4();
        let parent = topic(plan, TopicCategory::Blog);
        assert_eq!(check_parent_link(plan, parent.id, Some(&parent)), Ok(()));
    }

    #[test]
    fn parent_link_rejects_social_parent() {
        let plan = Uuid::new_v4();
        let parent = topic(plan, TopicCategory::SocialMedia);
        assert!(matches!(
            check_parent_link(plan, parent.id, Some(&parent)),
            Err(TopicLinkError::NotBlog { .. })
        ));
    }

    #[test]
    fn parent_link_rejects_other_plan() {
        let parent = topic(Uuid::new_v4(), TopicCategory::Blog);
        assert!(matches!(
            check_parent_link(Uuid::new_v4(), parent.id, Some(&parent)),
            Err(TopicLinkError::CrossPlan { .. })
        ));
    }

    #[test]
    fn parent_link_rejects_missing_and_inactive() {
        let plan = Uuid::new_v4();
        let missing = Uuid::new_v4();
        assert_eq!(
            check_parent_link(plan, missing, None),
            Err(TopicLinkError::MissingParent(missing))
        );

        let mut parent = topic(plan, TopicCategory::Blog);
        parent.is_active = false;
        assert_eq!(
            check_parent_link(plan, parent.id, Some(&parent)),
            Err(TopicLinkError::Inactive(parent.id))
        );
    }

    #[test]
    fn platform_style_defaults_optional_fields() {
        let style: PlatformStyle =
            serde_json::from_str(r#"{"platform_name": "LinkedIn", "kind": "social"}"#).unwrap();
        assert_eq!(style.kind, PlatformKind::Social);
        assert!(style.style_rules.is_empty());
        assert!(style.max_length.is_none());
    }
}
