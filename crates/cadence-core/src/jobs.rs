//! Job descriptions and handles.
//!
//! A [`StageJob`] carries only IDs and plain values so it can be encoded
//! to JSON when enqueued; the worker decodes it before running.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::plan_state::Stage;

/// One unit of asynchronous pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageJob {
    GenerateTopics { plan_id: Uuid },
    GenerateSmTopics { plan_id: Uuid },
    /// Create a draft for an approved topic and fill in its variants.
    GenerateVariants { topic_id: Uuid },
    Schedule { plan_id: Uuid },
    /// Produce a new draft version from `draft_id` using reviewer feedback.
    ReviseDraft { draft_id: Uuid, feedback: String },
    /// Produce a fresh draft replacing `draft_id`.
    RegenerateDraft { draft_id: Uuid },
    ReviseVariant { variant_id: Uuid, feedback: String },
    RegenerateVariant { variant_id: Uuid },
}

impl StageJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerateTopics { .. } => "generate_topics",
            Self::GenerateSmTopics { .. } => "generate_sm_topics",
            Self::GenerateVariants { .. } => "generate_variants",
            Self::Schedule { .. } => "schedule",
            Self::ReviseDraft { .. } => "revise_draft",
            Self::RegenerateDraft { .. } => "regenerate_draft",
            Self::ReviseVariant { .. } => "revise_variant",
            Self::RegenerateVariant { .. } => "regenerate_variant",
        }
    }

    /// The plan stage this job drives, if any.
    pub fn plan_stage(&self) -> Option<(Uuid, Stage)> {
        match self {
            Self::GenerateTopics { plan_id } => Some((*plan_id, Stage::Topics)),
            Self::GenerateSmTopics { plan_id } => Some((*plan_id, Stage::SmTopics)),
            Self::Schedule { plan_id } => Some((*plan_id, Stage::Schedule)),
            _ => None,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { attempts: u32, detail: Value },
    Failed { attempts: u32, error: String },
    /// The pool shut down before the job started.
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Handle to a dispatched job.
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: &'static str,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub(crate) fn new(id: Uuid, kind: &'static str, outcome: oneshot::Receiver<JobOutcome>) -> Self {
        Self { id, kind, outcome }
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> JobOutcome {
        self.outcome.await.unwrap_or(JobOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_are_tagged_json() {
        let job = StageJob::ReviseVariant {
            variant_id: Uuid::nil(),
            feedback: "shorter".into(),
        };
        let encoded = job.encode().unwrap();
        assert!(encoded.contains(r#""kind":"revise_variant""#));
        assert_eq!(StageJob::decode(&encoded).unwrap(), job);
    }

    #[test]
    fn plan_stages() {
        let plan_id = Uuid::new_v4();
        assert_eq!(
            StageJob::Schedule { plan_id }.plan_stage(),
            Some((plan_id, Stage::Schedule))
        );
        assert_eq!(
            StageJob::GenerateVariants { topic_id: plan_id }.plan_stage(),
            None
        );
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_cancelled() {
        let (tx, rx) = oneshot::channel();
        let handle = JobHandle::new(Uuid::new_v4(), "schedule", rx);
        drop(tx);
        assert_eq!(handle.wait().await, JobOutcome::Cancelled);
    }
}
