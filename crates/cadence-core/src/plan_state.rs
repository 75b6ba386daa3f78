//! Plan state machine.
//!
//! Validates and executes plan status transitions, enforcing the allowed
//! graph and the plan row's version counter, and records failure metadata
//! so an errored plan can be resumed.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use cadence_db::models::{ContentPlan, PlanStatus};

use crate::error::StageError;
use crate::store::ContentStore;

/// A pipeline stage driven by the plan state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Topics,
    SmTopics,
    Schedule,
}

impl Stage {
    /// Status the plan holds while the stage runs.
    pub fn running_status(self) -> PlanStatus {
        match self {
            Self::Topics => PlanStatus::GeneratingTopics,
            Self::SmTopics => PlanStatus::GeneratingSmTopics,
            Self::Schedule => PlanStatus::Scheduling,
        }
    }

    /// Status reached when the stage succeeds.
    pub fn success_status(self) -> PlanStatus {
        match self {
            Self::Topics => PlanStatus::PendingBlogTopicApproval,
            Self::SmTopics => PlanStatus::PendingFinalScheduling,
            Self::Schedule => PlanStatus::Complete,
        }
    }

    /// Last user-meaningful status before the stage, restored on `reset`.
    pub fn resume_status(self) -> PlanStatus {
        match self {
            Self::Topics => PlanStatus::New,
            Self::SmTopics => PlanStatus::PendingBlogTopicApproval,
            Self::Schedule => PlanStatus::PendingFinalScheduling,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topics => "topics",
            Self::SmTopics => "sm_topics",
            Self::Schedule => "schedule",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "topics" => Some(Self::Topics),
            "sm_topics" => Some(Self::SmTopics),
            "schedule" => Some(Self::Schedule),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FAILURE_KEYS: [&str; 3] = ["failed_stage", "resume_status", "error_message"];

/// Failure details stored in `generation_metadata` of an errored plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanFailure {
    pub stage: Stage,
    pub resume_status: PlanStatus,
    pub message: String,
}

impl PlanFailure {
    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        let stage = metadata
            .get("failed_stage")
            .and_then(Value::as_str)
            .and_then(Stage::parse)?;
        let resume_status = metadata
            .get("resume_status")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| stage.resume_status());
        let message = metadata
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self {
            stage,
            resume_status,
            message,
        })
    }
}

/// The plan state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// new                         -> generating_topics
/// generating_topics           -> pending_blog_topic_approval | error
/// pending_blog_topic_approval -> generating_sm_topics
/// pending_blog_topic_approval -> generating_topics        (regenerate)
/// generating_sm_topics        -> pending_final_scheduling | error
/// pending_final_scheduling    -> scheduling
/// pending_final_scheduling    -> generating_topics        (regenerate all)
/// scheduling                  -> complete | error
/// complete                    -> generating_topics        (regenerate all)
/// error                       -> generating_topics | generating_sm_topics | scheduling  (resume)
/// error                       -> new | pending_blog_topic_approval | pending_final_scheduling  (reset)
/// ```
pub struct PlanStateMachine {
    store: Arc<dyn ContentStore>,
}

impl PlanStateMachine {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Check whether `from -> to` is an edge of the graph.
    pub fn is_valid_transition(from: PlanStatus, to: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (from, to),
            (New, GeneratingTopics)
                | (GeneratingTopics, PendingBlogTopicApproval)
                | (GeneratingTopics, Error)
                | (PendingBlogTopicApproval, GeneratingSmTopics)
                | (PendingBlogTopicApproval, GeneratingTopics)
                | (GeneratingSmTopics, PendingFinalScheduling)
                | (GeneratingSmTopics, Error)
                | (PendingFinalScheduling, Scheduling)
                | (PendingFinalScheduling, GeneratingTopics)
                | (Scheduling, Complete)
                | (Scheduling, Error)
                | (Complete, GeneratingTopics)
                | (Error, GeneratingTopics)
                | (Error, GeneratingSmTopics)
                | (Error, Scheduling)
                | (Error, New)
                | (Error, PendingBlogTopicApproval)
                | (Error, PendingFinalScheduling)
        )
    }

    pub async fn load(&self, plan_id: Uuid) -> Result<ContentPlan, StageError> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| StageError::not_found("plan", plan_id))?;
        if !plan.is_active {
            return Err(StageError::precondition(format!(
                "plan {plan_id} has been deleted"
            )));
        }
        Ok(plan)
    }

    /// Move `plan` to `to`, checking the edge and the row version.
    ///
    /// Fails with a precondition violation and changes nothing when the
    /// edge is invalid or the row changed since `plan` was read.
    pub async fn transition(
        &self,
        plan: &ContentPlan,
        to: PlanStatus,
    ) -> Result<ContentPlan, StageError> {
        if !Self::is_valid_transition(plan.status, to) {
            return Err(StageError::precondition(format!(
                "invalid plan transition: {} -> {} for plan {}",
                plan.status, to, plan.id
            )));
        }
        let moved = self
            .store
            .transition_plan(plan.id, plan.status, to, plan.version)
            .await?;
        match moved {
            Some(updated) => {
                info!(
                    plan_id = %plan.id,
                    from = %plan.status,
                    to = %to,
                    version = updated.version,
                    "plan transition"
                );
                Ok(updated)
            }
            None => Err(StageError::precondition(format!(
                "concurrent modification of plan {}: expected {} at version {}",
                plan.id, plan.status, plan.version
            ))),
        }
    }

    /// Enter the running state of `stage` from the plan's current status.
    ///
    /// From `error` this is only allowed when `stage` is the one that
    /// failed; on entry the failure metadata is cleared. The transition is
    /// the only write that can fail this call.
    pub async fn begin(&self, plan: &ContentPlan, stage: Stage) -> Result<ContentPlan, StageError> {
        if plan.status == PlanStatus::Error {
            let failure = PlanFailure::from_metadata(&plan.generation_metadata);
            if failure.as_ref().is_some_and(|f| f.stage != stage) {
                return Err(StageError::precondition(format!(
                    "plan {} failed in stage {}; resume that stage or reset",
                    plan.id,
                    failure.map(|f| f.stage.as_str()).unwrap_or_default()
                )));
            }
        }
        let mut updated = self.transition(plan, stage.running_status()).await?;
        if plan.status == PlanStatus::Error {
            self.clear_failure(plan.id).await;
            if let Some(meta) = updated.generation_metadata.as_object_mut() {
                for key in FAILURE_KEYS {
                    meta.insert(key.to_string(), Value::Null);
                }
            }
        }
        Ok(updated)
    }

    /// Move a running stage to its success status.
    pub async fn finish(&self, plan_id: Uuid, stage: Stage) -> Result<ContentPlan, StageError> {
        let plan = self.load(plan_id).await?;
        if plan.status != stage.running_status() {
            return Err(StageError::precondition(format!(
                "plan {plan_id} left stage {stage} while it ran (now {})",
                plan.status
            )));
        }
        self.transition(&plan, stage.success_status()).await
    }

    /// Mark the plan as errored in `stage` and record how to resume.
    pub async fn fail(
        &self,
        plan_id: Uuid,
        stage: Stage,
        error: &StageError,
    ) -> Result<ContentPlan, StageError> {
        self.fail_resuming(plan_id, stage, stage.resume_status(), error)
            .await
    }

    /// Like [`PlanStateMachine::fail`] with an explicit resume status, used
    /// when the plan entered `stage` from somewhere other than its usual
    /// predecessor.
    ///
    /// Writes the failure record before the status. A record on a plan
    /// that is not in `error` is ignored.
    pub async fn fail_resuming(
        &self,
        plan_id: Uuid,
        stage: Stage,
        resume: PlanStatus,
        error: &StageError,
    ) -> Result<ContentPlan, StageError> {
        let plan = self.load(plan_id).await?;
        if plan.status != stage.running_status() {
            warn!(
                plan_id = %plan_id,
                stage = %stage,
                status = %plan.status,
                "stage failed but plan is no longer in its running state"
            );
            return Ok(plan);
        }
        self.store
            .merge_plan_metadata(
                plan_id,
                &json!({
                    "failed_stage": stage.as_str(),
                    "resume_status": resume.as_str(),
                    "error_message": error.to_string(),
                    "failed_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        let errored = self.transition(&plan, PlanStatus::Error).await?;
        warn!(plan_id = %plan_id, stage = %stage, resume = %resume, error = %error, "plan moved to error");
        Ok(errored)
    }

    /// Put an errored plan back into its resume status without running
    /// anything.
    pub async fn reset(&self, plan_id: Uuid) -> Result<ContentPlan, StageError> {
        let plan = self.load(plan_id).await?;
        if plan.status != PlanStatus::Error {
            return Err(StageError::precondition(format!(
                "plan {plan_id} is {}, only errored plans can be reset",
                plan.status
            )));
        }
        let resume = PlanFailure::from_metadata(&plan.generation_metadata)
            .map(|f| f.resume_status)
            .unwrap_or(PlanStatus::New);
        self.transition(&plan, resume).await?;
        self.clear_failure(plan_id).await;
        self.load(plan_id).await
    }

    /// Drop the failure record. Best effort: the record is only read while
    /// the plan is in `error`, and the next failure overwrites it.
    pub async fn clear_failure(&self, plan_id: Uuid) {
        let patch: serde_json::Map<String, Value> = FAILURE_KEYS
            .iter()
            .map(|key| (key.to_string(), Value::Null))
            .collect();
        if let Err(e) = self
            .store
            .merge_plan_metadata(plan_id, &Value::Object(patch))
            .await
        {
            warn!(plan_id = %plan_id, error = %e, "could not clear failure record");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use cadence_db::models::SchedulingMode;
    use cadence_db::queries::plans::NewContentPlan;

    use super::*;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, PlanStateMachine, ContentPlan) {
        let store = Arc::new(MemoryStore::new());
        let org = store.add_organization("Acme", None).await;
        let plan = store
            .add_plan(NewContentPlan {
                organization_id: org.id,
                period_label: "2026-11".into(),
                blog_posts_quota: 1,
                sm_posts_quota: 1,
                correlate_posts: true,
                scheduling_mode: SchedulingMode::Auto,
                scheduling_preferences: json!({}),
            })
            .await;
        let machine = PlanStateMachine::new(store.clone());
        (store, machine, plan)
    }

    #[test]
    fn graph_edges() {
        use PlanStatus::*;
        assert!(PlanStateMachine::is_valid_transition(New, GeneratingTopics));
        assert!(PlanStateMachine::is_valid_transition(GeneratingSmTopics, Error));
        assert!(PlanStateMachine::is_valid_transition(Error, PendingBlogTopicApproval));
        assert!(!PlanStateMachine::is_valid_transition(New, Complete));
        assert!(!PlanStateMachine::is_valid_transition(PendingBlogTopicApproval, Error));
        assert!(!PlanStateMachine::is_valid_transition(Complete, Scheduling));
        for status in PlanStatus::ALL {
            assert!(!PlanStateMachine::is_valid_transition(*status, *status));
        }
    }

    #[test]
    fn every_generating_state_can_fail() {
        for status in PlanStatus::ALL.iter().filter(|s| s.is_generating()) {
            assert!(PlanStateMachine::is_valid_transition(*status, PlanStatus::Error));
        }
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let (_store, machine, plan) = setup().await;
        machine.transition(&plan, PlanStatus::GeneratingTopics).await.unwrap();
        // `plan` is the pre-transition snapshot.
        let err = machine
            .transition(&plan, PlanStatus::GeneratingTopics)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::PreconditionViolation(_)));
    }

    #[tokio::test]
    async fn failure_records_metadata_and_reset_restores() {
        let (store, machine, plan) = setup().await;
        let plan = machine.begin(&plan, Stage::Topics).await.unwrap();
        machine
            .fail(plan.id, Stage::Topics, &StageError::TransientExternal("429".into()))
            .await
            .unwrap();

        let errored = store.get_plan(plan.id).await.unwrap().unwrap();
        assert_eq!(errored.status, PlanStatus::Error);
        let failure = PlanFailure::from_metadata(&errored.generation_metadata).unwrap();
        assert_eq!(failure.stage, Stage::Topics);
        assert_eq!(failure.resume_status, PlanStatus::New);
        assert!(failure.message.contains("429"));

        let reset = machine.reset(plan.id).await.unwrap();
        assert_eq!(reset.status, PlanStatus::New);
        assert!(PlanFailure::from_metadata(&reset_metadata(&store, plan.id).await).is_none());
    }

    async fn reset_metadata(store: &MemoryStore, id: Uuid) -> Value {
        store.get_plan(id).await.unwrap().unwrap().generation_metadata
    }

    #[tokio::test]
    async fn resume_only_the_failed_stage() {
        let (_store, machine, plan) = setup().await;
        let plan = machine.begin(&plan, Stage::Topics).await.unwrap();
        let errored = machine
            .fail(plan.id, Stage::Topics, &StageError::TransientExternal("x".into()))
            .await
            .unwrap();

        let err = machine.begin(&errored, Stage::Schedule).await.unwrap_err();
        assert!(matches!(err, StageError::PreconditionViolation(_)));

        let resumed = machine.begin(&errored, Stage::Topics).await.unwrap();
        assert_eq!(resumed.status, PlanStatus::GeneratingTopics);
    }

    #[tokio::test]
    async fn reset_requires_error() {
        let (_store, machine, plan) = setup().await;
        assert!(machine.reset(plan.id).await.is_err());
    }

    #[tokio::test]
    async fn explicit_resume_status_is_restored_by_reset() {
        let (_store, machine, plan) = setup().await;
        let plan = machine.begin(&plan, Stage::Topics).await.unwrap();
        let plan = machine.finish(plan.id, Stage::Topics).await.unwrap();
        machine.begin(&plan, Stage::Topics).await.unwrap();

        let errored = machine
            .fail_resuming(
                plan.id,
                Stage::Topics,
                PlanStatus::PendingBlogTopicApproval,
                &StageError::Persistence(anyhow::anyhow!("connection reset")),
            )
            .await
            .unwrap();
        let failure = PlanFailure::from_metadata(&errored.generation_metadata).unwrap();
        assert_eq!(failure.resume_status, PlanStatus::PendingBlogTopicApproval);

        let reset = machine.reset(plan.id).await.unwrap();
        assert_eq!(reset.status, PlanStatus::PendingBlogTopicApproval);
    }

    #[tokio::test]
    async fn resume_survives_a_failed_metadata_clear() {
        let (store, machine, plan) = setup().await;
        let plan = machine.begin(&plan, Stage::Topics).await.unwrap();
        let errored = machine
            .fail(plan.id, Stage::Topics, &StageError::TransientExternal("x".into()))
            .await
            .unwrap();

        store.fail_next("merge_plan_metadata", 1).await;
        let resumed = machine.begin(&errored, Stage::Topics).await.unwrap();
        assert_eq!(resumed.status, PlanStatus::GeneratingTopics);
        assert!(PlanFailure::from_metadata(&resumed.generation_metadata).is_none());

        // The stale record does not block the next failure or reset.
        machine
            .fail(plan.id, Stage::Topics, &StageError::TransientExternal("y".into()))
            .await
            .unwrap();
        assert_eq!(machine.reset(plan.id).await.unwrap().status, PlanStatus::New);
    }
}
