//! End-to-end plan flow against the in-memory store: topics, approval,
//! social topics with correlation, variants, scheduling, failure and
//! resume.

mod common;

use std::sync::atomic::Ordering;

use cadence_db::models::{
    DraftStatus, PlanStatus, SchedulingMode, TopicCategory, TopicStatus, VariantStatus,
};

use cadence_core::StageError;
use cadence_core::jobs::JobOutcome;
use cadence_core::plan_state::{PlanFailure, Stage};
use cadence_core::store::{ContentStore, TopicFilter};

use common::{Fixture, succeed};

fn filter(category: TopicCategory, status: TopicStatus) -> TopicFilter {
    TopicFilter {
        category: Some(category),
        status: Some(status),
    }
}

#[tokio::test]
async fn full_plan_reaches_complete() {
    let fx = Fixture::new().await;

    // Stage 1: blog topics (quota 2 + buffer 3).
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::PendingBlogTopicApproval);
    let suggested = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    assert_eq!(suggested.len(), 5);

    // Approve two blog topics; each gets a draft with one blog variant.
    let mut blog_variants = Vec::new();
    for topic in &suggested[..2] {
        let report = succeed(fx.pipeline.approve_topic(topic.id).await.unwrap()).await;
        assert_eq!(report["draft_status"], "pending_approval");
        let draft = fx.store.get_active_draft(topic.id).await.unwrap().unwrap();
        let variants = fx.store.list_variants(draft.id).await.unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].platform_name, "Blog");
        assert_eq!(variants[0].headline.as_deref(), Some("A headline"));
        blog_variants.push(variants[0].id);
    }

    // Stage 2: social topics, default correlation 2 blog / quota 4.
    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::PendingFinalScheduling);
    let correlation = &plan.generation_metadata["correlation"];
    assert_eq!(correlation["blog_correlated"], 2);
    assert_eq!(correlation["standalone"], 2);
    assert_eq!(correlation["total"], 4);
    let distribution = plan.generation_metadata["sm_distribution"]
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_u64().unwrap())
        .sum::<u64>();
    assert_eq!(distribution, 4);

    let social = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::SocialMedia, TopicStatus::Suggested))
        .await
        .unwrap();
    assert_eq!(social.len(), 4);
    let correlated: Vec<_> = social.iter().filter(|t| t.parent_topic_id.is_some()).collect();
    assert_eq!(correlated.len(), 2);
    for topic in &correlated {
        let parent = topic.parent_topic_id.unwrap();
        assert!(suggested[..2].iter().any(|b| b.id == parent));
    }

    // Approve the blog variants, then schedule.
    for id in &blog_variants {
        let variant = fx.pipeline.approve_variant(*id).await.unwrap();
        assert_eq!(variant.status, VariantStatus::Approved);
    }
    let draft = fx
        .store
        .get_active_draft(suggested[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.status, DraftStatus::Approved);

    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::Complete);
    let posts = fx.store.list_scheduled_posts(fx.plan_id).await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(plan.generation_metadata["scheduled_posts"], 2);
    assert!(plan.generation_metadata["schedule_job_id"].is_string());
}

#[tokio::test]
async fn correlated_social_topics_get_one_variant_per_platform() {
    let fx = Fixture::new().await;
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    let blog = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    succeed(fx.pipeline.approve_topic(blog[0].id).await.unwrap()).await;
    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;

    let teaser = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::SocialMedia, TopicStatus::Suggested))
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.parent_topic_id == Some(blog[0].id))
        .unwrap();
    let report = succeed(fx.pipeline.approve_topic(teaser.id).await.unwrap()).await;
    assert_eq!(report["created"].as_array().unwrap().len(), 3);

    let author_prompts = fx.state.prompts_containing("promotes the blog article");
    assert_eq!(author_prompts.len(), 3);
    assert!(author_prompts[0].contains(&blog[0].title));
}

#[tokio::test]
async fn triggers_check_plan_status() {
    let fx = Fixture::new().await;

    let err = fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap_err();
    assert!(matches!(err, StageError::PreconditionViolation(_)));
    let err = fx.pipeline.regenerate_topics(fx.plan_id).await.unwrap_err();
    assert!(matches!(err, StageError::PreconditionViolation(_)));
    let err = fx.pipeline.reset(fx.plan_id).await.unwrap_err();
    assert!(matches!(err, StageError::PreconditionViolation(_)));

    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::New);
    assert_eq!(plan.version, 0);
}

#[tokio::test]
async fn regenerate_topics_keeps_approved_and_skips_rejected_titles() {
    let fx = Fixture::new().await;
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    let first = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    succeed(fx.pipeline.approve_topic(first[0].id).await.unwrap()).await;

    succeed(fx.pipeline.regenerate_topics(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::PendingBlogTopicApproval);

    let approved = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Approved))
        .await
        .unwrap();
    assert_eq!(approved.len(), 1);

    let rejected: Vec<String> = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Rejected))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(rejected.len(), 4);

    // One approved, so one more needed plus the buffer.
    let fresh = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    assert_eq!(fresh.len(), 4);
    assert!(fresh.iter().all(|t| !rejected.contains(&t.title)));
}

#[tokio::test]
async fn topic_failure_moves_plan_to_error_and_resumes() {
    let fx = Fixture::new().await;
    fx.state.fail_topics.store(true, Ordering::SeqCst);

    let outcome = fx
        .pipeline
        .start_generation(fx.plan_id)
        .await
        .unwrap()
        .wait()
        .await;
    assert!(matches!(outcome, JobOutcome::Failed { attempts: 2, .. }));

    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::Error);
    let failure = PlanFailure::from_metadata(&plan.generation_metadata).unwrap();
    assert_eq!(failure.stage, Stage::Topics);
    assert_eq!(failure.resume_status, PlanStatus::New);
    assert!(failure.message.contains("topic service down"));
    assert!(
        fx.store
            .list_topics(fx.plan_id, TopicFilter::default())
            .await
            .unwrap()
            .is_empty()
    );

    fx.state.fail_topics.store(false, Ordering::SeqCst);
    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::PendingBlogTopicApproval);
    assert!(PlanFailure::from_metadata(&plan.generation_metadata).is_none());
}

#[tokio::test]
async fn social_failure_resets_to_blog_approval() {
    let fx = Fixture::new().await;
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    let blog = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    succeed(fx.pipeline.approve_topic(blog[0].id).await.unwrap()).await;

    fx.state.fail_topics.store(true, Ordering::SeqCst);
    let outcome = fx
        .pipeline
        .continue_after_approval(fx.plan_id)
        .await
        .unwrap()
        .wait()
        .await;
    assert!(!outcome.is_success());
    assert_eq!(fx.plan().await.status, PlanStatus::Error);

    // Only the failed stage may be resumed.
    let err = fx.pipeline.start_generation(fx.plan_id).await.unwrap_err();
    assert!(matches!(err, StageError::PreconditionViolation(_)));

    let plan = fx.pipeline.reset(fx.plan_id).await.unwrap();
    assert_eq!(plan.status, PlanStatus::PendingBlogTopicApproval);
    let approved = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Approved))
        .await
        .unwrap();
    assert_eq!(approved.len(), 1);
    let social = fx
        .store
        .list_topics(
            fx.plan_id,
            TopicFilter {
                category: Some(TopicCategory::SocialMedia),
                status: None,
            },
        )
        .await
        .unwrap();
    assert!(social.is_empty());
}

#[tokio::test]
async fn regenerate_all_discards_everything() {
    let fx = Fixture::new().await;
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    let blog = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    succeed(fx.pipeline.approve_topic(blog[0].id).await.unwrap()).await;

    succeed(fx.pipeline.regenerate_all(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::PendingBlogTopicApproval);
    assert!(fx.store.get_active_draft(blog[0].id).await.unwrap().is_none());
    let all = fx
        .store
        .list_topics(fx.plan_id, TopicFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|t| t.status == TopicStatus::Suggested));
}

#[tokio::test]
async fn manual_scheduling_completes_without_posts() {
    let fx = Fixture::with_mode(SchedulingMode::Manual).await;
    fx.force_status(&[
        PlanStatus::GeneratingTopics,
        PlanStatus::PendingBlogTopicApproval,
        PlanStatus::GeneratingSmTopics,
        PlanStatus::PendingFinalScheduling,
    ])
    .await;

    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::Complete);
    assert!(fx.state.prompts_containing("publication planner").is_empty());
}

#[tokio::test]
async fn failed_topic_rejection_parks_the_plan_in_error() {
    let fx = Fixture::new().await;
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    fx.store.fail_next("reject_suggested_topics", 1).await;

    let err = fx.pipeline.regenerate_topics(fx.plan_id).await.unwrap_err();
    assert!(matches!(err, StageError::Persistence(_)));

    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::Error);
    let failure = PlanFailure::from_metadata(&plan.generation_metadata).unwrap();
    assert_eq!(failure.stage, Stage::Topics);
    assert_eq!(failure.resume_status, PlanStatus::PendingBlogTopicApproval);

    let plan = fx.pipeline.reset(fx.plan_id).await.unwrap();
    assert_eq!(plan.status, PlanStatus::PendingBlogTopicApproval);
    assert!(PlanFailure::from_metadata(&plan.generation_metadata).is_none());

    succeed(fx.pipeline.regenerate_topics(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::PendingBlogTopicApproval);
    let suggested = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    assert_eq!(suggested.len(), 5);
}

#[tokio::test]
async fn failed_discard_parks_the_plan_in_error() {
    let fx = Fixture::new().await;
    succeed(fx.pipeline.start_generation(fx.plan_id).await.unwrap()).await;
    let blog = fx
        .store
        .list_topics(fx.plan_id, filter(TopicCategory::Blog, TopicStatus::Suggested))
        .await
        .unwrap();
    succeed(fx.pipeline.approve_topic(blog[0].id).await.unwrap()).await;
    fx.store.fail_next("deactivate_drafts_for_plan", 1).await;

    let err = fx.pipeline.regenerate_all(fx.plan_id).await.unwrap_err();
    assert!(matches!(err, StageError::Persistence(_)));

    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::Error);
    let failure = PlanFailure::from_metadata(&plan.generation_metadata).unwrap();
    assert_eq!(failure.resume_status, PlanStatus::PendingBlogTopicApproval);

    // Regeneration is allowed straight from error.
    succeed(fx.pipeline.regenerate_all(fx.plan_id).await.unwrap()).await;
    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::PendingBlogTopicApproval);
    assert!(PlanFailure::from_metadata(&plan.generation_metadata).is_none());
    assert!(fx.store.get_active_draft(blog[0].id).await.unwrap().is_none());
    let all = fx
        .store
        .list_topics(fx.plan_id, TopicFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
}
