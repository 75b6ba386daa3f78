//! Scheduler stage driven through the pipeline.

mod common;

use std::sync::atomic::Ordering;

use cadence_db::models::{PlanStatus, ScheduledPostStatus, TopicCategory, VariantStatus};

use cadence_core::jobs::JobOutcome;
use cadence_core::store::{ContentStore, NewScheduledPost, VariantContent};

use common::{Fixture, succeed, unique};

/// Three approved variants on three topics, plan waiting for scheduling.
async fn approved_fixture() -> (Fixture, Vec<uuid::Uuid>) {
    let fx = Fixture::new().await;
    let topics = fx
        .insert_topics(TopicCategory::Blog, &["One", "Two", "Three"])
        .await;
    let mut variants = Vec::new();
    for topic in topics {
        let draft = fx.store.create_draft(topic, None).await.unwrap();
        let variant = fx
            .store
            .insert_variant(
                draft.id,
                "Blog",
                &VariantContent {
                    content: "Body".into(),
                    headline: Some("Headline".into()),
                    call_to_action: None,
                    hashtags: Vec::new(),
                },
            )
            .await
            .unwrap();
        fx.store
            .set_variant_status(variant.id, VariantStatus::Approved)
            .await
            .unwrap();
        variants.push(variant.id);
    }
    fx.force_status(&[
        PlanStatus::GeneratingTopics,
        PlanStatus::PendingBlogTopicApproval,
        PlanStatus::GeneratingSmTopics,
        PlanStatus::PendingFinalScheduling,
    ])
    .await;
    (fx, variants)
}

#[tokio::test]
async fn one_bad_date_still_completes_the_plan() {
    let (fx, variants) = approved_fixture().await;
    fx.state.bad_schedule_date.store(true, Ordering::SeqCst);

    let detail = succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    assert_eq!(detail["report"]["approved"], 3);
    assert_eq!(detail["report"]["scheduled"], 2);
    assert_eq!(detail["report"]["skipped"].as_array().unwrap().len(), 1);

    let plan = fx.plan().await;
    assert_eq!(plan.status, PlanStatus::Complete);
    assert_eq!(plan.generation_metadata["schedule_skipped"], 1);

    let posts = fx.store.list_scheduled_posts(fx.plan_id).await.unwrap();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.status == ScheduledPostStatus::Scheduled));
    let ids: Vec<_> = posts.iter().map(|p| p.variant_id).collect();
    assert_eq!(unique(&ids), 2);
    assert!(ids.iter().all(|id| variants.contains(id)));
}

#[tokio::test]
async fn regenerate_all_after_completion_clears_the_schedule() {
    let (fx, _) = approved_fixture().await;
    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.store.list_scheduled_posts(fx.plan_id).await.unwrap().len(), 3);

    succeed(fx.pipeline.regenerate_all(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::PendingBlogTopicApproval);
    assert!(fx.store.list_scheduled_posts(fx.plan_id).await.unwrap().is_empty());
    assert!(
        fx.store
            .list_approved_variants(fx.plan_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn failed_rescheduling_keeps_the_previous_schedule() {
    let (fx, variants) = approved_fixture().await;
    fx.store
        .replace_scheduled_posts(
            fx.plan_id,
            &[NewScheduledPost {
                variant_id: variants[0],
                publication_date: chrono::Utc::now(),
                reason: Some("earlier run".into()),
            }],
        )
        .await
        .unwrap();
    fx.state.fail_schedule.store(true, Ordering::SeqCst);

    let outcome = fx
        .pipeline
        .continue_after_approval(fx.plan_id)
        .await
        .unwrap()
        .wait()
        .await;
    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert_eq!(fx.plan().await.status, PlanStatus::Error);
    let kept = fx.store.list_scheduled_posts(fx.plan_id).await.unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].reason.as_deref(), Some("earlier run"));

    // Resuming replaces it wholesale.
    fx.state.fail_schedule.store(false, Ordering::SeqCst);
    succeed(fx.pipeline.continue_after_approval(fx.plan_id).await.unwrap()).await;
    assert_eq!(fx.plan().await.status, PlanStatus::Complete);
    let posts = fx.store.list_scheduled_posts(fx.plan_id).await.unwrap();
    assert_eq!(posts.len(), 3);
    assert!(posts.iter().all(|p| p.reason.as_deref() != Some("earlier run")));
}
