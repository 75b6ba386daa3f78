//! Social post quota split.
//!
//! Decides how many social topics promote a blog topic, how many come from
//! briefs, and how many stand alone. A stored [`ContentCorrelationRule`] is
//! authoritative; without one every blog topic gets one correlated post
//! and the rest of the quota is standalone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cadence_db::models::ContentCorrelationRule;

/// Output of [`compute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationPlan {
    pub sm_posts_per_blog: u32,
    pub blog_correlated: u32,
    pub brief_correlated: u32,
    pub standalone: u32,
    pub total: u32,
    /// Whether a stored rule produced these numbers.
    pub from_rule: bool,
}

fn non_negative(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

/// Split `sm_quota` given `blog_count` approved blog topics.
///
/// With `correlate` off (and no rule), the whole quota is standalone.
pub fn compute(
    blog_count: u32,
    sm_quota: u32,
    correlate: bool,
    rule: Option<&ContentCorrelationRule>,
) -> CorrelationPlan {
    if let Some(rule) = rule {
        let per_blog = if correlate {
            non_negative(rule.sm_posts_per_blog)
        } else {
            0
        };
        let blog_correlated = blog_count.saturating_mul(per_blog);
        let brief_correlated = non_negative(rule.brief_based_sm_posts);
        let standalone = non_negative(rule.standalone_sm_posts);
        return CorrelationPlan {
            sm_posts_per_blog: per_blog,
            blog_correlated,
            brief_correlated,
            standalone,
            total: blog_correlated
                .saturating_add(brief_correlated)
                .saturating_add(standalone),
            from_rule: true,
        };
    }

    if !correlate || blog_count == 0 {
        return CorrelationPlan {
            sm_posts_per_blog: 0,
            blog_correlated: 0,
            brief_correlated: 0,
            standalone: sm_quota,
            total: sm_quota,
            from_rule: false,
        };
    }

    let (per_blog, standalone) = if blog_count >= sm_quota {
        // Integer division; 0 when there are more blog topics than posts.
        (sm_quota / blog_count, 0)
    } else {
        (1, sm_quota - blog_count)
    };
    let blog_correlated = blog_count * per_blog;
    CorrelationPlan {
        sm_posts_per_blog: per_blog,
        blog_correlated,
        brief_correlated: 0,
        standalone,
        total: blog_correlated + standalone,
        from_rule: false,
    }
}

/// Break `total` down per platform name.
///
/// `overrides` is the rule's `{platform: count}` object; its counts act as
/// weights scaled to `total` (largest remainder). Without usable overrides
/// the total is spread evenly over `platforms`, earlier names taking the
/// remainder. The sum of the result always equals `total` when any
/// platform is available.
pub fn distribute(total: u32, overrides: &Value, platforms: &[String]) -> BTreeMap<String, u32> {
    let weights: Vec<(String, u64)> = match overrides.as_object() {
        Some(map) if !map.is_empty() => map
            .iter()
            .filter_map(|(name, v)| v.as_u64().map(|w| (name.clone(), w)))
            .collect(),
        _ => Vec::new(),
    };
    let weights = if weights.iter().any(|(_, w)| *w > 0) {
        weights
    } else {
        platforms.iter().map(|p| (p.clone(), 1)).collect()
    };
    if weights.is_empty() {
        return BTreeMap::new();
    }

    let weight_sum: u64 = weights.iter().map(|(_, w)| w).sum();
    let total_u64 = u64::from(total);
    let mut shares: Vec<(String, u64, u64)> = weights
        .into_iter()
        .map(|(name, w)| {
            let exact = total_u64 * w;
            (name, exact / weight_sum, exact % weight_sum)
        })
        .collect();

    let assigned: u64 = shares.iter().map(|(_, n, _)| n).sum();
    let mut leftover = total_u64 - assigned;
    // Largest remainder first; stable sort keeps declaration order on ties.
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| shares[b].2.cmp(&shares[a].2));
    for i in order {
        if leftover == 0 {
            break;
        }
        shares[i].1 += 1;
        leftover -= 1;
    }

    shares
        .into_iter()
        .map(|(name, n, _)| (name, u32::try_from(n).unwrap_or(u32::MAX)))
        .collect()
}
