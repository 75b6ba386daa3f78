//! Built-in prompt templates, used when neither an organization override
//! nor a global row exists in the store.

pub const TOPIC_GENERATION: &str = "topic_generation";
pub const SM_TOPICS_CORRELATED: &str = "sm_topics_correlated";
pub const SM_TOPICS_BRIEF: &str = "sm_topics_brief";
pub const SM_TOPICS_STANDALONE: &str = "sm_topics_standalone";
pub const VARIANT_AUTHOR: &str = "variant_author";
pub const VARIANT_REVIEW: &str = "variant_review";
pub const VARIANT_IMPROVE: &str = "variant_improve";
pub const SCHEDULE: &str = "schedule";

const CONTEXT_BLOCK: &str = "\
Organization: {organization} ({industry})
About: {description}
Planning period: {period}
Goals: {goals}
Audience personas: {personas}
Tone of voice: {tone}
Mandatory topics: {mandatory_topics}
Content instructions: {content_instructions}
Company news: {company_news}
Key messages: {key_messages}
Key topics: {key_topics}
Priority items: {priority_items}
Research insights: {research}
Do NOT propose anything similar to these previously rejected topics: {rejected_topics}";

const TOPIC_JSON_SHAPE: &str = r#"Respond with ONLY a JSON array, no commentary:
[{"title": "...", "description": "...", "priority": 1-5, "reasoning": "..."}]"#;

/// The built-in body for `name`, if one exists.
pub fn builtin(name: &str) -> Option<String> {
    let body = match name {
        TOPIC_GENERATION => format!(
            "You are a content strategist.\n{CONTEXT_BLOCK}\n\n\
             Propose {{count}} distinct blog post topics for this period. Cover the mandatory \
             topics first, then company news and priority items.\n{TOPIC_JSON_SHAPE}"
        ),
        SM_TOPICS_CORRELATED => format!(
            "You are a social media strategist.\n{CONTEXT_BLOCK}\n\n\
             Propose {{count}} social media post topics that promote this blog post:\n\
             Title: {{parent_title}}\nSummary: {{parent_description}}\n\
             Each topic must stand on its own while pointing readers to the article.\n\
             {TOPIC_JSON_SHAPE}"
        ),
        SM_TOPICS_BRIEF => format!(
            "You are a social media strategist.\n{CONTEXT_BLOCK}\n\n\
             Propose {{count}} social media post topics based strictly on the brief content \
             above (company news, key messages, priority items).\n{TOPIC_JSON_SHAPE}"
        ),
        SM_TOPICS_STANDALONE => format!(
            "You are a social media strategist.\n{CONTEXT_BLOCK}\n\n\
             Propose {{count}} standalone social media post topics that are not tied to any \
             blog article.\n{TOPIC_JSON_SHAPE}"
        ),
        VARIANT_AUTHOR => format!(
            "You are writing for {{platform}} ({{platform_kind}}).\n{CONTEXT_BLOCK}\n\n\
             Topic: {{topic_title}}\nBrief: {{topic_description}}\n\
             Maximum length: {{max_length}} characters.\nPlatform style rules: {{style_rules}}\n\
             Hashtags: {{hashtag_policy}}\nPreferred phrases: {{preferred_phrases}}\n\
             Never use: {{forbidden_phrases}}\nCall-to-action rules: {{cta_rules}}\n\
             {{guidance}}\n\
             Write exactly ONE post. For long-form content start with a `# ` headline. \
             Put a call to action on a final line starting with `CTA:`."
        ),
        VARIANT_REVIEW => "\
You are a demanding editor reviewing a {platform} post about \"{topic_title}\".
Required tone: {tone}. Forbidden phrases: {forbidden_phrases}. Maximum length: {max_length}.

{content}

If the post is ready to publish, answer with the single word APPROVED.
Otherwise list concrete, actionable changes."
            .to_string(),
        VARIANT_IMPROVE => "\
Revise this {platform} post about \"{topic_title}\" using the editor feedback.
Platform style rules: {style_rules}. Maximum length: {max_length}.

Current post:
{content}

Feedback:
{feedback}

Return only the revised post."
            .to_string(),
        SCHEDULE => r#"You are a publication planner for {organization}.
Planning period: {period}
Scheduling rules:
{preferences}

Approved content ({count} items):
{variants}

Assign each item a publication slot. Respond with ONLY a JSON array:
[{"content_variant_id": "<id>", "publication_date": "YYYY-MM-DD HH:MM", "reason": "..."}]"#
            .to_string(),
        _ => return None,
    };
    Some(body)
}

/// Every name with a built-in body.
pub const ALL: &[&str] = &[
    TOPIC_GENERATION,
    SM_TOPICS_CORRELATED,
    SM_TOPICS_BRIEF,
    SM_TOPICS_STANDALONE,
    VARIANT_AUTHOR,
    VARIANT_REVIEW,
    VARIANT_IMPROVE,
    SCHEDULE,
];
