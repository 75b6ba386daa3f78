//! Query functions, one module per table group.

pub mod correlation_rules;
pub mod drafts;
pub mod organizations;
pub mod plans;
pub mod prompts;
pub mod scheduled_posts;
pub mod topics;
