//! Deterministic generators for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerationError, GenerationRequest, TextGenerator};

type Reply = Result<String, GenerationError>;

/// Replays queued replies in order, then repeats `fallback`.
///
/// Every request is recorded and can be inspected with [`requests`](Self::requests).
#[derive(Debug)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: Err(GenerationError::Failed("script exhausted".to_string())),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new([]).with_fallback(Ok(text.into()))
    }

    pub fn with_fallback(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Reply {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Answers each request with a closure over the request.
pub struct FnGenerator<F> {
    respond: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Reply + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

#[async_trait]
impl<F> TextGenerator for FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Reply + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    async fn generate(&self, request: &GenerationRequest) -> Reply {
        (self.respond)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_then_falls_back() {
        let generator = ScriptedGenerator::new([Ok("one".to_string())]);
        let req = GenerationRequest::creative("p", "m");
        assert_eq!(generator.generate(&req).await.unwrap(), "one");
        assert!(generator.generate(&req).await.is_err());
        assert_eq!(generator.call_count(), 2);
    }
}
