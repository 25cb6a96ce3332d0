//! One-at-a-time access to an LLM capability.
//!
//! A local inference server processes one prompt at a time. Pipelines issue
//! their calls sequentially already; [`Serialized`] extends that guarantee
//! across independent pipeline runs sharing one model (the HTTP boundary
//! serves many requests concurrently).

use tokio::sync::Mutex;

use super::{Generation, GenerationRequest, LlmFuture, TextGenerator, TokenId, Tokenizer};

/// Wraps a model so at most one tokenize/detokenize/generate call is in
/// flight at a time.
pub struct Serialized<M> {
    inner: M,
    gate: Mutex<()>,
}

impl<M> Serialized<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: Tokenizer> Tokenizer for Serialized<M> {
    fn tokenize<'a>(&'a self, text: &'a str) -> LlmFuture<'a, Vec<TokenId>> {
        Box::pin(async move {
            let _guard = self.gate.lock().await;
            self.inner.tokenize(text).await
        })
    }

    fn detokenize<'a>(&'a self, tokens: &'a [TokenId]) -> LlmFuture<'a, String> {
        Box::pin(async move {
            let _guard = self.gate.lock().await;
            self.inner.detokenize(tokens).await
        })
    }
}

impl<M: TextGenerator> TextGenerator for Serialized<M> {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async move {
            let _guard = self.gate.lock().await;
            self.inner.generate(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Generator that tracks how many calls overlap.
    struct Probe {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl TextGenerator for Probe {
        fn generate<'a>(&'a self, _request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Generation::stop("ok"))
            })
        }
    }

    #[tokio::test]
    async fn concurrent_calls_do_not_overlap() {
        let model = Arc::new(Serialized::new(Probe {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        }));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let model = Arc::clone(&model);
            handles.push(tokio::spawn(async move {
                let request = GenerationRequest::new("p", 8, 0.0);
                model.generate(&request).await.unwrap().text
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "ok");
        }
        assert_eq!(model.inner().max_seen.load(Ordering::SeqCst), 1);
    }
}
