//! Test doubles shared by the unit tests.

use std::sync::Mutex;

use crate::error::LlmError;
use crate::llm::{Generation, GenerationRequest, LlmFuture, TextGenerator, TokenId, Tokenizer};
use crate::retrieval::{SearchFuture, VectorSearch};

type Responder = Box<dyn Fn(&str) -> Result<Generation, LlmError> + Send + Sync>;

/// A model whose tokens are whitespace-delimited words and whose
/// completions come from a closure over the prompt.
pub(crate) struct WordModel {
    vocab: Mutex<Vec<String>>,
    respond: Responder,
    prompts: Mutex<Vec<String>>,
}

impl WordModel {
    pub(crate) fn new(
        respond: impl Fn(&str) -> Result<Generation, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            vocab: Mutex::new(Vec::new()),
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of `generate` calls so far.
    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Tokenizer for WordModel {
    fn tokenize<'a>(&'a self, text: &'a str) -> LlmFuture<'a, Vec<TokenId>> {
        Box::pin(async move {
            let mut vocab = self.vocab.lock().unwrap();
            let ids = text
                .split_whitespace()
                .map(|word| {
                    vocab.push(word.to_string());
                    (vocab.len() - 1) as TokenId
                })
                .collect();
            Ok(ids)
        })
    }

    fn detokenize<'a>(&'a self, tokens: &'a [TokenId]) -> LlmFuture<'a, String> {
        Box::pin(async move {
            let vocab = self.vocab.lock().unwrap();
            let words: Vec<&str> = tokens
                .iter()
                .filter_map(|&id| vocab.get(id as usize).map(String::as_str))
                .collect();
            Ok(words.join(" "))
        })
    }
}

impl TextGenerator for WordModel {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            (self.respond)(&request.prompt)
        })
    }
}

/// A vector-search double returning fixed passages and recording queries.
pub(crate) struct StaticSearch {
    pub(crate) passages: Vec<String>,
    pub(crate) queries: Mutex<Vec<(String, usize)>>,
    pub(crate) populated: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub(crate) fn new(passages: &[&str]) -> Self {
        Self {
            passages: passages.iter().map(|p| p.to_string()).collect(),
            queries: Mutex::new(Vec::new()),
            populated: Mutex::new(Vec::new()),
        }
    }
}

impl VectorSearch for StaticSearch {
    fn populate<'a>(&'a self, texts: &'a [String]) -> SearchFuture<'a, bool> {
        Box::pin(async move {
            self.populated.lock().unwrap().extend(texts.iter().cloned());
            !texts.is_empty()
        })
    }

    fn search<'a>(&'a self, query: &'a str, top_k: usize) -> SearchFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push((query.to_string(), top_k));
            self.passages.iter().take(top_k).cloned().collect()
        })
    }
}

/// `n` distinct filler words: `w0 w1 w2 ...`.
pub(crate) fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
}
