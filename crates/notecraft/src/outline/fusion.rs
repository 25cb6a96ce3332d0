//! Merging partial outlines into one master outline.

use tracing::{debug, warn};

use super::MasterOutline;
use crate::budget::FUSION_NEAR_LIMIT;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{PipelineEvent, Stage};
use crate::llm::GenerationRequest;
use crate::llm::generation::GenerationState;
use crate::pipeline::StageContext;
use crate::prompts;

/// Fuse ordered partial outlines into a single, globally numbered outline.
///
/// A single partial is returned verbatim without calling the model. Two or
/// more are joined under `--- PARTIAL OUTLINE i ---` separators and sent in
/// one fusion prompt. The prompt size is only warned about, never rejected.
pub async fn fuse(ctx: &StageContext<'_>, partials: &[String]) -> PipelineResult<MasterOutline> {
    match partials {
        [] => return Err(PipelineError::NoPartialOutlines),
        [only] => {
            debug!("One partial outline, using it as the master outline");
            ctx.emit(&PipelineEvent::FusionSkipped);
            return Ok(MasterOutline {
                text: only.clone(),
                fused: false,
                truncated: false,
            });
        }
        _ => {}
    }

    let config = ctx.config();
    let max_tokens = config.fused_outline_tokens;
    let prompt = prompts::fusion(&prompts::join_partial_outlines(partials));
    ctx.check_prompt(Stage::Fusion, &prompt, max_tokens, FUSION_NEAR_LIMIT)
        .await;

    let label = format!("fusion of {} partial outlines", partials.len());
    let request = GenerationRequest::new(prompt, max_tokens, config.fusion_temperature);
    let outcome = ctx.generate(&label, request).await;

    match outcome.state {
        GenerationState::Complete(text) if !text.is_empty() => Ok(MasterOutline {
            text,
            fused: true,
            truncated: false,
        }),
        GenerationState::Truncated(text) if !text.is_empty() => {
            warn!("Master outline hit the {max_tokens}-token output limit and may be incomplete");
            ctx.emit(&PipelineEvent::Truncated {
                stage: Stage::Fusion,
                label: &label,
            });
            Ok(MasterOutline {
                text,
                fused: true,
                truncated: true,
            })
        }
        GenerationState::Failed(reason) => Err(PipelineError::FusionFailed(reason)),
        _ => Err(PipelineError::FusionFailed(
            "the model returned an empty outline".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::LlmError;
    use crate::llm::Generation;
    use crate::test_support::WordModel;

    #[tokio::test]
    async fn empty_input_is_fatal() {
        let model = WordModel::new(|_| Ok(Generation::stop("x")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let err = fuse(&ctx, &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoPartialOutlines));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn single_partial_is_returned_verbatim() {
        let model = WordModel::new(|_| Ok(Generation::stop("should not be used")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let partial = "1. Only topic\n1.1. Detail".to_string();
        let master = fuse(&ctx, std::slice::from_ref(&partial)).await.unwrap();
        assert_eq!(master.text, partial);
        assert!(!master.fused);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn partials_are_joined_in_order() {
        let model = WordModel::new(|_| Ok(Generation::stop("1. A\n2. B")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let partials = vec!["1. First".to_string(), "1. Second".to_string()];
        let master = fuse(&ctx, &partials).await.unwrap();
        assert!(master.fused);
        assert_eq!(master.text, "1. A\n2. B");

        let prompt = &model.prompts()[0];
        let first = prompt.find("--- PARTIAL OUTLINE 1 ---\n1. First").unwrap();
        let second = prompt.find("--- PARTIAL OUTLINE 2 ---\n1. Second").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn empty_or_failed_fusion_is_fatal() {
        let partials = vec!["1. A".to_string(), "1. B".to_string()];

        let empty = WordModel::new(|_| Ok(Generation::stop("")));
        let ctx = StageContext::new(&empty, PipelineConfig::default());
        assert!(matches!(
            fuse(&ctx, &partials).await,
            Err(PipelineError::FusionFailed(_))
        ));

        let failing = WordModel::new(|_| Err(LlmError::Api("model overloaded".into())));
        let ctx = StageContext::new(&failing, PipelineConfig::default());
        assert!(matches!(
            fuse(&ctx, &partials).await,
            Err(PipelineError::FusionFailed(_))
        ));
    }

    #[tokio::test]
    async fn truncated_fusion_is_kept() {
        let model = WordModel::new(|_| Ok(Generation::length("1. A\n2. B (cut")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let partials = vec!["1. A".to_string(), "1. B".to_string()];
        let master = fuse(&ctx, &partials).await.unwrap();
        assert!(master.truncated);
        assert!(master.fused);
    }
}
