use mailgen_core::errors::GatewayError;
use mailgen_core::ids::DraftId;
use mailgen_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Provider missing, unreachable, timed out, or answered with an error.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] GatewayError),

    /// Provider answered but without usable text.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("{failed} of {total} sends failed")]
    PartialSendFailure { failed: usize, total: usize },

    #[error("draft not found: {0}")]
    DraftNotFound(DraftId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
