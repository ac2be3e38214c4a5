use async_trait::async_trait;

use crate::{domain::Verdict, Result};

/// Port for the external content-classification service.
///
/// The OpenAI moderation adapter is the first implementation. `classify` must
/// be safe to call with arbitrary untrusted text; a service outage surfaces
/// as `Error::Classification`, never as a flagged verdict.
#[async_trait]
pub trait ClassifierPort: Send + Sync {
    /// True when the client has no usable credential and every call
    /// short-circuits to a fail-open verdict. The pipeline logs such
    /// messages as "unchecked" rather than "verified clean".
    fn is_degraded(&self) -> bool;

    async fn classify(&self, content: &str) -> Result<Verdict>;
}
