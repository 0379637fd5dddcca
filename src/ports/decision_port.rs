//! Decision source port trait.

use async_trait::async_trait;

use crate::domain::decision::{Decision, DecisionRequest};
use crate::domain::error::DecisionSourceError;

/// An external party that turns market state into a trade [`Decision`].
///
/// Implementations may be slow or unreliable. The driver wraps every call in
/// [`ask_source`](crate::domain::decision::ask_source), which applies a
/// deadline and turns any error into HOLD.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Stable identifier recorded on every decision this source produces.
    fn id(&self) -> &str;

    async fn get_decision(
        &self,
        request: &DecisionRequest,
    ) -> Result<Decision, DecisionSourceError>;
}
