use crate::backend::{SessionId, UiBackend};
use crate::element::Element;
use crate::errors::ControlError;
use crate::selector::{LocatorSpec, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

// Bounds for the per-strategy attempt window. One slow or absent strategy
// must never starve the candidates behind it.
const MIN_STRATEGY_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_STRATEGY_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves a [`LocatorSpec`] against the live session.
///
/// Candidate strategies are tried strictly in declared order; the first one
/// that yields at least one element short-circuits the rest, and no strategy
/// is retried within a single resolve call. Each attempt gets its own
/// bounded timeout.
pub struct Locator {
    backend: Arc<dyn UiBackend>,
    session: SessionId,
    spec: LocatorSpec,
    strategy_timeout: Duration,
}

impl Locator {
    pub fn new(
        backend: Arc<dyn UiBackend>,
        session: SessionId,
        spec: LocatorSpec,
        strategy_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            session,
            spec,
            strategy_timeout: strategy_timeout.clamp(MIN_STRATEGY_TIMEOUT, MAX_STRATEGY_TIMEOUT),
        }
    }

    /// One bounded attempt for one strategy. `Ok(None)` is a miss; real
    /// session failures (transport, backend gone) propagate so the recovery
    /// policy can see them.
    async fn attempt(&self, selector: &Selector) -> Result<Option<Vec<Element>>, ControlError> {
        let found = tokio::time::timeout(
            self.strategy_timeout,
            self.backend.find_elements(&self.session, selector),
        )
        .await;
        match found {
            Ok(Ok(refs)) if refs.is_empty() => Ok(None),
            Ok(Ok(refs)) => Ok(Some(
                refs.into_iter()
                    .map(|raw| Element::new(self.backend.clone(), self.session.clone(), raw))
                    .collect(),
            )),
            Ok(Err(ControlError::ElementNotFound(_))) | Ok(Err(ControlError::Timeout(_))) => {
                Ok(None)
            }
            Ok(Err(ControlError::InvalidSelector(reason))) => {
                // A misconfigured candidate is skipped, not fatal; the rest
                // of the chain may still match.
                warn!(name = %self.spec.name, %reason, "skipping invalid selector candidate");
                Ok(None)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(name = %self.spec.name, selector = %selector, "strategy attempt timed out");
                Ok(None)
            }
        }
    }

    /// All elements from the first matching strategy, in backend order.
    #[instrument(level = "debug", skip(self), fields(name = %self.spec.name))]
    pub async fn resolve_all(&self) -> Result<Vec<Element>, ControlError> {
        let mut tried = Vec::with_capacity(self.spec.candidates.len());
        for selector in &self.spec.candidates {
            tried.push(selector.to_string());
            if let Some(elements) = self.attempt(selector).await? {
                debug!(selector = %selector, count = elements.len(), "strategy matched");
                return Ok(elements);
            }
        }
        Err(ControlError::ElementNotFound(format!(
            "no strategy matched for '{}', tried: [{}]",
            self.spec.name,
            tried.join(", ")
        )))
    }

    /// The first element of the first matching strategy.
    pub async fn resolve(&self) -> Result<Element, ControlError> {
        let mut elements = self.resolve_all().await?;
        Ok(elements.remove(0))
    }

    /// Disambiguation rule for list queries: pick the highest-index match.
    /// Content lists render newest-last, so the last entry is the most
    /// recent candidate.
    pub async fn resolve_newest(&self) -> Result<Element, ControlError> {
        let mut elements = self.resolve_all().await?;
        elements
            .pop()
            .ok_or_else(|| ControlError::Internal("resolve_all returned an empty match".to_string()))
    }

    /// Resolve and click in one step. The click is the single observable
    /// side effect; callers retrying this must not expect two independent
    /// interactions.
    pub async fn click(&self) -> Result<(), ControlError> {
        self.resolve().await?.click().await
    }
}
