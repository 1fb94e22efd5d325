use crate::backend::{ElementRef, Rect, SessionId, UiBackend};
use crate::errors::ControlError;
use std::sync::Arc;

/// A located element bound to the session it was found in.
///
/// Handles are transient: they are created during one workflow cycle and
/// discarded with it, never persisted or carried across a reconnect.
#[derive(Clone)]
pub struct Element {
    backend: Arc<dyn UiBackend>,
    session: SessionId,
    raw: ElementRef,
}

impl Element {
    pub(crate) fn new(backend: Arc<dyn UiBackend>, session: SessionId, raw: ElementRef) -> Self {
        Self {
            backend,
            session,
            raw,
        }
    }

    pub fn id(&self) -> &str {
        &self.raw.0
    }

    pub async fn click(&self) -> Result<(), ControlError> {
        self.backend.click(&self.session, &self.raw).await
    }

    pub async fn rect(&self) -> Result<Rect, ControlError> {
        self.backend.element_rect(&self.session, &self.raw).await
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("session", &self.session)
            .field("ref", &self.raw.0)
            .finish()
    }
}
