//! The seam between the controller and the remote-control backend.
//!
//! Everything above this module talks to the backend through the
//! [`UiBackend`] trait; [`WireBackend`] is the production implementation
//! speaking the WebDriver/Appium JSON wire protocol over HTTP. Tests swap in
//! a scripted backend.

use crate::config::DeviceCaps;
use crate::errors::ControlError;
use crate::selector::Selector;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

pub type SessionId = String;

/// Opaque reference to an element located in the current UI state. Only
/// valid for the session that produced it, and only until the screen moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// On-screen bounds of an element, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Message marker the backend emits when its automation instrumentation has
/// died under a live session. Recovery classification keys off this.
pub const INSTRUMENTATION_DOWN: &str = "instrumentation process is not running";

/// Request/response surface of the remote-control backend.
///
/// One logical session drives one remote target at a time; the session
/// manager is the sole creator and destroyer of sessions.
#[async_trait]
pub trait UiBackend: Send + Sync {
    /// Whether the backend's control endpoint is up and accepting sessions.
    async fn status(&self) -> Result<bool, ControlError>;

    async fn create_session(&self, caps: &DeviceCaps) -> Result<SessionId, ControlError>;
    async fn delete_session(&self, session: &SessionId) -> Result<(), ControlError>;

    /// All elements matching `selector`, in backend rendering order. An
    /// empty vec is a miss, not an error.
    async fn find_elements(
        &self,
        session: &SessionId,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, ControlError>;

    async fn click(&self, session: &SessionId, element: &ElementRef) -> Result<(), ControlError>;
    async fn element_rect(
        &self,
        session: &SessionId,
        element: &ElementRef,
    ) -> Result<Rect, ControlError>;

    async fn press_back(&self, session: &SessionId) -> Result<(), ControlError>;
    async fn swipe(
        &self,
        session: &SessionId,
        from: (i64, i64),
        to: (i64, i64),
        duration_ms: u64,
    ) -> Result<(), ControlError>;

    async fn clipboard_text(&self, session: &SessionId) -> Result<String, ControlError>;
    async fn activate_app(&self, session: &SessionId, package: &str) -> Result<(), ControlError>;

    /// Lightweight liveness probe: name of the current foreground context.
    async fn current_activity(&self, session: &SessionId) -> Result<String, ControlError>;
}

/// Map a selector onto the `(using, value)` pair the wire protocol expects.
/// Text selectors compile to a native automator program because the mobile
/// protocol has no first-class text strategy.
fn wire_strategy(selector: &Selector) -> Result<(&'static str, String), ControlError> {
    match selector {
        Selector::Id(v) => Ok(("id", v.clone())),
        Selector::AccessibilityId(v) => Ok(("accessibility id", v.clone())),
        Selector::XPath(v) => Ok(("xpath", v.clone())),
        Selector::ClassName(v) => Ok(("class name", v.clone())),
        Selector::Automator(v) => Ok(("-android uiautomator", v.clone())),
        Selector::Text(v) => Ok((
            "-android uiautomator",
            format!("new UiSelector().textContains({v:?})"),
        )),
        Selector::Invalid(reason) => Err(ControlError::InvalidSelector(reason.clone())),
    }
}

/// HTTP client for a WebDriver/Appium-compatible control endpoint.
pub struct WireBackend {
    base_url: String,
    client: reqwest::Client,
}

impl WireBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ControlError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body and unwrap the protocol's `value` envelope.
    async fn post(&self, path: &str, body: Value) -> Result<Value, ControlError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::unwrap_value(resp).await
    }

    async fn get(&self, path: &str) -> Result<Value, ControlError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)?;
        Self::unwrap_value(resp).await
    }

    async fn unwrap_value(resp: reqwest::Response) -> Result<Value, ControlError> {
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ControlError::Protocol(format!("malformed wire response: {e}")))?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(value);
        }
        Err(wire_error(&value, status.as_u16()))
    }
}

fn transport_error(e: reqwest::Error) -> ControlError {
    if e.is_connect() {
        ControlError::ConnectError(e.to_string())
    } else if e.is_timeout() {
        ControlError::Timeout(e.to_string())
    } else {
        ControlError::Transport(e.to_string())
    }
}

/// Translate a wire-level error payload into the controller taxonomy.
fn wire_error(value: &Value, http_status: u16) -> ControlError {
    let code = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no error message")
        .to_string();

    if message.contains(INSTRUMENTATION_DOWN) {
        return ControlError::BackendGone(message);
    }
    match code {
        "no such element" => ControlError::ElementNotFound(message),
        "timeout" => ControlError::Timeout(message),
        "invalid session id" | "no such driver" => ControlError::Transport(message),
        "session not created" => ControlError::ConnectError(message),
        _ => ControlError::Protocol(format!("{code} (HTTP {http_status}): {message}")),
    }
}

#[async_trait]
impl UiBackend for WireBackend {
    async fn status(&self) -> Result<bool, ControlError> {
        match self.get("/status").await {
            Ok(value) => Ok(value
                .get("ready")
                .and_then(Value::as_bool)
                .unwrap_or(true)),
            Err(ControlError::ConnectError(_)) | Err(ControlError::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, caps))]
    async fn create_session(&self, caps: &DeviceCaps) -> Result<SessionId, ControlError> {
        let body = json!({
            "capabilities": { "alwaysMatch": caps.to_wire(), "firstMatch": [{}] }
        });
        let value = self.post("/session", body).await.map_err(|e| match e {
            ControlError::Transport(m) | ControlError::Protocol(m) => ControlError::ConnectError(m),
            other => other,
        })?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ControlError::Protocol("session response carried no sessionId".to_string())
            })?;
        debug!(session_id, "created backend session");
        Ok(session_id.to_string())
    }

    async fn delete_session(&self, session: &SessionId) -> Result<(), ControlError> {
        let resp = self
            .client
            .delete(self.url(&format!("/session/{session}")))
            .send()
            .await
            .map_err(transport_error)?;
        Self::unwrap_value(resp).await.map(|_| ())
    }

    async fn find_elements(
        &self,
        session: &SessionId,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, ControlError> {
        let (using, value) = wire_strategy(selector)?;
        let body = json!({ "using": using, "value": value });
        let found = match self.post(&format!("/session/{session}/elements"), body).await {
            Ok(v) => v,
            // The list endpoint reports a miss as an empty array, but some
            // backends still answer "no such element".
            Err(ControlError::ElementNotFound(_)) => Value::Array(vec![]),
            Err(e) => return Err(e),
        };
        let refs = found
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .as_object()
                            .and_then(|o| o.values().next())
                            .and_then(Value::as_str)
                            .map(|id| ElementRef(id.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(refs)
    }

    async fn click(&self, session: &SessionId, element: &ElementRef) -> Result<(), ControlError> {
        self.post(
            &format!("/session/{session}/element/{}/click", element.0),
            json!({}),
        )
        .await
        .map(|_| ())
    }

    async fn element_rect(
        &self,
        session: &SessionId,
        element: &ElementRef,
    ) -> Result<Rect, ControlError> {
        let value = self
            .get(&format!("/session/{session}/element/{}/rect", element.0))
            .await?;
        let field = |name: &str| value.get(name).and_then(Value::as_f64).unwrap_or(0.0) as i64;
        Ok(Rect {
            x: field("x"),
            y: field("y"),
            width: field("width"),
            height: field("height"),
        })
    }

    async fn press_back(&self, session: &SessionId) -> Result<(), ControlError> {
        self.post(&format!("/session/{session}/back"), json!({}))
            .await
            .map(|_| ())
    }

    async fn swipe(
        &self,
        session: &SessionId,
        from: (i64, i64),
        to: (i64, i64),
        duration_ms: u64,
    ) -> Result<(), ControlError> {
        // W3C pointer action sequence: press, glide, release.
        let body = json!({
            "actions": [{
                "type": "pointer",
                "id": "finger1",
                "parameters": { "pointerType": "touch" },
                "actions": [
                    { "type": "pointerMove", "duration": 0, "x": from.0, "y": from.1 },
                    { "type": "pointerDown", "button": 0 },
                    { "type": "pointerMove", "duration": duration_ms, "x": to.0, "y": to.1 },
                    { "type": "pointerUp", "button": 0 }
                ]
            }]
        });
        self.post(&format!("/session/{session}/actions"), body)
            .await
            .map(|_| ())
    }

    async fn clipboard_text(&self, session: &SessionId) -> Result<String, ControlError> {
        let value = self
            .post(
                &format!("/session/{session}/appium/device/get_clipboard"),
                json!({ "contentType": "plaintext" }),
            )
            .await?;
        let encoded = value.as_str().unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ControlError::Protocol(format!("clipboard payload not base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| ControlError::Protocol(format!("clipboard payload not UTF-8: {e}")))
    }

    async fn activate_app(&self, session: &SessionId, package: &str) -> Result<(), ControlError> {
        self.post(
            &format!("/session/{session}/appium/device/activate_app"),
            json!({ "appId": package }),
        )
        .await
        .map(|_| ())
    }

    async fn current_activity(&self, session: &SessionId) -> Result<String, ControlError> {
        let value = self
            .get(&format!("/session/{session}/appium/device/current_activity"))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}
