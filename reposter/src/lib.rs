//! Resilient session-driven workflow controller for remote UI automation.
//!
//! This crate keeps a long-running acquisition/republish loop alive against
//! a WebDriver/Appium-style backend without human intervention: it resolves
//! elements through ordered fallback strategies, deduplicates content across
//! restarts with a crash-safe ledger, and classifies every failure into an
//! explicit recovery action (retry, reconnect, backend restart, abort).

pub mod backend;
pub mod config;
pub mod driver;
pub mod element;
pub mod errors;
pub mod ledger;
pub mod locator;
pub mod recovery;
pub mod selector;
pub mod session;
pub mod workflow;

pub use backend::{ElementRef, Rect, SessionId, UiBackend, WireBackend};
pub use config::{Config, DeviceCaps};
pub use driver::CycleDriver;
pub use element::Element;
pub use errors::ControlError;
pub use ledger::DedupLedger;
pub use locator::Locator;
pub use recovery::{classify, FailureClass, RecoveryAction, RecoveryPolicy};
pub use selector::{LocatorSpec, Selector};
pub use session::{BackendLauncher, SessionManager, SessionState};
pub use workflow::{ContentCandidate, CycleOutcome, SkipReason, UiMap, Workflow, WorkflowConfig};
