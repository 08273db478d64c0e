//! Seam between the container and the platform web view.

use serde_json::Value;
use std::sync::Arc;
use wx_core::ScriptException;
use wx_ipc::RequestId;
use wx_resources::ResourceRegistry;

/// Why a navigation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationType {
    LinkClicked,
    FormSubmitted,
    BackForward,
    Reload,
    FormResubmitted,
    Other,
}

impl NavigationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkClicked => "linkClicked",
            Self::FormSubmitted => "formSubmitted",
            Self::BackForward => "backForward",
            Self::Reload => "reload",
            Self::FormResubmitted => "formResubmitted",
            Self::Other => "other",
        }
    }
}

/// Result of evaluating a script with the platform's native primitive.
pub type EvaluationOutcome = Result<Value, ScriptException>;

/// Notifications a platform web view delivers to the container.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    LoadStarted {
        url: String,
        navigation_type: NavigationType,
    },
    LoadFinished {
        url: String,
        navigation_type: NavigationType,
    },
    LoadFailed {
        url: String,
        navigation_type: NavigationType,
        error: String,
    },
    EvaluationCompleted {
        request_id: RequestId,
        outcome: EvaluationOutcome,
    },
    /// A string the page posted through `window.__wxHostTransport.post`.
    PageMessage { payload: String },
}

/// Platform web view driven by the container.
///
/// Implementations own page loading, history and the native script
/// execution primitive. They must define `window.__wxHostTransport.post`
/// in every document and report each posted string as
/// [`PlatformEvent::PageMessage`], at least once.
pub trait WebViewBackend {
    /// Serves `scheme://name` requests from `registry`; unresolved names fall through.
    fn install_scheme_handler(&mut self, scheme: &str, registry: Arc<ResourceRegistry>);

    fn navigate(&mut self, url: &str, navigation_type: NavigationType);

    fn reload(&mut self);

    fn go_back(&mut self);

    fn go_forward(&mut self);

    fn can_go_back(&self) -> bool;

    fn can_go_forward(&self) -> bool;

    fn stop_loading(&mut self);

    /// Evaluates `script` in the current document; completion arrives as
    /// [`PlatformEvent::EvaluationCompleted`] carrying `request_id`.
    fn evaluate(&mut self, request_id: RequestId, script: &str);

    /// Drains notifications produced since the last call.
    fn poll_events(&mut self) -> Vec<PlatformEvent>;
}
