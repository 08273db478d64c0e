//! Web view container with local resources and a host/page script bridge.
//!
//! A [`WebView`] drives a platform [`WebViewBackend`] through its load
//! lifecycle and layers on top of it:
//!
//! - a local resource registry served under a virtual scheme (`x-local://`),
//! - one-shot and auto-loaded script/stylesheet injection,
//! - script execution and promise settlement correlated by request token,
//! - a named-event message channel in both directions.
//!
//! Requests issued before a document has loaded wait for the next successful
//! load; requests issued after a failed load are rejected with
//! [`ErrorKind::ChannelUnavailable`].

mod backend;
mod config;
mod events;
mod headless;
mod inject;
mod pending;
mod state;

pub use backend::EvaluationOutcome;
pub use backend::NavigationType;
pub use backend::PlatformEvent;
pub use backend::WebViewBackend;
pub use config::StylesheetInjection;
pub use config::WebViewConfig;
pub use events::Subscription;
pub use events::WebViewEvent;
pub use events::WebViewEventKind;
pub use headless::HeadlessBackend;
pub use inject::AutoLoadKind;
pub use pending::BridgeOutcome;
pub use pending::PendingResult;
pub use state::LoadState;
pub use wx_core::ErrorKind;
pub use wx_core::ScriptException;
pub use wx_core::WebViewError;
pub use wx_core::WebViewResult;
pub use wx_ipc::RequestId;
pub use wx_resources::ResourceRegistry;

use events::EventHub;
use inject::AutoLoad;
use inject::AutoLoadList;
use pending::PendingTable;
use pending::RequestKind;
use serde_json::Value;
use state::Dispatch;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tracing::Span;
use tracing::debug;
use tracing::info;
use tracing::info_span;
use tracing::warn;
use url::Url;
use wx_ipc::BRIDGE_SCRIPT;
use wx_ipc::PageMessage;
use wx_ipc::RequestIdAllocator;
use wx_ipc::decode_page_message;
use wx_ipc::host_event_script;
use wx_ipc::promise_script;
use wx_ipc::stringified_script;
use wx_resources::normalize_name;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct QueuedScript {
    id: RequestId,
    script: String,
}

pub struct WebView<B: WebViewBackend> {
    backend: B,
    config: WebViewConfig,
    registry: Arc<ResourceRegistry>,
    ids: RequestIdAllocator,
    pending: PendingTable,
    queued: VecDeque<QueuedScript>,
    auto_loads: AutoLoadList,
    events: EventHub,
    state: LoadState,
    src: Option<String>,
    url: Option<String>,
    span: Span,
}

impl WebView<HeadlessBackend> {
    /// Container over the in-process [`HeadlessBackend`].
    pub fn headless(config: WebViewConfig) -> WebViewResult<Self> {
        Self::new(HeadlessBackend::default(), config)
    }
}

impl<B: WebViewBackend> WebView<B> {
    pub fn new(mut backend: B, config: WebViewConfig) -> WebViewResult<Self> {
        config.validate()?;

        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("webview", instance);
        let registry = Arc::new(ResourceRegistry::new(
            config.scheme.clone(),
            config.app_root.clone(),
        ));
        backend.install_scheme_handler(&config.scheme, Arc::clone(&registry));

        Ok(Self {
            backend,
            config,
            registry,
            ids: RequestIdAllocator::default(),
            pending: PendingTable::default(),
            queued: VecDeque::new(),
            auto_loads: AutoLoadList::default(),
            events: EventHub::default(),
            state: LoadState::Idle,
            src: None,
            url: None,
            span,
        })
    }

    pub fn config(&self) -> &WebViewConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn load_state(&self) -> &LoadState {
        &self.state
    }

    /// Source last assigned with [`WebView::set_src`], as given.
    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    /// URL of the last successfully loaded document.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Requests still waiting for a page response, queued ones included.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_requests(&self) -> usize {
        self.queued.len()
    }

    /// Navigates to `src`.
    ///
    /// `~/` paths resolve against the configured app root, absolute paths
    /// load as `file://` URLs and anything else must be a URL.
    pub fn set_src(&mut self, src: &str) -> WebViewResult<()> {
        let span = self.span.clone();
        let _entered = span.enter();

        let url = resolve_src(src, &self.config.app_root)?;
        info!(src, url = url.as_str(), "navigating");
        self.src = Some(src.to_owned());
        self.state = LoadState::Loading;
        self.backend.navigate(&url, NavigationType::Other);
        self.pump();
        Ok(())
    }

    pub fn reload(&mut self) {
        self.navigate_with(|backend| backend.reload());
    }

    pub fn go_back(&mut self) {
        if self.backend.can_go_back() {
            self.navigate_with(|backend| backend.go_back());
        }
    }

    pub fn go_forward(&mut self) {
        if self.backend.can_go_forward() {
            self.navigate_with(|backend| backend.go_forward());
        }
    }

    pub fn can_go_back(&self) -> bool {
        self.backend.can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        self.backend.can_go_forward()
    }

    pub fn stop_loading(&mut self) {
        self.navigate_with(|backend| backend.stop_loading());
    }

    fn navigate_with(&mut self, action: impl FnOnce(&mut B)) {
        let span = self.span.clone();
        let _entered = span.enter();
        action(&mut self.backend);
        self.pump();
    }

    /// Serves the file at `path` as `<scheme>://<name>`. Re-registering a name
    /// replaces its entry.
    pub fn register_local_resource(&mut self, name: &str, path: &str) -> WebViewResult<()> {
        self.registry.register(name, path).map(|_| ())
    }

    /// Unknown names are ignored.
    pub fn unregister_local_resource(&mut self, name: &str) {
        if self.registry.unregister(name).is_none() {
            debug!(parent: &self.span, resource = name, "unregister ignored; name not registered");
        }
    }

    pub fn registered_local_resource(&self, name: &str) -> Option<PathBuf> {
        self.registry.entry(name).map(|entry| entry.source_path)
    }

    /// Registers `path` under `name` and injects it into the current document.
    pub fn load_javascript_file(&mut self, name: &str, path: &str) -> WebViewResult<PendingResult> {
        self.with_registration(name, path, |view, name| {
            let statement = inject::javascript_file_statement(&view.registry, name)?;
            Ok(view.submit(
                statement,
                RequestKind::Value { stringified: false },
                format!("load-javascript:{name}"),
            ))
        })
    }

    pub fn load_stylesheet_file(&mut self, name: &str, path: &str) -> WebViewResult<PendingResult> {
        self.with_registration(name, path, |view, name| {
            let statement = inject::stylesheet_file_statement(
                &view.registry,
                name,
                view.config.stylesheet_injection,
            )?;
            Ok(view.submit(
                statement,
                RequestKind::Value { stringified: false },
                format!("load-stylesheet:{name}"),
            ))
        })
    }

    /// Injects each `(name, path)` in slice order.
    pub fn load_javascript_files(
        &mut self,
        files: &[(&str, &str)],
    ) -> WebViewResult<Vec<PendingResult>> {
        files
            .iter()
            .map(|(name, path)| self.load_javascript_file(name, path))
            .collect()
    }

    pub fn load_stylesheet_files(
        &mut self,
        files: &[(&str, &str)],
    ) -> WebViewResult<Vec<PendingResult>> {
        files
            .iter()
            .map(|(name, path)| self.load_stylesheet_file(name, path))
            .collect()
    }

    /// Injects `path` now, if a document is loaded, and after every later load.
    pub fn auto_load_javascript_file(&mut self, name: &str, path: &str) -> WebViewResult<()> {
        self.with_registration(name, path, |view, name| {
            view.add_auto_load(AutoLoad {
                kind: AutoLoadKind::JavaScriptFile,
                name: name.to_owned(),
                source: None,
            })
        })
    }

    /// Stops re-injection; content already in the document stays.
    pub fn remove_auto_load_javascript_file(&mut self, name: &str) -> bool {
        self.remove_auto_load(AutoLoadKind::JavaScriptFile, name)
    }

    pub fn auto_load_stylesheet_file(&mut self, name: &str, path: &str) -> WebViewResult<()> {
        self.with_registration(name, path, |view, name| {
            view.add_auto_load(AutoLoad {
                kind: AutoLoadKind::StyleSheetFile,
                name: name.to_owned(),
                source: None,
            })
        })
    }

    pub fn remove_auto_load_stylesheet_file(&mut self, name: &str) -> bool {
        self.remove_auto_load(AutoLoadKind::StyleSheetFile, name)
    }

    /// Runs `source` now, if a document is loaded, and after every later load.
    pub fn auto_execute_javascript(&mut self, name: &str, source: &str) -> WebViewResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "inject.name_empty",
                "auto-executed script name must not be empty",
            ));
        }

        self.add_auto_load(AutoLoad {
            kind: AutoLoadKind::JavaScriptCode,
            name: name.to_owned(),
            source: Some(source.to_owned()),
        })
    }

    pub fn remove_auto_execute_javascript(&mut self, name: &str) -> bool {
        self.remove_auto_load(AutoLoadKind::JavaScriptCode, name)
    }

    /// Auto-load names of `kind`, in the order they are applied.
    pub fn auto_loads(&self, kind: AutoLoadKind) -> Vec<String> {
        self.auto_loads.names(kind)
    }

    /// Registers `path` under the normalized `name`, then runs `apply` with
    /// that name. A failing `apply` restores whatever `name` mapped to before.
    fn with_registration<T>(
        &mut self,
        name: &str,
        path: &str,
        apply: impl FnOnce(&mut Self, &str) -> WebViewResult<T>,
    ) -> WebViewResult<T> {
        let name = normalize_name(name)?.to_owned();
        let previous = self.registry.register(&name, path)?;
        apply(self, name.as_str()).inspect_err(|error| {
            debug!(parent: &self.span, resource = name.as_str(), code = error.code, "registration rolled back");
            self.registry.reinstate(&name, previous);
        })
    }

    fn add_auto_load(&mut self, entry: AutoLoad) -> WebViewResult<()> {
        let statement = entry.statement(&self.registry, self.config.stylesheet_injection)?;
        let label = format!("{}:{}", entry.kind.as_str(), entry.name);
        debug!(parent: &self.span, auto_load = label.as_str(), "auto-load registered");
        self.auto_loads.upsert(entry);

        if self.state.is_loaded() {
            let span = self.span.clone();
            let _entered = span.enter();
            self.submit_internal(statement, label);
            self.pump();
        }
        Ok(())
    }

    fn remove_auto_load(&mut self, kind: AutoLoadKind, name: &str) -> bool {
        let name = name.trim();
        let removed = self.auto_loads.remove(kind, name);
        debug!(parent: &self.span, kind = kind.as_str(), resource = name, removed, "auto-load removed");
        removed
    }

    /// Evaluates `source` in the page, marshaling the result the configured way.
    pub fn execute_javascript(&mut self, source: &str) -> PendingResult {
        let stringify = self.config.stringify_results_by_default;
        self.execute_javascript_with(source, stringify)
    }

    /// Evaluates `source` in the page.
    ///
    /// With `stringify_result` the page serializes the value to JSON text and
    /// the host parses it back; the caller receives the same value either way.
    /// A thrown exception rejects with [`ErrorKind::ScriptEvaluation`].
    pub fn execute_javascript_with(&mut self, source: &str, stringify_result: bool) -> PendingResult {
        let script = if stringify_result {
            stringified_script(source)
        } else {
            source.to_owned()
        };
        self.submit(
            script,
            RequestKind::Value {
                stringified: stringify_result,
            },
            "execute-javascript",
        )
    }

    /// Evaluates `source` and resolves with the value its promise settles to.
    ///
    /// A rejection surfaces as [`ErrorKind::PromiseRejected`] carrying the
    /// page's reason. There is no timeout.
    pub fn execute_promise(&mut self, source: &str) -> PendingResult {
        let id = self.ids.next_id();
        let script = promise_script(id, source);
        self.submit_with_id(id, script, RequestKind::Promise, "execute-promise")
    }

    /// Delivers `data` to page listeners registered with `wxBridge.on(name, ...)`.
    ///
    /// Resolves with the number of listeners that ran.
    pub fn emit_to_web_view(&mut self, name: &str, data: &Value) -> WebViewResult<PendingResult> {
        let script = host_event_script(name, data, &self.config.channel)?;
        Ok(self.submit(
            script,
            RequestKind::Value { stringified: false },
            format!("emit:{name}"),
        ))
    }

    /// Resolves with the current document's title.
    pub fn title(&mut self) -> PendingResult {
        self.execute_javascript_with("document.title", false)
    }

    pub fn on<F>(&self, kind: WebViewEventKind, handler: F) -> Subscription
    where
        F: FnMut(&WebViewEvent) + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn listener_count(&self, kind: WebViewEventKind) -> usize {
        self.events.listener_count(kind)
    }

    /// Processes everything the backend has reported; returns the number of
    /// platform events handled.
    pub fn pump(&mut self) -> usize {
        let span = self.span.clone();
        let _entered = span.enter();

        let mut handled = 0_usize;
        loop {
            let batch = self.backend.poll_events();
            if batch.is_empty() {
                break;
            }
            for event in batch {
                self.process_event(event);
                handled = handled.saturating_add(1);
            }
        }
        handled
    }

    /// Entry point for backends that push notifications.
    pub fn handle_platform_event(&mut self, event: PlatformEvent) {
        let span = self.span.clone();
        let _entered = span.enter();
        self.process_event(event);
        self.pump();
    }

    fn submit(
        &mut self,
        script: String,
        kind: RequestKind,
        label: impl Into<String>,
    ) -> PendingResult {
        let id = self.ids.next_id();
        self.submit_with_id(id, script, kind, label)
    }

    fn submit_with_id(
        &mut self,
        id: RequestId,
        script: String,
        kind: RequestKind,
        label: impl Into<String>,
    ) -> PendingResult {
        let span = self.span.clone();
        let _entered = span.enter();

        let (result, responder) = PendingResult::new(id);
        if let Err(error) = self.pending.insert(id, kind, label, Some(responder)) {
            return PendingResult::failed(id, error);
        }
        self.dispatch(id, script);
        self.pump();
        result
    }

    fn submit_internal(&mut self, script: String, label: String) {
        let id = self.ids.next_id();
        if let Err(error) = self.pending.insert(
            id,
            RequestKind::Value { stringified: false },
            label,
            None,
        ) {
            warn!(request = %id, %error, "internal request not tracked");
            return;
        }
        self.dispatch(id, script);
    }

    fn dispatch(&mut self, id: RequestId, script: String) {
        match self.state.dispatch() {
            Dispatch::Run => {
                debug!(request = %id, "dispatching to page");
                self.backend.evaluate(id, &script);
            }
            Dispatch::Queue => {
                debug!(request = %id, state = self.state.as_str(), "queued until load finishes");
                self.queued.push_back(QueuedScript { id, script });
            }
            Dispatch::Reject => {
                let error = self.unavailable();
                self.pending.reject(id, error);
            }
        }
    }

    fn unavailable(&self) -> WebViewError {
        WebViewError::new(
            ErrorKind::ChannelUnavailable,
            "bridge.unavailable",
            format!(
                "no document is loaded: {}",
                self.state.error().unwrap_or("load failed")
            ),
        )
    }

    fn process_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::LoadStarted {
                url,
                navigation_type,
            } => {
                debug!(url = url.as_str(), navigation = navigation_type.as_str(), "load started");
                self.state = LoadState::Loading;
                self.events.emit(&WebViewEvent::LoadStarted {
                    url,
                    navigation_type,
                });
            }
            PlatformEvent::LoadFinished {
                url,
                navigation_type,
            } => self.finish_load(url, navigation_type),
            PlatformEvent::LoadFailed {
                url,
                navigation_type,
                error,
            } => self.fail_load(url, navigation_type, error),
            PlatformEvent::EvaluationCompleted {
                request_id,
                outcome,
            } => self.pending.complete_evaluation(request_id, outcome),
            PlatformEvent::PageMessage { payload } => {
                match decode_page_message(&payload, &self.config.channel) {
                    Ok(PageMessage::Settlement(settlement)) => {
                        debug!(request = %settlement.request_id, ok = settlement.outcome.is_ok(), "promise settled");
                        self.pending.settle(settlement);
                    }
                    Ok(PageMessage::Event { name, data }) => {
                        let delivered = self.events.emit(&WebViewEvent::WebMessage {
                            name: name.clone(),
                            data,
                        });
                        debug!(event = name.as_str(), delivered, "page message");
                    }
                    Err(error) => warn!(%error, "dropping page message"),
                }
            }
        }
    }

    fn finish_load(&mut self, url: String, navigation_type: NavigationType) {
        info!(url = url.as_str(), navigation = navigation_type.as_str(), "document loaded");
        self.state = LoadState::Loaded;
        self.url = Some(url.clone());

        // Registrations apply to the new document before anything runs in it.
        self.backend
            .install_scheme_handler(&self.config.scheme, Arc::clone(&self.registry));
        self.submit_internal(BRIDGE_SCRIPT.to_owned(), "install-bridge".to_owned());

        let statements: Vec<(String, WebViewResult<String>)> = self
            .auto_loads
            .entries()
            .iter()
            .map(|entry| {
                (
                    format!("{}:{}", entry.kind.as_str(), entry.name),
                    entry.statement(&self.registry, self.config.stylesheet_injection),
                )
            })
            .collect();
        for (label, statement) in statements {
            match statement {
                Ok(statement) => {
                    debug!(auto_load = label.as_str(), "re-applying auto-load");
                    self.submit_internal(statement, label);
                }
                Err(error) => warn!(auto_load = label.as_str(), %error, "auto-load skipped"),
            }
        }

        self.events.emit(&WebViewEvent::LoadFinished {
            url,
            navigation_type,
            error: None,
        });

        let queued: Vec<QueuedScript> = self.queued.drain(..).collect();
        if !queued.is_empty() {
            debug!(count = queued.len(), "flushing queued requests");
        }
        for request in queued {
            self.backend.evaluate(request.id, &request.script);
        }
    }

    fn fail_load(&mut self, url: String, navigation_type: NavigationType, error: String) {
        warn!(url = url.as_str(), %error, "document failed to load");
        self.state = LoadState::Failed(error.clone());

        let rejection = self.unavailable();
        let queued: Vec<QueuedScript> = self.queued.drain(..).collect();
        for request in queued {
            self.pending.reject(request.id, rejection.clone());
        }

        self.events.emit(&WebViewEvent::LoadFinished {
            url,
            navigation_type,
            error: Some(error),
        });
    }
}

impl<B: WebViewBackend> std::fmt::Debug for WebView<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebView")
            .field("state", &self.state)
            .field("src", &self.src)
            .field("url", &self.url)
            .field("scheme", &self.config.scheme)
            .field("pending", &self.pending.len())
            .field("queued", &self.queued.len())
            .finish_non_exhaustive()
    }
}

fn resolve_src(src: &str, app_root: &Path) -> WebViewResult<String> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Err(WebViewError::new(
            ErrorKind::InvalidInput,
            "navigation.src_empty",
            "src must not be empty",
        ));
    }

    let local_path = if let Some(relative) = trimmed.strip_prefix("~/") {
        Some(app_root.join(relative))
    } else if trimmed.starts_with('/') {
        Some(PathBuf::from(trimmed))
    } else {
        None
    };

    match local_path {
        Some(path) => Url::from_file_path(&path)
            .map(|url| url.to_string())
            .map_err(|()| {
                WebViewError::new(
                    ErrorKind::InvalidInput,
                    "navigation.path_invalid",
                    format!("{} is not an absolute path", path.display()),
                )
            }),
        None => Url::parse(trimmed)
            .map(|url| url.to_string())
            .map_err(|error| {
                WebViewError::new(
                    ErrorKind::InvalidInput,
                    "navigation.url_invalid",
                    format!("invalid src `{trimmed}`: {error}"),
                )
            }),
    }
}

#[cfg(test)]
mod tests;
