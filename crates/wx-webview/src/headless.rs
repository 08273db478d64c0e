//! In-process backend that loads documents into a [`PageRuntime`].
//!
//! Supported URLs: `file://`, the installed virtual scheme and `about:blank`.
//! Loads complete synchronously inside `navigate`, so every notification is
//! queued by the time the call returns.

use crate::backend::NavigationType;
use crate::backend::PlatformEvent;
use crate::backend::WebViewBackend;
use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;
use wx_core::ScriptException;
use wx_html::PageDocument;
use wx_html::ScriptBlock;
use wx_html::StyleBlock;
use wx_ipc::RequestId;
use wx_js::PageHost;
use wx_js::PageLoadReport;
use wx_js::PageRuntime;
use wx_js::PageRuntimeConfig;
use wx_js::ScriptSource;
use wx_resources::ResourceRegistry;

const BLANK_URL: &str = "about:blank";

#[derive(Debug)]
pub struct HeadlessBackend {
    runtime_config: PageRuntimeConfig,
    scheme_handler: Option<(String, Arc<ResourceRegistry>)>,
    page: Option<PageRuntime>,
    history: Vec<String>,
    history_index: usize,
    last_report: Option<PageLoadReport>,
    events: VecDeque<PlatformEvent>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(PageRuntimeConfig::default())
    }
}

impl HeadlessBackend {
    pub fn new(runtime_config: PageRuntimeConfig) -> Self {
        Self {
            runtime_config,
            scheme_handler: None,
            page: None,
            history: Vec::new(),
            history_index: 0,
            last_report: None,
            events: VecDeque::new(),
        }
    }

    /// Script report of the most recent successful load.
    pub fn last_load_report(&self) -> Option<&PageLoadReport> {
        self.last_report.as_ref()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.history.get(self.history_index).map(String::as_str)
    }

    fn load(&mut self, url: &str, navigation_type: NavigationType) {
        info!(url, navigation = navigation_type.as_str(), "loading document");
        self.page = None;
        self.events.push_back(PlatformEvent::LoadStarted {
            url: url.to_owned(),
            navigation_type,
        });

        match self.bring_up(url) {
            Ok((page, report)) => {
                if report.failed > 0 {
                    warn!(
                        url,
                        failed = report.failed,
                        "document scripts reported errors"
                    );
                }
                self.page = Some(page);
                self.last_report = Some(report);
                self.forward_page_output();
                self.events.push_back(PlatformEvent::LoadFinished {
                    url: url.to_owned(),
                    navigation_type,
                });
            }
            Err(error) => {
                warn!(url, %error, "document failed to load");
                self.events.push_back(PlatformEvent::LoadFailed {
                    url: url.to_owned(),
                    navigation_type,
                    error,
                });
            }
        }
    }

    fn bring_up(&self, url: &str) -> Result<(PageRuntime, PageLoadReport), String> {
        let html = self.fetch(url)?;
        let document = PageDocument::parse(&html);
        let host = PageHost {
            page_url: url.to_owned(),
            document_title: document.title.clone(),
        };
        let mut page = PageRuntime::new(self.runtime_config.clone(), &host)
            .map_err(|error| error.to_string())?;

        for style in &document.styles {
            let added = match style {
                StyleBlock::Inline { css } => page.add_stylesheet(None, css),
                StyleBlock::Link { href } => {
                    let href = resolve_reference(url, href);
                    match self.fetch(&href) {
                        Ok(css) => page.add_stylesheet(Some(&href), &css),
                        Err(error) => {
                            debug!(href, %error, "stylesheet link not loaded");
                            Ok(())
                        }
                    }
                }
            };
            if let Err(exception) = added {
                debug!(message = exception.message.as_str(), "stylesheet not applied");
            }
        }

        let mut scripts = Vec::with_capacity(document.scripts.len());
        for (index, block) in document.scripts.iter().enumerate() {
            match block {
                ScriptBlock::Inline { source } => scripts.push(ScriptSource {
                    origin: format!("{url}#inline-{index}"),
                    source: source.clone(),
                }),
                ScriptBlock::External { src } => {
                    let src = resolve_reference(url, src);
                    match self.fetch(&src) {
                        Ok(source) => scripts.push(ScriptSource {
                            origin: src,
                            source,
                        }),
                        Err(error) => debug!(src, %error, "external script not loaded"),
                    }
                }
            }
        }

        let report = page.run_page_scripts(&scripts);
        Ok((page, report))
    }

    fn fetch(&self, url: &str) -> Result<String, String> {
        if url == BLANK_URL {
            return Ok(String::new());
        }

        if let Some((scheme, registry)) = &self.scheme_handler {
            if registry.is_virtual_url(url) {
                return registry
                    .resolve_request(url)
                    .map(|response| String::from_utf8_lossy(&response.body).into_owned())
                    .ok_or_else(|| format!("no local resource is registered for {url} ({scheme})"));
            }
        }

        let parsed = Url::parse(url).map_err(|error| format!("invalid url {url}: {error}"))?;
        if parsed.scheme() != "file" {
            return Err(format!("unsupported url scheme `{}`", parsed.scheme()));
        }
        let path = parsed
            .to_file_path()
            .map_err(|()| format!("{url} does not name a local file"))?;
        fs::read_to_string(&path).map_err(|error| format!("{}: {error}", path.display()))
    }

    /// Moves page output into the event queue and serves pending stylesheet links.
    fn forward_page_output(&mut self) {
        let Some(page) = self.page.as_mut() else {
            return;
        };

        let requests = page.take_stylesheet_requests();
        for href in requests {
            let css = match &self.scheme_handler {
                Some((_, registry)) if registry.is_virtual_url(&href) => registry
                    .resolve_request(&href)
                    .map(|response| String::from_utf8_lossy(&response.body).into_owned()),
                _ => None,
            };
            match css {
                Some(css) => {
                    if let Err(exception) = page.add_stylesheet(Some(&href), &css) {
                        debug!(href, message = exception.message.as_str(), "stylesheet not applied");
                    }
                }
                None => debug!(href, "stylesheet link not served"),
            }
        }

        for payload in page.take_host_messages() {
            self.events.push_back(PlatformEvent::PageMessage { payload });
        }
    }

    fn go_to_history_entry(&mut self, index: usize) {
        let Some(url) = self.history.get(index).cloned() else {
            return;
        };
        self.history_index = index;
        self.load(&url, NavigationType::BackForward);
    }
}

impl WebViewBackend for HeadlessBackend {
    fn install_scheme_handler(&mut self, scheme: &str, registry: Arc<ResourceRegistry>) {
        debug!(scheme, "scheme handler installed");
        self.scheme_handler = Some((scheme.to_owned(), registry));
    }

    fn navigate(&mut self, url: &str, navigation_type: NavigationType) {
        if !self.history.is_empty() {
            self.history.truncate(self.history_index.saturating_add(1));
        }
        self.history.push(url.to_owned());
        self.history_index = self.history.len() - 1;
        self.load(url, navigation_type);
    }

    fn reload(&mut self) {
        let Some(url) = self.current_url().map(str::to_owned) else {
            return;
        };
        self.load(&url, NavigationType::Reload);
    }

    fn go_back(&mut self) {
        if self.can_go_back() {
            self.go_to_history_entry(self.history_index - 1);
        }
    }

    fn go_forward(&mut self) {
        if self.can_go_forward() {
            self.go_to_history_entry(self.history_index.saturating_add(1));
        }
    }

    fn can_go_back(&self) -> bool {
        !self.history.is_empty() && self.history_index > 0
    }

    fn can_go_forward(&self) -> bool {
        self.history_index.saturating_add(1) < self.history.len()
    }

    fn stop_loading(&mut self) {
        debug!("loads complete synchronously; nothing to stop");
    }

    fn evaluate(&mut self, request_id: RequestId, script: &str) {
        let outcome = match self.page.as_mut() {
            Some(page) => page.evaluate(script),
            None => Err(ScriptException::new("no document is loaded")),
        };
        if let Err(exception) = &outcome {
            debug!(request = %request_id, message = exception.message.as_str(), "evaluation threw");
        }

        // Links appended by this script are served before it reports back.
        let queued_messages = self.events.len();
        self.forward_page_output();
        let messages: Vec<PlatformEvent> = self.events.drain(queued_messages..).collect();
        self.events.push_back(PlatformEvent::EvaluationCompleted {
            request_id,
            outcome,
        });
        self.events.extend(messages);
    }

    fn poll_events(&mut self) -> Vec<PlatformEvent> {
        self.events.drain(..).collect()
    }
}

/// Resolves `reference` against the document URL.
fn resolve_reference(base: &str, reference: &str) -> String {
    if Url::parse(reference).is_ok() {
        return reference.to_owned();
    }

    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(|joined| joined.to_string())
        .unwrap_or_else(|_| reference.to_owned())
}
