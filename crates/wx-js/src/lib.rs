//! Headless page script context.
//!
//! A [`PageRuntime`] is one loaded document: a fresh `boa_engine` context with
//! browser-like globals, a minimal document tree whose appended `<script>`
//! and `<style>` elements take effect, a cooperative timer queue and the host
//! transport outbox that the page-side bridge posts into.

use boa_engine::Context;
use boa_engine::Source;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use wx_core::ErrorKind;
use wx_core::ScriptException;
use wx_core::WebViewError;
use wx_core::WebViewResult;
use wx_ipc::js_string_literal;

const ENVIRONMENT: &str = include_str!("environment.js");
const DOCUMENT_SHIM: &str = include_str!("document.js");
const TIMER_BATCH: u32 = 128;

/// One document script, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub origin: String,
    pub source: String,
}

/// Document facts the runtime exposes to scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageHost {
    pub page_url: String,
    pub document_title: String,
}

/// Engine limits for a page context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRuntimeConfig {
    /// Document scripts larger than this are skipped.
    pub script_byte_limit: usize,
    /// Failures kept in a [`PageLoadReport`]; later ones are only counted.
    pub reported_failures: usize,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
    /// Upper bound on timer/job drain rounds after each evaluation.
    pub max_task_rounds: u32,
}

impl Default for PageRuntimeConfig {
    fn default() -> Self {
        Self {
            script_byte_limit: 8 * 1024 * 1024,
            reported_failures: 16,
            recursion_limit: 512,
            stack_size_limit: 10 * 1024,
            loop_iteration_limit: 1_000_000,
            max_task_rounds: 64,
        }
    }
}

impl PageRuntimeConfig {
    pub fn validate(&self) -> WebViewResult<()> {
        let invalid = |code: &'static str, message: &str| {
            Err(WebViewError::new(ErrorKind::InvalidInput, code, message))
        };

        if self.script_byte_limit == 0 {
            return invalid(
                "js.script_byte_limit_invalid",
                "script_byte_limit must be greater than zero",
            );
        }
        if self.recursion_limit == 0 || self.stack_size_limit == 0 {
            return invalid(
                "js.limits_invalid",
                "recursion and stack limits must be greater than zero",
            );
        }
        if self.max_task_rounds == 0 {
            return invalid(
                "js.max_task_rounds_invalid",
                "max_task_rounds must be greater than zero",
            );
        }
        Ok(())
    }
}

/// A document script that threw while the page was coming up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageScriptFailure {
    pub origin: String,
    pub message: String,
}

/// Tally of a document's own scripts after load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLoadReport {
    pub ran: usize,
    pub oversized: usize,
    pub failed: usize,
    pub failures: Vec<PageScriptFailure>,
}

#[derive(Debug, Deserialize)]
struct RawOutcome {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    stack: Option<String>,
}

/// Script context for one loaded document.
pub struct PageRuntime {
    context: Context,
    config: PageRuntimeConfig,
    page_url: String,
}

impl std::fmt::Debug for PageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRuntime")
            .field("page_url", &self.page_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PageRuntime {
    pub fn new(config: PageRuntimeConfig, host: &PageHost) -> WebViewResult<Self> {
        config.validate()?;

        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_recursion_limit(config.recursion_limit);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(config.stack_size_limit);
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(config.loop_iteration_limit);

        for (origin, source) in [
            ("environment", ENVIRONMENT.to_owned()),
            ("document-shim", DOCUMENT_SHIM.to_owned()),
            ("document", build_document_bootstrap(host)),
        ] {
            context
                .eval(Source::from_bytes(source.as_bytes()))
                .map_err(|error| {
                    WebViewError::new(
                        ErrorKind::Runtime,
                        "js.bootstrap_failed",
                        format!("{origin} script failed: {error}"),
                    )
                })?;
        }

        Ok(Self {
            context,
            config,
            page_url: host.page_url.clone(),
        })
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// Runs the document's own scripts in order, then fires the load events.
    pub fn run_page_scripts(&mut self, scripts: &[ScriptSource]) -> PageLoadReport {
        let mut report = PageLoadReport::default();

        for script in scripts {
            if script.source.len() > self.config.script_byte_limit {
                debug!(origin = %script.origin, "document script over size limit");
                report.oversized += 1;
                continue;
            }

            let Err(exception) = self.evaluate(&script.source) else {
                report.ran += 1;
                continue;
            };
            report.failed += 1;
            if report.failures.len() < self.config.reported_failures {
                report.failures.push(PageScriptFailure {
                    origin: script.origin.clone(),
                    message: exception.message,
                });
            }
        }

        if let Err(error) = self
            .context
            .eval(Source::from_bytes(b"__wx_document_ready();"))
        {
            debug!(%error, "load event listener failed");
        }
        self.drain_tasks();
        report
    }

    /// Evaluates `source` in global scope and marshals its completion value.
    ///
    /// Values cross as JSON; `undefined` becomes `null`. Pending timers and
    /// promise jobs run before this returns.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, ScriptException> {
        let wrapped = format!(
            r#"(function() {{
  try {{
    var value = (0, eval)({source});
    return JSON.stringify({{ ok: true, value: value === undefined ? null : value }});
  }} catch (error) {{
    var failure = {{ ok: false, message: String(error), stack: null }};
    if (error && typeof error === "object") {{
      if (error.message !== undefined) {{
        failure.message = String(error.message);
      }}
      if (error.stack) {{
        failure.stack = String(error.stack);
      }}
    }}
    return JSON.stringify(failure);
  }}
}})()"#,
            source = js_string_literal(source)
        );

        let completion = self.context.eval(Source::from_bytes(wrapped.as_bytes()));
        self.drain_tasks();

        let value = completion.map_err(|error| ScriptException::new(error.to_string()))?;
        let text = value
            .to_string(&mut self.context)
            .map_err(|error| ScriptException::new(error.to_string()))?
            .to_std_string_escaped();
        let outcome: RawOutcome = serde_json::from_str(&text).map_err(|error| {
            ScriptException::new(format!("result could not be marshaled: {error}"))
        })?;

        if outcome.ok {
            Ok(outcome.value)
        } else {
            Err(ScriptException {
                message: outcome.message,
                stack: outcome.stack,
            })
        }
    }

    /// Adds a stylesheet to the document, as if loaded from `href`.
    pub fn add_stylesheet(&mut self, href: Option<&str>, css: &str) -> Result<(), ScriptException> {
        let href = href.map_or_else(|| "null".to_owned(), js_string_literal);
        let script = format!("__wx_add_stylesheet({href}, {});", js_string_literal(css));
        self.evaluate(&script).map(|_| ())
    }

    /// Takes the envelopes posted through `window.__wxHostTransport`.
    pub fn take_host_messages(&mut self) -> Vec<String> {
        self.read_json_strings(b"JSON.stringify(globalThis.__wxHostTransport.queue.splice(0))")
    }

    /// Takes the `href`s of stylesheet links appended since the last call.
    pub fn take_stylesheet_requests(&mut self) -> Vec<String> {
        self.read_json_strings(b"__wx_take_link_requests()")
    }

    pub fn document_title(&mut self) -> Option<String> {
        self.read_string(
            b"(typeof document === 'object' && document !== null && 'title' in document) ? String(document.title) : ''",
        )
    }

    pub fn location_href(&mut self) -> Option<String> {
        self.read_string(
            b"(typeof location === 'object' && location !== null && 'href' in location) ? String(location.href) : ''",
        )
    }

    fn drain_tasks(&mut self) {
        let flush = format!("__wx_flush_timers({TIMER_BATCH})");
        for _ in 0..self.config.max_task_rounds {
            let _ = self.context.run_jobs();
            let ran = self
                .read_string(flush.as_bytes())
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(0);
            if ran == 0 {
                break;
            }
        }
        let _ = self.context.run_jobs();
    }

    fn read_string(&mut self, script: &[u8]) -> Option<String> {
        let value = self.context.eval(Source::from_bytes(script)).ok()?;
        let js_string = value.to_string(&mut self.context).ok()?;
        Some(js_string.to_std_string_escaped())
    }

    fn read_json_strings(&mut self, script: &[u8]) -> Vec<String> {
        let Some(text) = self.read_string(script) else {
            return Vec::new();
        };
        serde_json::from_str(&text).unwrap_or_else(|error| {
            debug!(%error, "page queue was not a JSON string array");
            Vec::new()
        })
    }
}

fn build_document_bootstrap(host: &PageHost) -> String {
    format!(
        "__wx_install_document({}, {});",
        js_string_literal(&host.page_url),
        js_string_literal(&host.document_title)
    )
}
