//! Host/page bridge protocol.
//!
//! The page talks to the host through a single transport call,
//! `window.__wxHostTransport.post(string)`, which each platform backend
//! provides. Every posted string is a JSON envelope `{name, data}` produced
//! by the page-side bridge (`window.wxBridge`, see [`BRIDGE_SCRIPT`]).

use core::fmt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use wx_core::ErrorKind;
use wx_core::ScriptException;
use wx_core::WebViewError;
use wx_core::WebViewResult;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;
const HARD_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
/// Largest integer a page-side number can carry without rounding.
const JS_MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Reserved envelope name used for promise settlement.
pub const PROMISE_SETTLED_EVENT: &str = "__wx:promise-settled";

/// Page-side bridge installed on every successful load.
pub const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Correlation token pairing a host request with its page response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic token source. Tokens stay within the page's safe-integer range.
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl RequestIdAllocator {
    pub fn next_id(&self) -> RequestId {
        loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            if raw != 0 && raw <= JS_MAX_SAFE_INTEGER {
                return RequestId(raw);
            }
            // Wrapped past the safe range; restart at 1.
            let _ = self
                .next
                .compare_exchange(raw.wrapping_add(1), 1, Ordering::Relaxed, Ordering::Relaxed);
        }
    }
}

/// Limits applied to the page/host channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_message_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> WebViewResult<()> {
        if self.max_message_bytes == 0 {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "ipc.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > HARD_MAX_MESSAGE_BYTES {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "ipc.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (16 MiB)",
            ));
        }

        Ok(())
    }

    fn check_size(&self, len: usize, direction: &str) -> WebViewResult<()> {
        if len > self.max_message_bytes {
            return Err(WebViewError::new(
                ErrorKind::Protocol,
                "ipc.message_too_large",
                format!(
                    "{direction} message exceeds max_message_bytes ({len} > {})",
                    self.max_message_bytes
                ),
            ));
        }
        Ok(())
    }
}

/// Settlement of a page-side awaitable.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub request_id: RequestId,
    pub outcome: Result<Value, ScriptException>,
}

/// Decoded page-to-host message.
#[derive(Debug, Clone, PartialEq)]
pub enum PageMessage {
    Settlement(Settlement),
    Event { name: String, data: Value },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    name: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RawSettlement {
    token: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Debug, Default, Deserialize)]
struct RawError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    stack: Option<String>,
}

/// Decodes one posted envelope.
pub fn decode_page_message(payload: &str, config: &ChannelConfig) -> WebViewResult<PageMessage> {
    config.check_size(payload.len(), "page")?;

    let envelope: RawEnvelope = serde_json::from_str(payload).map_err(|error| {
        WebViewError::new(
            ErrorKind::Protocol,
            "ipc.envelope_invalid",
            format!("page message is not a valid envelope: {error}"),
        )
    })?;

    if envelope.name.is_empty() {
        return Err(WebViewError::new(
            ErrorKind::Protocol,
            "ipc.envelope_name_missing",
            "page message envelope has an empty name",
        ));
    }

    if envelope.name != PROMISE_SETTLED_EVENT {
        return Ok(PageMessage::Event {
            name: envelope.name,
            data: envelope.data,
        });
    }

    let raw: RawSettlement = serde_json::from_value(envelope.data).map_err(|error| {
        WebViewError::new(
            ErrorKind::Protocol,
            "ipc.settlement_invalid",
            format!("promise settlement payload is malformed: {error}"),
        )
    })?;

    let outcome = if raw.ok {
        Ok(raw.value)
    } else {
        let error = raw.error.unwrap_or_default();
        Err(ScriptException {
            message: error.message,
            stack: error.stack,
        })
    };

    Ok(PageMessage::Settlement(Settlement {
        request_id: RequestId(raw.token),
        outcome,
    }))
}

/// Quotes `input` as a script string literal.
pub fn js_string_literal(input: &str) -> String {
    Value::String(input.to_owned()).to_string()
}

/// Script delivering a host event to page listeners registered via `wxBridge.on`.
pub fn host_event_script(name: &str, data: &Value, config: &ChannelConfig) -> WebViewResult<String> {
    if name.is_empty() {
        return Err(WebViewError::new(
            ErrorKind::InvalidInput,
            "ipc.event_name_missing",
            "host event name must not be empty",
        ));
    }

    let payload = data.to_string();
    config.check_size(payload.len(), "host")?;
    Ok(format!(
        "(function() {{ if (!window.wxBridge) {{ throw new Error(\"web view bridge is not installed\"); }} return window.wxBridge.onHostEvent({}, {payload}); }})()",
        js_string_literal(name)
    ))
}

/// Script that evaluates `source` and reports the settlement of its value.
pub fn promise_script(request_id: RequestId, source: &str) -> String {
    format!(
        "(function() {{ if (!window.wxBridge) {{ throw new Error(\"web view bridge is not installed\"); }} var value = (0, eval)({}); window.wxBridge.executePromise(value, {request_id}); return null; }})()",
        js_string_literal(source)
    )
}

/// Script whose completion value is the JSON text of `source`'s value.
///
/// Used when the platform's marshaling is only reliable for strings; the host
/// parses the text back so the caller sees the same value either way.
pub fn stringified_script(source: &str) -> String {
    format!(
        "(function() {{ var result = (0, eval)({}); return JSON.stringify(result === undefined ? null : result); }})()",
        js_string_literal(source)
    )
}

/// Undoes [`stringified_script`] on the host side.
pub fn parse_stringified_result(value: Value) -> WebViewResult<Value> {
    match value {
        Value::String(text) => serde_json::from_str(&text).map_err(|error| {
            WebViewError::new(
                ErrorKind::Protocol,
                "ipc.result_invalid",
                format!("stringified result is not valid JSON: {error}"),
            )
        }),
        // Some platforms already decode JSON results.
        other => Ok(other),
    }
}
