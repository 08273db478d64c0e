use std::env;
use std::path::PathBuf;
use wx_core::ErrorKind;
use wx_core::WebViewError;
use wx_core::WebViewResult;
use wx_ipc::ChannelConfig;
use wx_resources::DEFAULT_SCHEME;

const APP_ROOT_ENV: &str = "WEBVIEW_EXT_APP_ROOT";
const RESERVED_SCHEMES: &[&str] = &["http", "https", "file", "about", "data", "blob", "javascript"];

/// How stylesheet files reach the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StylesheetInjection {
    /// Contents are inlined into a `<style>` element.
    #[default]
    Inline,
    /// A `<link>` element points at the resource's virtual URL.
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebViewConfig {
    /// Virtual scheme local resources are served under.
    pub scheme: String,
    /// Directory `~/` paths resolve against.
    pub app_root: PathBuf,
    pub stylesheet_injection: StylesheetInjection,
    /// Whether `execute_javascript` marshals results as JSON text.
    pub stringify_results_by_default: bool,
    pub channel: ChannelConfig,
}

impl Default for WebViewConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_owned(),
            app_root: default_app_root(),
            stylesheet_injection: StylesheetInjection::Inline,
            stringify_results_by_default: true,
            channel: ChannelConfig::default(),
        }
    }
}

impl WebViewConfig {
    pub fn with_app_root(mut self, app_root: impl Into<PathBuf>) -> Self {
        self.app_root = app_root.into();
        self
    }

    pub fn with_stylesheet_injection(mut self, injection: StylesheetInjection) -> Self {
        self.stylesheet_injection = injection;
        self
    }

    pub fn validate(&self) -> WebViewResult<()> {
        let scheme = self.scheme.as_str();
        let well_formed = scheme
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
        if !well_formed {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "config.scheme_invalid",
                format!("`{scheme}` is not a valid URL scheme"),
            ));
        }

        if RESERVED_SCHEMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(scheme))
        {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "config.scheme_reserved",
                format!("`{scheme}` is handled by the platform and cannot be intercepted"),
            ));
        }

        self.channel.validate()
    }
}

fn default_app_root() -> PathBuf {
    if let Some(path) = env::var_os(APP_ROOT_ENV) {
        return PathBuf::from(path);
    }

    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
