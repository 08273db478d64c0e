//! Local resource registry served to pages under a virtual URI scheme.

pub mod url;

use dashmap::DashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use wx_core::ErrorKind;
use wx_core::WebViewError;
use wx_core::WebViewResult;

pub use url::DEFAULT_SCHEME;
pub use url::LocalResourceUrl;

/// Prefix for source paths relative to the application root.
const APP_ROOT_PREFIX: &str = "~/";

/// How a resource is used once injected into a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Script,
    Stylesheet,
    Generic,
}

impl ResourceKind {
    /// Infers the kind from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match extension_of(path).as_deref() {
            Some("js" | "mjs") => Self::Script,
            Some("css") => Self::Stylesheet,
            _ => Self::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Stylesheet => "stylesheet",
            Self::Generic => "generic",
        }
    }
}

/// One registered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub name: String,
    pub source_path: PathBuf,
    pub kind: ResourceKind,
}

impl ResourceEntry {
    pub fn content_type(&self) -> &'static str {
        content_type_for(self.kind, &self.source_path)
    }
}

/// Body served for a virtual-scheme request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub name: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// Name to file mapping shared between registration and the scheme handler.
///
/// Each registration replaces its entry in a single map operation, so a
/// concurrent lookup sees either the old or the new entry.
#[derive(Debug)]
pub struct ResourceRegistry {
    scheme: String,
    app_root: PathBuf,
    entries: DashMap<String, ResourceEntry>,
}

impl ResourceRegistry {
    pub fn new(scheme: impl Into<String>, app_root: impl Into<PathBuf>) -> Self {
        Self {
            scheme: scheme.into(),
            app_root: app_root.into(),
            entries: DashMap::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    /// Registers `name`, inferring the kind from the path's extension.
    ///
    /// Returns the entry that was replaced, if any.
    pub fn register(
        &self,
        name: &str,
        source_path: &str,
    ) -> WebViewResult<Option<ResourceEntry>> {
        let path = self.resolve_source_path(source_path);
        let kind = ResourceKind::from_path(&path);
        self.register_with_kind(name, source_path, kind)
    }

    pub fn register_with_kind(
        &self,
        name: &str,
        source_path: &str,
        kind: ResourceKind,
    ) -> WebViewResult<Option<ResourceEntry>> {
        let name = normalize_name(name)?;
        let round_trips = LocalResourceUrl::parse(&self.virtual_url(name), &self.scheme)
            .is_ok_and(|url| url.name() == name);
        if !round_trips {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "resources.name_invalid",
                format!("resource name `{name}` cannot be addressed as a `{}` URL", self.scheme),
            ));
        }
        if source_path.trim().is_empty() {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "resources.path_empty",
                format!("resource `{name}` has an empty source path"),
            ));
        }

        let entry = ResourceEntry {
            name: name.to_owned(),
            source_path: self.resolve_source_path(source_path),
            kind,
        };
        debug!(
            resource = name,
            path = %entry.source_path.display(),
            kind = kind.as_str(),
            "registered local resource"
        );
        Ok(self.entries.insert(name.to_owned(), entry))
    }

    /// Removes `name`. Unknown names are a no-op.
    pub fn unregister(&self, name: &str) -> Option<ResourceEntry> {
        let removed = self.entries.remove(name).map(|(_, entry)| entry);
        if removed.is_some() {
            debug!(resource = name, "unregistered local resource");
        }
        removed
    }

    /// Puts `previous` back under `name`, or drops `name` when there was
    /// no earlier entry.
    pub fn reinstate(&self, name: &str, previous: Option<ResourceEntry>) {
        match previous {
            Some(entry) => {
                self.entries.insert(name.to_owned(), entry);
            }
            None => {
                self.entries.remove(name);
            }
        }
        debug!(resource = name, "restored previous resource entry");
    }

    pub fn entry(&self, name: &str) -> Option<ResourceEntry> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|item| item.key().clone()).collect();
        names.sort();
        names
    }

    /// Reads the current bytes of `name`. Content is never cached.
    pub fn resolve(&self, name: &str) -> WebViewResult<Vec<u8>> {
        let entry = self.entry(name).ok_or_else(|| {
            WebViewError::new(
                ErrorKind::ResourceNotFound,
                "resources.not_found",
                format!("no local resource registered as `{name}`"),
            )
        })?;

        fs::read(&entry.source_path).map_err(|error| {
            WebViewError::new(
                ErrorKind::Io,
                "resources.read_failed",
                format!(
                    "failed to read resource `{name}` from `{}`: {error}",
                    entry.source_path.display()
                ),
            )
        })
    }

    /// Reads `name` as UTF-8 text for script/stylesheet injection.
    pub fn resolve_text(&self, name: &str) -> WebViewResult<String> {
        let bytes = self.resolve(name)?;
        String::from_utf8(bytes).map_err(|error| {
            WebViewError::new(
                ErrorKind::InvalidInput,
                "resources.utf8_invalid",
                format!("resource `{name}` is not valid UTF-8: {error}"),
            )
        })
    }

    /// Serves a virtual-scheme request.
    ///
    /// `None` means "not handled": the URL is not ours, names nothing we know,
    /// or the file is unreadable. The platform then applies its default handling.
    pub fn resolve_request(&self, request_url: &str) -> Option<ResourceResponse> {
        let url = LocalResourceUrl::parse(request_url, &self.scheme).ok()?;
        let entry = self.entry(url.name())?;
        match fs::read(&entry.source_path) {
            Ok(body) => Some(ResourceResponse {
                name: entry.name.clone(),
                content_type: entry.content_type(),
                body,
            }),
            Err(error) => {
                debug!(
                    resource = entry.name.as_str(),
                    %error,
                    "local resource unreadable; falling through"
                );
                None
            }
        }
    }

    /// Virtual URL under which `name` is served.
    pub fn virtual_url(&self, name: &str) -> String {
        url::virtual_url(&self.scheme, name)
    }

    pub fn is_virtual_url(&self, input: &str) -> bool {
        url::has_scheme(input, &self.scheme)
    }

    /// Maps `~/`-relative paths onto the application root.
    pub fn resolve_source_path(&self, source_path: &str) -> PathBuf {
        match source_path.strip_prefix(APP_ROOT_PREFIX) {
            Some(relative) => self.app_root.join(relative),
            None => PathBuf::from(source_path),
        }
    }
}

/// Trims `name` and checks it can serve as a registry key.
pub fn normalize_name(name: &str) -> WebViewResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WebViewError::new(
            ErrorKind::InvalidInput,
            "resources.name_empty",
            "resource name must not be empty",
        ));
    }

    if trimmed.contains(char::is_whitespace) {
        return Err(WebViewError::new(
            ErrorKind::InvalidInput,
            "resources.name_invalid",
            format!("resource name `{trimmed}` must not contain whitespace"),
        ));
    }

    Ok(trimmed)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Content type for a resource, preferring the declared kind.
pub fn content_type_for(kind: ResourceKind, path: &Path) -> &'static str {
    match kind {
        ResourceKind::Script => return "text/javascript; charset=utf-8",
        ResourceKind::Stylesheet => return "text/css; charset=utf-8",
        ResourceKind::Generic => {}
    }

    match extension_of(path).as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
