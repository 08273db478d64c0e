//! Script and stylesheet injection statements, and the auto-load list.

use crate::config::StylesheetInjection;
use wx_core::WebViewResult;
use wx_ipc::js_string_literal;
use wx_resources::ResourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoLoadKind {
    JavaScriptFile,
    StyleSheetFile,
    JavaScriptCode,
}

impl AutoLoadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JavaScriptFile => "javascript-file",
            Self::StyleSheetFile => "stylesheet-file",
            Self::JavaScriptCode => "javascript-code",
        }
    }
}

/// Something applied to every document after it loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AutoLoad {
    pub(crate) kind: AutoLoadKind,
    pub(crate) name: String,
    /// Inline source for [`AutoLoadKind::JavaScriptCode`]; file kinds read the registry.
    pub(crate) source: Option<String>,
}

impl AutoLoad {
    pub(crate) fn statement(
        &self,
        registry: &ResourceRegistry,
        injection: StylesheetInjection,
    ) -> WebViewResult<String> {
        match (self.kind, &self.source) {
            (AutoLoadKind::JavaScriptCode, Some(source)) => {
                Ok(script_element_statement(&self.name, source))
            }
            (AutoLoadKind::StyleSheetFile, _) => {
                stylesheet_file_statement(registry, &self.name, injection)
            }
            _ => javascript_file_statement(registry, &self.name),
        }
    }
}

/// Auto-loads in registration order. Re-registering a name keeps its slot.
#[derive(Debug, Default)]
pub(crate) struct AutoLoadList {
    entries: Vec<AutoLoad>,
}

impl AutoLoadList {
    pub(crate) fn upsert(&mut self, entry: AutoLoad) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.kind == entry.kind && existing.name == entry.name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub(crate) fn remove(&mut self, kind: AutoLoadKind, name: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.kind == kind && entry.name == name));
        self.entries.len() != before
    }

    pub(crate) fn names(&self, kind: AutoLoadKind) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub(crate) fn entries(&self) -> &[AutoLoad] {
        &self.entries
    }
}

pub(crate) fn javascript_file_statement(
    registry: &ResourceRegistry,
    name: &str,
) -> WebViewResult<String> {
    let source = registry.resolve_text(name)?;
    Ok(script_element_statement(name, &source))
}

pub(crate) fn stylesheet_file_statement(
    registry: &ResourceRegistry,
    name: &str,
    injection: StylesheetInjection,
) -> WebViewResult<String> {
    match injection {
        StylesheetInjection::Inline => {
            let css = registry.resolve_text(name)?;
            Ok(style_element_statement(name, &css))
        }
        StylesheetInjection::Link => {
            // Fail early when nothing is registered under `name`.
            registry.resolve(name)?;
            Ok(link_element_statement(name, &registry.virtual_url(name)))
        }
    }
}

pub(crate) fn script_element_statement(name: &str, source: &str) -> String {
    format!(
        "(function() {{ var script = document.createElement('script'); script.setAttribute('data-wx-resource', {name}); script.text = {source}; (document.head || document.documentElement).appendChild(script); return null; }})()",
        name = js_string_literal(name),
        source = js_string_literal(source)
    )
}

fn style_element_statement(name: &str, css: &str) -> String {
    format!(
        "(function() {{ var style = document.createElement('style'); style.setAttribute('data-wx-resource', {name}); style.textContent = {css}; (document.head || document.documentElement).appendChild(style); return null; }})()",
        name = js_string_literal(name),
        css = js_string_literal(css)
    )
}

fn link_element_statement(name: &str, href: &str) -> String {
    format!(
        "(function() {{ var link = document.createElement('link'); link.setAttribute('data-wx-resource', {name}); link.setAttribute('rel', 'stylesheet'); link.setAttribute('type', 'text/css'); link.setAttribute('href', {href}); (document.head || document.documentElement).appendChild(link); return null; }})()",
        name = js_string_literal(name),
        href = js_string_literal(href)
    )
}
