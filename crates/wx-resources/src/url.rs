//! Virtual-scheme URL parsing.

use url::Url;
use wx_core::ErrorKind;
use wx_core::WebViewError;
use wx_core::WebViewResult;

/// Scheme used when the host does not configure one.
pub const DEFAULT_SCHEME: &str = "x-local";

/// A request URL addressed at the local resource registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResourceUrl {
    parsed: Url,
    name: String,
}

impl LocalResourceUrl {
    /// Parses `input` and checks that it targets `scheme`.
    ///
    /// Both `x-local://name` and `x-local:///name` address `name`; query and
    /// fragment are ignored for lookup. The name is taken verbatim, without
    /// percent-decoding.
    pub fn parse(input: &str, scheme: &str) -> WebViewResult<Self> {
        let parsed = Url::parse(input).map_err(|error| {
            WebViewError::new(
                ErrorKind::InvalidInput,
                "resources.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;

        if !parsed.scheme().eq_ignore_ascii_case(scheme) {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "resources.url.scheme_mismatch",
                format!(
                    "URL scheme `{}` does not match local scheme `{scheme}`",
                    parsed.scheme()
                ),
            ));
        }

        // The key is the literal text after the scheme. `Url` would
        // percent-encode a non-special host and fold repeated slashes.
        let name = input
            .trim()
            .split_once(':')
            .map(|(_, rest)| rest.trim_start_matches('/'))
            .and_then(|rest| rest.split(['?', '#']).next())
            .unwrap_or_default()
            .to_owned();

        if name.is_empty() {
            return Err(WebViewError::new(
                ErrorKind::InvalidInput,
                "resources.url.name_missing",
                format!("URL `{input}` does not name a resource"),
            ));
        }

        Ok(Self { parsed, name })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    /// Registry key addressed by this URL.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builds the virtual URL under which `name` is served.
pub fn virtual_url(scheme: &str, name: &str) -> String {
    format!("{scheme}://{name}")
}

/// Returns true when `input` uses `scheme`, without fully parsing it.
pub fn has_scheme(input: &str, scheme: &str) -> bool {
    input
        .split_once(':')
        .is_some_and(|(prefix, _)| prefix.eq_ignore_ascii_case(scheme))
}

#[cfg(test)]
mod tests {
    use super::DEFAULT_SCHEME;
    use super::LocalResourceUrl;
    use super::has_scheme;
    use super::virtual_url;

    #[test]
    fn host_form_names_resource() {
        let parsed = match LocalResourceUrl::parse("x-local://empty.html", DEFAULT_SCHEME) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(parsed.name(), "empty.html");
    }

    #[test]
    fn nested_and_path_forms_name_resource() {
        let nested = LocalResourceUrl::parse("x-local://assets/app.js?v=2#top", DEFAULT_SCHEME);
        assert_eq!(nested.map(|url| url.name().to_owned()), Ok("assets/app.js".to_owned()));

        let path_form = LocalResourceUrl::parse("x-local:///app.css", DEFAULT_SCHEME);
        assert_eq!(path_form.map(|url| url.name().to_owned()), Ok("app.css".to_owned()));
    }

    #[test]
    fn rejects_other_schemes_and_empty_names() {
        assert!(LocalResourceUrl::parse("https://example.com/a.js", DEFAULT_SCHEME).is_err());
        let empty = LocalResourceUrl::parse("x-local:///", DEFAULT_SCHEME);
        assert!(empty.is_err());
        if let Err(error) = empty {
            assert_eq!(error.code, "resources.url.name_missing");
        }
    }

    #[test]
    fn unusual_names_are_kept_verbatim() {
        for name in ["über.css", "dir//x.css", "a%20b.js", "v1.2/app.mjs"] {
            let url = virtual_url(DEFAULT_SCHEME, name);
            let parsed = LocalResourceUrl::parse(&url, DEFAULT_SCHEME);
            assert_eq!(parsed.map(|url| url.name().to_owned()), Ok(name.to_owned()), "{url}");
        }
    }

    #[test]
    fn virtual_url_round_trips_through_parse() {
        let url = virtual_url(DEFAULT_SCHEME, "local-stylesheet.css");
        assert!(has_scheme(&url, "X-LOCAL"));
        let parsed = LocalResourceUrl::parse(&url, DEFAULT_SCHEME);
        assert_eq!(
            parsed.map(|url| url.name().to_owned()),
            Ok("local-stylesheet.css".to_owned())
        );
    }
}
