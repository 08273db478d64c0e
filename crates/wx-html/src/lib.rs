//! Document scanning for headless page loads.
//!
//! The scanner only extracts what the page runtime needs to bring a document
//! up: its title, the script blocks in document order, inline styles and
//! stylesheet links. It is not a DOM builder.

/// Script block discovered in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBlock {
    Inline { source: String },
    External { src: String },
}

/// Stylesheet discovered in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleBlock {
    Inline { css: String },
    Link { href: String },
}

/// Scan result for one HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDocument {
    pub title: String,
    pub scripts: Vec<ScriptBlock>,
    pub styles: Vec<StyleBlock>,
    pub element_count: u32,
}

impl PageDocument {
    pub fn parse(input: &str) -> Self {
        let mut document = Self::default();
        let mut cursor = Cursor::new(input);

        while cursor.advance_to(b'<') {
            if cursor.eat(b"<!--") {
                cursor.skip_past(b"-->");
                continue;
            }
            if cursor.eat(b"<!") || cursor.eat(b"<?") {
                cursor.skip_past(b">");
                continue;
            }

            let Some(tag) = cursor.read_tag() else {
                cursor.bump();
                continue;
            };
            if tag.closing {
                continue;
            }

            document.element_count = document.element_count.saturating_add(1);
            document.record(&tag, &mut cursor);
        }

        document
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    fn record(&mut self, tag: &Tag, cursor: &mut Cursor<'_>) {
        match tag.name.as_str() {
            "title" => {
                let text = cursor.raw_text(tag);
                if self.title.is_empty() {
                    self.title = text.split_whitespace().collect::<Vec<_>>().join(" ");
                }
            }
            "script" => {
                let body = cursor.raw_text(tag);
                match tag.attribute("src").filter(|src| !src.is_empty()) {
                    Some(src) => self.scripts.push(ScriptBlock::External {
                        src: src.to_owned(),
                    }),
                    None if !body.trim().is_empty() => self.scripts.push(ScriptBlock::Inline {
                        source: body.to_owned(),
                    }),
                    None => {}
                }
            }
            "style" => {
                let body = cursor.raw_text(tag);
                if !body.trim().is_empty() {
                    self.styles.push(StyleBlock::Inline {
                        css: body.to_owned(),
                    });
                }
            }
            "link" => {
                let stylesheet = tag.attribute("rel").is_some_and(|rel| {
                    rel.split_ascii_whitespace()
                        .any(|token| token.eq_ignore_ascii_case("stylesheet"))
                });
                let href = tag.attribute("href").filter(|href| !href.is_empty());
                if let (true, Some(href)) = (stylesheet, href) {
                    self.styles.push(StyleBlock::Link {
                        href: href.to_owned(),
                    });
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    attributes: Vec<(String, String)>,
}

impl Tag {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value.as_str()))
    }
}

/// Byte cursor over the document source.
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos = self.pos.saturating_add(1).min(self.input.len());
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a [u8] {
        self.bytes().get(self.pos..).unwrap_or_default()
    }

    fn eat(&mut self, prefix: &[u8]) -> bool {
        if self.rest().starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    /// Moves to the next `byte`; false when none is left.
    fn advance_to(&mut self, byte: u8) -> bool {
        match self.rest().iter().position(|candidate| *candidate == byte) {
            Some(offset) => {
                self.pos += offset;
                true
            }
            None => {
                self.pos = self.input.len();
                false
            }
        }
    }

    /// Moves just past the next `needle`, or to the end.
    fn skip_past(&mut self, needle: &[u8]) {
        self.pos = match find(self.rest(), needle) {
            Some(offset) => self.pos + offset + needle.len(),
            None => self.input.len(),
        };
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.bump();
        }
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    /// Reads a start or end tag at `<`. Leaves the cursor untouched on failure.
    fn read_tag(&mut self) -> Option<Tag> {
        let start = self.pos;
        let tag = self.read_tag_inner();
        if tag.is_none() {
            self.pos = start;
        }
        tag
    }

    fn read_tag_inner(&mut self) -> Option<Tag> {
        if !self.eat(b"<") {
            return None;
        }
        let closing = self.eat(b"/");
        self.skip_whitespace();
        let name = self.take_while(|byte| {
            byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
        });
        if name.is_empty() {
            return None;
        }

        let mut tag = Tag {
            name: name.to_ascii_lowercase(),
            closing,
            self_closing: false,
            attributes: Vec::new(),
        };

        loop {
            self.skip_whitespace();
            match self.peek()? {
                b'>' => {
                    self.bump();
                    return Some(tag);
                }
                b'/' => {
                    self.bump();
                    tag.self_closing = self.peek() == Some(b'>');
                }
                _ => {
                    if let Some(attribute) = self.read_attribute()? {
                        tag.attributes.push(attribute);
                    }
                }
            }
        }
    }

    /// `None` means the tag ran off the end of the input; `Some(None)` skips
    /// a byte that cannot start an attribute.
    fn read_attribute(&mut self) -> Option<Option<(String, String)>> {
        let key = self.take_while(|byte| {
            !byte.is_ascii_whitespace() && !matches!(byte, b'=' | b'>' | b'/')
        });
        if key.is_empty() {
            self.bump();
            return Some(None);
        }

        let key = key.to_ascii_lowercase();
        self.skip_whitespace();
        if !self.eat(b"=") {
            return Some(Some((key, String::new())));
        }

        self.skip_whitespace();
        let value = match self.peek()? {
            quote @ (b'"' | b'\'') => {
                self.bump();
                let value = self.take_while(|byte| byte != quote);
                if self.at_end() {
                    return None;
                }
                self.bump();
                value
            }
            _ => self.take_while(|byte| !byte.is_ascii_whitespace() && byte != b'>'),
        };
        Some(Some((key, value.to_owned())))
    }

    /// Raw element text up to the matching end tag; the cursor ends after it.
    fn raw_text(&mut self, tag: &Tag) -> &'a str {
        if tag.self_closing {
            return "";
        }

        let start = self.pos;
        let end_tag = format!("</{}", tag.name);
        let mut search = start;
        while let Some(offset) = find_ignore_ascii_case(&self.bytes()[search..], end_tag.as_bytes())
        {
            let candidate = search + offset;
            let after_name = candidate + end_tag.len();
            let boundary = self
                .bytes()
                .get(after_name)
                .is_none_or(|byte| byte.is_ascii_whitespace() || matches!(byte, b'>' | b'/'));
            if boundary {
                self.pos = after_name;
                self.skip_past(b">");
                return &self.input[start..candidate];
            }
            search = after_name;
        }

        self.pos = self.input.len();
        &self.input[start..]
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}
