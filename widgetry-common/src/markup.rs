//! Output representations exchanged between template engines.
//!
//! Engines disagree on what a rendered sub-template looks like when embedded
//! in one of their own templates: plain text, markup flagged as already safe,
//! or a parsed tree. [`Rendered`] carries any of them.

use std::fmt;

use scraper::Html;

use crate::error::EngineError;

/// Text that is already valid markup and must not be escaped again.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Markup(String);

impl Markup {
    /// Wrap text that is known to be safe markup.
    pub fn new(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    /// Escape plain text into markup.
    pub fn escape(text: &str) -> Self {
        Self(html_escape::encode_text(text).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed markup fragment.
#[derive(Debug, Clone)]
pub struct Fragment {
    html: Html,
}

impl Fragment {
    /// Parse text into a fragment. Parsing is lenient: malformed input is
    /// repaired the way an HTML parser would.
    pub fn parse(text: &str) -> Self {
        Self {
            html: Html::parse_fragment(text),
        }
    }

    /// Names of the top-level elements, in document order.
    pub fn root_elements(&self) -> Vec<String> {
        self.html
            .root_element()
            .children()
            .filter_map(|node| node.value().as_element())
            .map(|element| element.name().to_string())
            .collect()
    }

    /// Serialize the fragment back to markup.
    pub fn to_html(&self) -> String {
        self.html.root_element().inner_html()
    }

    pub fn html(&self) -> &Html {
        &self.html
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_html())
    }
}

/// Output of a template render.
#[derive(Debug, Clone)]
pub enum Rendered {
    Text(String),
    /// Encoded output of engines configured with an output encoding (UTF-8).
    Bytes(Vec<u8>),
    Markup(Markup),
    Fragment(Fragment),
}

impl Rendered {
    /// Decode byte output into text; other variants pass through.
    pub fn decode(self) -> Result<Self, EngineError> {
        match self {
            Self::Bytes(bytes) => Ok(Self::Text(String::from_utf8(bytes)?)),
            other => Ok(other),
        }
    }

    /// The output as a markup string, whatever its representation.
    pub fn into_text(self) -> Result<String, EngineError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Bytes(bytes) => Ok(String::from_utf8(bytes)?),
            Self::Markup(markup) => Ok(markup.into_string()),
            Self::Fragment(fragment) => Ok(fragment.to_html()),
        }
    }

    pub fn is_markup(&self) -> bool {
        matches!(self, Self::Markup(_))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::Fragment(_))
    }
}

impl From<String> for Rendered {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Rendered {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Markup> for Rendered {
    fn from(markup: Markup) -> Self {
        Self::Markup(markup)
    }
}

impl From<Fragment> for Rendered {
    fn from(fragment: Fragment) -> Self {
        Self::Fragment(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markup_escape() {
        let markup = Markup::escape("<b>Tom & Jerry</b>");
        assert_eq!(markup.as_str(), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
        assert_eq!(Markup::new("<b>x</b>").to_string(), "<b>x</b>");
    }

    #[test]
    fn test_fragment_parse() {
        let fragment = Fragment::parse("<div id=\"a\"><span>hi</span></div><p>there</p>");
        assert_eq!(fragment.root_elements(), vec!["div", "p"]);
        assert_eq!(
            fragment.to_html(),
            "<div id=\"a\"><span>hi</span></div><p>there</p>"
        );
    }

    #[test]
    fn test_decode_bytes() {
        let rendered = Rendered::Bytes("héllo".as_bytes().to_vec()).decode().unwrap();
        assert!(matches!(rendered, Rendered::Text(ref t) if t == "héllo"));

        let invalid = Rendered::Bytes(vec![0xff, 0xfe]).decode();
        assert!(matches!(invalid, Err(EngineError::InvalidUtf8(_))));
    }

    #[test]
    fn test_into_text() {
        assert_eq!(Rendered::from("a").into_text().unwrap(), "a");
        assert_eq!(Rendered::from(Markup::new("<i>b</i>")).into_text().unwrap(), "<i>b</i>");
        assert_eq!(
            Rendered::from(Fragment::parse("<em>c</em>")).into_text().unwrap(),
            "<em>c</em>"
        );
    }
}
