//! Declarative field mapping over parsed HTML
//!
//! A [`FieldRule`] names a record field, the CSS selectors that may carry it
//! (tried in order), and whether the record is unusable without it.

use crate::extract::{ParseError, TargetShape};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Where a field's value is read from on the matched element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Whitespace-collapsed text content
    Text,
    /// A named attribute, e.g. `src`
    Attr(&'static str),
}

/// Mapping of one record field onto the page
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub selectors: &'static [&'static str],
    pub source: Source,
    pub required: bool,
}

impl FieldRule {
    pub const fn text(field: &'static str, selectors: &'static [&'static str]) -> Self {
        Self {
            field,
            selectors,
            source: Source::Text,
            required: false,
        }
    }

    pub const fn attr(
        field: &'static str,
        selectors: &'static [&'static str],
        attr: &'static str,
    ) -> Self {
        Self {
            field,
            selectors,
            source: Source::Attr(attr),
            required: false,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reads the field from anywhere in the document
    pub fn extract(&self, document: &Html, shape: TargetShape) -> Result<String, ParseError> {
        self.extract_in(document.root_element(), shape)
    }

    /// Reads the field from within `scope`
    ///
    /// The first selector match with a non-empty value wins. Optional fields
    /// default to an empty string; required ones raise
    /// [`ParseError::MissingField`].
    pub fn extract_in(&self, scope: ElementRef<'_>, shape: TargetShape) -> Result<String, ParseError> {
        for raw in self.selectors {
            let Some(selector) = selector(raw) else {
                continue;
            };
            for element in scope.select(&selector) {
                let value = match self.source {
                    Source::Text => element_text(element),
                    Source::Attr(name) => element
                        .value()
                        .attr(name)
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default(),
                };
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }

        if self.required {
            Err(ParseError::MissingField {
                shape,
                field: self.field,
            })
        } else {
            Ok(String::new())
        }
    }
}

/// Parses a selector, ignoring malformed ones
pub fn selector(raw: &str) -> Option<Selector> {
    Selector::parse(raw).ok()
}

/// Collects text content with whitespace runs collapsed to single spaces
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collects the distinct texts of every element matching `raw` within `scope`
pub fn all_texts(scope: ElementRef<'_>, raw: &str) -> Vec<String> {
    let Some(selector) = selector(raw) else {
        return Vec::new();
    };
    let mut values: Vec<String> = Vec::new();
    for element in scope.select(&selector) {
        let text = element_text(element);
        if !text.is_empty() && !values.contains(&text) {
            values.push(text);
        }
    }
    values
}

/// Resolves a possibly relative link against the page URL
///
/// Script, mail and fragment-only links are dropped.
pub fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url)
}
