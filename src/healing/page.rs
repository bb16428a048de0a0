//! Live page abstraction used by the locator strategies.
//!
//! A [`PageSnapshot`] is a flattened capture of the DOM a failing test ran
//! against: every element with its tag, identifying attributes, text, and
//! geometry. Strategies query it instead of a live browser, which keeps
//! relocation deterministic and testable; a runner adapter produces
//! snapshots from whatever automation layer drove the page.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Element geometry in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One captured DOM element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageElement {
    /// Tag name, lowercase (`button`)
    pub tag: String,
    /// `id` attribute
    pub id: Option<String>,
    /// `data-testid` attribute
    pub test_id: Option<String>,
    /// ARIA role (explicit or implicit)
    pub role: Option<String>,
    /// `aria-label` attribute
    pub aria_label: Option<String>,
    /// Visible text content, trimmed
    pub text: String,
    /// Class list
    pub classes: Vec<String>,
    /// Remaining attributes
    pub attributes: HashMap<String, String>,
    /// Bounding box, when captured
    pub bounds: Option<Rect>,
}

impl PageElement {
    /// The most stable selector this element supports: `data-testid`
    /// first, then role, id, and finally a class-based CSS selector.
    pub fn stable_selector(&self) -> Option<String> {
        if let Some(test_id) = &self.test_id {
            return Some(format!("[data-testid=\"{test_id}\"]"));
        }
        if let Some(role) = &self.role {
            if let Some(label) = &self.aria_label {
                return Some(format!("role={role}[name=\"{label}\"]"));
            }
            if !self.text.is_empty() {
                return Some(format!("role={role}[name=\"{}\"]", self.text));
            }
        }
        if let Some(id) = &self.id {
            return Some(format!("#{id}"));
        }
        self.classes
            .first()
            .map(|class| format!("{}.{class}", self.tag))
    }
}

/// A handle to an element found in a snapshot.
#[derive(Debug, Clone)]
pub struct ElementHandle {
    /// Index into the snapshot's element list
    pub index: usize,
    /// The element itself
    pub element: PageElement,
}

/// Flattened capture of a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// Page URL at capture time
    pub url: String,
    /// All captured elements, in document order
    pub elements: Vec<PageElement>,
}

impl PageSnapshot {
    /// Create a snapshot from elements.
    pub fn new(url: impl Into<String>, elements: Vec<PageElement>) -> Self {
        Self {
            url: url.into(),
            elements,
        }
    }

    fn handles<'a>(
        &'a self,
        predicate: impl Fn(&PageElement) -> bool + 'a,
    ) -> impl Iterator<Item = ElementHandle> + 'a {
        self.elements
            .iter()
            .enumerate()
            .filter(move |(_, element)| predicate(element))
            .map(|(index, element)| ElementHandle {
                index,
                element: element.clone(),
            })
    }

    /// Elements with a given `id`.
    pub fn by_id(&self, id: &str) -> Vec<ElementHandle> {
        self.handles(|e| e.id.as_deref() == Some(id)).collect()
    }

    /// Elements with a given `data-testid`.
    pub fn by_test_id(&self, test_id: &str) -> Vec<ElementHandle> {
        self.handles(|e| e.test_id.as_deref() == Some(test_id))
            .collect()
    }

    /// Elements with a given role, optionally narrowed by accessible name.
    pub fn by_role(&self, role: &str, name: Option<&str>) -> Vec<ElementHandle> {
        self.handles(move |e| {
            e.role.as_deref() == Some(role)
                && name.is_none_or(|n| {
                    e.aria_label.as_deref() == Some(n) || e.text.eq_ignore_ascii_case(n)
                })
        })
        .collect()
    }

    /// Elements matching a simple CSS selector: `#id`, `.class`, `tag`,
    /// `tag.class`, or `[attr="value"]`.
    pub fn by_css(&self, selector: &str) -> Vec<ElementHandle> {
        let selector = selector.trim();

        if let Some(id) = selector.strip_prefix('#') {
            return self.by_id(id);
        }
        if let Some(class) = selector.strip_prefix('.') {
            return self
                .handles(|e| e.classes.iter().any(|c| c == class))
                .collect();
        }
        if let Some(body) = selector.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let (attr, value) = match body.split_once('=') {
                Some((attr, value)) => (attr.trim(), Some(value.trim().trim_matches(['"', '\'']))),
                None => (body.trim(), None),
            };
            return self
                .handles(move |e| match value {
                    Some(value) => attribute_of(e, attr).as_deref() == Some(value),
                    None => attribute_of(e, attr).is_some(),
                })
                .collect();
        }
        if let Some((tag, class)) = selector.split_once('.') {
            let tag = tag.to_string();
            let class = class.to_string();
            return self
                .handles(move |e| e.tag == tag && e.classes.iter().any(|c| *c == class))
                .collect();
        }

        let tag = selector.to_string();
        self.handles(move |e| e.tag == tag).collect()
    }

    /// Elements matching a simple XPath of the form `//tag`,
    /// `//tag[@attr='value']`, or `//tag[text()='value']`.
    pub fn by_xpath(&self, xpath: &str) -> Vec<ElementHandle> {
        let Some(rest) = xpath.trim().strip_prefix("//") else {
            return Vec::new();
        };

        let (tag, condition) = match rest.split_once('[') {
            Some((tag, condition)) => (tag, condition.strip_suffix(']')),
            None => (rest, None),
        };
        let tag = tag.to_string();
        let tag_matches =
            move |e: &PageElement| tag == "*" || e.tag == tag;

        match condition {
            None => self.handles(tag_matches).collect(),
            Some(condition) => {
                if let Some(text) = condition
                    .strip_prefix("text()=")
                    .map(|t| t.trim_matches(['"', '\'']).to_string())
                {
                    return self
                        .handles(move |e| tag_matches(e) && e.text == text)
                        .collect();
                }
                let Some((attr, value)) = condition
                    .strip_prefix('@')
                    .and_then(|c| c.split_once('='))
                else {
                    return Vec::new();
                };
                let attr = attr.trim().to_string();
                let value = value.trim_matches(['"', '\'']).to_string();
                self.handles(move |e| {
                    tag_matches(e) && attribute_of(e, &attr).as_deref() == Some(value.as_str())
                })
                .collect()
            }
        }
    }

    /// Elements whose visible text contains the needle
    /// (case-insensitive).
    pub fn by_text(&self, needle: &str) -> Vec<ElementHandle> {
        let needle = needle.to_lowercase();
        self.handles(move |e| e.text.to_lowercase().contains(&needle))
            .collect()
    }
}

/// Attribute lookup that treats the promoted fields like attributes.
fn attribute_of(element: &PageElement, attr: &str) -> Option<String> {
    match attr {
        "id" => element.id.clone(),
        "data-testid" => element.test_id.clone(),
        "role" => element.role.clone(),
        "aria-label" => element.aria_label.clone(),
        "class" => Some(element.classes.join(" ")),
        other => element.attributes.get(other).cloned(),
    }
}
