//! Markup documents: tag trees tokenized from markup source files

use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;

use crate::error::{CacheError, Result};
use crate::store::{CacheStore, CacheStoreBase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupToken {
    Open {
        name: String,
        attributes: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        name: String,
    },
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<MarkupElement>,
    pub text: String,
}

impl MarkupElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A tokenized markup file and the element tree built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupDocument {
    pub path: String,
    pub tokens: Vec<MarkupToken>,
    pub root: Option<MarkupElement>,
}

impl MarkupDocument {
    pub fn parse(path: &str, source: &str) -> Result<Self> {
        let mut problems = Vec::new();
        let tokens = tokenize(source, &mut problems);
        let root = build_tree(&tokens, &mut problems);
        if !problems.is_empty() {
            return Err(CacheError::Parse {
                path: path.to_string(),
                problems,
            });
        }
        Ok(MarkupDocument {
            path: path.to_string(),
            tokens,
            root,
        })
    }

    /// Every `(element, attribute value)` pair for `attribute` in document order.
    pub fn elements_with_attribute(&self, attribute: &str) -> Vec<(&MarkupElement, &str)> {
        let mut found = Vec::new();
        if let Some(root) = &self.root {
            collect_attribute(root, attribute, &mut found);
        }
        found
    }
}

fn collect_attribute<'a>(element: &'a MarkupElement, attribute: &str, found: &mut Vec<(&'a MarkupElement, &'a str)>) {
    if let Some(value) = element.attribute(attribute) {
        found.push((element, value));
    }
    for child in &element.children {
        collect_attribute(child, attribute, found);
    }
}

fn tokenize(source: &str, problems: &mut Vec<String>) -> Vec<MarkupToken> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(true);
    let mut tokens = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                problems.push(format!("{e} at offset {}", reader.error_position()));
                break;
            }
        };
        match event {
            Event::Start(start) => match open_tag(&start, false) {
                Ok(token) => tokens.push(token),
                Err(problem) => problems.push(format!("{problem} at offset {}", reader.buffer_position())),
            },
            Event::Empty(start) => match open_tag(&start, true) {
                Ok(token) => tokens.push(token),
                Err(problem) => problems.push(format!("{problem} at offset {}", reader.buffer_position())),
            },
            Event::End(end) => tokens.push(MarkupToken::Close {
                name: decode_name(end.name()),
            }),
            Event::Text(text) => match text.unescape() {
                Ok(text) => push_text(&mut tokens, &text),
                Err(e) => problems.push(format!("{e} at offset {}", reader.buffer_position())),
            },
            Event::CData(cdata) => push_text(&mut tokens, &String::from_utf8_lossy(&cdata)),
            Event::Eof => break,
            // Comments, declarations, processing instructions, doctypes.
            _ => {}
        }
    }
    tokens
}

fn push_text(tokens: &mut Vec<MarkupToken>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        tokens.push(MarkupToken::Text(trimmed.to_string()));
    }
}

fn decode_name(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

fn open_tag(start: &BytesStart<'_>, self_closing: bool) -> std::result::Result<MarkupToken, String> {
    let name = decode_name(start.name());
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| format!("bad attribute in `<{name}>`: {e}"))?;
        let key = decode_name(attribute.key);
        let value = attribute
            .unescape_value()
            .map_err(|e| format!("bad value for attribute `{key}` in `<{name}>`: {e}"))?;
        attributes.push((key, value.into_owned()));
    }
    Ok(MarkupToken::Open {
        name,
        attributes,
        self_closing,
    })
}

fn build_tree(tokens: &[MarkupToken], problems: &mut Vec<String>) -> Option<MarkupElement> {
    let mut stack: Vec<MarkupElement> = Vec::new();
    let mut root = None;

    let mut attach = |element: MarkupElement, stack: &mut Vec<MarkupElement>, problems: &mut Vec<String>| {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => root = Some(element),
            None => problems.push(format!("more than one root element (`{}`)", element.name)),
        }
    };

    for token in tokens {
        match token {
            MarkupToken::Open {
                name,
                attributes,
                self_closing,
            } => {
                let element = MarkupElement {
                    name: name.clone(),
                    attributes: attributes.clone(),
                    ..MarkupElement::default()
                };
                if *self_closing {
                    attach(element, &mut stack, problems);
                } else {
                    stack.push(element);
                }
            }
            MarkupToken::Close { name } => match stack.pop() {
                Some(element) if element.name == *name => attach(element, &mut stack, problems),
                Some(element) => {
                    problems.push(format!("`</{name}>` does not close `<{}>`", element.name));
                    return None;
                }
                None => {
                    problems.push(format!("`</{name}>` without a matching open tag"));
                    return None;
                }
            },
            MarkupToken::Text(text) => {
                if let Some(element) = stack.last_mut() {
                    if !element.text.is_empty() {
                        element.text.push(' ');
                    }
                    element.text.push_str(text);
                }
            }
        }
    }

    if let Some(element) = stack.last() {
        problems.push(format!("`<{}>` is never closed", element.name));
    }
    root
}

/// Markup documents keyed by normalized file path.
pub struct MarkupCache {
    store: CacheStore<MarkupDocument>,
}

impl MarkupCache {
    pub fn new(soft_limit: Option<usize>) -> Self {
        MarkupCache {
            store: CacheStore::with_soft_limit("markup", soft_limit),
        }
    }

    pub fn remove_file(&self, path: &str) -> usize {
        self.store.remove_for_file(path)
    }
}

impl CacheStoreBase for MarkupCache {
    type Key = str;
    type Value = MarkupDocument;
    type Error = CacheError;

    fn store(&self) -> &CacheStore<MarkupDocument> {
        &self.store
    }

    fn create_entry_value(&self, path: &str) -> Result<Arc<MarkupDocument>> {
        grove_core::debug_assert_normalized!(path);
        let source = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        MarkupDocument::parse(path, &source).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree() {
        let source = r#"<?xml version="1.0"?>
<!-- header -->
<s:Application xmlns:s="library://ns" width="100">
    <s:Button label='Go &gt;' id="go"/>
    <s:Label>Hello <![CDATA[<raw>]]> world</s:Label>
</s:Application>"#;
        let doc = MarkupDocument::parse("/src/App.mxml", source).unwrap();
        let root = doc.root.as_ref().unwrap();

        assert_eq!(root.name, "s:Application");
        assert_eq!(root.attribute("width"), Some("100"));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].attribute("label"), Some("Go >"));
        assert_eq!(root.children[1].text, "Hello <raw> world");
        assert_eq!(doc.elements_with_attribute("id").len(), 1);
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let doc = MarkupDocument::parse("/a.mxml", r#"<a expr="x > 1"/>"#).unwrap();
        assert_eq!(doc.root.unwrap().attribute("expr"), Some("x > 1"));
    }

    #[test]
    fn test_entities_are_decoded() {
        let doc = MarkupDocument::parse("/p.mxml", r#"<a label="x &amp; y">1 &lt; 2</a>"#).unwrap();
        let root = doc.root.unwrap();
        assert_eq!(root.attribute("label"), Some("x & y"));
        assert_eq!(root.text, "1 < 2");
        assert!(MarkupDocument::parse("/p.mxml", "<a>&bogus;</a>").is_err());
    }

    #[test]
    fn test_parse_problems() {
        for source in ["<a><b></a>", "<a>", "</a>", "<a x=1/>", "<a", "<!-- open"] {
            let err = MarkupDocument::parse("/bad.mxml", source).unwrap_err();
            assert!(matches!(err, CacheError::Parse { .. }), "{source}: {err}");
        }
    }
}
