//! Minimal namespace-agnostic XML tree, built once per document from `quick_xml`
//! events. SEC ownership documents don't need a streaming parser — filings are a
//! few KB — and a small DOM lets lookups read like `find_child`/`find_text` paths,
//! matching how the rest of this crate addresses the tree.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<Element>,
    /// Direct text content only (not descendants').
    pub text: String,
}

impl Element {
    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == name)
    }

    pub fn find_children<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.tag == name)
    }

    /// Walk a path of child tag names and return the trimmed text of the final node.
    pub fn find_text(&self, path: &[&str]) -> Option<String> {
        let mut cur = self;
        for p in path {
            cur = cur.find_child(p)?;
        }
        let t = cur.text.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    }

    /// The common SEC `<foo><value>TEXT</value></foo>` pattern.
    pub fn find_value_text(&self, path: &[&str]) -> Option<String> {
        let mut full_path: Vec<&str> = path.to_vec();
        full_path.push("value");
        self.find_text(&full_path)
    }

    /// All descendant elements (including self), depth-first.
    pub fn iter_descendants(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(std::iter::once(self).chain(self.children.iter().flat_map(|c| c.iter_descendants())))
    }

    /// Concatenation of this element's and all descendants' text, in document order.
    pub fn all_text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(el: &Element, out: &mut String) {
    out.push_str(&el.text);
    for c in &el.children {
        collect_text(c, out);
    }
}

fn strip_ns(tag: &str) -> &str {
    match tag.rfind(':') {
        Some(i) => &tag[i + 1..],
        None => tag,
    }
}

pub fn parse_tree(xml_text: &str) -> Result<Element, quick_xml::Error> {
    let mut reader = Reader::from_str(xml_text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = vec![Element { tag: "#root".to_string(), ..Default::default() }];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let tag = strip_ns(&String::from_utf8_lossy(e.name().as_ref())).to_string();
                let mut el = Element { tag, ..Default::default() };
                for a in e.attributes().flatten() {
                    let key = strip_ns(&String::from_utf8_lossy(a.key.as_ref())).to_string();
                    let val = a.unescape_value().unwrap_or_default().to_string();
                    el.attrs.insert(key, val);
                }
                stack.push(el);
            }
            Event::Empty(e) => {
                let tag = strip_ns(&String::from_utf8_lossy(e.name().as_ref())).to_string();
                let mut el = Element { tag, ..Default::default() };
                for a in e.attributes().flatten() {
                    let key = strip_ns(&String::from_utf8_lossy(a.key.as_ref())).to_string();
                    let val = a.unescape_value().unwrap_or_default().to_string();
                    el.attrs.insert(key, val);
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(el);
                }
            }
            Event::End(_) => {
                if stack.len() > 1 {
                    let finished = stack.pop().unwrap();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(finished);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if let Some(cur) = stack.last_mut() {
                    cur.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                if let Some(cur) = stack.last_mut() {
                    cur.text.push_str(&text);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let mut root = stack.pop().unwrap_or_default();
    if root.children.len() == 1 {
        Ok(root.children.pop().unwrap())
    } else {
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_value_pattern() {
        let xml = r#"<ownershipDocument><transactionDate><value>2024-01-02</value></transactionDate></ownershipDocument>"#;
        let root = parse_tree(xml).unwrap();
        assert_eq!(root.tag, "ownershipDocument");
        assert_eq!(root.find_value_text(&["transactionDate"]).as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn strips_namespace_prefixes() {
        let xml = r#"<ns:ownershipDocument xmlns:ns="urn:x"><ns:documentType>4</ns:documentType></ns:ownershipDocument>"#;
        let root = parse_tree(xml).unwrap();
        assert_eq!(root.tag, "ownershipDocument");
        assert_eq!(root.find_text(&["documentType"]).as_deref(), Some("4"));
    }
}
