//! Minimal owned XML element tree with namespace-insensitive path lookup.
//!
//! Result records arrive as a namespaced document; element and attribute
//! names are stored by local name so paths never mention the namespace.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("XML parse error at byte {position}: {message}")]
    Parse { position: u64, message: String },
    #[error("document has no root element")]
    Empty,
    #[error("invalid element path '{0}'")]
    BadPath(String),
}

/// An element with its attributes, accumulated text and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of the first child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// All descendants reachable by `path`, in document order.
    pub fn find_all<'a>(&'a self, path: &ElementPath) -> Vec<&'a XmlNode> {
        let mut current: Vec<&XmlNode> = vec![self];
        for step in &path.steps {
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter())
                .filter(|child| step.matches(child))
                .collect();
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// First descendant anywhere below this node with the given name.
    pub fn descendant(&self, name: &str) -> Option<&XmlNode> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }
}

/// One `name` or `name[@attr='value']` segment of an [`ElementPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub name: String,
    pub predicate: Option<(String, String)>,
}

impl PathStep {
    fn matches(&self, node: &XmlNode) -> bool {
        if node.name != self.name {
            return false;
        }
        match &self.predicate {
            Some((key, value)) => node.attr(key) == Some(value.as_str()),
            None => true,
        }
    }
}

/// Slash-separated relative path such as `summary/titles/title[@type='item']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPath {
    pub steps: Vec<PathStep>,
}

impl ElementPath {
    pub fn parse(path: &str) -> Result<Self, XmlError> {
        let mut steps = Vec::new();
        for segment in path.split('/') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(XmlError::BadPath(path.to_string()));
            }
            let step = match segment.split_once('[') {
                None => PathStep {
                    name: segment.to_string(),
                    predicate: None,
                },
                Some((name, rest)) => {
                    let inner = rest
                        .strip_suffix(']')
                        .and_then(|p| p.strip_prefix('@'))
                        .ok_or_else(|| XmlError::BadPath(path.to_string()))?;
                    let (key, value) = inner
                        .split_once('=')
                        .ok_or_else(|| XmlError::BadPath(path.to_string()))?;
                    let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
                    PathStep {
                        name: name.to_string(),
                        predicate: Some((key.trim().to_string(), value.to_string())),
                    }
                }
            };
            steps.push(step);
        }
        Ok(Self { steps })
    }
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn open_node(e: &BytesStart<'_>, decoder: quick_xml::encoding::Decoder) -> XmlNode {
    let mut node = XmlNode {
        name: local_name(e.local_name().as_ref()),
        ..XmlNode::default()
    };
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let value = attr
            .decode_and_unescape_value(decoder)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        node.attributes
            .push((local_name(attr.key.local_name().as_ref()), value));
    }
    node
}

fn close_node(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>) {
    if let Some(mut node) = stack.pop() {
        node.text = node.text.trim().to_string();
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => {
                if root.is_none() {
                    *root = Some(node);
                }
            }
        }
    }
}

/// Parse a complete document into its root element.
pub fn parse_document(xml: &str) -> Result<XmlNode, XmlError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(open_node(e, reader.decoder())),
            Ok(Event::Empty(ref e)) => {
                stack.push(open_node(e, reader.decoder()));
                close_node(&mut stack, &mut root);
            }
            Ok(Event::End(_)) => close_node(&mut stack, &mut root),
            Ok(Event::Text(ref e)) => {
                if let Some(node) = stack.last_mut() {
                    let text = e.unescape().map_err(|err| XmlError::Parse {
                        position: reader.buffer_position(),
                        message: err.to_string(),
                    })?;
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(XmlError::Parse {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    // Unclosed elements at EOF: fold them up so partial documents still parse.
    while !stack.is_empty() {
        close_node(&mut stack, &mut root);
    }
    root.ok_or(XmlError::Empty)
}
