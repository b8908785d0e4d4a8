use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::{Step, StepError};

/// Node type name reserved for text leaves.
pub const TEXT_NODE: &str = "text";

pub type Attrs = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Attrs,
}

impl Mark {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Attrs::new(),
        }
    }
}

/// A node of the document tree. Element nodes hold `content`, text leaves hold `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Attrs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

impl Node {
    pub fn element(kind: impl Into<String>, content: Vec<Node>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Attrs::new(),
            content,
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: TEXT_NODE.to_string(),
            attrs: Attrs::new(),
            content: Vec::new(),
            text: Some(text.into()),
            marks: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_mark(mut self, mark: Mark) -> Self {
        self.marks.push(mark);
        self
    }

    pub fn is_text(&self) -> bool {
        self.kind == TEXT_NODE
    }

    /// Concatenated text of every leaf below this node, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.content {
            child.collect_text(out);
        }
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&Node> {
        let mut node = self;
        for &index in path {
            node = node.content.get(index)?;
        }
        Some(node)
    }

    pub(crate) fn node_at_mut(&mut self, path: &[usize]) -> Result<&mut Node, StepError> {
        let mut node = self;
        for &index in path {
            node = node
                .content
                .get_mut(index)
                .ok_or_else(|| StepError::PathNotFound(path.to_vec()))?;
        }
        Ok(node)
    }
}

/// An immutable document value. Serializes as its root node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    root: Node,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(Node::element("doc", vec![Node::element("paragraph", Vec::new())]))
    }
}

impl Document {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    pub fn text_content(&self) -> String {
        self.root.text_content()
    }

    /// Apply `steps` in order. On failure returns the index of the failing step;
    /// `self` is never touched.
    pub fn apply_all(&self, steps: &[Step]) -> Result<Document, (usize, StepError)> {
        let mut doc = self.clone();
        for (index, step) in steps.iter().enumerate() {
            doc = step.apply(&doc).map_err(|err| (index, err))?;
        }
        Ok(doc)
    }

    /// Hex SHA-256 over the canonical JSON form. Attribute maps are ordered,
    /// so equal documents always produce equal fingerprints.
    pub fn fingerprint(&self) -> String {
        let canonical =
            serde_json::to_vec(&self.root).expect("document tree always serializes to JSON");
        format!("{:x}", Sha256::digest(&canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_document_shape() {
        let doc = Document::default();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"type": "doc", "content": [{"type": "paragraph"}]}));
    }

    #[test]
    fn parses_prosemirror_style_json() {
        let doc: Document = serde_json::from_value(json!({
            "type": "doc",
            "content": [{
                "type": "heading",
                "attrs": {"level": 1},
                "content": [{"type": "text", "text": "Title", "marks": [{"type": "bold"}]}]
            }]
        }))
        .unwrap();

        let heading = doc.root().node_at(&[0]).unwrap();
        assert_eq!(heading.attrs.get("level"), Some(&json!(1)));
        assert_eq!(doc.text_content(), "Title");
        assert!(heading.content[0].is_text());
    }

    #[test]
    fn fingerprint_ignores_attr_insertion_order() {
        let a = Document::new(
            Node::element("doc", Vec::new())
                .with_attr("a", json!(1))
                .with_attr("b", json!(2)),
        );
        let b = Document::new(
            Node::element("doc", Vec::new())
                .with_attr("b", json!(2))
                .with_attr("a", json!(1)),
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), Document::default().fingerprint());
    }

    #[test]
    fn apply_all_reports_failing_index_and_keeps_original() {
        let doc = Document::default();
        let steps = vec![
            Step::InsertNode {
                path: vec![0],
                index: 0,
                node: Node::text("hi"),
            },
            Step::RemoveNode {
                path: vec![],
                index: 7,
            },
        ];

        let (index, err) = doc.apply_all(&steps).unwrap_err();
        assert_eq!(index, 1);
        assert_eq!(err, StepError::IndexOutOfRange { index: 7, len: 1 });
        assert_eq!(doc, Document::default());
    }
}
