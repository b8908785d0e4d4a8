//! Edit units applied to a `Document`.
//! Every step is pure: it reads one document value and yields the next.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Document, Mark, Node, StepError};

/// A single structural edit. Paths are child indices from the root; `[]` is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stepType", rename_all = "camelCase")]
pub enum Step {
    InsertNode {
        #[serde(default)]
        path: Vec<usize>,
        index: usize,
        node: Node,
    },
    RemoveNode {
        #[serde(default)]
        path: Vec<usize>,
        index: usize,
    },
    /// `offset` counts characters, not bytes.
    InsertText {
        path: Vec<usize>,
        offset: usize,
        text: String,
    },
    DeleteText {
        path: Vec<usize>,
        from: usize,
        to: usize,
    },
    SetAttr {
        #[serde(default)]
        path: Vec<usize>,
        key: String,
        value: Value,
    },
    /// Replaces any existing mark of the same type.
    AddMark { path: Vec<usize>, mark: Mark },
    #[serde(rename_all = "camelCase")]
    RemoveMark { path: Vec<usize>, mark_type: String },
}

impl Step {
    pub fn apply(&self, doc: &Document) -> Result<Document, StepError> {
        let mut next = doc.clone();
        self.apply_to(next.root_mut())?;
        Ok(next)
    }

    fn apply_to(&self, root: &mut Node) -> Result<(), StepError> {
        match self {
            Step::InsertNode { path, index, node } => {
                let parent = container_at(root, path)?;
                let len = parent.content.len();
                if *index > len {
                    return Err(StepError::IndexOutOfRange { index: *index, len });
                }
                parent.content.insert(*index, node.clone());
            }

            Step::RemoveNode { path, index } => {
                let parent = container_at(root, path)?;
                let len = parent.content.len();
                if *index >= len {
                    return Err(StepError::IndexOutOfRange { index: *index, len });
                }
                parent.content.remove(*index);
            }

            Step::InsertText { path, offset, text } => {
                let current = text_at(root, path)?;
                let len = current.chars().count();
                if *offset > len {
                    return Err(StepError::InvalidRange {
                        from: *offset,
                        to: *offset,
                        len,
                    });
                }
                let at = byte_offset(current, *offset);
                current.insert_str(at, text);
            }

            Step::DeleteText { path, from, to } => {
                let current = text_at(root, path)?;
                let len = current.chars().count();
                if from > to || *to > len {
                    return Err(StepError::InvalidRange {
                        from: *from,
                        to: *to,
                        len,
                    });
                }
                let start = byte_offset(current, *from);
                let end = byte_offset(current, *to);
                current.replace_range(start..end, "");
            }

            Step::SetAttr { path, key, value } => {
                root.node_at_mut(path)?
                    .attrs
                    .insert(key.clone(), value.clone());
            }

            Step::AddMark { path, mark } => {
                let node = root.node_at_mut(path)?;
                node.marks.retain(|m| m.kind != mark.kind);
                node.marks.push(mark.clone());
            }

            Step::RemoveMark { path, mark_type } => {
                let node = root.node_at_mut(path)?;
                let before = node.marks.len();
                node.marks.retain(|m| &m.kind != mark_type);
                if node.marks.len() == before {
                    return Err(StepError::MarkNotFound(mark_type.clone()));
                }
            }
        }

        Ok(())
    }
}

fn container_at<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut Node, StepError> {
    let node = root.node_at_mut(path)?;
    if node.is_text() {
        return Err(StepError::LeafHasNoChildren(path.to_vec()));
    }
    Ok(node)
}

fn text_at<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut String, StepError> {
    let node = root.node_at_mut(path)?;
    if !node.is_text() {
        return Err(StepError::NotText(path.to_vec()));
    }
    Ok(node.text.get_or_insert_with(String::new))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(at, _)| at)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_text(text: &str) -> Document {
        Document::new(Node::element(
            "doc",
            vec![Node::element("paragraph", vec![Node::text(text)])],
        ))
    }

    #[test]
    fn step_json_uses_step_type_tag() {
        let step: Step = serde_json::from_value(json!({
            "stepType": "insertText",
            "path": [0, 0],
            "offset": 5,
            "text": " world"
        }))
        .unwrap();
        assert_eq!(
            step,
            Step::InsertText {
                path: vec![0, 0],
                offset: 5,
                text: " world".to_string()
            }
        );

        let remove: Step =
            serde_json::from_value(json!({"stepType": "removeMark", "path": [0, 0], "markType": "bold"}))
                .unwrap();
        assert!(matches!(remove, Step::RemoveMark { ref mark_type, .. } if mark_type == "bold"));
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let parsed: Result<Step, _> = serde_json::from_value(json!({"stepType": "teleport"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn insert_and_delete_text_count_characters() {
        let doc = doc_with_text("héllo");
        let doc = Step::InsertText {
            path: vec![0, 0],
            offset: 2,
            text: "-".to_string(),
        }
        .apply(&doc)
        .unwrap();
        assert_eq!(doc.text_content(), "hé-llo");

        let doc = Step::DeleteText {
            path: vec![0, 0],
            from: 1,
            to: 3,
        }
        .apply(&doc)
        .unwrap();
        assert_eq!(doc.text_content(), "hllo");
    }

    #[test]
    fn text_steps_reject_bad_ranges_and_non_text_targets() {
        let doc = doc_with_text("abc");
        let err = Step::DeleteText {
            path: vec![0, 0],
            from: 2,
            to: 9,
        }
        .apply(&doc)
        .unwrap_err();
        assert_eq!(err, StepError::InvalidRange { from: 2, to: 9, len: 3 });

        let err = Step::InsertText {
            path: vec![0],
            offset: 0,
            text: "x".to_string(),
        }
        .apply(&doc)
        .unwrap_err();
        assert_eq!(err, StepError::NotText(vec![0]));
    }

    #[test]
    fn structural_steps() {
        let doc = Document::default();
        let doc = Step::InsertNode {
            path: vec![],
            index: 1,
            node: Node::element("heading", vec![Node::text("Intro")]).with_attr("level", json!(2)),
        }
        .apply(&doc)
        .unwrap();
        assert_eq!(doc.root().content.len(), 2);
        assert_eq!(doc.root().content[1].kind, "heading");

        let err = Step::InsertNode {
            path: vec![1, 0],
            index: 0,
            node: Node::text("nope"),
        }
        .apply(&doc)
        .unwrap_err();
        assert_eq!(err, StepError::LeafHasNoChildren(vec![1, 0]));

        let doc = Step::RemoveNode {
            path: vec![],
            index: 0,
        }
        .apply(&doc)
        .unwrap();
        assert_eq!(doc.root().content.len(), 1);
        assert_eq!(doc.text_content(), "Intro");

        let err = Step::SetAttr {
            path: vec![4],
            key: "level".to_string(),
            value: json!(3),
        }
        .apply(&doc)
        .unwrap_err();
        assert_eq!(err, StepError::PathNotFound(vec![4]));
    }

    #[test]
    fn marks_replace_and_remove() {
        let doc = Document::new(Node::element(
            "doc",
            vec![Node::element(
                "paragraph",
                vec![Node::text("abc").with_mark(Mark::new("bold"))],
            )],
        ));
        let link = |href: &str| {
            let mut mark = Mark::new("link");
            mark.attrs.insert("href".to_string(), json!(href));
            mark
        };

        let doc = Step::AddMark {
            path: vec![0, 0],
            mark: link("a"),
        }
        .apply(&doc)
        .unwrap();
        let doc = Step::AddMark {
            path: vec![0, 0],
            mark: link("b"),
        }
        .apply(&doc)
        .unwrap();
        let marks = &doc.root().node_at(&[0, 0]).unwrap().marks;
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0], Mark::new("bold"));
        assert_eq!(marks[1].attrs["href"], json!("b"));

        let doc = Step::RemoveMark {
            path: vec![0, 0],
            mark_type: "link".to_string(),
        }
        .apply(&doc)
        .unwrap();
        assert_eq!(doc.root().node_at(&[0, 0]).unwrap().marks, vec![Mark::new("bold")]);
        let err = Step::RemoveMark {
            path: vec![0, 0],
            mark_type: "link".to_string(),
        }
        .apply(&doc)
        .unwrap_err();
        assert_eq!(err, StepError::MarkNotFound("link".to_string()));
    }
}
