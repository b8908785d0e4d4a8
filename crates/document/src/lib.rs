//! Structured rich-text document model and the `Step` edit unit applied to it.
//!
//! The sync engine treats everything here as opaque: it applies steps,
//! serializes documents and compares fingerprints, nothing more.
use thiserror::Error;

mod node;
pub use node::*;
mod step;
pub use step::*;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("no node at path {0:?}")]
    PathNotFound(Vec<usize>),
    #[error("index {index} out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("node at {0:?} is not a text node")]
    NotText(Vec<usize>),
    #[error("text node at {0:?} cannot hold children")]
    LeafHasNoChildren(Vec<usize>),
    #[error("invalid text range {from}..{to} for length {len}")]
    InvalidRange { from: usize, to: usize, len: usize },
    #[error("mark not present: {0}")]
    MarkNotFound(String),
}
