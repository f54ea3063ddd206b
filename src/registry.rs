use serde::{Deserialize, Serialize};

use crate::{
    ast::Node,
    error::{CompilateResult, ToolchainError, ToolchainErrorKind},
};

/// Identifies a fallback node blob.
pub const BLOB_FORMAT: &str = "compilate-nodes";
/// Bumped whenever the node encoding changes incompatibly.
pub const BLOB_VERSION: u32 = 1;

#[derive(Serialize)]
struct BlobRef<'n> {
    format: &'static str,
    version: u32,
    nodes: &'n [&'n Node],
}

#[derive(Deserialize)]
struct Blob {
    format: String,
    version: u32,
    nodes: Vec<Node>,
}

/// Nodes the compiler could not translate, in the order they were first
/// visited. A node's position is the index generated code refers to it by.
#[derive(Debug, Default)]
pub struct FallbackRegistry<'n> {
    nodes: Vec<&'n Node>,
}

impl<'n> FallbackRegistry<'n> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `node`, returning its index.
    pub fn register(&mut self, node: &'n Node) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        tracing::trace!(index, kind = node.kind(), "registered fallback node");
        index
    }

    pub fn get(&self, index: usize) -> Option<&'n Node> {
        self.nodes.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serializes the whole registry as one blob, or `None` if nothing was
    /// registered.
    pub fn to_blob(&self) -> CompilateResult<Option<String>> {
        if self.nodes.is_empty() {
            return Ok(None);
        }
        let blob = serde_json::to_string(&BlobRef {
            format: BLOB_FORMAT,
            version: BLOB_VERSION,
            nodes: &self.nodes,
        })?;
        Ok(Some(blob))
    }
}

/// Reconstructs the registered nodes from a blob produced by
/// [`FallbackRegistry::to_blob`], preserving index order.
pub fn load_blob(blob: &str) -> Result<Vec<Node>, ToolchainError> {
    let invalid = |message: String| ToolchainError::unpositioned(ToolchainErrorKind::InvalidNodes(message));

    let blob: Blob = serde_json::from_str(blob).map_err(|e| invalid(e.to_string()))?;
    if blob.format != BLOB_FORMAT {
        return Err(invalid(format!(
            "unknown format '{}' (expected '{}')",
            blob.format, BLOB_FORMAT
        )));
    }
    if blob.version != BLOB_VERSION {
        return Err(invalid(format!(
            "unsupported version {} (expected {})",
            blob.version, BLOB_VERSION
        )));
    }
    Ok(blob.nodes)
}
