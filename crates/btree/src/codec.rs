//! Node ↔ page serialization.
//!
//! A node page is the kind tag at byte 0 followed by the bincode encoding
//! of the node; whatever trails the encoding is ignored on the way back in.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{StoreError, StoreResult};
use serde::{Serialize, de::DeserializeOwned};
use storage::{PAGE_SIZE, Page, PageKind};

use crate::node::Node;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Bytes of one node page available to the serialized node.
pub const NODE_BUDGET: usize = PAGE_SIZE - 1;

/// Decode the node stored in a `Node`-tagged page.
pub fn from_page<K, V>(page: &Page) -> StoreResult<Node<K, V>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    if page.kind() != Some(PageKind::Node) {
        return Err(StoreError::Read("page is not a node page".into()));
    }
    let (node, _) = decode_from_slice(&page.data[1..], bincode_config())
        .map_err(|e| StoreError::Read(format!("decode node: {e}")))?;
    Ok(node)
}

/// Serialize a node into a fresh `Node`-tagged page.
pub fn make_page<K, V>(node: &Node<K, V>) -> StoreResult<Page>
where
    K: Serialize,
    V: Serialize,
{
    let bytes = encode_to_vec(node, bincode_config())
        .map_err(|e| StoreError::Write(format!("encode node: {e}")))?;
    if bytes.len() > NODE_BUDGET {
        return Err(StoreError::Write(format!(
            "node needs {} bytes, a page holds {NODE_BUDGET}",
            bytes.len()
        )));
    }
    let mut page = Page::node();
    page.data[1..1 + bytes.len()].copy_from_slice(&bytes);
    Ok(page)
}

/// Serialized size of a node, for fan-out probing.
pub fn encoded_len<K, V>(node: &Node<K, V>) -> StoreResult<usize>
where
    K: Serialize,
    V: Serialize,
{
    let bytes = encode_to_vec(node, bincode_config())
        .map_err(|e| StoreError::Write(format!("encode node: {e}")))?;
    Ok(bytes.len())
}
