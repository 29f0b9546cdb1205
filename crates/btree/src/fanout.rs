//! Fan-out computation.
//!
//! Capacities are found by binary-searching the record count whose
//! serialized node still fits in a page, probing with default-valued
//! records. Variable-width keys or values that can outgrow their probe
//! belong behind the slot table, referenced by fixed-width slot IDs.

use common::{Config, Position, StoreResult};

use crate::codec::{self, NODE_BUDGET};
use crate::node::{LinkStatus, Node, NodeBody};
use crate::tree::{KeyType, ValueType};

/// Maximum records per leaf and per branch for this key/value shape.
///
/// Positive configuration overrides are used directly; otherwise the
/// derived branch capacity is lowered until
/// `max_records_leaf >= 2 * max_records_branch - 1` holds.
pub fn capacities<K: KeyType, V: ValueType>(config: &Config) -> StoreResult<(usize, usize)> {
    if config.branching_factor_leaf > 0 && config.branching_factor_branch > 0 {
        return Ok((
            config.branching_factor_leaf as usize,
            config.branching_factor_branch as usize,
        ));
    }

    let leaf = max_fitting(|n| {
        codec::encoded_len(&Node::<K, V> {
            root_status: crate::node::RootStatus::Internal,
            parent: Position(0),
            next_leaf: Some(Position(0)),
            body: NodeBody::Leaf {
                keys: vec![K::default(); n],
                vals: vec![V::default(); n],
            },
        })
    })?;

    let branch = max_fitting(|n| {
        codec::encoded_len(&Node::<K, V> {
            root_status: crate::node::RootStatus::Internal,
            parent: Position(0),
            next_leaf: None,
            body: NodeBody::Branch {
                refs: vec![K::default(); n],
                links: vec![Position(0); n + 1],
                link_status: vec![LinkStatus::Valid; n + 1],
            },
        })
    })?;

    let branch = branch.min((leaf + 1) / 2);
    Ok((leaf, branch))
}

/// Largest `n` whose probed size fits the per-page node budget.
fn max_fitting(size_of: impl Fn(usize) -> StoreResult<usize>) -> StoreResult<usize> {
    if size_of(1)? > NODE_BUDGET {
        return Err(common::StoreError::Write(
            "a single record does not fit in one page".into(),
        ));
    }
    let mut lo = 1;
    let mut hi = 2;
    while size_of(hi)? <= NODE_BUDGET {
        lo = hi;
        hi *= 2;
    }
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if size_of(mid)? <= NODE_BUDGET {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}
