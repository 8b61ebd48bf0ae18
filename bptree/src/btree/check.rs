//! Structural verification of a tree on disk.
//!
//! Walks every node from the root, then walks the leaf chain, and compares
//! both against each other and against the meta record's counters.

use crate::btree::node::{Key, internal_capacity, leaf_capacity};
use crate::btree::tree::{BPlusTree, BPlusTreeError, Session};
use crate::storage::Offset;

/// Summary of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    /// Entries stored across all leaves.
    pub entries: u64,
    pub leaf_nodes: u64,
    pub internal_nodes: u64,
    pub height: u64,
}

/// Accumulated state of the top-down walk.
#[derive(Default)]
struct Walk {
    /// Leaves in key order as reached from the root.
    leaves: Vec<Offset>,
    internal_nodes: u64,
    entries: u64,
}

fn corrupt(msg: String) -> BPlusTreeError {
    BPlusTreeError::Corrupt(msg)
}

impl BPlusTree {
    /// Check every structural invariant of the tree.
    ///
    /// Verified:
    /// - keys strictly increase within each node and stay inside the range
    ///   the parent's separators allow
    /// - no leaf holds more than `order - 1` entries and no internal node
    ///   more than `order` children
    /// - every leaf sits exactly `height` levels below the root
    /// - the meta counters match the nodes reachable from the root
    /// - the leaf chain, followed through `next` from the leftmost leaf,
    ///   visits the same leaves in the same order, with matching `prev` links
    pub fn verify(&mut self) -> Result<VerifyReport, BPlusTreeError> {
        let mut session = self.session()?;
        let meta = *session.meta();

        let mut walk = Walk::default();
        check_node(
            &mut session,
            meta.root_offset,
            meta.height,
            None,
            None,
            &mut walk,
        )?;

        if walk.internal_nodes != meta.internal_node_count {
            return Err(corrupt(format!(
                "meta counts {} internal nodes, found {}",
                meta.internal_node_count, walk.internal_nodes
            )));
        }
        let leaf_nodes = walk.leaves.len() as u64;
        if leaf_nodes != meta.leaf_node_count {
            return Err(corrupt(format!(
                "meta counts {} leaves, found {leaf_nodes}",
                meta.leaf_node_count
            )));
        }
        if (meta.height == 0) != (walk.internal_nodes + leaf_nodes == 1) {
            return Err(corrupt(format!(
                "height {} with {} nodes",
                meta.height,
                walk.internal_nodes + leaf_nodes
            )));
        }

        check_leaf_chain(&mut session, &walk.leaves)?;

        tracing::debug!(
            entries = walk.entries,
            leaves = leaf_nodes,
            internal_nodes = walk.internal_nodes,
            "verified tree"
        );

        Ok(VerifyReport {
            entries: walk.entries,
            leaf_nodes,
            internal_nodes: walk.internal_nodes,
            height: meta.height,
        })
    }
}

/// Check the subtree at `offset`, `level` levels above the leaves, whose
/// keys must fall in `[lower, upper)`.
fn check_node(
    session: &mut Session<'_>,
    offset: Offset,
    level: u64,
    lower: Option<Key>,
    upper: Option<Key>,
    walk: &mut Walk,
) -> Result<(), BPlusTreeError> {
    let order = session.meta().order;
    let height = session.meta().height;

    let in_range =
        |key: &Key| lower.is_none_or(|lo| *key >= lo) && upper.is_none_or(|hi| *key < hi);

    if level == 0 {
        let leaf = session.read_leaf(offset)?;
        if leaf.entries.len() > leaf_capacity(order) {
            return Err(corrupt(format!(
                "leaf at {offset} holds {} entries",
                leaf.entries.len()
            )));
        }
        if height > 0 && leaf.entries.is_empty() {
            return Err(corrupt(format!("empty non-root leaf at {offset}")));
        }
        for pair in leaf.entries.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(corrupt(format!("leaf at {offset} is out of order")));
            }
        }
        if let Some(entry) = leaf.entries.iter().find(|e| !in_range(&e.key)) {
            return Err(corrupt(format!(
                "leaf at {offset} holds key {:?} outside its parent's range",
                entry.key
            )));
        }

        walk.entries += leaf.entries.len() as u64;
        walk.leaves.push(offset);
        return Ok(());
    }

    let node = session.read_internal(offset)?;
    walk.internal_nodes += 1;

    if node.entries.len() < 2 || node.entries.len() > internal_capacity(order) {
        return Err(corrupt(format!(
            "internal node at {offset} has {} children",
            node.entries.len()
        )));
    }
    for pair in node.entries[1..].windows(2) {
        if pair[0].key >= pair[1].key {
            return Err(corrupt(format!("internal node at {offset} is out of order")));
        }
    }
    if let Some(entry) = node.entries[1..].iter().find(|e| !in_range(&e.key)) {
        return Err(corrupt(format!(
            "internal node at {offset} holds separator {:?} outside its range",
            entry.key
        )));
    }

    for (i, entry) in node.entries.iter().enumerate() {
        let child_lower = if i == 0 { lower } else { Some(entry.key) };
        let child_upper = node.entries.get(i + 1).map_or(upper, |next| Some(next.key));
        check_node(
            session,
            entry.child,
            level - 1,
            child_lower,
            child_upper,
            walk,
        )?;
    }

    Ok(())
}

/// Follow `next` from the leftmost leaf and compare with `expected`.
fn check_leaf_chain(session: &mut Session<'_>, expected: &[Offset]) -> Result<(), BPlusTreeError> {
    let mut prev_offset: Option<Offset> = None;
    let mut prev_last_key: Option<Key> = None;
    let mut current = expected.first().copied();

    for (i, &want) in expected.iter().enumerate() {
        let Some(offset) = current else {
            return Err(corrupt(format!(
                "leaf chain ends after {i} of {} leaves",
                expected.len()
            )));
        };
        if offset != want {
            return Err(corrupt(format!(
                "leaf chain visits {offset} where {want} was expected"
            )));
        }

        let leaf = session.read_leaf(offset)?;
        if leaf.prev != prev_offset {
            return Err(corrupt(format!(
                "leaf at {offset} has prev {:?}, expected {prev_offset:?}",
                leaf.prev
            )));
        }
        if let (Some(last), Some(first)) = (prev_last_key, leaf.entries.first())
            && last >= first.key
        {
            return Err(corrupt(format!("leaf chain is out of order at {offset}")));
        }

        prev_offset = Some(offset);
        if let Some(last) = leaf.entries.last() {
            prev_last_key = Some(last.key);
        }
        current = leaf.next;
    }

    if let Some(extra) = current {
        return Err(corrupt(format!(
            "leaf chain continues to {extra} past the last leaf"
        )));
    }

    Ok(())
}
