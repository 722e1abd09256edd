//! In-memory snapshot of the group forest.
//!
//! Groups form an ordered forest over parent pointers. A snapshot is built
//! from the full group table each time a closure needs one, so structural
//! edits made by one request are visible to the next one without cache
//! invalidation.

use std::collections::{HashMap, HashSet};

use scoutreg_common::{AppError, AppResult};
use scoutreg_db::entities::group;
use tracing::error;

/// Ordered forest over the group table's parent pointers.
///
/// Node order everywhere follows the order of the underlying rows (id order
/// as loaded), so sibling order is deterministic across snapshots.
#[derive(Debug, Clone)]
pub struct OrgTree {
    nodes: Vec<group::Model>,
    index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl OrgTree {
    /// Build a snapshot from group rows.
    ///
    /// Rows with a duplicate id are dropped (first occurrence wins) and a row
    /// whose parent is missing from the snapshot is kept as a root, so one
    /// bad row cannot hide the rest of the forest.
    #[must_use]
    pub fn from_groups(groups: Vec<group::Model>) -> Self {
        let mut nodes: Vec<group::Model> = Vec::with_capacity(groups.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(groups.len());
        for group in groups {
            if index.contains_key(&group.id) {
                continue;
            }
            index.insert(group.id.clone(), nodes.len());
            nodes.push(group);
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut roots: Vec<usize> = Vec::new();
        for (slot, node) in nodes.iter().enumerate() {
            match node.parent_id.as_ref().and_then(|p| index.get(p)) {
                Some(&parent_slot) => children[parent_slot].push(slot),
                None => roots.push(slot),
            }
        }

        Self {
            nodes,
            index,
            children,
            roots,
        }
    }

    /// Number of groups in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot holds no groups at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a group id exists in the snapshot.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a group by id.
    pub fn get(&self, id: &str) -> AppResult<&group::Model> {
        self.slot(id).map(|slot| &self.nodes[slot])
    }

    /// Root groups in snapshot order.
    #[must_use]
    pub fn roots(&self) -> Vec<&group::Model> {
        self.roots.iter().map(|&slot| &self.nodes[slot]).collect()
    }

    /// Direct children of a group in snapshot order.
    pub fn children(&self, id: &str) -> AppResult<Vec<&group::Model>> {
        let slot = self.slot(id)?;
        Ok(self.children[slot]
            .iter()
            .map(|&child| &self.nodes[child])
            .collect())
    }

    /// A group and all its descendants in depth-first pre-order.
    ///
    /// Siblings keep snapshot order. Revisiting a node means the parent
    /// chain loops back on itself, which is reported instead of hanging.
    pub fn subtree(&self, id: &str) -> AppResult<Vec<&group::Model>> {
        let start = self.slot(id)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.walk_subtree(start, &mut seen, &mut out)?;
        Ok(out)
    }

    /// Ids of [`Self::subtree`] in the same order.
    pub fn subtree_ids(&self, id: &str) -> AppResult<Vec<String>> {
        Ok(self.subtree(id)?.iter().map(|g| g.id.clone()).collect())
    }

    /// Every group in the forest, walking each root's subtree in order.
    ///
    /// Nodes that no root can reach sit on a parent cycle, so a snapshot
    /// that is not fully covered is reported as corrupted.
    pub fn preorder(&self) -> AppResult<Vec<&group::Model>> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.walk_subtree(root, &mut seen, &mut out)?;
        }
        if out.len() != self.nodes.len() {
            if let Some(node) = self.nodes.iter().find(|n| !seen.contains(n.id.as_str())) {
                error!(group_id = %node.id, "group tree contains a parent cycle");
                return Err(AppError::CycleDetected(node.id.clone()));
            }
        }
        Ok(out)
    }

    /// Ids of [`Self::preorder`] in the same order.
    pub fn preorder_ids(&self) -> AppResult<Vec<String>> {
        Ok(self.preorder()?.iter().map(|g| g.id.clone()).collect())
    }

    /// Chain from the root down to the group, both ends included.
    pub fn path(&self, id: &str) -> AppResult<Vec<&group::Model>> {
        let mut slot = self.slot(id)?;
        let mut seen: HashSet<usize> = HashSet::new();
        let mut chain: Vec<&group::Model> = Vec::new();
        loop {
            if !seen.insert(slot) {
                let node = &self.nodes[slot];
                error!(group_id = %node.id, "group tree contains a parent cycle");
                return Err(AppError::CycleDetected(node.id.clone()));
            }
            let node = &self.nodes[slot];
            chain.push(node);
            match node.parent_id.as_ref().and_then(|p| self.index.get(p)) {
                Some(&parent) => slot = parent,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Ids of [`Self::path`] in the same order.
    pub fn path_ids(&self, id: &str) -> AppResult<Vec<String>> {
        Ok(self.path(id)?.iter().map(|g| g.id.clone()).collect())
    }

    /// The root ancestor of a group (the group itself when it is a root).
    pub fn root(&self, id: &str) -> AppResult<&group::Model> {
        let path = self.path(id)?;
        path.first()
            .copied()
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))
    }

    /// Edge count from the root down to the group. Roots have depth 0.
    pub fn depth(&self, id: &str) -> AppResult<usize> {
        Ok(self.path(id)?.len().saturating_sub(1))
    }

    fn slot(&self, id: &str) -> AppResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| AppError::GroupNotFound(id.to_string()))
    }

    fn walk_subtree<'a>(
        &'a self,
        start: usize,
        seen: &mut HashSet<&'a str>,
        out: &mut Vec<&'a group::Model>,
    ) -> AppResult<()> {
        let mut stack = vec![start];
        while let Some(slot) = stack.pop() {
            let node = &self.nodes[slot];
            if !seen.insert(node.id.as_str()) {
                error!(group_id = %node.id, "group tree contains a parent cycle");
                return Err(AppError::CycleDetected(node.id.clone()));
            }
            out.push(node);
            for &child in self.children[slot].iter().rev() {
                stack.push(child);
            }
        }
        Ok(())
    }
}
