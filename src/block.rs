//! Hierarchical composition: machines chained into navigable block stacks.
//!
//! Blocks let independently built machine fragments be composed without one
//! needing to know about the others. All blocks live in an arena and refer to
//! each other by [`BlockId`], so the navigational graph may contain cycles
//! (root and neighbors point at each other) while the ownership graph stays
//! acyclic. Composition never implies synchronized execution across the
//! wrapped machines.

use std::collections::HashMap;
use thiserror::Error;

/// Errors from block composition.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("unknown block: {id:?}")]
    UnknownBlock { id: BlockId },

    #[error("block {id:?} is already linked into a chain")]
    AlreadyLinked { id: BlockId },
}

/// Non-owning identifier of a block inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u64);

/// A composition node wrapping a machine or a placeholder slot.
#[derive(Debug)]
pub struct Block<M> {
    payload: Option<M>,
    root: BlockId,
    above: Option<BlockId>,
    below: Option<BlockId>,
    is_box: bool,
}

impl<M> Block<M> {
    pub fn payload(&self) -> Option<&M> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut M> {
        self.payload.as_mut()
    }

    /// The root of the chain this block belongs to. A lone block is its own
    /// root.
    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn above(&self) -> Option<BlockId> {
        self.above
    }

    pub fn below(&self) -> Option<BlockId> {
        self.below
    }

    /// Returns whether this block marks a composition (sub-)root.
    pub fn is_box(&self) -> bool {
        self.is_box
    }
}

/// Arena owning every block of one composition graph.
#[derive(Debug)]
pub struct Blocks<M> {
    nodes: HashMap<BlockId, Block<M>>,
    next_id: u64,
}

impl<M> Blocks<M> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
        }
    }

    fn allocate(&mut self, payload: Option<M>, is_box: bool) -> BlockId {
        let id = BlockId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Block {
                payload,
                root: id,
                above: None,
                below: None,
                is_box,
            },
        );
        id
    }

    /// Wraps a machine in a new composition root block.
    pub fn attach_box(&mut self, machine: M) -> BlockId {
        self.allocate(Some(machine), true)
    }

    /// Wraps a lone machine block without marking it as a root, so it can be
    /// attached into an existing chain.
    pub fn attach(&mut self, machine: M) -> BlockId {
        self.allocate(Some(machine), false)
    }

    /// Creates a placeholder sub-root stacked immediately above `target`,
    /// linked to the same root.
    pub fn create_box(&mut self, target: BlockId) -> Result<BlockId, BlockError> {
        self.ensure_exists(target)?;
        let id = self.allocate(None, true);
        self.attach_top_to(target, id)?;
        Ok(id)
    }

    /// Inserts `block` immediately below `target`, re-linking both neighbor
    /// ends. `block` must be lone (not yet part of a chain).
    pub fn attach_bottom_to(&mut self, target: BlockId, block: BlockId) -> Result<(), BlockError> {
        self.ensure_exists(target)?;
        self.ensure_lone(block)?;
        if target == block {
            return Err(BlockError::AlreadyLinked { id: block });
        }

        let (old_below, root) = {
            let t = self.node(target)?;
            (t.below, t.root)
        };
        if let Some(old) = old_below {
            self.node_mut(old)?.above = Some(block);
        }
        {
            let b = self.node_mut(block)?;
            b.above = Some(target);
            b.below = old_below;
            b.root = root;
        }
        self.node_mut(target)?.below = Some(block);
        Ok(())
    }

    /// Inserts `block` immediately above `target`, re-linking both neighbor
    /// ends. `block` must be lone (not yet part of a chain).
    pub fn attach_top_to(&mut self, target: BlockId, block: BlockId) -> Result<(), BlockError> {
        self.ensure_exists(target)?;
        self.ensure_lone(block)?;
        if target == block {
            return Err(BlockError::AlreadyLinked { id: block });
        }

        let (old_above, root) = {
            let t = self.node(target)?;
            (t.above, t.root)
        };
        if let Some(old) = old_above {
            self.node_mut(old)?.below = Some(block);
        }
        {
            let b = self.node_mut(block)?;
            b.below = Some(target);
            b.above = old_above;
            b.root = root;
        }
        self.node_mut(target)?.above = Some(block);
        Ok(())
    }

    /// Navigates from any block to its root, then to the chain's bottommost
    /// (`bottom == true`) or topmost (`bottom == false`) block. A single-node
    /// chain yields the root itself.
    pub fn move_to_root(&self, from: BlockId, bottom: bool) -> Result<BlockId, BlockError> {
        let mut cursor = self.root_of(from)?;
        // Chain length bounds the walk, so a corrupted link cannot hang it.
        for _ in 0..=self.nodes.len() {
            let node = self.node(cursor)?;
            match if bottom { node.below } else { node.above } {
                Some(next) => cursor = next,
                None => return Ok(cursor),
            }
        }
        Ok(cursor)
    }

    /// The root of the chain containing `id`.
    pub fn root_of(&self, id: BlockId) -> Result<BlockId, BlockError> {
        Ok(self.node(id)?.root)
    }

    pub fn get(&self, id: BlockId) -> Option<&Block<M>> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut Block<M>> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: BlockId) -> Result<&Block<M>, BlockError> {
        self.nodes.get(&id).ok_or(BlockError::UnknownBlock { id })
    }

    fn node_mut(&mut self, id: BlockId) -> Result<&mut Block<M>, BlockError> {
        self.nodes
            .get_mut(&id)
            .ok_or(BlockError::UnknownBlock { id })
    }

    fn ensure_exists(&self, id: BlockId) -> Result<(), BlockError> {
        self.node(id).map(|_| ())
    }

    fn ensure_lone(&self, id: BlockId) -> Result<(), BlockError> {
        let block = self.node(id)?;
        if block.above.is_some() || block.below.is_some() || block.root != id {
            return Err(BlockError::AlreadyLinked { id });
        }
        Ok(())
    }
}

impl<M> Default for Blocks<M> {
    fn default() -> Self {
        Self::new()
    }
}
