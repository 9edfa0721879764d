//! Host tree.
//!
//! The hydrator folds every context's output stream into one tree of host
//! nodes. Nodes live in a slab addressed by id; a `Slot` node stands where
//! a child context's output splices in, and applying a batch for a context
//! replaces that slot's subtree. Batches that arrive before their slot has
//! been realized are buffered until the owning parent commits.

use std::rc::Rc;

use hashbrown::HashMap;

use reflow_core::{ContextId, OutputBatch, OutputNode};

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub enum HostNode {
    Text(Rc<str>),
    Element {
        tag: Rc<str>,
        attrs: Vec<(Rc<str>, Rc<str>)>,
        children: Vec<NodeId>,
    },
    Slot {
        context: ContextId,
        children: Vec<NodeId>,
    },
}

#[derive(Debug)]
pub struct HostTree {
    nodes: Vec<Option<HostNode>>,
    root: NodeId,
    slots: HashMap<ContextId, NodeId, ahash::RandomState>,
    pending: HashMap<ContextId, OutputBatch, ahash::RandomState>,
}

impl HostTree {
    pub(crate) fn new(root_context: ContextId) -> Self {
        let mut slots = HashMap::with_hasher(ahash::RandomState::new());
        slots.insert(root_context, 0);
        Self {
            nodes: vec![Some(HostNode::Slot {
                context: root_context,
                children: Vec::new(),
            })],
            root: 0,
            slots,
            pending: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&HostNode> {
        self.nodes.get(id).and_then(|node| node.as_ref())
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    /// Concatenated text of the whole tree, depth first.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(self.root, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.node(id) {
            Some(HostNode::Text(text)) => out.push_str(text),
            Some(HostNode::Element { children, .. })
            | Some(HostNode::Slot { children, .. }) => {
                for child in children.clone() {
                    self.collect_text(child, out);
                }
            }
            None => {}
        }
    }

    /// Replaces the subtree under `context`'s slot with `batch`. Buffers
    /// the batch when the slot has not been realized yet.
    pub(crate) fn apply(&mut self, context: ContextId, batch: OutputBatch) {
        let Some(&slot_id) = self.slots.get(&context) else {
            self.pending.insert(context, batch);
            return;
        };
        let old_children = match self.nodes[slot_id].as_mut() {
            Some(HostNode::Slot { children, .. }) => std::mem::take(children),
            _ => return,
        };
        for child in old_children {
            self.remove_subtree(child);
        }
        let mut children = Vec::with_capacity(batch.len());
        for node in &batch {
            children.push(self.realize(node));
        }
        if let Some(HostNode::Slot {
            children: slot_children,
            ..
        }) = self.nodes[slot_id].as_mut()
        {
            *slot_children = children;
        }
        // realizing may have created slots a buffered batch was waiting on
        let ready: Vec<ContextId> = self
            .pending
            .keys()
            .filter(|id| self.slots.contains_key(*id))
            .copied()
            .collect();
        for id in ready {
            if let Some(batch) = self.pending.remove(&id) {
                self.apply(id, batch);
            }
        }
    }

    fn realize(&mut self, node: &OutputNode) -> NodeId {
        match node {
            OutputNode::Text(text) => self.insert(HostNode::Text(Rc::clone(text))),
            OutputNode::Host(host) => {
                let children = host
                    .children
                    .iter()
                    .map(|child| self.realize(child))
                    .collect();
                self.insert(HostNode::Element {
                    tag: Rc::clone(&host.tag),
                    attrs: host.attrs.to_vec(),
                    children,
                })
            }
            OutputNode::Slot(context) => {
                let id = self.insert(HostNode::Slot {
                    context: *context,
                    children: Vec::new(),
                });
                self.slots.insert(*context, id);
                id
            }
        }
    }

    fn insert(&mut self, node: HostNode) -> NodeId {
        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes[id].take() else {
            return;
        };
        match node {
            HostNode::Text(_) => {}
            HostNode::Element { children, .. } => {
                for child in children {
                    self.remove_subtree(child);
                }
            }
            HostNode::Slot { context, children } => {
                self.slots.remove(&context);
                self.pending.remove(&context);
                for child in children {
                    self.remove_subtree(child);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::HostOutput;

    fn host_node(tag: &str, children: Vec<OutputNode>) -> OutputNode {
        OutputNode::Host(HostOutput {
            tag: Rc::from(tag),
            attrs: Vec::new().into(),
            children: children.into(),
        })
    }

    #[test]
    fn text_and_hosts_realize() {
        let root = fabricate_context_id();
        let mut tree = HostTree::new(root);
        tree.apply(
            root,
            vec![
                host_node("p", vec![OutputNode::Text(Rc::from("a"))]),
                OutputNode::Text(Rc::from("b")),
            ],
        );
        assert_eq!(tree.text_content(), "ab");
    }

    #[test]
    fn reapply_replaces_subtree() {
        let root = fabricate_context_id();
        let mut tree = HostTree::new(root);
        tree.apply(root, vec![OutputNode::Text(Rc::from("old"))]);
        let before = tree.live_nodes();
        tree.apply(root, vec![OutputNode::Text(Rc::from("new"))]);
        assert_eq!(tree.text_content(), "new");
        assert_eq!(tree.live_nodes(), before);
    }

    fn fabricate_context_id() -> ContextId {
        use futures::executor::LocalPool;
        use reflow_testing::{RecordingController, TestScheduler};
        use std::rc::Rc as StdRc;

        let pool = LocalPool::new();
        let controller = RecordingController::new(false);
        let scheduler = TestScheduler::new(pool.spawner());
        let root = reflow_core::mount(
            reflow_core::Element::Nothing,
            reflow_core::MountOptions {
                controller: controller as StdRc<dyn reflow_core::Controller>,
                scheduler,
            },
        );
        root.id()
    }
}
