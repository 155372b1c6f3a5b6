//! Node graph topology.
//!
//! Plugs are the vertices of a petgraph [`StableDiGraph`]; an edge `a -> b`
//! means "plug `b` takes its input from plug `a`". Every plug has at most one
//! incoming edge. Nodes own plugs and declare, through
//! [`ComputeNode::affects`], which of their outputs depend on which plugs.
//! Connections and `affects` together form the dependency graph, which must
//! stay acyclic.
//!
//! Removed plugs are never dropped from the petgraph storage, only detached
//! and flagged, so a [`PlugId`] is never reused for a different plug.

mod affects;
mod builder;
mod promote;

use std::fmt;
use std::sync::Arc;

use petgraph::Direction as Edge;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

pub use crate::graph::builder::{NodeBuilder, NodeHandle};

use crate::error::{GraphError, GraphResult};
use crate::node::ComputeNode;
use crate::value::{Value, ValueType};

/// Identity of a plug.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlugId(NodeIndex);

impl PlugId {
    pub fn index(self) -> usize {
        self.0.index()
    }
}

impl fmt::Debug for PlugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlugId({})", self.0.index())
    }
}

/// Identity of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    In,
    Out,
}

pub(crate) struct PlugSlot {
    name: Arc<str>,
    /// Name relative to the owning node, e.g. `offset.x`.
    path: Arc<str>,
    node: NodeId,
    parent: Option<PlugId>,
    children: Vec<PlugId>,
    direction: Direction,
    ty: ValueType,
    /// Stored value of unconnected leaf inputs.
    value: Option<Value>,
    /// Added after construction, e.g. by promotion.
    dynamic: bool,
    removed: bool,
    /// Epoch of the last mutation that affected this plug.
    dirty: u64,
}

struct NodeSlot {
    name: Arc<str>,
    full_name: Arc<str>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    plugs: Vec<PlugId>,
    /// `None` while the node is being constructed.
    node: Option<Arc<dyn ComputeNode>>,
}

/// The topology of a node graph.
///
/// Read access is shared by all evaluations; mutation goes through the
/// [`Engine`](crate::Engine), which serialises it against evaluation.
#[derive(Default)]
pub struct NodeGraph {
    plugs: StableDiGraph<PlugSlot, ()>,
    nodes: Vec<Option<NodeSlot>>,
    epoch: u64,
}

/// Read-only view of a single plug.
#[derive(Clone, Copy)]
pub struct PlugRef<'a> {
    graph: &'a NodeGraph,
    id: PlugId,
    slot: &'a PlugSlot,
}

impl<'a> PlugRef<'a> {
    pub fn id(&self) -> PlugId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.slot.name
    }

    /// Name relative to the owning node.
    pub fn path(&self) -> &'a str {
        &self.slot.path
    }

    pub fn full_name(&self) -> String {
        self.graph.full_name(self.id)
    }

    pub fn node(&self) -> NodeId {
        self.slot.node
    }

    pub fn direction(&self) -> Direction {
        self.slot.direction
    }

    pub fn value_type(&self) -> ValueType {
        self.slot.ty
    }

    pub fn parent(&self) -> Option<PlugId> {
        self.slot.parent
    }

    pub fn children(&self) -> &'a [PlugId] {
        &self.slot.children
    }

    pub fn input(&self) -> Option<PlugId> {
        self.graph.input(self.id)
    }

    pub fn outputs(&self) -> Vec<PlugId> {
        self.graph.outputs(self.id)
    }

    /// The stored value of an unconnected leaf input.
    pub fn stored_value(&self) -> Option<&'a Value> {
        self.slot.value.as_ref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.slot.dynamic
    }

    pub fn dirty_count(&self) -> u64 {
        self.slot.dirty
    }

    /// True if this plug is `ancestor` or lies below it.
    pub fn is_descendant_of(&self, ancestor: PlugId) -> bool {
        let mut current = Some(self.id);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.graph.plugs[id.0].parent;
        }
        false
    }
}

impl fmt::Debug for PlugRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlugRef")
            .field("id", &self.id)
            .field("name", &self.full_name())
            .field("direction", &self.slot.direction)
            .field("type", &self.slot.ty)
            .finish()
    }
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ******************************
    // *          Queries           *
    // ******************************

    pub(crate) fn slot(&self, plug: PlugId) -> GraphResult<&PlugSlot> {
        match self.plugs.node_weight(plug.0) {
            Some(slot) if !slot.removed => Ok(slot),
            _ => Err(GraphError::StaleGraph(format!("plug {} no longer exists", plug.index()))),
        }
    }

    fn slot_mut(&mut self, plug: PlugId) -> GraphResult<&mut PlugSlot> {
        match self.plugs.node_weight_mut(plug.0) {
            Some(slot) if !slot.removed => Ok(slot),
            _ => Err(GraphError::StaleGraph(format!("plug {} no longer exists", plug.index()))),
        }
    }

    fn node_slot(&self, node: NodeId) -> GraphResult<&NodeSlot> {
        self.nodes
            .get(node.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| GraphError::StaleGraph(format!("node {} no longer exists", node.index())))
    }

    pub fn plug(&self, plug: PlugId) -> GraphResult<PlugRef<'_>> {
        let slot = self.slot(plug)?;
        Ok(PlugRef {
            graph: self,
            id: plug,
            slot,
        })
    }

    pub fn contains_plug(&self, plug: PlugId) -> bool {
        self.slot(plug).is_ok()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.node_slot(node).is_ok()
    }

    /// All live nodes, internal ones included.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| NodeId(index as u32))
    }

    pub fn node_name(&self, node: NodeId) -> GraphResult<&str> {
        Ok(&self.node_slot(node)?.name)
    }

    /// Dotted name including owning nodes, e.g. `stats.__flatten`.
    pub fn node_full_name(&self, node: NodeId) -> GraphResult<&str> {
        Ok(&self.node_slot(node)?.full_name)
    }

    pub fn node_type(&self, node: NodeId) -> GraphResult<&'static str> {
        Ok(self
            .node_slot(node)?
            .node
            .as_ref()
            .map_or("<constructing>", |node| node.type_name()))
    }

    /// The node owning `node`, for internal nodes.
    pub fn node_parent(&self, node: NodeId) -> GraphResult<Option<NodeId>> {
        Ok(self.node_slot(node)?.parent)
    }

    pub fn node_children(&self, node: NodeId) -> GraphResult<&[NodeId]> {
        Ok(&self.node_slot(node)?.children)
    }

    pub(crate) fn compute_node(&self, node: NodeId) -> GraphResult<&Arc<dyn ComputeNode>> {
        self.node_slot(node)?.node.as_ref().ok_or_else(|| {
            GraphError::StaleGraph(format!("node {} is still being constructed", node.index()))
        })
    }

    /// Top-level plugs of a node.
    pub fn plugs(&self, node: NodeId) -> GraphResult<&[PlugId]> {
        Ok(&self.node_slot(node)?.plugs)
    }

    pub fn find_node(&self, full_name: &str) -> Option<NodeId> {
        self.nodes().find(|id| {
            self.node_slot(*id)
                .is_ok_and(|slot| &*slot.full_name == full_name)
        })
    }

    /// Looks a plug up by its path relative to `node`, e.g. `area.min.x`.
    pub fn find_plug(&self, node: NodeId, path: &str) -> Option<PlugId> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self
            .node_slot(node)
            .ok()?
            .plugs
            .iter()
            .copied()
            .find(|id| self.plugs[id.0].name.as_ref() == first)?;

        for part in parts {
            current = self.child(current, part)?;
        }

        Some(current)
    }

    pub fn child(&self, plug: PlugId, name: &str) -> Option<PlugId> {
        self.slot(plug)
            .ok()?
            .children
            .iter()
            .copied()
            .find(|id| self.plugs[id.0].name.as_ref() == name)
    }

    /// `node.plug.child` style name.
    pub fn full_name(&self, plug: PlugId) -> String {
        match self.plugs.node_weight(plug.0) {
            Some(slot) => match self.node_slot(slot.node) {
                Ok(node) => format!("{}.{}", node.full_name, slot.path),
                Err(_) => format!("<removed>.{}", slot.path),
            },
            None => format!("<unknown plug {}>", plug.index()),
        }
    }

    /// The plug feeding `plug`, if any.
    pub fn input(&self, plug: PlugId) -> Option<PlugId> {
        self.plugs
            .neighbors_directed(plug.0, Edge::Incoming)
            .next()
            .map(PlugId)
    }

    /// Plugs taking their input from `plug`.
    pub fn outputs(&self, plug: PlugId) -> Vec<PlugId> {
        let mut outputs: Vec<PlugId> = self
            .plugs
            .neighbors_directed(plug.0, Edge::Outgoing)
            .map(PlugId)
            .collect();
        outputs.sort();
        outputs
    }

    /// All connections as `(source, destination)` pairs.
    pub fn connections(&self) -> Vec<(PlugId, PlugId)> {
        let mut edges: Vec<_> = self
            .plugs
            .edge_references()
            .map(|edge| (PlugId(edge.source()), PlugId(edge.target())))
            .collect();
        edges.sort();
        edges
    }

    /// `plug` and all plugs below it, parents before children.
    pub fn descendants(&self, plug: PlugId) -> Vec<PlugId> {
        let mut result = vec![plug];
        let mut index = 0;
        while index < result.len() {
            if let Some(slot) = self.plugs.node_weight(result[index].0) {
                result.extend_from_slice(&slot.children);
            }
            index += 1;
        }
        result
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch
    }

    // ******************************
    // *        Construction        *
    // ******************************

    pub(crate) fn reserve_node(&mut self, name: &str, parent: Option<NodeId>) -> GraphResult<NodeId> {
        let siblings: Vec<Arc<str>> = self
            .nodes
            .iter()
            .flatten()
            .filter(|slot| slot.parent == parent)
            .map(|slot| slot.name.clone())
            .collect();

        // Siblings must have unique names, so "Node" becomes "Node1", "Node2"...
        let mut unique = name.to_string();
        let mut suffix = 1;
        while siblings.iter().any(|s| s.as_ref() == unique) {
            unique = format!("{name}{suffix}");
            suffix += 1;
        }

        let full_name: Arc<str> = match parent {
            Some(parent) => Arc::from(format!("{}.{unique}", self.node_slot(parent)?.full_name)),
            None => Arc::from(unique.as_str()),
        };

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(NodeSlot {
            name: Arc::from(unique),
            full_name,
            parent,
            children: Vec::new(),
            plugs: Vec::new(),
            node: None,
        }));

        if let Some(parent) = parent {
            if let Some(Some(slot)) = self.nodes.get_mut(parent.index()) {
                slot.children.push(id);
            }
        }

        Ok(id)
    }

    pub(crate) fn attach(&mut self, node: NodeId, compute: Arc<dyn ComputeNode>) {
        if let Some(Some(slot)) = self.nodes.get_mut(node.index()) {
            slot.node = Some(compute);
        }
    }

    /// Adds a plug. Compound-capable types decompose into children unless
    /// `atomic` is set.
    pub(crate) fn add_plug(
        &mut self,
        node: NodeId,
        parent: Option<PlugId>,
        name: &str,
        direction: Direction,
        ty: ValueType,
        default: Option<Value>,
        atomic: bool,
        dynamic: bool,
    ) -> GraphResult<PlugId> {
        let node_slot = self.node_slot(node)?;
        let siblings = match parent {
            Some(parent) => &self.slot(parent)?.children,
            None => &node_slot.plugs,
        };

        if siblings.iter().any(|id| self.plugs[id.0].name.as_ref() == name) {
            return Err(GraphError::DuplicatePlug {
                node: node_slot.full_name.to_string(),
                name: name.to_string(),
            });
        }

        let path: Arc<str> = match parent {
            Some(parent) => Arc::from(format!("{}.{name}", self.slot(parent)?.path)),
            None => Arc::from(name),
        };

        let default = match default {
            Some(value) => {
                let found = value.value_type();
                Some(value.convert(ty).ok_or_else(|| GraphError::WrongValueType {
                    plug: path.to_string(),
                    expected: ty,
                    found,
                })?)
            }
            None => Value::default_for(ty),
        };

        let components = if atomic { &[][..] } else { ty.components() };
        let leaf = components.is_empty() && ty != ValueType::Compound;

        let id = PlugId(self.plugs.add_node(PlugSlot {
            name: Arc::from(name),
            path,
            node,
            parent,
            children: Vec::new(),
            direction,
            ty,
            value: if leaf && direction == Direction::In {
                default.clone()
            } else {
                None
            },
            dynamic,
            removed: false,
            dirty: self.epoch,
        }));

        match parent {
            Some(parent) => self.slot_mut(parent)?.children.push(id),
            None => {
                if let Some(Some(slot)) = self.nodes.get_mut(node.index()) {
                    slot.plugs.push(id);
                }
            }
        }

        if !components.is_empty() {
            let parts = default.as_ref().and_then(Value::split);
            for (index, (child_name, child_ty)) in components.iter().enumerate() {
                let child_default = parts.as_ref().map(|p| p[index].clone());
                self.add_plug(
                    node,
                    Some(id),
                    child_name,
                    direction,
                    *child_ty,
                    child_default,
                    false,
                    dynamic,
                )?;
            }
        }

        Ok(id)
    }

    // ******************************
    // *          Mutation          *
    // ******************************

    fn check_compatible(&self, source: PlugId, destination: PlugId) -> GraphResult<()> {
        let src = self.slot(source)?;
        let dst = self.slot(destination)?;

        let mismatch = || GraphError::TypeMismatch {
            from: self.full_name(source),
            from_type: src.ty,
            to: self.full_name(destination),
            to_type: dst.ty,
        };

        if src.children.is_empty() && dst.children.is_empty() {
            return if dst.ty.accepts(src.ty) && dst.ty != ValueType::Compound {
                Ok(())
            } else {
                Err(mismatch())
            };
        }

        if !dst.ty.accepts(src.ty) || src.children.len() != dst.children.len() {
            return Err(mismatch());
        }

        src.children
            .iter()
            .zip(dst.children.iter())
            .try_for_each(|(s, d)| self.check_compatible(*s, *d))
            .map_err(|_| mismatch())
    }

    /// Makes `source` the input of `destination`, replacing any existing
    /// input. Returns the plugs dirtied by the change.
    pub(crate) fn connect(&mut self, source: PlugId, destination: PlugId) -> GraphResult<Vec<PlugId>> {
        self.check_compatible(source, destination)?;

        if self.input(destination) == Some(source) {
            return Ok(Vec::new());
        }

        // The new edge closes a cycle exactly when `source` is already
        // downstream of `destination`.
        let source_plugs = self.descendants(source);
        let downstream = self.affected(&[destination]);
        if downstream.iter().any(|plug| source_plugs.contains(plug)) {
            return Err(GraphError::CycleDetected {
                from: self.full_name(source),
                to: self.full_name(destination),
            });
        }

        self.link(source, destination);
        Ok(self.dirty(&[destination]))
    }

    fn link(&mut self, source: PlugId, destination: PlugId) {
        self.unlink(destination);
        self.plugs.add_edge(source.0, destination.0, ());

        let pairs: Vec<(PlugId, PlugId)> = self.plugs[source.0]
            .children
            .iter()
            .copied()
            .zip(self.plugs[destination.0].children.iter().copied())
            .collect();

        for (s, d) in pairs {
            self.link(s, d);
        }
    }

    fn unlink(&mut self, destination: PlugId) -> bool {
        let incoming: Vec<_> = self
            .plugs
            .edges_directed(destination.0, Edge::Incoming)
            .map(|edge| edge.id())
            .collect();

        let changed = !incoming.is_empty();
        for edge in incoming {
            self.plugs.remove_edge(edge);
        }

        let children = self.plugs[destination.0].children.clone();
        children
            .into_iter()
            .fold(changed, |acc, child| self.unlink(child) || acc)
    }

    /// Removes the input of `destination` and of all its children.
    pub(crate) fn disconnect(&mut self, destination: PlugId) -> GraphResult<Vec<PlugId>> {
        self.slot(destination)?;

        if self.unlink(destination) {
            Ok(self.dirty(&[destination]))
        } else {
            Ok(Vec::new())
        }
    }

    pub(crate) fn set_value(&mut self, plug: PlugId, value: Value) -> GraphResult<Vec<PlugId>> {
        // Every leaf is validated before any of them is written.
        let mut writes = Vec::new();
        self.plan_assign(plug, value, &mut writes)?;

        let mut changed = Vec::with_capacity(writes.len());
        for (leaf, value) in writes {
            let slot = self.slot_mut(leaf)?;
            if slot.value.as_ref() != Some(&value) {
                slot.value = Some(value);
                changed.push(leaf);
            }
        }

        if changed.is_empty() {
            Ok(changed)
        } else {
            Ok(self.dirty(&changed))
        }
    }

    fn plan_assign(&self, plug: PlugId, value: Value, writes: &mut Vec<(PlugId, Value)>) -> GraphResult<()> {
        let slot = self.slot(plug)?;

        let read_only = slot.direction == Direction::Out
            || self.input(plug).is_some()
            || self.ancestors(plug).any(|p| self.input(p).is_some());
        if read_only {
            return Err(GraphError::ReadOnlyOutput(self.full_name(plug)));
        }

        if slot.ty == ValueType::Compound {
            return Err(GraphError::NoValue(self.full_name(plug)));
        }

        let found = value.value_type();
        let value = value
            .convert(slot.ty)
            .ok_or_else(|| GraphError::WrongValueType {
                plug: self.full_name(plug),
                expected: slot.ty,
                found,
            })?;

        if slot.children.is_empty() {
            writes.push((plug, value));
            return Ok(());
        }

        let parts = value
            .split()
            .ok_or_else(|| GraphError::NoValue(self.full_name(plug)))?;

        for (child, part) in slot.children.iter().zip(parts) {
            self.plan_assign(*child, part, writes)?;
        }

        Ok(())
    }

    fn ancestors(&self, plug: PlugId) -> impl Iterator<Item = PlugId> + '_ {
        std::iter::successors(self.plugs[plug.0].parent, |p| self.plugs[p.0].parent)
    }

    /// Removes a node, its internal nodes and all of their plugs.
    pub(crate) fn remove_node(&mut self, node: NodeId) -> GraphResult<Vec<PlugId>> {
        let slot = self.node_slot(node)?;
        let parent = slot.parent;

        let mut doomed = vec![node];
        let mut index = 0;
        while index < doomed.len() {
            doomed.extend_from_slice(&self.node_slot(doomed[index])?.children);
            index += 1;
        }

        let plugs: Vec<PlugId> = doomed
            .iter()
            .flat_map(|n| self.nodes[n.index()].as_ref().map(|s| s.plugs.clone()).unwrap_or_default())
            .flat_map(|p| self.descendants(p))
            .collect();

        let downstream = self.detach(&plugs);

        for n in &doomed {
            self.nodes[n.index()] = None;
        }

        if let Some(parent) = parent {
            if let Some(Some(slot)) = self.nodes.get_mut(parent.index()) {
                slot.children.retain(|child| *child != node);
            }
        }

        tracing::debug!(node = node.index(), plugs = plugs.len(), "removed node");
        Ok(self.dirty(&downstream))
    }

    /// Removes a dynamic plug and its children.
    pub(crate) fn remove_plug(&mut self, plug: PlugId) -> GraphResult<Vec<PlugId>> {
        let slot = self.slot(plug)?;
        let (node, parent) = (slot.node, slot.parent);

        let plugs = self.descendants(plug);
        let downstream = self.detach(&plugs);

        match parent {
            Some(parent) => self.slot_mut(parent)?.children.retain(|p| *p != plug),
            None => {
                if let Some(Some(slot)) = self.nodes.get_mut(node.index()) {
                    slot.plugs.retain(|p| *p != plug);
                }
            }
        }

        Ok(self.dirty(&downstream))
    }

    /// Cuts every connection of `plugs` and flags them removed. Returns the
    /// surviving plugs that lost their input.
    fn detach(&mut self, plugs: &[PlugId]) -> Vec<PlugId> {
        let mut downstream = Vec::new();

        for plug in plugs {
            let edges: Vec<_> = self
                .plugs
                .edges_directed(plug.0, Edge::Outgoing)
                .chain(self.plugs.edges_directed(plug.0, Edge::Incoming))
                .map(|edge| (edge.id(), PlugId(edge.target())))
                .collect();

            for (edge, target) in edges {
                self.plugs.remove_edge(edge);
                if !plugs.contains(&target) && !downstream.contains(&target) {
                    downstream.push(target);
                }
            }
        }

        for plug in plugs {
            if let Some(slot) = self.plugs.node_weight_mut(plug.0) {
                slot.removed = true;
            }
        }

        downstream
    }
}

impl fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGraph")
            .field("nodes", &self.nodes().count())
            .field("plugs", &self.plugs.node_count())
            .field("connections", &self.plugs.edge_count())
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::Evaluator;
    use crate::core::Hash32;

    /// `sum = a + b`, for topology tests.
    pub(crate) struct Add {
        pub a: PlugId,
        pub b: PlugId,
        pub sum: PlugId,
    }

    impl Add {
        pub(crate) fn new(b: &mut NodeBuilder<'_>) -> GraphResult<Self> {
            Ok(Self {
                a: b.add_input("a", 0.0f32)?,
                b: b.add_input("b", 0.0f32)?,
                sum: b.add_output("sum", ValueType::Float)?,
            })
        }
    }

    impl ComputeNode for Add {
        fn type_name(&self) -> &'static str {
            "Add"
        }

        fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>) {
            if plug.id() == self.a || plug.id() == self.b {
                outputs.push(self.sum);
            }
        }

        fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
            let mut h = ev.seeded_hasher(output)?;
            h.append_hash(ev.hash(self.a)?).append_hash(ev.hash(self.b)?);
            Ok(h.finish_hash())
        }

        fn compute(&self, _: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
            let a: f32 = ev.get_as(self.a)?;
            let b: f32 = ev.get_as(self.b)?;
            Ok(Value::Float(a + b))
        }
    }

    /// A node that only owns plugs.
    pub(crate) struct Plugs(pub Vec<PlugId>);

    impl ComputeNode for Plugs {
        fn type_name(&self) -> &'static str {
            "Plugs"
        }

        fn affects(&self, _: &PlugRef<'_>, _: &mut Vec<PlugId>) {}

        fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
            Ok(ev.seeded_hasher(output)?.finish_hash())
        }

        fn compute(&self, output: PlugId, _: &Evaluator<'_>) -> anyhow::Result<Value> {
            anyhow::bail!("plug {output:?} has no computation")
        }
    }

    fn add_node(graph: &mut NodeGraph, name: &str) -> NodeHandle<Add> {
        graph.build_node(name, None, Add::new).unwrap()
    }

    #[test]
    fn test_unique_node_names() {
        let mut graph = NodeGraph::new();
        let a = add_node(&mut graph, "add");
        let b = add_node(&mut graph, "add");
        assert_eq!(graph.node_name(a.id()).unwrap(), "add");
        assert_eq!(graph.node_name(b.id()).unwrap(), "add1");
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut graph = NodeGraph::new();
        let a = add_node(&mut graph, "a");
        let b = add_node(&mut graph, "b");

        let dirtied = graph.connect(a.sum, b.a).unwrap();
        assert_eq!(graph.input(b.a), Some(a.sum));
        assert_eq!(graph.outputs(a.sum), vec![b.a]);
        assert!(dirtied.contains(&b.a));
        assert!(dirtied.contains(&b.sum));

        graph.disconnect(b.a).unwrap();
        assert_eq!(graph.input(b.a), None);
        assert!(graph.disconnect(b.a).unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let mut graph = NodeGraph::new();
        let node = graph
            .build_node("strings", None, |b| {
                Ok(Plugs(vec![
                    b.add_input("text", "x")?,
                    b.add_input("offset", crate::value::V2f::default())?,
                ]))
            })
            .unwrap();
        let add = add_node(&mut graph, "add");

        let (text, offset) = (node.0[0], node.0[1]);
        let err = graph.connect(text, add.a).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert!(graph.connect(add.sum, offset).is_err());
        assert_eq!(graph.input(add.a), None);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut graph = NodeGraph::new();
        let a = add_node(&mut graph, "a");
        let b = add_node(&mut graph, "b");

        graph.connect(a.sum, b.a).unwrap();
        let before = graph.connections();

        let err = graph.connect(b.sum, a.a).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        assert_eq!(graph.connections(), before);

        // A node feeding itself is a cycle too.
        assert!(matches!(
            graph.connect(a.sum, a.b),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_set_value_rules() {
        let mut graph = NodeGraph::new();
        let a = add_node(&mut graph, "a");
        let b = add_node(&mut graph, "b");
        graph.connect(a.sum, b.a).unwrap();

        assert!(matches!(
            graph.set_value(a.sum, Value::Float(1.0)),
            Err(GraphError::ReadOnlyOutput(_))
        ));
        assert!(matches!(
            graph.set_value(b.a, Value::Float(1.0)),
            Err(GraphError::ReadOnlyOutput(_))
        ));
        assert!(matches!(
            graph.set_value(a.a, Value::from("one")),
            Err(GraphError::WrongValueType { .. })
        ));

        let dirtied = graph.set_value(a.a, Value::Int(2)).unwrap();
        assert_eq!(graph.plug(a.a).unwrap().stored_value(), Some(&Value::Float(2.0)));
        assert!(dirtied.contains(&b.sum));

        // Same value again: nothing to do.
        assert!(graph.set_value(a.a, Value::Float(2.0)).unwrap().is_empty());
    }

    #[test]
    fn test_dirty_counts_advance() {
        let mut graph = NodeGraph::new();
        let a = add_node(&mut graph, "a");
        let b = add_node(&mut graph, "b");
        graph.connect(a.sum, b.a).unwrap();

        let before = graph.plug(b.sum).unwrap().dirty_count();
        let unrelated = graph.plug(a.b).unwrap().dirty_count();
        graph.set_value(a.a, Value::Float(3.0)).unwrap();

        assert!(graph.plug(b.sum).unwrap().dirty_count() > before);
        assert_eq!(graph.plug(a.b).unwrap().dirty_count(), unrelated);
    }

    #[test]
    fn test_compound_plugs() {
        let mut graph = NodeGraph::new();
        let node = graph
            .build_node("n", None, |b| {
                Ok(Plugs(vec![b.add_input("area", crate::value::Box2i::from_size(4, 2))?]))
            })
            .unwrap();
        let area = node.0[0];

        let min_x = graph.find_plug(node.id(), "area.min.x").unwrap();
        assert_eq!(graph.full_name(min_x), "n.area.min.x");
        assert!(graph.plug(min_x).unwrap().is_descendant_of(area));

        let max_y = graph.find_plug(node.id(), "area.max.y").unwrap();
        assert_eq!(graph.plug(max_y).unwrap().stored_value(), Some(&Value::Int(2)));
    }

    #[test]
    fn test_compound_set_value_is_all_or_nothing() {
        use crate::value::{Box2i, V2i};

        let mut graph = NodeGraph::new();
        let node = graph
            .build_node("n", None, |b| {
                Ok(Plugs(vec![b.add_input("area", Box2i::from_size(2, 2))?]))
            })
            .unwrap();
        let area = node.0[0];
        let add = add_node(&mut graph, "add");
        let min_x = graph.find_plug(node.id(), "area.min.x").unwrap();
        let max_x = graph.find_plug(node.id(), "area.max.x").unwrap();
        graph.connect(add.sum, max_x).unwrap();
        let before = graph.plug(min_x).unwrap().dirty_count();

        let err = graph
            .set_value(area, Value::Box2i(Box2i::new(V2i::new(1, 0), V2i::new(2, 2))))
            .unwrap_err();
        assert!(matches!(err, GraphError::ReadOnlyOutput(name) if name == "n.area.max.x"));

        // The connected grandchild rejects the whole write.
        assert_eq!(graph.plug(min_x).unwrap().stored_value(), Some(&Value::Int(0)));
        assert_eq!(graph.plug(min_x).unwrap().dirty_count(), before);
    }

    #[test]
    fn test_remove_node_makes_plugs_stale() {
        let mut graph = NodeGraph::new();
        let a = add_node(&mut graph, "a");
        let b = add_node(&mut graph, "b");
        graph.connect(a.sum, b.a).unwrap();

        let dirtied = graph.remove_node(a.id()).unwrap();
        assert!(dirtied.contains(&b.a));
        assert_eq!(graph.input(b.a), None);
        assert!(matches!(graph.plug(a.sum), Err(GraphError::StaleGraph(_))));
        assert!(!graph.contains_node(a.id()));
    }
}
