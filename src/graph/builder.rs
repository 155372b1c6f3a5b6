use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::GraphResult;
use crate::graph::{Direction, NodeGraph, NodeId, PlugId};
use crate::node::ComputeNode;
use crate::value::{Value, ValueType};

/// Handle to a node added to a graph.
///
/// Dereferences to the node itself, which exposes typed plug accessors.
pub struct NodeHandle<N> {
    id: NodeId,
    node: Arc<N>,
}

impl<N> NodeHandle<N> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }
}

impl<N> Clone for NodeHandle<N> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: self.node.clone(),
        }
    }
}

impl<N> Deref for NodeHandle<N> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.node
    }
}

impl<N> fmt::Debug for NodeHandle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.id).finish()
    }
}

/// Declares the plugs, internal nodes and internal connections of a node
/// while it is being constructed.
pub struct NodeBuilder<'g> {
    graph: &'g mut NodeGraph,
    node: NodeId,
}

impl NodeBuilder<'_> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Adds an input initialised to `default`. Vector, box and colour types
    /// get one child plug per component.
    pub fn add_input(&mut self, name: &str, default: impl Into<Value>) -> GraphResult<PlugId> {
        let default = default.into();
        let ty = default.value_type();
        self.graph
            .add_plug(self.node, None, name, Direction::In, ty, Some(default), false, false)
    }

    /// Adds an input that never decomposes into component plugs.
    pub fn add_atomic_input(&mut self, name: &str, default: impl Into<Value>) -> GraphResult<PlugId> {
        let default = default.into();
        let ty = default.value_type();
        self.graph
            .add_plug(self.node, None, name, Direction::In, ty, Some(default), true, false)
    }

    pub fn add_output(&mut self, name: &str, ty: ValueType) -> GraphResult<PlugId> {
        self.graph
            .add_plug(self.node, None, name, Direction::Out, ty, None, false, false)
    }

    /// Adds a structural plug holding named children, such as a scene or
    /// image plug. `parent` nests it below another compound plug.
    pub fn add_compound(
        &mut self,
        parent: Option<PlugId>,
        name: &str,
        direction: Direction,
    ) -> GraphResult<PlugId> {
        self.graph.add_plug(
            self.node,
            parent,
            name,
            direction,
            ValueType::Compound,
            None,
            false,
            false,
        )
    }

    /// Adds an atomic child to a compound plug, with the parent's direction
    /// and the default value of `ty`.
    pub fn add_child(&mut self, parent: PlugId, name: &str, ty: ValueType) -> GraphResult<PlugId> {
        let direction = self.graph.slot(parent)?.direction;
        self.graph
            .add_plug(self.node, Some(parent), name, direction, ty, None, true, false)
    }

    /// Constructs an internal node owned by this one.
    pub fn add_node<N, F>(&mut self, name: &str, ctor: F) -> GraphResult<NodeHandle<N>>
    where
        N: ComputeNode,
        F: FnOnce(&mut NodeBuilder<'_>) -> GraphResult<N>,
    {
        self.graph.build_node(name, Some(self.node), ctor)
    }

    /// Wires an internal connection.
    pub fn connect(&mut self, source: PlugId, destination: PlugId) -> GraphResult<()> {
        self.graph.connect(source, destination).map(|_| ())
    }

    pub fn child(&self, plug: PlugId, name: &str) -> Option<PlugId> {
        self.graph.child(plug, name)
    }

    pub fn graph(&self) -> &NodeGraph {
        self.graph
    }
}

impl NodeGraph {
    /// Runs `ctor` against a fresh node slot. A failing constructor leaves
    /// no trace in the graph.
    pub(crate) fn build_node<N, F>(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        ctor: F,
    ) -> GraphResult<NodeHandle<N>>
    where
        N: ComputeNode,
        F: FnOnce(&mut NodeBuilder<'_>) -> GraphResult<N>,
    {
        let id = self.reserve_node(name, parent)?;

        let result = {
            let mut builder = NodeBuilder { graph: self, node: id };
            ctor(&mut builder)
        };

        match result {
            Ok(node) => {
                let node = Arc::new(node);
                self.attach(id, node.clone());
                tracing::debug!(
                    node = self.node_full_name(id).unwrap_or_default(),
                    kind = node.type_name(),
                    "added node"
                );
                Ok(NodeHandle { id, node })
            }
            Err(err) => {
                self.remove_node(id)?;
                Err(err)
            }
        }
    }
}
