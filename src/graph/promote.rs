//! Exposing plugs of internal nodes on their owning node.
//!
//! Promoting a plug adds a dynamic copy of it to the owning node and
//! connects the two, so the internal plug is driven from (or feeds) the
//! outside. Unpromoting removes the copy again.

use crate::error::{GraphError, GraphResult};
use crate::graph::{Direction, NodeGraph, NodeId, PlugId};

impl NodeGraph {
    pub fn can_promote(&self, plug: PlugId) -> bool {
        let Ok(slot) = self.slot(plug) else {
            return false;
        };

        if slot.parent.is_some() || self.outer_node(plug).is_none() || self.is_promoted(plug) {
            return false;
        }

        match slot.direction {
            Direction::In => self
                .descendants(plug)
                .into_iter()
                .all(|p| self.input(p).is_none()),
            Direction::Out => true,
        }
    }

    pub fn is_promoted(&self, plug: PlugId) -> bool {
        self.promoted_as(plug).is_some()
    }

    /// The plug on the owning node that `plug` was promoted to.
    pub fn promoted_as(&self, plug: PlugId) -> Option<PlugId> {
        let slot = self.slot(plug).ok()?;
        let outer = self.outer_node(plug)?;
        let on_outer = |p: &PlugId| self.slot(*p).is_ok_and(|s| s.node == outer);

        match slot.direction {
            Direction::In => self.input(plug).filter(on_outer),
            Direction::Out => self.outputs(plug).into_iter().find(on_outer),
        }
    }

    fn outer_node(&self, plug: PlugId) -> Option<NodeId> {
        let node = self.slot(plug).ok()?.node;
        self.node_parent(node).ok().flatten()
    }

    /// Returns the new plug on the owning node and the plugs dirtied by the
    /// new connection.
    pub(crate) fn promote(
        &mut self,
        plug: PlugId,
        name: Option<&str>,
    ) -> GraphResult<(PlugId, Vec<PlugId>)> {
        if !self.can_promote(plug) {
            return Err(GraphError::CannotPromote(self.full_name(plug)));
        }

        let outer = self
            .outer_node(plug)
            .ok_or_else(|| GraphError::CannotPromote(self.full_name(plug)))?;
        let name = match name {
            Some(name) => name.to_string(),
            None => self.slot(plug)?.name.to_string(),
        };

        let external = self.clone_structure(plug, outer, None, &name)?;

        // Carry the current values over so promotion is invisible downstream.
        for (from, to) in self.descendants(plug).into_iter().zip(self.descendants(external)) {
            let value = self.slot(from)?.value.clone();
            if value.is_some() {
                self.slot_mut(to)?.value = value;
            }
        }

        let dirtied = match self.slot(plug)?.direction {
            Direction::In => self.connect(external, plug)?,
            Direction::Out => self.connect(plug, external)?,
        };

        tracing::debug!(plug = self.full_name(plug), promoted = self.full_name(external), "promoted plug");
        Ok((external, dirtied))
    }

    fn clone_structure(
        &mut self,
        plug: PlugId,
        node: NodeId,
        parent: Option<PlugId>,
        name: &str,
    ) -> GraphResult<PlugId> {
        let slot = self.slot(plug)?;
        let (direction, ty) = (slot.direction, slot.ty);
        let children: Vec<(PlugId, String)> = slot
            .children
            .iter()
            .map(|c| (*c, self.plugs[c.0].name.to_string()))
            .collect();

        let copy = self.add_plug(node, parent, name, direction, ty, None, true, true)?;
        if !children.is_empty() {
            self.slot_mut(copy)?.value = None;
        }

        for (child, child_name) in children {
            self.clone_structure(child, node, Some(copy), &child_name)?;
        }

        Ok(copy)
    }

    /// Removes the promoted copy of `plug`. Inputs keep the value they were
    /// last driven with.
    pub(crate) fn unpromote(&mut self, plug: PlugId) -> GraphResult<Vec<PlugId>> {
        let external = self
            .promoted_as(plug)
            .ok_or_else(|| GraphError::NotPromoted(self.full_name(plug)))?;

        if self.slot(plug)?.direction == Direction::In {
            for (to, from) in self.descendants(plug).into_iter().zip(self.descendants(external)) {
                let value = self.slot(from)?.value.clone();
                if value.is_some() {
                    self.slot_mut(to)?.value = value;
                }
            }
        }

        let mut dirtied = if self.slot(external)?.dynamic {
            self.remove_plug(external)?
        } else {
            self.disconnect(plug)?
        };

        if self.slot(plug)?.direction == Direction::In && !dirtied.contains(&plug) {
            dirtied.extend(self.dirty(&[plug]));
        }

        Ok(dirtied)
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::tests::{Add, Plugs};
    use crate::graph::{NodeGraph, PlugId};
    use crate::value::{V2f, Value};

    /// `box` owning an `Add` and a node with a compound input.
    fn nested(graph: &mut NodeGraph) -> (PlugId, PlugId, PlugId) {
        let mut inner = None;
        graph
            .build_node("box", None, |b| {
                let add = b.add_node("add", Add::new)?;
                let offset = b.add_node("offset", |b| {
                    Ok(Plugs(vec![b.add_input("offset", V2f::new(1.0, 2.0))?]))
                })?;
                inner = Some((add.a, add.sum, offset.0[0]));
                Ok(Plugs(vec![]))
            })
            .unwrap();

        let (a, sum, offset) = inner.unwrap();
        graph.set_value(a, Value::Float(4.0)).unwrap();
        (a, sum, offset)
    }

    #[test]
    fn test_promote_input() {
        let mut graph = NodeGraph::new();
        let (a, sum, _) = nested(&mut graph);
        assert!(graph.can_promote(a));
        assert!(graph.can_promote(sum));

        let (external, _) = graph.promote(a, None).unwrap();
        assert_eq!(graph.full_name(external), "box.a");
        assert_eq!(graph.input(a), Some(external));
        assert_eq!(graph.plug(external).unwrap().stored_value(), Some(&Value::Float(4.0)));
        assert!(graph.is_promoted(a));
        assert!(!graph.can_promote(a));
    }

    #[test]
    fn test_promote_compound_keeps_structure() {
        let mut graph = NodeGraph::new();
        let (_, _, offset) = nested(&mut graph);

        let (external, _) = graph.promote(offset, Some("uvOffset")).unwrap();
        let x = graph.child(external, "x").unwrap();
        assert_eq!(graph.plug(x).unwrap().stored_value(), Some(&Value::Float(1.0)));
        assert_eq!(graph.input(graph.child(offset, "y").unwrap()), graph.child(external, "y"));
    }

    #[test]
    fn test_unpromote() {
        let mut graph = NodeGraph::new();
        let (a, _, _) = nested(&mut graph);

        let (external, _) = graph.promote(a, None).unwrap();
        graph.set_value(external, Value::Float(9.0)).unwrap();
        graph.unpromote(a).unwrap();

        assert!(!graph.is_promoted(a));
        assert!(!graph.contains_plug(external));
        assert_eq!(graph.plug(a).unwrap().stored_value(), Some(&Value::Float(9.0)));
        assert!(graph.unpromote(a).is_err());
    }

    #[test]
    fn test_top_level_nodes_cannot_promote() {
        let mut graph = NodeGraph::new();
        let add = graph.build_node("add", None, Add::new).unwrap();
        assert!(!graph.can_promote(add.a));
        assert!(graph.promote(add.a, None).is_err());
    }
}
