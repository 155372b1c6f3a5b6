use std::collections::HashSet;

use crate::graph::{NodeGraph, PlugId};

impl NodeGraph {
    /// Every plug whose value depends on one of `start`, `start` included.
    ///
    /// Follows three kinds of edge: connections to downstream plugs,
    /// `ComputeNode::affects` declarations, and the parent/child relation
    /// (children of an affected plug are affected, and so are its compound
    /// ancestors). Order is discovery order.
    pub fn affected(&self, start: &[PlugId]) -> Vec<PlugId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<PlugId> = start.iter().rev().copied().collect();
        let mut declared = Vec::new();

        while let Some(plug) = stack.pop() {
            if !visited.insert(plug) {
                continue;
            }
            order.push(plug);

            let Ok(slot) = self.slot(plug) else {
                continue;
            };

            // Ancestors only group this plug; their own connections are
            // mirrored by their children and need no traversal.
            let mut parent = slot.parent;
            while let Some(p) = parent {
                if visited.insert(p) {
                    order.push(p);
                }
                parent = self.plugs[p.0].parent;
            }

            stack.extend(slot.children.iter().rev().copied());
            stack.extend(self.outputs(plug).into_iter().rev());

            if let Ok(node) = self.compute_node(slot.node) {
                if let Ok(view) = self.plug(plug) {
                    declared.clear();
                    node.affects(&view, &mut declared);
                    stack.extend(declared.iter().rev().copied());
                }
            }
        }

        order
    }

    /// Bumps the dirty count of everything affected by `start` and returns
    /// the affected plugs.
    pub(crate) fn dirty(&mut self, start: &[PlugId]) -> Vec<PlugId> {
        let affected = self.affected(start);

        self.epoch += 1;
        for plug in &affected {
            if let Some(slot) = self.plugs.node_weight_mut(plug.0) {
                slot.dirty = self.epoch;
            }
        }

        tracing::trace!(epoch = self.epoch, plugs = affected.len(), "dirtied plugs");
        affected
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::NodeGraph;
    use crate::graph::tests::Add;

    #[test]
    fn test_affected_follows_connections_and_affects() {
        let mut graph = NodeGraph::new();
        let a = graph.build_node("a", None, Add::new).unwrap();
        let b = graph.build_node("b", None, Add::new).unwrap();
        let c = graph.build_node("c", None, Add::new).unwrap();
        graph.connect(a.sum, b.a).unwrap();

        let affected = graph.affected(&[a.a]);
        assert!(affected.contains(&a.sum));
        assert!(affected.contains(&b.a));
        assert!(affected.contains(&b.sum));
        assert!(!affected.contains(&c.sum));
        assert!(!affected.contains(&a.b));
    }

    #[test]
    fn test_dirty_epochs_never_repeat() {
        let mut graph = NodeGraph::new();
        let a = graph.build_node("a", None, Add::new).unwrap();

        graph.dirty(&[a.a]);
        let first = graph.plug(a.sum).unwrap().dirty_count();
        graph.dirty(&[a.b]);
        let second = graph.plug(a.sum).unwrap().dirty_count();
        assert!(second > first);
        assert_eq!(second, graph.current_epoch());
    }
}
