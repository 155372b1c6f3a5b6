use std::fmt::{self, Display, Formatter};

use crate::graph::NodeGraph;

/// Renders the graph as a Mermaid flowchart: one box per node, one arrow
/// per connection labelled with the plugs and the value type. Internal
/// nodes hang off their owner with a dotted link.
pub(crate) struct Mermaid<'a>(pub &'a NodeGraph);

impl Display for Mermaid<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        writeln!(f, "graph LR")?;

        for node in graph.nodes() {
            let name = graph.node_full_name(node).unwrap_or_default().replace('"', "\\\"");
            let kind = graph.node_type(node).unwrap_or_default();
            writeln!(f, "    n{}[\"{}\\n{}\"]", node.index(), name, kind)?;

            if let Ok(Some(owner)) = graph.node_parent(node) {
                writeln!(f, "    n{} -.- n{}", owner.index(), node.index())?;
            }
        }

        for (source, destination) in graph.connections() {
            let (Ok(src), Ok(dst)) = (graph.plug(source), graph.plug(destination)) else {
                continue;
            };

            // Child connections mirror their parents' and add nothing.
            let mirrored = match (src.parent(), dst.parent()) {
                (Some(sp), Some(dp)) => graph.input(dp) == Some(sp),
                _ => false,
            };
            if mirrored {
                continue;
            }

            writeln!(
                f,
                "    n{} -- \"{} → {}: {}\" --> n{}",
                src.node().index(),
                src.path(),
                dst.path(),
                src.value_type(),
                dst.node().index(),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::Add;

    #[test]
    fn test_render_mermaid() {
        let mut graph = NodeGraph::new();
        let a = graph.build_node("a", None, Add::new).unwrap();
        let b = graph.build_node("b", None, Add::new).unwrap();
        graph.connect(a.sum, b.a).unwrap();

        let out = Mermaid(&graph).to_string();
        assert!(out.starts_with("graph LR\n"));
        assert!(out.contains("n0[\"a\\nAdd\"]"));
        assert!(out.contains("n0 -- \"sum → a: Float\" --> n1"));
    }
}
