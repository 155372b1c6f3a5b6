use std::sync::Arc;

use crate::core::{Blake3Hasher, Hash32};
use crate::engine::Evaluator;
use crate::error::GraphResult;
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::node::ComputeNode;
use crate::scene::{ScenePlug, SceneProperty, current_path};
use crate::value::{Object, Value};

/// The per-location object transformation of a [`SceneElementProcessor`].
pub trait ObjectProcessor: Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    /// Whether a plug of the node changes the processed object.
    fn affects_processed_object(&self, plug: &PlugRef<'_>) -> bool;

    /// Whether the object at `path` is processed at all. When this returns
    /// false the output object is the input object, hash included.
    fn processes_object(&self, input: &ScenePlug, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<bool>;

    /// Folds the processor's own inputs into the output hash. The input
    /// object hash and the path are already there.
    fn hash_processed_object(&self, path: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;

    fn compute_processed_object(
        &self,
        path: &[String],
        ev: &Evaluator<'_>,
        input: Arc<Object>,
    ) -> anyhow::Result<Object>;
}

/// A scene filter that only touches objects.
///
/// Every other property of the input scene is wired straight to the output,
/// so evaluating a bound or a transform through this node never reaches it.
pub struct SceneElementProcessor<P> {
    in_plug: ScenePlug,
    out_plug: ScenePlug,
    processor: P,
}

impl<P: ObjectProcessor> SceneElementProcessor<P> {
    pub fn build(
        b: &mut NodeBuilder<'_>,
        processor: impl FnOnce(&mut NodeBuilder<'_>) -> GraphResult<P>,
    ) -> GraphResult<Self> {
        let in_plug = ScenePlug::add(b, "in", Direction::In)?;
        let out_plug = ScenePlug::add(b, "out", Direction::Out)?;

        for property in SceneProperty::ALL {
            if property != SceneProperty::Object {
                b.connect(in_plug.plug(property), out_plug.plug(property))?;
            }
        }

        Ok(Self {
            in_plug,
            out_plug,
            processor: processor(b)?,
        })
    }

    pub fn in_plug(&self) -> &ScenePlug {
        &self.in_plug
    }

    pub fn out_plug(&self) -> &ScenePlug {
        &self.out_plug
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }
}

impl<P: ObjectProcessor> ComputeNode for SceneElementProcessor<P> {
    fn type_name(&self) -> &'static str {
        P::TYPE_NAME
    }

    fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>) {
        if plug.id() == self.in_plug.object_plug() || self.processor.affects_processed_object(plug) {
            outputs.push(self.out_plug.object_plug());
        }
    }

    fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
        anyhow::ensure!(
            output == self.out_plug.object_plug(),
            "plug {output:?} is not computed by this node"
        );

        let path = current_path(ev.context())?;
        if !self.processor.processes_object(&self.in_plug, &path, ev)? {
            return Ok(ev.hash(self.in_plug.object_plug())?);
        }

        let mut h = ev.seeded_hasher(output)?;
        h.append_u64(path.len() as u64);
        for name in path.iter() {
            h.append_str(name);
        }
        h.append_hash(ev.hash(self.in_plug.object_plug())?);
        self.processor.hash_processed_object(&path, ev, &mut h)?;

        Ok(h.finish_hash())
    }

    fn compute(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
        anyhow::ensure!(
            output == self.out_plug.object_plug(),
            "plug {output:?} is not computed by this node"
        );

        let path = current_path(ev.context())?;
        if !self.processor.processes_object(&self.in_plug, &path, ev)? {
            return Ok(ev.get(self.in_plug.object_plug())?);
        }

        let input: Arc<Object> = ev.get_as(self.in_plug.object_plug())?;
        let object = self.processor.compute_processed_object(&path, ev, input)?;
        Ok(Value::Object(Arc::new(object)))
    }
}
