use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;

use crate::core::{Blake3Hasher, Hash32};
use crate::engine::Evaluator;
use crate::graph::PlugId;
use crate::scene::{ScenePlug, SceneProperty, current_path};
use crate::value::{Box3f, M44f, Object, Value};

/// Per-property hooks of a node that produces a scene from scratch.
///
/// [`hash_source`] and [`compute_source`] route the generic node hooks to
/// these, having already folded the node type, the output name and (for
/// per-location properties) the current path into the hasher.
pub trait SceneSource: Send + Sync + 'static {
    fn out_plug(&self) -> &ScenePlug;

    fn hash_bound(&self, path: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;
    fn hash_transform(&self, path: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;
    fn hash_attributes(&self, path: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;
    fn hash_object(&self, path: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;
    fn hash_child_names(&self, path: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;
    fn hash_globals(&self, ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()>;

    fn compute_bound(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<Box3f>;
    fn compute_transform(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<M44f>;
    fn compute_attributes(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<BTreeMap<String, Value>>;
    fn compute_object(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<Object>;
    fn compute_child_names(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<Vec<String>>;
    fn compute_globals(&self, ev: &Evaluator<'_>) -> anyhow::Result<BTreeMap<String, Value>>;
}

fn property_of<S: SceneSource>(source: &S, output: PlugId) -> anyhow::Result<SceneProperty> {
    source
        .out_plug()
        .property(output)
        .ok_or_else(|| anyhow!("plug {output:?} is not part of the scene output"))
}

/// `ComputeNode::hash` for a [`SceneSource`].
pub fn hash_source<S: SceneSource>(source: &S, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
    let property = property_of(source, output)?;
    let mut h = ev.seeded_hasher(output)?;

    if property == SceneProperty::Globals {
        source.hash_globals(ev, &mut h)?;
        return Ok(h.finish_hash());
    }

    let path = current_path(ev.context())?;
    h.append_u64(path.len() as u64);
    for name in path.iter() {
        h.append_str(name);
    }

    match property {
        SceneProperty::Bound => source.hash_bound(&path, ev, &mut h)?,
        SceneProperty::Transform => source.hash_transform(&path, ev, &mut h)?,
        SceneProperty::Attributes => source.hash_attributes(&path, ev, &mut h)?,
        SceneProperty::Object => source.hash_object(&path, ev, &mut h)?,
        SceneProperty::ChildNames => source.hash_child_names(&path, ev, &mut h)?,
        SceneProperty::Globals => unreachable!("handled above"),
    }

    Ok(h.finish_hash())
}

/// `ComputeNode::compute` for a [`SceneSource`].
pub fn compute_source<S: SceneSource>(source: &S, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
    let property = property_of(source, output)?;

    if property == SceneProperty::Globals {
        return Ok(Value::Attributes(Arc::new(source.compute_globals(ev)?)));
    }

    let path = current_path(ev.context())?;
    let value = match property {
        SceneProperty::Bound => Value::Box3f(source.compute_bound(&path, ev)?),
        SceneProperty::Transform => Value::M44f(source.compute_transform(&path, ev)?),
        SceneProperty::Attributes => Value::Attributes(Arc::new(source.compute_attributes(&path, ev)?)),
        SceneProperty::Object => Value::Object(Arc::new(source.compute_object(&path, ev)?)),
        SceneProperty::ChildNames => Value::StringVector(Arc::new(source.compute_child_names(&path, ev)?)),
        SceneProperty::Globals => unreachable!("handled above"),
    };

    Ok(value)
}
