//! Lazy, per-location scene evaluation.
//!
//! A scene is never materialised as a whole. Every property of a location
//! (its bound, transform, attributes, object and child names) is a separate
//! output plug evaluated with the location's path in the `scene:path`
//! context variable, so a consumer only pays for the locations it visits.
//! Globals belong to the scene as a whole and are evaluated without a path.

mod file_source;
mod map_offset;
mod processor;
mod source;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::bail;

pub use crate::scene::file_source::{FileSource, InMemoryScene, Location, SceneReader};
pub use crate::scene::map_offset::{MapOffset, UvOffset};
pub use crate::scene::processor::{ObjectProcessor, SceneElementProcessor};
pub use crate::scene::source::{SceneSource, compute_source, hash_source};

use crate::context::Context;
use crate::core::Hash32;
use crate::engine::Evaluator;
use crate::error::{EvalResult, GraphResult};
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::value::{Box3f, M44f, Object, Value, ValueType};

/// Context variable holding the location being evaluated.
pub const PATH: &str = "scene:path";

pub type ScenePath = Vec<String>;

/// `"/a/b"` to `["a", "b"]`.
pub fn parse_path(path: &str) -> ScenePath {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

pub fn path_to_string(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}

/// `context` with `scene:path` set to `path`.
pub fn path_context(context: &Context, path: &[String]) -> Context {
    context.with(PATH, path.to_vec())
}

/// The location being evaluated, for use inside node hooks.
pub fn current_path(context: &Context) -> anyhow::Result<Arc<Vec<String>>> {
    match context.get(PATH) {
        Some(Value::StringVector(path)) => Ok(path.clone()),
        Some(other) => bail!("{PATH} holds a {} instead of a path", other.value_type()),
        None => bail!("{PATH} is not set; per-location scene plugs need a path"),
    }
}

/// The properties making up a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SceneProperty {
    Bound,
    Transform,
    Attributes,
    Object,
    ChildNames,
    Globals,
}

impl SceneProperty {
    pub const ALL: [SceneProperty; 6] = [
        SceneProperty::Bound,
        SceneProperty::Transform,
        SceneProperty::Attributes,
        SceneProperty::Object,
        SceneProperty::ChildNames,
        SceneProperty::Globals,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SceneProperty::Bound => "bound",
            SceneProperty::Transform => "transform",
            SceneProperty::Attributes => "attributes",
            SceneProperty::Object => "object",
            SceneProperty::ChildNames => "childNames",
            SceneProperty::Globals => "globals",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            SceneProperty::Bound => ValueType::Box3f,
            SceneProperty::Transform => ValueType::M44f,
            SceneProperty::Attributes => ValueType::Attributes,
            SceneProperty::Object => ValueType::Object,
            SceneProperty::ChildNames => ValueType::StringVector,
            SceneProperty::Globals => ValueType::Attributes,
        }
    }

    /// Whether the property varies per location.
    pub fn is_per_location(self) -> bool {
        self != SceneProperty::Globals
    }
}

/// A compound plug carrying a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScenePlug {
    root: PlugId,
    children: [PlugId; 6],
}

impl ScenePlug {
    pub fn add(b: &mut NodeBuilder<'_>, name: &str, direction: Direction) -> GraphResult<Self> {
        let root = b.add_compound(None, name, direction)?;

        let mut children = [root; 6];
        for (slot, property) in children.iter_mut().zip(SceneProperty::ALL) {
            *slot = b.add_child(root, property.name(), property.value_type())?;
        }

        Ok(Self { root, children })
    }

    pub fn root(&self) -> PlugId {
        self.root
    }

    pub fn children(&self) -> [PlugId; 6] {
        self.children
    }

    pub fn plug(&self, property: SceneProperty) -> PlugId {
        self.children[property as usize]
    }

    pub fn property(&self, plug: PlugId) -> Option<SceneProperty> {
        self.children
            .iter()
            .position(|child| *child == plug)
            .map(|index| SceneProperty::ALL[index])
    }

    /// True if `plug` is this scene plug or one of its children.
    pub fn contains(&self, plug: &PlugRef<'_>) -> bool {
        plug.is_descendant_of(self.root)
    }

    pub fn bound_plug(&self) -> PlugId {
        self.plug(SceneProperty::Bound)
    }

    pub fn transform_plug(&self) -> PlugId {
        self.plug(SceneProperty::Transform)
    }

    pub fn attributes_plug(&self) -> PlugId {
        self.plug(SceneProperty::Attributes)
    }

    pub fn object_plug(&self) -> PlugId {
        self.plug(SceneProperty::Object)
    }

    pub fn child_names_plug(&self) -> PlugId {
        self.plug(SceneProperty::ChildNames)
    }

    pub fn globals_plug(&self) -> PlugId {
        self.plug(SceneProperty::Globals)
    }

    fn at<'a>(&self, ev: &Evaluator<'a>, path: &[String]) -> Evaluator<'a> {
        ev.with_context(path_context(ev.context(), path))
    }

    pub fn bound(&self, ev: &Evaluator<'_>, path: &[String]) -> EvalResult<Box3f> {
        self.at(ev, path).get_as(self.bound_plug())
    }

    pub fn transform(&self, ev: &Evaluator<'_>, path: &[String]) -> EvalResult<M44f> {
        self.at(ev, path).get_as(self.transform_plug())
    }

    pub fn attributes(
        &self,
        ev: &Evaluator<'_>,
        path: &[String],
    ) -> EvalResult<Arc<BTreeMap<String, Value>>> {
        self.at(ev, path).get_as(self.attributes_plug())
    }

    pub fn object(&self, ev: &Evaluator<'_>, path: &[String]) -> EvalResult<Arc<Object>> {
        self.at(ev, path).get_as(self.object_plug())
    }

    pub fn child_names(&self, ev: &Evaluator<'_>, path: &[String]) -> EvalResult<Arc<Vec<String>>> {
        self.at(ev, path).get_as(self.child_names_plug())
    }

    pub fn globals(&self, ev: &Evaluator<'_>) -> EvalResult<Arc<BTreeMap<String, Value>>> {
        ev.with_context(ev.context().without(PATH))
            .get_as(self.globals_plug())
    }

    /// Hash of `property` at `path`. `path` is ignored for globals.
    pub fn hash(&self, ev: &Evaluator<'_>, property: SceneProperty, path: &[String]) -> EvalResult<Hash32> {
        if property.is_per_location() {
            self.at(ev, path).hash(self.plug(property))
        } else {
            ev.with_context(ev.context().without(PATH))
                .hash(self.plug(property))
        }
    }

    /// Whether `path` names a location, checked by walking child names down
    /// from the root.
    pub fn exists(&self, ev: &Evaluator<'_>, path: &[String]) -> EvalResult<bool> {
        for depth in 0..path.len() {
            let names = self.child_names(ev, &path[..depth])?;
            if !names.contains(&path[depth]) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(parse_path("/a/b"), vec!["a".to_string(), "b".to_string()]);
        assert!(parse_path("/").is_empty());
        assert_eq!(path_to_string(&parse_path("/a//b/")), "/a/b");
        assert_eq!(path_to_string(&[]), "/");
    }

    #[test]
    fn test_current_path() {
        let ctx = path_context(&Context::new(), &parse_path("/plane"));
        assert_eq!(*current_path(&ctx).unwrap(), vec!["plane".to_string()]);
        assert!(current_path(&Context::new()).is_err());
        assert!(current_path(&Context::new().with(PATH, 1)).is_err());
    }
}
