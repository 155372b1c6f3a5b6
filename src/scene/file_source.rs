use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{Context as _, anyhow};
use parking_lot::RwLock;

use crate::core::{Blake3Hasher, Hash32};
use crate::engine::Evaluator;
use crate::error::GraphResult;
use crate::graph::{Direction, NodeBuilder, PlugId, PlugRef};
use crate::node::ComputeNode;
use crate::scene::{ScenePath, ScenePlug, SceneSource, compute_source, hash_source, path_to_string};
use crate::value::{Box3f, M44f, Object, Value};

/// Reads scene locations out of a file.
///
/// Implementations must be deterministic for a given file name: the engine
/// caches everything a reader returns until the node's `refreshCount`
/// changes.
pub trait SceneReader: Send + Sync {
    /// Distinguishes readers whose files would otherwise hash alike.
    fn identity(&self) -> Hash32 {
        Hash32::default()
    }

    fn read_bound(&self, file: &str, path: &[String]) -> anyhow::Result<Box3f>;
    fn read_transform(&self, file: &str, path: &[String]) -> anyhow::Result<M44f>;
    fn read_attributes(&self, file: &str, path: &[String]) -> anyhow::Result<BTreeMap<String, Value>>;
    fn read_object(&self, file: &str, path: &[String]) -> anyhow::Result<Object>;
    fn read_child_names(&self, file: &str, path: &[String]) -> anyhow::Result<Vec<String>>;
    fn read_globals(&self, file: &str) -> anyhow::Result<BTreeMap<String, Value>>;
}

/// Everything stored at one location of an [`InMemoryScene`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Location {
    pub bound: Box3f,
    pub transform: M44f,
    pub attributes: BTreeMap<String, Value>,
    pub object: Object,
}

#[derive(Default)]
struct Entry {
    location: Location,
    children: Vec<String>,
}

#[derive(Default)]
struct SceneFile {
    locations: BTreeMap<ScenePath, Entry>,
    globals: BTreeMap<String, Value>,
}

static NEXT_SCENE: AtomicU64 = AtomicU64::new(0);

/// A [`SceneReader`] over scenes held in memory, keyed by file name.
pub struct InMemoryScene {
    id: u64,
    files: RwLock<BTreeMap<String, SceneFile>>,
    reads: AtomicUsize,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self {
            id: NEXT_SCENE.fetch_add(1, Ordering::Relaxed),
            files: RwLock::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
        }
    }

    /// Stores `location` at `path` of `file`, creating the file and any
    /// missing ancestors as empty locations.
    pub fn insert(&self, file: &str, path: &[String], location: Location) {
        let mut files = self.files.write();
        let scene = files.entry(file.to_string()).or_default();
        scene.locations.entry(Vec::new()).or_default();

        for depth in 1..=path.len() {
            let (parent, name) = (&path[..depth - 1], &path[depth - 1]);
            if let Some(entry) = scene.locations.get_mut(parent) {
                if !entry.children.contains(name) {
                    entry.children.push(name.clone());
                }
            }
            scene.locations.entry(path[..depth].to_vec()).or_default();
        }

        if let Some(entry) = scene.locations.get_mut(path) {
            entry.location = location;
        }
    }

    pub fn set_globals(&self, file: &str, globals: BTreeMap<String, Value>) {
        let mut files = self.files.write();
        let scene = files.entry(file.to_string()).or_default();
        scene.locations.entry(Vec::new()).or_default();
        scene.globals = globals;
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn with_file<T>(&self, file: &str, f: impl FnOnce(&SceneFile) -> anyhow::Result<T>) -> anyhow::Result<T> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let files = self.files.read();
        let scene = files
            .get(file)
            .ok_or_else(|| anyhow!("no scene file named '{file}'"))?;
        f(scene)
    }

    fn with_entry<T>(&self, file: &str, path: &[String], f: impl FnOnce(&Entry) -> T) -> anyhow::Result<T> {
        self.with_file(file, |scene| {
            scene
                .locations
                .get(path)
                .map(f)
                .ok_or_else(|| anyhow!("'{file}' has no location {}", path_to_string(path)))
        })
    }
}

impl Default for InMemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneReader for InMemoryScene {
    fn identity(&self) -> Hash32 {
        let mut h = Blake3Hasher::new();
        h.append_str("InMemoryScene").append_u64(self.id);
        h.finish_hash()
    }

    fn read_bound(&self, file: &str, path: &[String]) -> anyhow::Result<Box3f> {
        self.with_entry(file, path, |entry| entry.location.bound)
    }

    fn read_transform(&self, file: &str, path: &[String]) -> anyhow::Result<M44f> {
        self.with_entry(file, path, |entry| entry.location.transform)
    }

    fn read_attributes(&self, file: &str, path: &[String]) -> anyhow::Result<BTreeMap<String, Value>> {
        self.with_entry(file, path, |entry| entry.location.attributes.clone())
    }

    fn read_object(&self, file: &str, path: &[String]) -> anyhow::Result<Object> {
        self.with_entry(file, path, |entry| entry.location.object.clone())
    }

    fn read_child_names(&self, file: &str, path: &[String]) -> anyhow::Result<Vec<String>> {
        self.with_entry(file, path, |entry| entry.children.clone())
    }

    fn read_globals(&self, file: &str) -> anyhow::Result<BTreeMap<String, Value>> {
        self.with_file(file, |scene| Ok(scene.globals.clone()))
    }
}

/// A scene read from a file through a [`SceneReader`].
///
/// Bumping `refreshCount` forces the file to be read again, for readers
/// whose files change on disk.
pub struct FileSource {
    file_name: PlugId,
    refresh_count: PlugId,
    out: ScenePlug,
    reader: Arc<dyn SceneReader>,
}

impl FileSource {
    pub fn with_reader(
        reader: Arc<dyn SceneReader>,
    ) -> impl FnOnce(&mut NodeBuilder<'_>) -> GraphResult<Self> {
        move |b: &mut NodeBuilder<'_>| {
            Ok(Self {
                file_name: b.add_input("fileName", "")?,
                refresh_count: b.add_input("refreshCount", 0)?,
                out: ScenePlug::add(b, "out", Direction::Out)?,
                reader,
            })
        }
    }

    pub fn file_name_plug(&self) -> PlugId {
        self.file_name
    }

    pub fn refresh_count_plug(&self) -> PlugId {
        self.refresh_count
    }

    pub fn out(&self) -> &ScenePlug {
        &self.out
    }

    fn hash_file(&self, ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        h.append_hash(ev.hash(self.file_name)?)
            .append_hash(ev.hash(self.refresh_count)?)
            .append_hash(self.reader.identity());
        Ok(())
    }

    /// The file to read, or `None` for an empty scene.
    fn file(&self, ev: &Evaluator<'_>) -> anyhow::Result<Option<Arc<str>>> {
        let file: Arc<str> = ev.get_as(self.file_name)?;
        Ok((!file.is_empty()).then_some(file))
    }

    fn read<T: Default>(
        &self,
        ev: &Evaluator<'_>,
        path: &[String],
        read: impl FnOnce(&dyn SceneReader, &str) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        match self.file(ev)? {
            Some(file) => read(self.reader.as_ref(), &file)
                .with_context(|| format!("reading {} from '{file}'", path_to_string(path))),
            None => Ok(T::default()),
        }
    }
}

impl SceneSource for FileSource {
    fn out_plug(&self) -> &ScenePlug {
        &self.out
    }

    fn hash_bound(&self, _: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        self.hash_file(ev, h)
    }

    fn hash_transform(&self, _: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        self.hash_file(ev, h)
    }

    fn hash_attributes(&self, _: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        self.hash_file(ev, h)
    }

    fn hash_object(&self, _: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        self.hash_file(ev, h)
    }

    fn hash_child_names(&self, _: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        self.hash_file(ev, h)
    }

    fn hash_globals(&self, ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        self.hash_file(ev, h)
    }

    fn compute_bound(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<Box3f> {
        self.read(ev, path, |reader, file| reader.read_bound(file, path))
    }

    fn compute_transform(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<M44f> {
        self.read(ev, path, |reader, file| reader.read_transform(file, path))
    }

    fn compute_attributes(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<BTreeMap<String, Value>> {
        self.read(ev, path, |reader, file| reader.read_attributes(file, path))
    }

    fn compute_object(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<Object> {
        self.read(ev, path, |reader, file| reader.read_object(file, path))
    }

    fn compute_child_names(&self, path: &[String], ev: &Evaluator<'_>) -> anyhow::Result<Vec<String>> {
        self.read(ev, path, |reader, file| reader.read_child_names(file, path))
    }

    fn compute_globals(&self, ev: &Evaluator<'_>) -> anyhow::Result<BTreeMap<String, Value>> {
        self.read(ev, &[], |reader, file| reader.read_globals(file))
    }
}

impl ComputeNode for FileSource {
    fn type_name(&self) -> &'static str {
        "FileSource"
    }

    fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>) {
        if plug.id() == self.file_name || plug.id() == self.refresh_count {
            outputs.extend(self.out.children());
        }
    }

    fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32> {
        hash_source(self, output, ev)
    }

    fn compute(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value> {
        compute_source(self, output, ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::engine::Engine;
    use crate::error::EvalError;
    use crate::graph::NodeHandle;
    use crate::scene::{SceneProperty, parse_path};

    fn scene() -> Arc<InMemoryScene> {
        let scene = InMemoryScene::new();
        scene.insert(
            "shot.scn",
            &parse_path("/world/plane"),
            Location {
                bound: Box3f::new([-1.0, 0.0, -1.0], [1.0, 0.0, 1.0]),
                transform: M44f::translation(0.0, 2.0, 0.0),
                ..Location::default()
            },
        );
        scene.set_globals(
            "shot.scn",
            BTreeMap::from([("render:camera".to_string(), Value::from("/cam"))]),
        );
        Arc::new(scene)
    }

    fn source(engine: &Engine, reader: Arc<InMemoryScene>) -> NodeHandle<FileSource> {
        let source = engine
            .add_node("source", FileSource::with_reader(reader))
            .unwrap();
        engine.set_value(source.file_name_plug(), "shot.scn").unwrap();
        source
    }

    #[test]
    fn test_reads_locations() {
        let engine = Engine::default();
        let source = source(&engine, scene());

        engine.evaluate(&Context::new(), |ev| {
            let out = source.out();
            assert_eq!(*out.child_names(ev, &[]).unwrap(), vec!["world".to_string()]);
            assert_eq!(*out.child_names(ev, &parse_path("/world")).unwrap(), vec!["plane".to_string()]);

            let plane = parse_path("/world/plane");
            assert_eq!(out.transform(ev, &plane).unwrap(), M44f::translation(0.0, 2.0, 0.0));
            assert_eq!(out.bound(ev, &plane).unwrap().max, [1.0, 0.0, 1.0]);
            assert!(out.exists(ev, &plane).unwrap());
            assert!(!out.exists(ev, &parse_path("/world/sphere")).unwrap());
        });
    }

    #[test]
    fn test_globals_ignore_path() {
        let engine = Engine::default();
        let source = source(&engine, scene());

        let root = Context::new();
        let nested = crate::scene::path_context(&root, &parse_path("/world"));
        let a = engine.evaluate(&root, |ev| source.out().globals(ev).unwrap());
        let b = engine.evaluate(&nested, |ev| source.out().globals(ev).unwrap());
        assert_eq!(a, b);
        assert_eq!(a.get("render:camera"), Some(&Value::from("/cam")));

        let ha = engine.evaluate(&root, |ev| source.out().hash(ev, SceneProperty::Globals, &[]).unwrap());
        let hb = engine.evaluate(&nested, |ev| {
            source.out().hash(ev, SceneProperty::Globals, &parse_path("/world")).unwrap()
        });
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_empty_file_name_is_empty_scene() {
        let engine = Engine::default();
        let reader = scene();
        let source = engine
            .add_node("source", FileSource::with_reader(reader.clone()))
            .unwrap();

        engine.evaluate(&Context::new(), |ev| {
            let out = source.out();
            assert!(out.child_names(ev, &[]).unwrap().is_empty());
            assert!(out.bound(ev, &[]).unwrap().is_empty());
            assert_eq!(out.transform(ev, &[]).unwrap(), M44f::identity());
            assert_eq!(*out.object(ev, &[]).unwrap(), Object::Null);
            assert!(out.attributes(ev, &[]).unwrap().is_empty());
            assert!(out.globals(ev).unwrap().is_empty());
        });
        assert_eq!(reader.reads(), 0);
    }

    #[test]
    fn test_refresh_count_rereads() {
        let engine = Engine::default();
        let reader = scene();
        let source = source(&engine, reader.clone());
        let plane = parse_path("/world/plane");

        let before = engine.evaluate(&Context::new(), |ev| source.out().transform(ev, &plane).unwrap());
        reader.insert(
            "shot.scn",
            &plane,
            Location {
                transform: M44f::translation(5.0, 0.0, 0.0),
                ..Location::default()
            },
        );

        // Cached until asked to refresh.
        let cached = engine.evaluate(&Context::new(), |ev| source.out().transform(ev, &plane).unwrap());
        assert_eq!(cached, before);

        engine.set_value(source.refresh_count_plug(), 1).unwrap();
        let after = engine.evaluate(&Context::new(), |ev| source.out().transform(ev, &plane).unwrap());
        assert_eq!(after, M44f::translation(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_per_location_hashes_differ() {
        let engine = Engine::default();
        let source = source(&engine, scene());

        engine.evaluate(&Context::new(), |ev| {
            let out = source.out();
            let world = out.hash(ev, SceneProperty::Bound, &parse_path("/world")).unwrap();
            let plane = out.hash(ev, SceneProperty::Bound, &parse_path("/world/plane")).unwrap();
            let transform = out.hash(ev, SceneProperty::Transform, &parse_path("/world")).unwrap();
            assert_ne!(world, plane);
            assert_ne!(world, transform);
        });
    }

    #[test]
    fn test_missing_location_is_compute_error() {
        let engine = Engine::default();
        let source = source(&engine, scene());

        let err = engine
            .evaluate(&Context::new(), |ev| source.out().object(ev, &parse_path("/nowhere")))
            .unwrap_err();
        match err {
            EvalError::Compute(err) => {
                assert_eq!(err.node, "source");
                assert!(format!("{:#}", err.cause).contains("/nowhere"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_per_location_plug_needs_path() {
        let engine = Engine::default();
        let source = source(&engine, scene());

        let result = engine.get_value(source.out().bound_plug(), &Context::new());
        assert!(matches!(result, Err(EvalError::Compute(_))));
    }
}
