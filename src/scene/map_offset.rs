use std::sync::Arc;

use crate::core::Blake3Hasher;
use crate::engine::Evaluator;
use crate::error::GraphResult;
use crate::graph::{NodeBuilder, PlugId, PlugRef};
use crate::scene::{ObjectProcessor, SceneElementProcessor, ScenePlug};
use crate::value::{Object, V2f, VariableData};

/// Offsets the UV coordinates of primitives, either directly or by moving
/// them into another UDIM tile.
pub type MapOffset = SceneElementProcessor<UvOffset>;

/// The first UDIM tile. Lower `udim` values are clamped to it.
const FIRST_UDIM: i64 = 1001;

pub struct UvOffset {
    offset: PlugId,
    udim: PlugId,
    uv_set: PlugId,
}

impl UvOffset {
    fn new(b: &mut NodeBuilder<'_>) -> GraphResult<Self> {
        Ok(Self {
            offset: b.add_input("offset", V2f::new(0.0, 0.0))?,
            udim: b.add_input("udim", FIRST_UDIM)?,
            uv_set: b.add_input("uvSet", "uv")?,
        })
    }

    /// The total offset: the `offset` input plus the displacement of the
    /// `udim` tile from tile 1001.
    fn total_offset(&self, ev: &Evaluator<'_>) -> anyhow::Result<V2f> {
        let offset: V2f = ev.get_as(self.offset)?;
        let udim: i64 = ev.get_as(self.udim)?;

        let tile = udim.max(FIRST_UDIM) - FIRST_UDIM;
        Ok(offset + V2f::new((tile % 10) as f32, (tile / 10) as f32))
    }
}

impl MapOffset {
    pub fn new(b: &mut NodeBuilder<'_>) -> GraphResult<Self> {
        Self::build(b, UvOffset::new)
    }

    pub fn offset_plug(&self) -> PlugId {
        self.processor().offset
    }

    pub fn udim_plug(&self) -> PlugId {
        self.processor().udim
    }

    pub fn uv_set_plug(&self) -> PlugId {
        self.processor().uv_set
    }
}

impl ObjectProcessor for UvOffset {
    const TYPE_NAME: &'static str = "MapOffset";

    fn affects_processed_object(&self, plug: &PlugRef<'_>) -> bool {
        plug.is_descendant_of(self.offset) || plug.id() == self.udim || plug.id() == self.uv_set
    }

    fn processes_object(&self, input: &ScenePlug, _: &[String], ev: &Evaluator<'_>) -> anyhow::Result<bool> {
        let uv_set: Arc<str> = ev.get_as(self.uv_set)?;
        if uv_set.is_empty() {
            return Ok(false);
        }

        let object: Arc<Object> = ev.get_as(input.object_plug())?;
        Ok(object
            .as_primitive()
            .is_some_and(|primitive| primitive.v2f_data(&uv_set).is_some()))
    }

    fn hash_processed_object(&self, _: &[String], ev: &Evaluator<'_>, h: &mut Blake3Hasher) -> anyhow::Result<()> {
        let offset = self.total_offset(ev)?;
        h.append_f32(offset.x)
            .append_f32(offset.y)
            .append_hash(ev.hash(self.uv_set)?);
        Ok(())
    }

    fn compute_processed_object(
        &self,
        _: &[String],
        ev: &Evaluator<'_>,
        input: Arc<Object>,
    ) -> anyhow::Result<Object> {
        let uv_set: Arc<str> = ev.get_as(self.uv_set)?;
        let offset = self.total_offset(ev)?;

        let mut object = Arc::unwrap_or_clone(input);
        if let Object::Primitive(primitive) = &mut object {
            if let Some(VariableData::V2f(uvs)) = primitive.variable_mut(&uv_set).map(|v| &mut v.data) {
                for uv in uvs.iter_mut() {
                    *uv = *uv + offset;
                }
            }
        }

        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::engine::Engine;
    use crate::graph::NodeHandle;
    use crate::scene::{FileSource, InMemoryScene, Location, SceneProperty, parse_path};
    use crate::value::{Camera, Interpolation, Primitive, PrimitiveVariable};

    fn plane(uv: V2f) -> Object {
        Object::Primitive(Primitive::new().with_variable(
            "uv",
            PrimitiveVariable::new(Interpolation::FaceVarying, VariableData::V2f(vec![uv])),
        ))
    }

    struct Fixture {
        engine: Engine,
        source: NodeHandle<FileSource>,
        offset: NodeHandle<MapOffset>,
    }

    fn fixture() -> Fixture {
        let scene = InMemoryScene::new();
        scene.insert(
            "shot.scn",
            &parse_path("/plane"),
            Location {
                object: plane(V2f::new(0.1, 0.1)),
                ..Location::default()
            },
        );
        scene.insert(
            "shot.scn",
            &parse_path("/camera"),
            Location {
                object: Object::Camera(Camera { focal_length: 35.0 }),
                ..Location::default()
            },
        );

        let engine = Engine::default();
        let source = engine
            .add_node("source", FileSource::with_reader(Arc::new(scene)))
            .unwrap();
        engine.set_value(source.file_name_plug(), "shot.scn").unwrap();

        let offset = engine.add_node("offset", MapOffset::new).unwrap();
        engine
            .connect(source.out().root(), offset.in_plug().root())
            .unwrap();

        Fixture { engine, source, offset }
    }

    fn uv(fixture: &Fixture, path: &str) -> V2f {
        let object = fixture.engine.evaluate(&Context::new(), |ev| {
            fixture.offset.out_plug().object(ev, &parse_path(path)).unwrap()
        });
        object.as_primitive().and_then(|p| p.v2f_data("uv")).unwrap()[0]
    }

    fn object_hashes(fixture: &Fixture, path: &str) -> (crate::core::Hash32, crate::core::Hash32) {
        let path = parse_path(path);
        fixture.engine.evaluate(&Context::new(), |ev| {
            (
                fixture.source.out().hash(ev, SceneProperty::Object, &path).unwrap(),
                fixture.offset.out_plug().hash(ev, SceneProperty::Object, &path).unwrap(),
            )
        })
    }

    fn assert_close(a: V2f, b: V2f) {
        assert!((a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5, "{a:?} != {b:?}");
    }

    #[test]
    fn test_offsets_uvs() {
        let fixture = fixture();
        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();

        assert_close(uv(&fixture, "/plane"), V2f::new(0.4, 0.8));
    }

    #[test]
    fn test_udim_moves_tiles() {
        let fixture = fixture();
        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();
        fixture.engine.set_value(fixture.offset.udim_plug(), 1012).unwrap();

        assert_close(uv(&fixture, "/plane"), V2f::new(1.4, 1.8));
    }

    #[test]
    fn test_udim_below_first_tile_is_clamped() {
        let fixture = fixture();
        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();
        let (_, first) = object_hashes(&fixture, "/plane");

        fixture.engine.set_value(fixture.offset.udim_plug(), 990).unwrap();
        assert_close(uv(&fixture, "/plane"), V2f::new(0.4, 0.8));

        let (_, clamped) = object_hashes(&fixture, "/plane");
        assert_eq!(first, clamped);
    }

    #[test]
    fn test_offset_changes_hash() {
        let fixture = fixture();
        let (input, before) = object_hashes(&fixture, "/plane");
        assert_ne!(input, before);

        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.5, 0.0))
            .unwrap();
        let (_, after) = object_hashes(&fixture, "/plane");
        assert_ne!(before, after);
    }

    #[test]
    fn test_empty_uv_set_passes_through() {
        let fixture = fixture();
        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();
        fixture.engine.set_value(fixture.offset.uv_set_plug(), "").unwrap();

        let (input, output) = object_hashes(&fixture, "/plane");
        assert_eq!(input, output);
        assert_close(uv(&fixture, "/plane"), V2f::new(0.1, 0.1));

        // The input object itself is handed on, not a copy.
        let path = parse_path("/plane");
        fixture.engine.evaluate(&Context::new(), |ev| {
            let input = fixture.source.out().object(ev, &path).unwrap();
            let output = fixture.offset.out_plug().object(ev, &path).unwrap();
            assert!(Arc::ptr_eq(&input, &output));
        });
    }

    #[test]
    fn test_missing_uv_set_passes_through() {
        let fixture = fixture();
        fixture.engine.set_value(fixture.offset.uv_set_plug(), "st").unwrap();

        let (input, output) = object_hashes(&fixture, "/plane");
        assert_eq!(input, output);
    }

    #[test]
    fn test_non_primitive_passes_through() {
        let fixture = fixture();
        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();

        let (input, output) = object_hashes(&fixture, "/camera");
        assert_eq!(input, output);

        let object = fixture.engine.evaluate(&Context::new(), |ev| {
            fixture.offset.out_plug().object(ev, &parse_path("/camera")).unwrap()
        });
        assert_eq!(*object, Object::Camera(Camera { focal_length: 35.0 }));
    }

    #[test]
    fn test_other_properties_pass_through() {
        let fixture = fixture();
        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();

        let path = parse_path("/plane");
        fixture.engine.evaluate(&Context::new(), |ev| {
            let (src, out) = (fixture.source.out(), fixture.offset.out_plug());
            for property in [
                SceneProperty::Bound,
                SceneProperty::Transform,
                SceneProperty::Attributes,
                SceneProperty::ChildNames,
                SceneProperty::Globals,
            ] {
                assert_eq!(
                    src.hash(ev, property, &path).unwrap(),
                    out.hash(ev, property, &path).unwrap(),
                    "{property:?}"
                );
            }
            assert_eq!(*out.child_names(ev, &[]).unwrap(), vec!["plane".to_string(), "camera".to_string()]);
        });
    }

    #[test]
    fn test_offset_dirties_only_object() {
        let fixture = fixture();
        let dirtied = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = dirtied.clone();
        fixture.engine.on_plug_dirtied(move |plug| sink.lock().push(plug));

        fixture
            .engine
            .set_value(fixture.offset.offset_plug(), V2f::new(0.3, 0.7))
            .unwrap();

        let dirtied = dirtied.lock();
        let out = fixture.offset.out_plug();
        assert!(dirtied.contains(&out.object_plug()));
        assert!(!dirtied.contains(&out.bound_plug()));
        assert!(!dirtied.contains(&out.child_names_plug()));
    }
}
