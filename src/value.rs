//! Typed plug values.
//!
//! Every plug declares a [`ValueType`] and carries [`Value`]s of that type.
//! Large payloads (vectors, objects, images) are reference counted, so
//! cloning a `Value` out of the cache is cheap and two consumers of the same
//! cache entry observe the very same allocation.

use std::collections::BTreeMap;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use crate::core::Blake3Hasher;
use crate::image::ImageBuffer;

/// The declared type of a plug.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// A structural plug which only groups children and has no value.
    Compound,
    Bool,
    Int,
    Float,
    String,
    V2f,
    V2i,
    Box2i,
    Box3f,
    M44f,
    Color4f,
    StringVector,
    IntVector,
    FloatVector,
    Attributes,
    Object,
    Image,
}

const V2F_COMPONENTS: &[(&str, ValueType)] = &[("x", ValueType::Float), ("y", ValueType::Float)];
const V2I_COMPONENTS: &[(&str, ValueType)] = &[("x", ValueType::Int), ("y", ValueType::Int)];
const BOX2I_COMPONENTS: &[(&str, ValueType)] = &[("min", ValueType::V2i), ("max", ValueType::V2i)];
const COLOR4F_COMPONENTS: &[(&str, ValueType)] = &[
    ("r", ValueType::Float),
    ("g", ValueType::Float),
    ("b", ValueType::Float),
    ("a", ValueType::Float),
];

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Compound => "Compound",
            ValueType::Bool => "Bool",
            ValueType::Int => "Int",
            ValueType::Float => "Float",
            ValueType::String => "String",
            ValueType::V2f => "V2f",
            ValueType::V2i => "V2i",
            ValueType::Box2i => "Box2i",
            ValueType::Box3f => "Box3f",
            ValueType::M44f => "M44f",
            ValueType::Color4f => "Color4f",
            ValueType::StringVector => "StringVector",
            ValueType::IntVector => "IntVector",
            ValueType::FloatVector => "FloatVector",
            ValueType::Attributes => "Attributes",
            ValueType::Object => "Object",
            ValueType::Image => "Image",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Bool | ValueType::Int | ValueType::Float)
    }

    /// Whether a plug of this type may take its input from a plug of type
    /// `source`.
    pub fn accepts(self, source: ValueType) -> bool {
        self == source
            || (self.is_numeric() && source.is_numeric())
            || matches!(
                (self, source),
                (ValueType::V2f, ValueType::V2i) | (ValueType::V2i, ValueType::V2f)
            )
    }

    /// The child plugs a compound plug of this type decomposes into. Empty
    /// for types which are always atomic.
    pub fn components(self) -> &'static [(&'static str, ValueType)] {
        match self {
            ValueType::V2f => V2F_COMPONENTS,
            ValueType::V2i => V2I_COMPONENTS,
            ValueType::Box2i => BOX2I_COMPONENTS,
            ValueType::Color4f => COLOR4F_COMPONENTS,
            _ => &[],
        }
    }

    fn tag(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct V2f {
    pub x: f32,
    pub y: f32,
}

impl V2f {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for V2f {
    type Output = V2f;

    fn add(self, rhs: V2f) -> V2f {
        V2f::new(self.x + rhs.x, self.y + rhs.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct V2i {
    pub x: i32,
    pub y: i32,
}

impl V2i {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Integer pixel box. `max` is exclusive, so a box with `min == max` is
/// empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Box2i {
    pub min: V2i,
    pub max: V2i,
}

impl Box2i {
    pub const fn new(min: V2i, max: V2i) -> Self {
        Self { min, max }
    }

    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(V2i::new(0, 0), V2i::new(width, height))
    }

    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    /// A box whose `min` exceeds its `max` on some axis.
    pub fn is_inverted(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn width(&self) -> i32 {
        (self.max.x - self.min.x).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.max.y - self.min.y).max(0)
    }

    pub fn contains(&self, p: V2i) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    pub fn intersection(&self, other: &Box2i) -> Box2i {
        let result = Box2i::new(
            V2i::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            V2i::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        );

        if result.is_empty() {
            Box2i::default()
        } else {
            result
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Box3f {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Box3f {
    pub const fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self::new([f32::INFINITY; 3], [f32::NEG_INFINITY; 3])
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.max[i] < self.min[i])
    }
}

impl Default for Box3f {
    fn default() -> Self {
        Self::empty()
    }
}

/// Row-major 4x4 transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct M44f(pub [f32; 16]);

impl M44f {
    pub const fn identity() -> Self {
        M44f([
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::identity();
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }
}

impl Default for M44f {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Color4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4f {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interpolation {
    Constant,
    Uniform,
    Vertex,
    FaceVarying,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VariableData {
    Float(Vec<f32>),
    Int(Vec<i32>),
    V2f(Vec<V2f>),
    V3f(Vec<[f32; 3]>),
}

impl VariableData {
    fn hash_into(&self, h: &mut Blake3Hasher) {
        match self {
            VariableData::Float(data) => {
                h.append_u64(0).append_u64(data.len() as u64);
                data.iter().for_each(|v| {
                    h.append_f32(*v);
                });
            }
            VariableData::Int(data) => {
                h.append_u64(1).append_u64(data.len() as u64);
                data.iter().for_each(|v| {
                    h.append_i64(*v as i64);
                });
            }
            VariableData::V2f(data) => {
                h.append_u64(2).append_u64(data.len() as u64);
                data.iter().for_each(|v| {
                    h.append_f32(v.x).append_f32(v.y);
                });
            }
            VariableData::V3f(data) => {
                h.append_u64(3).append_u64(data.len() as u64);
                data.iter().flatten().for_each(|v| {
                    h.append_f32(*v);
                });
            }
        }
    }

    fn memory_usage(&self) -> usize {
        match self {
            VariableData::Float(data) => data.len() * size_of::<f32>(),
            VariableData::Int(data) => data.len() * size_of::<i32>(),
            VariableData::V2f(data) => data.len() * size_of::<V2f>(),
            VariableData::V3f(data) => data.len() * size_of::<[f32; 3]>(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveVariable {
    pub interpolation: Interpolation,
    pub data: VariableData,
}

impl PrimitiveVariable {
    pub fn new(interpolation: Interpolation, data: VariableData) -> Self {
        Self {
            interpolation,
            data,
        }
    }
}

/// Geometry with named primitive variables ("P", "uv", ...).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Primitive {
    pub variables: BTreeMap<String, PrimitiveVariable>,
}

impl Primitive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, variable: PrimitiveVariable) -> Self {
        self.variables.insert(name.into(), variable);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&PrimitiveVariable> {
        self.variables.get(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut PrimitiveVariable> {
        self.variables.get_mut(name)
    }

    /// The `V2f` data of a variable, if the variable exists with that type.
    pub fn v2f_data(&self, name: &str) -> Option<&[V2f]> {
        match self.variable(name).map(|v| &v.data) {
            Some(VariableData::V2f(data)) => Some(data),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub focal_length: f32,
}

/// The object stored at a scene location.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Object {
    #[default]
    Null,
    Primitive(Primitive),
    Camera(Camera),
}

impl Object {
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Object::Primitive(primitive) => Some(primitive),
            _ => None,
        }
    }

    fn hash_into(&self, h: &mut Blake3Hasher) {
        match self {
            Object::Null => {
                h.append_u64(0);
            }
            Object::Primitive(primitive) => {
                h.append_u64(1)
                    .append_u64(primitive.variables.len() as u64);
                for (name, variable) in &primitive.variables {
                    h.append_str(name)
                        .append_u64(variable.interpolation as u64);
                    variable.data.hash_into(h);
                }
            }
            Object::Camera(camera) => {
                h.append_u64(2).append_f32(camera.focal_length);
            }
        }
    }

    fn memory_usage(&self) -> usize {
        let heap = match self {
            Object::Primitive(primitive) => primitive
                .variables
                .iter()
                .map(|(name, variable)| {
                    name.len() + size_of::<PrimitiveVariable>() + variable.data.memory_usage()
                })
                .sum(),
            _ => 0,
        };

        size_of::<Object>() + heap
    }
}

/// A plug value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    String(Arc<str>),
    V2f(V2f),
    V2i(V2i),
    Box2i(Box2i),
    Box3f(Box3f),
    M44f(M44f),
    Color4f(Color4f),
    StringVector(Arc<Vec<String>>),
    IntVector(Arc<Vec<i32>>),
    FloatVector(Arc<Vec<f32>>),
    Attributes(Arc<BTreeMap<String, Value>>),
    Object(Arc<Object>),
    Image(Arc<ImageBuffer>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::V2f(_) => ValueType::V2f,
            Value::V2i(_) => ValueType::V2i,
            Value::Box2i(_) => ValueType::Box2i,
            Value::Box3f(_) => ValueType::Box3f,
            Value::M44f(_) => ValueType::M44f,
            Value::Color4f(_) => ValueType::Color4f,
            Value::StringVector(_) => ValueType::StringVector,
            Value::IntVector(_) => ValueType::IntVector,
            Value::FloatVector(_) => ValueType::FloatVector,
            Value::Attributes(_) => ValueType::Attributes,
            Value::Object(_) => ValueType::Object,
            Value::Image(_) => ValueType::Image,
        }
    }

    /// The value a freshly created plug of type `ty` holds. `None` for
    /// [`ValueType::Compound`].
    pub fn default_for(ty: ValueType) -> Option<Value> {
        let value = match ty {
            ValueType::Compound => return None,
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(Arc::from("")),
            ValueType::V2f => Value::V2f(V2f::default()),
            ValueType::V2i => Value::V2i(V2i::default()),
            ValueType::Box2i => Value::Box2i(Box2i::default()),
            ValueType::Box3f => Value::Box3f(Box3f::empty()),
            ValueType::M44f => Value::M44f(M44f::identity()),
            ValueType::Color4f => Value::Color4f(Color4f::default()),
            ValueType::StringVector => Value::StringVector(Arc::default()),
            ValueType::IntVector => Value::IntVector(Arc::default()),
            ValueType::FloatVector => Value::FloatVector(Arc::default()),
            ValueType::Attributes => Value::Attributes(Arc::default()),
            ValueType::Object => Value::Object(Arc::new(Object::Null)),
            ValueType::Image => Value::Image(Arc::new(ImageBuffer::default())),
        };

        Some(value)
    }

    /// Converts to `ty` where [`ValueType::accepts`] allows it.
    pub fn convert(self, ty: ValueType) -> Option<Value> {
        if self.value_type() == ty {
            return Some(self);
        }

        let converted = match (self, ty) {
            (Value::Bool(v), ValueType::Int) => Value::Int(v as i64),
            (Value::Bool(v), ValueType::Float) => Value::Float(if v { 1.0 } else { 0.0 }),
            (Value::Int(v), ValueType::Bool) => Value::Bool(v != 0),
            (Value::Int(v), ValueType::Float) => Value::Float(v as f32),
            (Value::Float(v), ValueType::Bool) => Value::Bool(v != 0.0),
            (Value::Float(v), ValueType::Int) => Value::Int(v as i64),
            (Value::V2i(v), ValueType::V2f) => Value::V2f(V2f::new(v.x as f32, v.y as f32)),
            (Value::V2f(v), ValueType::V2i) => Value::V2i(V2i::new(v.x as i32, v.y as i32)),
            _ => return None,
        };

        Some(converted)
    }

    /// Splits a compound value into the values of its components, in the
    /// order given by [`ValueType::components`].
    pub fn split(&self) -> Option<Vec<Value>> {
        let parts = match self {
            Value::V2f(v) => vec![Value::Float(v.x), Value::Float(v.y)],
            Value::V2i(v) => vec![Value::Int(v.x as i64), Value::Int(v.y as i64)],
            Value::Box2i(b) => vec![Value::V2i(b.min), Value::V2i(b.max)],
            Value::Color4f(c) => c.to_array().into_iter().map(Value::Float).collect(),
            _ => return None,
        };

        Some(parts)
    }

    /// Inverse of [`Value::split`].
    pub fn assemble(ty: ValueType, parts: Vec<Value>) -> Option<Value> {
        fn float(v: &Value) -> Option<f32> {
            v.as_float()
        }

        fn int(v: &Value) -> Option<i32> {
            v.as_int().map(|v| v as i32)
        }

        let value = match (ty, parts.as_slice()) {
            (ValueType::V2f, [x, y]) => Value::V2f(V2f::new(float(x)?, float(y)?)),
            (ValueType::V2i, [x, y]) => Value::V2i(V2i::new(int(x)?, int(y)?)),
            (ValueType::Box2i, [min, max]) => Value::Box2i(Box2i::new(min.as_v2i()?, max.as_v2i()?)),
            (ValueType::Color4f, [r, g, b, a]) => {
                Value::Color4f(Color4f::new(float(r)?, float(g)?, float(b)?, float(a)?))
            }
            _ => return None,
        };

        Some(value)
    }

    /// Folds the type and content of this value into a fingerprint.
    pub fn hash_into(&self, h: &mut Blake3Hasher) {
        h.append_u64(self.value_type().tag());

        match self {
            Value::Bool(v) => {
                h.append_bool(*v);
            }
            Value::Int(v) => {
                h.append_i64(*v);
            }
            Value::Float(v) => {
                h.append_f32(*v);
            }
            Value::String(v) => {
                h.append_str(v);
            }
            Value::V2f(v) => {
                h.append_f32(v.x).append_f32(v.y);
            }
            Value::V2i(v) => {
                h.append_i64(v.x as i64).append_i64(v.y as i64);
            }
            Value::Box2i(b) => {
                h.append_i64(b.min.x as i64)
                    .append_i64(b.min.y as i64)
                    .append_i64(b.max.x as i64)
                    .append_i64(b.max.y as i64);
            }
            Value::Box3f(b) => {
                b.min.iter().chain(b.max.iter()).for_each(|v| {
                    h.append_f32(*v);
                });
            }
            Value::M44f(m) => {
                m.0.iter().for_each(|v| {
                    h.append_f32(*v);
                });
            }
            Value::Color4f(c) => {
                c.to_array().iter().for_each(|v| {
                    h.append_f32(*v);
                });
            }
            Value::StringVector(v) => {
                h.append_u64(v.len() as u64);
                v.iter().for_each(|s| {
                    h.append_str(s);
                });
            }
            Value::IntVector(v) => {
                h.append_u64(v.len() as u64);
                v.iter().for_each(|i| {
                    h.append_i64(*i as i64);
                });
            }
            Value::FloatVector(v) => {
                h.append_u64(v.len() as u64);
                v.iter().for_each(|f| {
                    h.append_f32(*f);
                });
            }
            Value::Attributes(map) => {
                h.append_u64(map.len() as u64);
                for (key, value) in map.iter() {
                    h.append_str(key);
                    value.hash_into(h);
                }
            }
            Value::Object(object) => object.hash_into(h),
            Value::Image(image) => {
                h.append_hash(image.fingerprint());
            }
        }
    }

    /// Approximate number of bytes held by this value, used for the cache
    /// memory budget.
    pub fn memory_usage(&self) -> usize {
        let heap = match self {
            Value::String(v) => v.len(),
            Value::StringVector(v) => v.iter().map(|s| s.len() + size_of::<String>()).sum(),
            Value::IntVector(v) => v.len() * size_of::<i32>(),
            Value::FloatVector(v) => v.len() * size_of::<f32>(),
            Value::Attributes(map) => map
                .iter()
                .map(|(key, value)| key.len() + value.memory_usage())
                .sum(),
            Value::Object(object) => object.memory_usage(),
            Value::Image(image) => image.memory_usage(),
            _ => 0,
        };

        size_of::<Value>() + heap
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_v2f(&self) -> Option<V2f> {
        match self {
            Value::V2f(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_v2i(&self) -> Option<V2i> {
        match self {
            Value::V2i(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_box2i(&self) -> Option<Box2i> {
        match self {
            Value::Box2i(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_color4f(&self) -> Option<Color4f> {
        match self {
            Value::Color4f(v) => Some(*v),
            _ => None,
        }
    }
}

/// Typed extraction of a [`Value`], used by the typed getters on the
/// evaluator.
pub trait FromValue: Sized {
    const TYPE: ValueType;

    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }

            impl FromValue for $ty {
                const TYPE: ValueType = ValueType::$variant;

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_value_conversions!(
    Bool => bool,
    Int => i64,
    Float => f32,
    String => Arc<str>,
    V2f => V2f,
    V2i => V2i,
    Box2i => Box2i,
    Box3f => Box3f,
    M44f => M44f,
    Color4f => Color4f,
    StringVector => Arc<Vec<String>>,
    IntVector => Arc<Vec<i32>>,
    FloatVector => Arc<Vec<f32>>,
    Attributes => Arc<BTreeMap<String, Value>>,
    Object => Arc<Object>,
    Image => Arc<ImageBuffer>,
);

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::StringVector(Arc::new(value))
    }
}

impl From<Vec<f32>> for Value {
    fn from(value: Vec<f32>) -> Self {
        Value::FloatVector(Arc::new(value))
    }
}

impl From<Vec<i32>> for Value {
    fn from(value: Vec<i32>) -> Self {
        Value::IntVector(Arc::new(value))
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(Arc::new(value))
    }
}

impl From<ImageBuffer> for Value {
    fn from(value: ImageBuffer) -> Self {
        Value::Image(Arc::new(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::V2f(v) => write!(f, "({}, {})", v.x, v.y),
            Value::V2i(v) => write!(f, "({}, {})", v.x, v.y),
            Value::Box2i(b) => write!(
                f,
                "(({}, {}), ({}, {}))",
                b.min.x, b.min.y, b.max.x, b.max.y
            ),
            Value::StringVector(v) => {
                // Scene paths are the most common string vectors in contexts.
                write!(f, "/{}", v.join("/"))
            }
            other => write!(f, "<{}>", other.value_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(value: &Value) -> crate::core::Hash32 {
        let mut h = Blake3Hasher::new();
        value.hash_into(&mut h);
        h.finish_hash()
    }

    #[test]
    fn test_split_assemble() {
        let value = Value::Box2i(Box2i::new(V2i::new(1, 2), V2i::new(3, 4)));
        let parts = value.split().unwrap();
        assert_eq!(parts, vec![Value::V2i(V2i::new(1, 2)), Value::V2i(V2i::new(3, 4))]);
        assert_eq!(Value::assemble(ValueType::Box2i, parts), Some(value));
    }

    #[test]
    fn test_accepts() {
        assert!(ValueType::Float.accepts(ValueType::Int));
        assert!(ValueType::V2f.accepts(ValueType::V2i));
        assert!(!ValueType::String.accepts(ValueType::Float));
        assert!(!ValueType::Object.accepts(ValueType::Image));
    }

    #[test]
    fn test_convert() {
        assert_eq!(Value::Int(3).convert(ValueType::Float), Some(Value::Float(3.0)));
        assert_eq!(Value::Float(0.0).convert(ValueType::Bool), Some(Value::Bool(false)));
        assert_eq!(Value::from("x").convert(ValueType::Int), None);
    }

    #[test]
    fn test_hash_distinguishes_types() {
        assert_ne!(digest(&Value::Int(1)), digest(&Value::Float(1.0)));
        assert_ne!(digest(&Value::Int(0)), digest(&Value::Bool(false)));
        assert_eq!(digest(&Value::from("uv")), digest(&Value::from("uv")));
    }

    #[test]
    fn test_hash_object_content() {
        let a = Object::Primitive(Primitive::new().with_variable(
            "uv",
            PrimitiveVariable::new(
                Interpolation::FaceVarying,
                VariableData::V2f(vec![V2f::new(0.1, 0.1)]),
            ),
        ));
        let mut b = a.clone();
        assert_eq!(digest(&Value::from(a.clone())), digest(&Value::from(b.clone())));

        if let Object::Primitive(p) = &mut b {
            p.variable_mut("uv").unwrap().data = VariableData::V2f(vec![V2f::new(0.2, 0.1)]);
        }
        assert_ne!(digest(&Value::from(a)), digest(&Value::from(b)));
    }

    #[test]
    fn test_box_intersection() {
        let a = Box2i::from_size(10, 10);
        let b = Box2i::new(V2i::new(5, 5), V2i::new(20, 20));
        assert_eq!(a.intersection(&b), Box2i::new(V2i::new(5, 5), V2i::new(10, 10)));

        let c = Box2i::new(V2i::new(30, 30), V2i::new(40, 40));
        assert!(a.intersection(&c).is_empty());
    }
}
