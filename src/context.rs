//! Evaluation contexts.
//!
//! A [`Context`] is an immutable snapshot of named variables (frame, scene
//! path, tile origin, ...) that scopes what "the value of a plug" means.
//! Contexts are never shared mutably: deriving a context for a sub-evaluation
//! produces a new snapshot and leaves the parent untouched, so contexts can
//! be handed across threads freely.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{Blake3Hasher, Hash32};
use crate::value::Value;

/// Name of the standard frame variable.
pub const FRAME: &str = "frame";

#[derive(Clone)]
pub struct Context {
    entries: Arc<BTreeMap<Arc<str>, Value>>,
    fingerprint: Hash32,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::from_entries(BTreeMap::new())
    }

    fn from_entries(entries: BTreeMap<Arc<str>, Value>) -> Self {
        let mut h = Blake3Hasher::new();
        h.append_u64(entries.len() as u64);
        for (name, value) in &entries {
            h.append_str(name);
            value.hash_into(&mut h);
        }

        Self {
            entries: Arc::new(entries),
            fingerprint: h.finish_hash(),
        }
    }

    /// A derived context with `name` set to `value`.
    pub fn with(&self, name: &str, value: impl Into<Value>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(Arc::from(name), value.into());
        Self::from_entries(entries)
    }

    /// A derived context without `name`. Returns a cheap clone when the
    /// variable is not set.
    pub fn without(&self, name: &str) -> Self {
        if !self.entries.contains_key(name) {
            return self.clone();
        }

        let mut entries = (*self.entries).clone();
        entries.remove(name);
        Self::from_entries(entries)
    }

    pub fn with_frame(&self, frame: f32) -> Self {
        self.with(FRAME, frame)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn frame(&self) -> f32 {
        self.get(FRAME).and_then(Value::as_float).unwrap_or(1.0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|name| &**name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value-equality fingerprint of all entries.
    pub fn fingerprint(&self) -> Hash32 {
        self.fingerprint
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.entries == other.entries
    }
}

impl std::hash::Hash for Context {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (&**k, v)))
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

/// Cooperative cancellation flag for long evaluations.
///
/// Clones share the flag. Nodes that loop over large regions poll it between
/// iteration steps through `Evaluator::check_cancellation`.
#[derive(Clone, Default, Debug)]
pub struct Canceller(Arc<AtomicBool>);

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality() {
        let a = Context::new().with("frame", 2.0f32).with("name", "a");
        let b = Context::new().with("name", "a").with("frame", 2.0f32);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_derived_context_leaves_parent() {
        let parent = Context::new().with_frame(1.0);
        let child = parent.with_frame(5.0);
        assert_eq!(parent.frame(), 1.0);
        assert_eq!(child.frame(), 5.0);
        assert_ne!(parent.fingerprint(), child.fingerprint());
    }

    #[test]
    fn test_without() {
        let ctx = Context::new().with("a", 1).with("b", 2);
        let removed = ctx.without("a");
        assert!(!removed.contains("a"));
        assert_eq!(removed, Context::new().with("b", 2));
        assert_eq!(ctx.without("missing"), ctx);
    }

    #[test]
    fn test_display() {
        let ctx = Context::new().with("frame", 1.0f32);
        assert_eq!(ctx.to_string(), "{frame: 1}");
    }

    #[test]
    fn test_canceller_is_shared() {
        let a = Canceller::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }
}
