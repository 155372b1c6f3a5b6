use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::Level;

use crate::cache::{CacheKey, HashCache, ValueCache};
use crate::context::{Canceller, Context};
use crate::core::{Blake3Hasher, Hash32};
use crate::error::{ComputeError, EvalError, EvalResult, GraphError};
use crate::graph::{Direction, NodeGraph, PlugId};
use crate::node::CachePolicy;
use crate::value::{FromValue, Value, ValueType};

/// A read-only view of the graph under one context.
///
/// Node hooks receive an evaluator and use it to pull upstream values and
/// hashes. The context travels explicitly: deriving a new one for a
/// sub-evaluation goes through [`Evaluator::with_context`].
pub struct Evaluator<'a> {
    graph: &'a NodeGraph,
    values: &'a ValueCache,
    hashes: &'a HashCache,
    context: Context,
    canceller: &'a Canceller,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        graph: &'a NodeGraph,
        values: &'a ValueCache,
        hashes: &'a HashCache,
        context: Context,
        canceller: &'a Canceller,
    ) -> Self {
        Self {
            graph,
            values,
            hashes,
            context,
            canceller,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn graph(&self) -> &'a NodeGraph {
        self.graph
    }

    pub fn canceller(&self) -> &'a Canceller {
        self.canceller
    }

    /// An evaluator over the same graph with a different context.
    pub fn with_context(&self, context: Context) -> Evaluator<'a> {
        Evaluator {
            context,
            ..*self
        }
    }

    pub fn check_cancellation(&self) -> EvalResult<()> {
        if self.canceller.is_cancelled() {
            Err(EvalError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The value of `plug` in the current context.
    pub fn get(&self, plug: PlugId) -> EvalResult<Value> {
        self.check_cancellation()?;
        let slot = self.graph.plug(plug)?;

        if let Some(source) = slot.input() {
            let value = self.get(source)?;
            let found = value.value_type();
            return value.convert(slot.value_type()).ok_or_else(|| {
                GraphError::WrongValueType {
                    plug: slot.full_name(),
                    expected: slot.value_type(),
                    found,
                }
                .into()
            });
        }

        if slot.value_type() == ValueType::Compound {
            return Err(GraphError::NoValue(slot.full_name()).into());
        }

        if !slot.children().is_empty() {
            let parts = slot
                .children()
                .iter()
                .map(|child| self.get(*child))
                .collect::<EvalResult<Vec<_>>>()?;
            return Value::assemble(slot.value_type(), parts)
                .ok_or_else(|| GraphError::NoValue(slot.full_name()).into());
        }

        match slot.direction() {
            Direction::In => slot
                .stored_value()
                .cloned()
                .ok_or_else(|| GraphError::NoValue(slot.full_name()).into()),
            Direction::Out => self.compute(plug),
        }
    }

    /// Typed variant of [`Evaluator::get`].
    pub fn get_as<T: FromValue>(&self, plug: PlugId) -> EvalResult<T> {
        let value = self.get(plug)?;
        let found = value.value_type();
        value
            .convert(T::TYPE)
            .and_then(T::from_value)
            .ok_or_else(|| {
                GraphError::WrongValueType {
                    plug: self.graph.full_name(plug),
                    expected: T::TYPE,
                    found,
                }
                .into()
            })
    }

    /// The hash of `plug` in the current context.
    pub fn hash(&self, plug: PlugId) -> EvalResult<Hash32> {
        self.check_cancellation()?;
        let slot = self.graph.plug(plug)?;

        if let Some(source) = slot.input() {
            return self.hash(source);
        }

        if !slot.children().is_empty() {
            let mut h = Blake3Hasher::new();
            h.append_u64(slot.children().len() as u64);
            for child in slot.children() {
                h.append_hash(self.hash(*child)?);
            }
            return Ok(h.finish_hash());
        }

        match slot.direction() {
            Direction::In => {
                let value = slot
                    .stored_value()
                    .ok_or_else(|| GraphError::NoValue(slot.full_name()))?;
                let mut h = Blake3Hasher::new();
                value.hash_into(&mut h);
                Ok(h.finish_hash())
            }
            Direction::Out => {
                if slot.value_type() == ValueType::Compound {
                    return Err(GraphError::NoValue(slot.full_name()).into());
                }

                let context = self.context.fingerprint();
                let dirty = slot.dirty_count();
                if let Some(hash) = self.hashes.get(plug, context, dirty) {
                    return Ok(hash);
                }

                let node = self.graph.compute_node(slot.node())?;
                let hash = guard(|| node.hash(plug, self)).map_err(|err| self.attribute(plug, err))?;
                self.hashes.insert(plug, context, dirty, hash);
                Ok(hash)
            }
        }
    }

    /// A hasher seeded with the type of the node owning `output` and the
    /// name of `output`, so distinct outputs never collide.
    pub fn seeded_hasher(&self, output: PlugId) -> EvalResult<Blake3Hasher> {
        let slot = self.graph.plug(output)?;
        let node = self.graph.compute_node(slot.node())?;

        let mut h = Blake3Hasher::new();
        h.append_str(node.type_name()).append_str(slot.path());
        Ok(h)
    }

    fn compute(&self, plug: PlugId) -> EvalResult<Value> {
        let slot = self.graph.plug(plug)?;
        let node = self.graph.compute_node(slot.node())?;
        let ty = slot.value_type();
        let hash = self.hash(plug)?;

        let run = || {
            let span = tracing::span!(Level::DEBUG, "compute", plug = %slot.full_name(), %hash);
            let _enter = span.enter();

            let value = guard(|| node.compute(plug, self)).map_err(|err| self.attribute(plug, err))?;
            if value.value_type() == ty {
                Ok(value)
            } else {
                Err(self.attribute(
                    plug,
                    anyhow::anyhow!("computed a {} value for a {ty} plug", value.value_type()),
                ))
            }
        };

        match node.cache_policy(plug) {
            CachePolicy::Cached => self.values.get_or_compute(CacheKey { hash, ty }, run),
            CachePolicy::Uncached => run(),
        }
    }

    fn attribute(&self, plug: PlugId, err: anyhow::Error) -> EvalError {
        EvalError::from_hook(err, |err| {
            let node = self
                .graph
                .plug(plug)
                .and_then(|slot| self.graph.node_full_name(slot.node()).map(String::from))
                .unwrap_or_default();
            let plug = self.graph.full_name(plug);

            tracing::warn!(%node, %plug, context = %self.context, "compute failed: {err:#}");
            ComputeError::new(node, plug, self.context.to_string(), err)
        })
    }
}

/// Runs a node hook, turning a panic into an error.
fn guard<T>(hook: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("node panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("node panicked: {s}")
            } else {
                String::from("node panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    }
}
