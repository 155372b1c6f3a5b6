//! The evaluation service.
//!
//! An [`Engine`] owns a [`NodeGraph`] behind a read-mostly lock together
//! with the caches used to evaluate it. Evaluations take the read side for
//! their whole duration, so any number of them run concurrently; topology
//! edits take the write side and are therefore serialised against every
//! evaluation in flight. Dirty notifications go out after the write lock is
//! released.

mod diagnostics;
mod eval;
mod signal;

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

pub use crate::engine::eval::Evaluator;
pub use crate::engine::signal::SubscriptionId;

use crate::cache::{CacheStats, HashCache, HashCacheStats, ValueCache};
use crate::config::EngineConfig;
use crate::context::{Canceller, Context};
use crate::core::Hash32;
use crate::engine::diagnostics::Mermaid;
use crate::engine::signal::DirtySignal;
use crate::error::{EvalResult, GraphError, GraphResult};
use crate::graph::{NodeBuilder, NodeGraph, NodeHandle, NodeId, PlugId};
use crate::node::ComputeNode;
use crate::value::{FromValue, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub values: CacheStats,
    pub hashes: HashCacheStats,
}

pub struct Engine {
    graph: RwLock<NodeGraph>,
    values: Arc<ValueCache>,
    hashes: HashCache,
    signal: DirtySignal,
    config: EngineConfig,
}

impl Engine {
    /// An engine with a private value cache sized by `config`.
    pub fn new(config: EngineConfig) -> Self {
        let values = Arc::new(ValueCache::new(config.memory_limit));
        Self::with_cache(config, values)
    }

    /// An engine sharing `values` with other engines. The budget of the
    /// shared cache is left as it is.
    pub fn with_cache(config: EngineConfig, values: Arc<ValueCache>) -> Self {
        Self {
            graph: RwLock::new(NodeGraph::new()),
            hashes: HashCache::new(config.hash_cache_entries),
            values,
            signal: DirtySignal::default(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn value_cache(&self) -> &Arc<ValueCache> {
        &self.values
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            values: self.values.stats(),
            hashes: self.hashes.stats(),
        }
    }

    /// Drops every cached value and hash. Results are unaffected, only
    /// recomputed.
    pub fn clear_caches(&self) {
        self.values.clear();
        self.hashes.clear();
    }

    // ******************************
    // *          Topology          *
    // ******************************

    fn mutate<R>(
        &self,
        op: &'static str,
        edit: impl FnOnce(&mut NodeGraph) -> GraphResult<(R, Vec<PlugId>)>,
    ) -> GraphResult<R> {
        let (result, dirtied) = {
            let mut graph = self.graph.write();
            edit(&mut *graph)?
        };

        if !dirtied.is_empty() {
            tracing::debug!(op, plugs = dirtied.len(), "plugs dirtied");
            self.signal.emit(&dirtied);
        }

        Ok(result)
    }

    /// Constructs a node named `name` (made unique among its siblings).
    ///
    /// ```
    /// use plugwork::{Engine, EngineConfig, V2f};
    /// use plugwork::scene::MapOffset;
    ///
    /// let engine = Engine::new(EngineConfig::default());
    /// let offset = engine.add_node("offset", MapOffset::new).unwrap();
    /// engine.set_value(offset.offset_plug(), V2f::new(0.5, 0.0)).unwrap();
    /// ```
    pub fn add_node<N, F>(&self, name: &str, ctor: F) -> GraphResult<NodeHandle<N>>
    where
        N: ComputeNode,
        F: FnOnce(&mut NodeBuilder<'_>) -> GraphResult<N>,
    {
        self.mutate("add_node", |graph| Ok((graph.build_node(name, None, ctor)?, Vec::new())))
    }

    pub fn remove_node(&self, node: NodeId) -> GraphResult<()> {
        self.mutate("remove_node", |graph| Ok(((), graph.remove_node(node)?)))
    }

    /// Makes `source` the input of `destination`. Fails without touching the
    /// graph if the types are incompatible or the connection would close a
    /// cycle.
    pub fn connect(&self, source: PlugId, destination: PlugId) -> GraphResult<()> {
        self.mutate("connect", |graph| Ok(((), graph.connect(source, destination)?)))
    }

    pub fn disconnect(&self, destination: PlugId) -> GraphResult<()> {
        self.mutate("disconnect", |graph| Ok(((), graph.disconnect(destination)?)))
    }

    /// Sets the value of an unconnected input. Setting the current value
    /// again dirties nothing.
    pub fn set_value(&self, plug: PlugId, value: impl Into<Value>) -> GraphResult<()> {
        let value = value.into();
        self.mutate("set_value", |graph| Ok(((), graph.set_value(plug, value)?)))
    }

    pub fn can_promote(&self, plug: PlugId) -> bool {
        self.read().can_promote(plug)
    }

    pub fn is_promoted(&self, plug: PlugId) -> bool {
        self.read().is_promoted(plug)
    }

    /// Exposes a plug of an internal node on its owner, returning the new
    /// plug. `name` defaults to the plug's own name.
    pub fn promote(&self, plug: PlugId, name: Option<&str>) -> GraphResult<PlugId> {
        self.mutate("promote", |graph| graph.promote(plug, name))
    }

    pub fn unpromote(&self, plug: PlugId) -> GraphResult<()> {
        self.mutate("unpromote", |graph| Ok(((), graph.unpromote(plug)?)))
    }

    /// Shared access to the topology. Blocks while an edit is in progress.
    pub fn read(&self) -> RwLockReadGuard<'_, NodeGraph> {
        self.graph.read()
    }

    /// Like [`Engine::read`], but fails instead of blocking.
    pub fn try_read(&self) -> GraphResult<RwLockReadGuard<'_, NodeGraph>> {
        self.graph
            .try_read()
            .ok_or_else(|| GraphError::StaleGraph("the graph is being edited".into()))
    }

    pub fn render_mermaid(&self) -> String {
        Mermaid(&self.read()).to_string()
    }

    // ******************************
    // *         Evaluation         *
    // ******************************

    /// Runs `f` with an evaluator for `context`. The topology cannot change
    /// until `f` returns.
    pub fn evaluate<R>(&self, context: &Context, f: impl FnOnce(&Evaluator<'_>) -> R) -> R {
        self.evaluate_with(context, &Canceller::new(), f)
    }

    pub fn evaluate_with<R>(
        &self,
        context: &Context,
        canceller: &Canceller,
        f: impl FnOnce(&Evaluator<'_>) -> R,
    ) -> R {
        let graph = self.graph.read();
        let ev = Evaluator::new(&graph, &self.values, &self.hashes, context.clone(), canceller);
        f(&ev)
    }

    pub fn get_value(&self, plug: PlugId, context: &Context) -> EvalResult<Value> {
        self.evaluate(context, |ev| ev.get(plug))
    }

    /// [`Engine::get_value`] that gives up with `EvalError::Cancelled` once
    /// `canceller` fires.
    pub fn get_value_with(
        &self,
        plug: PlugId,
        context: &Context,
        canceller: &Canceller,
    ) -> EvalResult<Value> {
        self.evaluate_with(context, canceller, |ev| ev.get(plug))
    }

    pub fn get_as<T: FromValue>(&self, plug: PlugId, context: &Context) -> EvalResult<T> {
        self.evaluate(context, |ev| ev.get_as(plug))
    }

    pub fn hash(&self, plug: PlugId, context: &Context) -> EvalResult<Hash32> {
        self.evaluate(context, |ev| ev.hash(plug))
    }

    // ******************************
    // *           Signal           *
    // ******************************

    /// Registers `callback` to be told about every plug whose value goes
    /// stale. Callbacks run on the editing thread after the edit completes.
    pub fn on_plug_dirtied(
        &self,
        callback: impl Fn(PlugId) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.signal.subscribe(Arc::new(callback))
    }

    pub fn disconnect_signal(&self, id: SubscriptionId) -> bool {
        self.signal.unsubscribe(id)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
