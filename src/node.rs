use crate::core::Hash32;
use crate::engine::Evaluator;
use crate::graph::{PlugId, PlugRef};
use crate::value::Value;

/// How computed values of an output are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Stored in the shared value cache, computed at most once per hash.
    #[default]
    Cached,
    /// Recomputed on every request. Meant for outputs that only repackage
    /// an already cached value.
    Uncached,
}

/// The behaviour of a node type.
///
/// A node declares its plugs while being constructed through a
/// [`NodeBuilder`](crate::graph::NodeBuilder) and keeps their ids; the graph
/// calls back into these hooks during dirty propagation and evaluation.
///
/// `hash` must capture everything `compute` reads: the hashes of the
/// upstream plugs it consumes, the context variables it depends on and any
/// node-local settings. Start from [`Evaluator::seeded_hasher`], which folds
/// in the node type and the output name. Returning an upstream plug's hash
/// unchanged declares the output identical to that plug, and `compute` must
/// then return the upstream value.
///
/// Both hooks may run concurrently on many threads. Errors propagate as
/// `anyhow::Error`; evaluation failures from upstream keep their original
/// attribution when passed on with `?`.
pub trait ComputeNode: Send + Sync + 'static {
    fn type_name(&self) -> &'static str;

    /// Appends the outputs of this node whose value depends on `plug`.
    /// Called for every plug of the node, inputs and outputs alike.
    fn affects(&self, plug: &PlugRef<'_>, outputs: &mut Vec<PlugId>);

    fn hash(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Hash32>;

    fn compute(&self, output: PlugId, ev: &Evaluator<'_>) -> anyhow::Result<Value>;

    fn cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::Cached
    }
}
