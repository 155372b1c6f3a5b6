#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod cache;
pub mod config;
pub mod context;
mod core;
pub mod engine;
mod error;
pub mod graph;
pub mod image;
#[cfg(feature = "logging")]
pub mod logging;
mod node;
pub mod scene;
pub mod value;

pub use crate::cache::{CacheStats, HashCacheStats, ValueCache};
pub use crate::config::EngineConfig;
pub use crate::context::{Canceller, Context};
pub use crate::core::{Blake3Hasher, Hash32};
pub use crate::engine::{Engine, EngineStats, Evaluator, SubscriptionId};
pub use crate::error::*;
pub use crate::graph::{Direction, NodeBuilder, NodeGraph, NodeHandle, NodeId, PlugId, PlugRef};
pub use crate::node::{CachePolicy, ComputeNode};
pub use crate::value::{Box2i, Box3f, Color4f, FromValue, M44f, Object, V2f, V2i, Value, ValueType};
