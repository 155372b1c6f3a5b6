use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::graph::PlugId;

/// Identifies a callback registered with `Engine::on_plug_dirtied`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(PlugId) + Send + Sync>;

/// Fan-out of "this plug's value is stale" notifications.
#[derive(Default)]
pub(crate) struct DirtySignal {
    next: AtomicU64,
    slots: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl DirtySignal {
    pub fn subscribe(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    /// Calls every subscriber once per plug. Subscribers run without any
    /// lock held and may query the engine.
    pub fn emit(&self, plugs: &[PlugId]) {
        let slots: Vec<Callback> = self.slots.lock().iter().map(|(_, f)| f.clone()).collect();
        for plug in plugs {
            for callback in &slots {
                callback(*plug);
            }
        }
    }
}
