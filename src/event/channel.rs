//! Named channels and their emitters.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::error::{lock_err, SimError, SimResult};

use super::{Event, Listener, ListenerDescription};

pub(crate) type Registry = Arc<RwLock<BTreeMap<String, EventChannel>>>;

#[derive(Clone)]
struct Entry {
    priority: u8,
    seq: u64,
    listener: Listener,
}

/// Listeners of one channel, kept sorted by `(priority, registration sequence)`.
#[derive(Clone, Default)]
pub(crate) struct EventChannel {
    entries: Vec<Entry>,
}

impl EventChannel {
    pub(crate) fn insert(&mut self, listener: Listener, priority: u8, seq: u64) {
        let pos = self
            .entries
            .partition_point(|e| (e.priority, e.seq) <= (priority, seq));
        self.entries.insert(
            pos,
            Entry {
                priority,
                seq,
                listener,
            },
        );
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.entries.iter().map(|e| e.listener.clone()).collect()
    }

    pub(crate) fn describe(&self) -> Vec<ListenerDescription> {
        self.entries
            .iter()
            .map(|e| ListenerDescription {
                name: e.listener.name().to_string(),
                priority: e.priority,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Emits events on one channel.
///
/// Cloning an emitter is cheap; all clones share the channel registry, so
/// listeners registered after the emitter was created still receive events.
#[derive(Clone)]
pub struct Emitter {
    channel: String,
    registry: Registry,
}

impl Emitter {
    pub(crate) fn new(channel: String, registry: Registry) -> Self {
        Self { channel, registry }
    }

    /// The channel this emitter publishes to.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Invokes every listener of the channel in order.
    ///
    /// The listener list is snapshotted before the first call, so listeners
    /// may register listeners or emit other channels. A listener registered
    /// during an emission runs from the next emission on.
    ///
    /// # Errors
    ///
    /// The first listener error stops the emission and is returned wrapped
    /// in `SimError::Listener`.
    pub fn emit(&self, event: &Event) -> SimResult<()> {
        let listeners = {
            let registry = self.registry.read().map_err(|_| lock_err("event registry"))?;
            registry
                .get(&self.channel)
                .map(EventChannel::snapshot)
                .unwrap_or_default()
        };
        debug!(
            channel = %self.channel,
            listeners = listeners.len(),
            simulants = event.index.len(),
            "emitting"
        );
        for listener in listeners {
            trace!(channel = %self.channel, listener = listener.name(), "invoking listener");
            listener.call(event).map_err(|source| SimError::Listener {
                channel: self.channel.clone(),
                listener: listener.name().to_string(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Listener {
        Listener::new(name, |_| Ok(()))
    }

    #[test]
    fn insert_orders_by_priority_then_sequence() {
        let mut channel = EventChannel::default();
        channel.insert(noop("late_default"), 5, 2);
        channel.insert(noop("early"), 0, 3);
        channel.insert(noop("first_default"), 5, 1);
        channel.insert(noop("last"), 9, 0);

        let names: Vec<String> = channel.describe().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["early", "first_default", "late_default", "last"]);
        assert_eq!(channel.len(), 4);
    }
}
