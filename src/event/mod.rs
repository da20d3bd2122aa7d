//! Event channels.
//!
//! Components communicate through named channels. A channel exists as soon as
//! anyone asks for its emitter or registers a listener on it. Emitting calls
//! every listener in ascending priority (0 runs first), breaking ties by
//! registration order. Listener errors are not isolated: the first failure
//! aborts the emission and propagates to the emitter's caller.

mod channel;

pub use channel::Emitter;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::engine::{Component, Manager};
use crate::error::{lock_err, ConfigurationError, SimResult};
use crate::population::SimulantId;

use channel::{EventChannel, Registry};

/// Priority used when a component does not specify one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Largest accepted listener priority.
pub const MAX_PRIORITY: u8 = 9;

/// Payload passed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Simulants affected by the event.
    pub index: Vec<SimulantId>,
    /// Clock time at emission.
    pub time: DateTime<Utc>,
    /// Current step size.
    pub step: Duration,
    /// Free-form data, e.g. the population configuration on creation events.
    pub user_data: JsonValue,
}

impl Event {
    #[must_use]
    pub fn new(index: Vec<SimulantId>, time: DateTime<Utc>, step: Duration) -> Self {
        Self {
            index,
            time,
            step,
            user_data: JsonValue::Null,
        }
    }

    #[must_use]
    pub fn with_user_data(mut self, user_data: JsonValue) -> Self {
        self.user_data = user_data;
        self
    }
}

type ListenerFn = dyn Fn(&Event) -> SimResult<()> + Send + Sync;

/// A named callback.
#[derive(Clone)]
pub struct Listener {
    name: Arc<str>,
    f: Arc<ListenerFn>,
}

impl Listener {
    /// Wraps `f` under a name used in error messages and `list_events`.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&Event) -> SimResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            f: Arc::new(f),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the callback.
    ///
    /// # Errors
    ///
    /// Whatever the callback returns.
    pub fn call(&self, event: &Event) -> SimResult<()> {
        (self.f)(event)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("name", &self.name).finish()
    }
}

/// Introspection record for one registered listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerDescription {
    pub name: String,
    pub priority: u8,
}

struct PendingListener {
    channel: String,
    listener: Listener,
    priority: u8,
    seq: u64,
}

/// Owns every channel.
#[derive(Default)]
pub struct EventManager {
    registry: Registry,
    seq: AtomicU64,
    pending: Mutex<Vec<PendingListener>>,
    finalized: AtomicBool,
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_priority(priority: u8) -> Result<(), ConfigurationError> {
        if priority > MAX_PRIORITY {
            return Err(ConfigurationError::PriorityOutOfRange {
                priority,
                max: MAX_PRIORITY,
            });
        }
        Ok(())
    }

    /// An emitter for `channel`, creating the channel if needed.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn get_emitter(&self, channel: &str) -> SimResult<Emitter> {
        let mut registry = self.registry.write().map_err(|_| lock_err("event registry"))?;
        registry.entry(channel.to_string()).or_default();
        Ok(Emitter::new(channel.to_string(), Arc::clone(&self.registry)))
    }

    /// Registers `listener` on `channel` immediately.
    ///
    /// # Errors
    ///
    /// `PriorityOutOfRange` for a priority above [`MAX_PRIORITY`].
    pub fn register_listener(&self, channel: &str, listener: Listener, priority: u8) -> SimResult<()> {
        Self::check_priority(priority)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.write().map_err(|_| lock_err("event registry"))?;
        registry
            .entry(channel.to_string())
            .or_default()
            .insert(listener, priority, seq);
        Ok(())
    }

    /// Queues a registration to be bound when the manager is finalized.
    ///
    /// The registration order is fixed now, so deferred and immediate
    /// registrations interleave by call order.
    pub(crate) fn defer_listener(&self, channel: &str, listener: Listener, priority: u8) -> SimResult<()> {
        if self.finalized.load(Ordering::Acquire) {
            return self.register_listener(channel, listener, priority);
        }
        Self::check_priority(priority)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().map_err(|_| lock_err("pending listeners"))?;
        pending.push(PendingListener {
            channel: channel.to_string(),
            listener,
            priority,
            seq,
        });
        Ok(())
    }

    /// Emits `event` on `channel`.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit`].
    pub fn emit(&self, channel: &str, event: &Event) -> SimResult<()> {
        self.get_emitter(channel)?.emit(event)
    }

    /// Every channel with its listeners in invocation order.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn list_events(&self) -> SimResult<BTreeMap<String, Vec<ListenerDescription>>> {
        let registry = self.registry.read().map_err(|_| lock_err("event registry"))?;
        Ok(registry
            .iter()
            .map(|(name, channel)| (name.clone(), channel.describe()))
            .collect())
    }

    fn bind_pending(&self) -> SimResult<usize> {
        let pending = {
            let mut pending = self.pending.lock().map_err(|_| lock_err("pending listeners"))?;
            std::mem::take(&mut *pending)
        };
        let bound = pending.len();
        let mut registry = self.registry.write().map_err(|_| lock_err("event registry"))?;
        for p in pending {
            registry
                .entry(p.channel)
                .or_default()
                .insert(p.listener, p.priority, p.seq);
        }
        Ok(bound)
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self.registry.read().map(|r| r.len()).unwrap_or_default();
        f.debug_struct("EventManager")
            .field("channels", &channels)
            .finish_non_exhaustive()
    }
}

impl Component for EventManager {
    fn name(&self) -> &str {
        "event_manager"
    }
}

impl Manager for EventManager {
    fn finalize(&self, _components: &[Arc<dyn Component>]) -> SimResult<()> {
        let bound = self.bind_pending()?;
        self.finalized.store(true, Ordering::Release);
        let registry = self.registry.read().map_err(|_| lock_err("event registry"))?;
        let listeners: usize = registry.values().map(EventChannel::len).sum();
        debug!(bound, channels = registry.len(), listeners, "event manager finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, SimError};

    fn event() -> Event {
        Event::new(vec![SimulantId::new(0)], DateTime::UNIX_EPOCH, Duration::days(1))
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Listener {
        let log = Arc::clone(log);
        let label = name.to_string();
        Listener::new(name, move |_| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn test_priority_then_registration_order() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        events.register_listener("time_step", recorder(&log, "b"), 5).unwrap();
        events.register_listener("time_step", recorder(&log, "a"), 1).unwrap();
        events.register_listener("time_step", recorder(&log, "c"), 5).unwrap();

        events.emit("time_step", &event()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);

        let listed: Vec<String> = events.list_events().unwrap()["time_step"]
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(listed, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_double_registration_invokes_twice() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "twice");
        events.register_listener("x", listener.clone(), DEFAULT_PRIORITY).unwrap();
        events.register_listener("x", listener, DEFAULT_PRIORITY).unwrap();
        events.emit("x", &event()).unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failure_stops_later_listeners() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        events
            .register_listener(
                "x",
                Listener::new("broken", |_| {
                    Err(PipelineError::NoSource {
                        name: "cost".to_string(),
                    }
                    .into())
                }),
                1,
            )
            .unwrap();
        events.register_listener("x", recorder(&log, "after"), 2).unwrap();

        let err = events.emit("x", &event()).unwrap_err();
        match &err {
            SimError::Listener { channel, listener, .. } => {
                assert_eq!(channel, "x");
                assert_eq!(listener, "broken");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_priority_out_of_range() {
        let events = EventManager::new();
        let err = events
            .register_listener("x", Listener::new("l", |_| Ok(())), 10)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_deferred_listeners_bind_on_finalize() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        events.defer_listener("x", recorder(&log, "deferred"), 5).unwrap();
        events.register_listener("x", recorder(&log, "immediate"), 5).unwrap();

        events.emit("x", &event()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["immediate"]);

        events.finalize(&[]).unwrap();
        log.lock().unwrap().clear();
        events.emit("x", &event()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["deferred", "immediate"]);

        events.defer_listener("x", recorder(&log, "after_setup"), 0).unwrap();
        log.lock().unwrap().clear();
        events.emit("x", &event()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["after_setup", "deferred", "immediate"]);
    }

    #[test]
    fn test_listener_may_register_during_emission() {
        let events = Arc::new(EventManager::new());
        let inner = Arc::clone(&events);
        events
            .register_listener(
                "x",
                Listener::new("registrar", move |_| {
                    inner.register_listener("y", Listener::new("late", |_| Ok(())), 5)
                }),
                5,
            )
            .unwrap();
        events.emit("x", &event()).unwrap();
        assert_eq!(events.list_events().unwrap()["y"].len(), 1);
    }
}
