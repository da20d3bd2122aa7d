//! Component and manager traits.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::SimResult;

use super::builder::Builder;

/// A unit of simulation behaviour.
///
/// Components wire themselves into the kernel during `setup` through the
/// [`Builder`]: they declare pipelines, register listeners, request population
/// views and so on. Setup may return further components, which are set up
/// after every component already queued.
pub trait Component: Send + Sync {
    /// Name used for configuration provenance and diagnostics.
    fn name(&self) -> &str;

    /// Defaults merged into the `ComponentConfigs` layer before `setup` runs.
    fn configuration_defaults(&self) -> Option<JsonValue> {
        None
    }

    /// Wires the component into the kernel.
    ///
    /// # Errors
    ///
    /// Any error aborts the simulation setup.
    fn setup(self: Arc<Self>, _builder: &Builder) -> SimResult<Vec<Arc<dyn Component>>> {
        Ok(Vec::new())
    }
}

/// A kernel subsystem that completes its wiring once setup has resolved
/// every component.
pub trait Manager: Component {
    /// Called once after the setup work queue is exhausted.
    ///
    /// # Errors
    ///
    /// Any error aborts the simulation setup.
    fn finalize(&self, components: &[Arc<dyn Component>]) -> SimResult<()>;
}

/// Identity of a component instance: the address of its allocation.
pub(crate) fn component_id(component: &Arc<dyn Component>) -> usize {
    Arc::as_ptr(component).cast::<()>() as usize
}

type SetupFn = dyn Fn(&Builder) -> SimResult<Vec<Arc<dyn Component>>> + Send + Sync;

/// A component defined by a setup closure.
pub struct FnComponent {
    name: String,
    defaults: Option<JsonValue>,
    setup: Box<SetupFn>,
}

impl FnComponent {
    pub fn new(
        name: impl Into<String>,
        setup: impl Fn(&Builder) -> SimResult<Vec<Arc<dyn Component>>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            defaults: None,
            setup: Box::new(setup),
        }
    }

    /// Attaches configuration defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: JsonValue) -> Self {
        self.defaults = Some(defaults);
        self
    }
}

impl Component for FnComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn configuration_defaults(&self) -> Option<JsonValue> {
        self.defaults.clone()
    }

    fn setup(self: Arc<Self>, builder: &Builder) -> SimResult<Vec<Arc<dyn Component>>> {
        (self.setup)(builder)
    }
}

impl fmt::Debug for FnComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComponent")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Wraps a setup closure as a shareable component.
pub fn from_fn(
    name: impl Into<String>,
    setup: impl Fn(&Builder) -> SimResult<Vec<Arc<dyn Component>>> + Send + Sync + 'static,
) -> Arc<dyn Component> {
    Arc::new(FnComponent::new(name, setup))
}
