//! Named component registry.
//!
//! Components are a closed set of roles chosen at registration time, so the
//! coordinator dispatches on the variant instead of inspecting types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::AnalysisExecutor;
use crate::coordinator::probe::ComponentProbe;
use crate::imaging::Preprocessor;
use crate::model::ModelManager;

pub const RESOURCE_MANAGER_KEY: &str = "resourceManager";
pub const PREPROCESSOR_KEY: &str = "imagePreprocessor";
pub const EXECUTOR_KEY: &str = "analysisExecutor";

/// Keys that must be bound, with the role each must have.
pub const REQUIRED_COMPONENTS: [(&str, ComponentRole); 3] = [
    (RESOURCE_MANAGER_KEY, ComponentRole::ResourceManager),
    (PREPROCESSOR_KEY, ComponentRole::Preprocessor),
    (EXECUTOR_KEY, ComponentRole::Executor),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    ResourceManager,
    Preprocessor,
    Executor,
    Auxiliary,
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentRole::ResourceManager => "resource_manager",
            ComponentRole::Preprocessor => "preprocessor",
            ComponentRole::Executor => "executor",
            ComponentRole::Auxiliary => "auxiliary",
        };
        f.write_str(s)
    }
}

/// A registered component.
#[derive(Clone)]
pub enum Component {
    ResourceManager(Arc<ModelManager>),
    Preprocessor(Arc<dyn Preprocessor>),
    Executor(Arc<AnalysisExecutor>),
    /// Anything else worth reporting on, e.g. a front-end adapter.
    Auxiliary(Arc<dyn ComponentProbe>),
}

impl Component {
    pub fn role(&self) -> ComponentRole {
        match self {
            Component::ResourceManager(_) => ComponentRole::ResourceManager,
            Component::Preprocessor(_) => ComponentRole::Preprocessor,
            Component::Executor(_) => ComponentRole::Executor,
            Component::Auxiliary(_) => ComponentRole::Auxiliary,
        }
    }

    /// Health probes, when the role has any.
    pub fn probe(&self) -> Option<&dyn ComponentProbe> {
        match self {
            Component::ResourceManager(manager) => Some(manager.as_ref()),
            Component::Executor(executor) => Some(executor.as_ref()),
            Component::Auxiliary(probe) => Some(probe.as_ref()),
            Component::Preprocessor(_) => None,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.role()).finish()
    }
}

/// Maps keys to components. Re-registering a key replaces the binding.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    components: RwLock<BTreeMap<String, Component>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Component>> {
        self.components.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Component>> {
        self.components.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `component` under `key`, returning the previous binding.
    pub fn register(&self, key: impl Into<String>, component: Component) -> Option<Component> {
        let key = key.into();
        debug!(key = %key, role = %component.role(), "registering component");
        self.write().insert(key, component)
    }

    pub fn unregister(&self, key: &str) -> Option<Component> {
        self.write().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Component> {
        self.read().get(key).cloned()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of every binding, sorted by key.
    pub fn entries(&self) -> Vec<(String, Component)> {
        self.read()
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn resource_manager(&self) -> Option<Arc<ModelManager>> {
        match self.get(RESOURCE_MANAGER_KEY)? {
            Component::ResourceManager(manager) => Some(manager),
            _ => None,
        }
    }

    pub fn preprocessor(&self) -> Option<Arc<dyn Preprocessor>> {
        match self.get(PREPROCESSOR_KEY)? {
            Component::Preprocessor(preprocessor) => Some(preprocessor),
            _ => None,
        }
    }

    pub fn executor(&self) -> Option<Arc<AnalysisExecutor>> {
        match self.get(EXECUTOR_KEY)? {
            Component::Executor(executor) => Some(executor),
            _ => None,
        }
    }

    /// Required keys that are unbound or bound to a component of the wrong role.
    pub fn missing_required(&self) -> Vec<String> {
        let components = self.read();
        REQUIRED_COMPONENTS
            .iter()
            .filter(|(key, role)| components.get(*key).map(Component::role) != Some(*role))
            .map(|(key, _)| key.to_string())
            .collect()
    }
}
