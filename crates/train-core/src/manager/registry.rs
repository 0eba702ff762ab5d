//! Manager descriptors, validated once at startup.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::backmerge::BackmergeManager;
use crate::conflict_check::ConflictCheckManager;
use crate::error::RegistryError;
use crate::event::{EventShape, WebhookEvent};
use crate::manifest::update::ManifestUpdateManager;
use crate::train::TrainManager;

use super::{Manager, ManagerContext};

/// A manager together with the event shapes it accepts, in match order.
#[derive(Clone)]
pub struct ManagerDescriptor {
    name: String,
    shapes: Vec<EventShape>,
    manager: Arc<dyn Manager>,
}

impl ManagerDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shapes(&self) -> &[EventShape] {
        &self.shapes
    }

    pub fn manager(&self) -> Arc<dyn Manager> {
        Arc::clone(&self.manager)
    }

    /// The payload parsed as the first accepted shape it satisfies.
    pub fn summon(&self, payload: &Value) -> Option<WebhookEvent> {
        self.shapes
            .iter()
            .find_map(|shape| shape.parse(payload).ok())
    }
}

impl std::fmt::Debug for ManagerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerDescriptor")
            .field("name", &self.name)
            .field("shapes", &self.shapes)
            .finish()
    }
}

/// Read-only list of managers, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ManagerRegistry {
    descriptors: Vec<ManagerDescriptor>,
}

impl ManagerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn descriptors(&self) -> &[ManagerDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, Vec<EventShape>, Arc<dyn Manager>)>,
}

impl RegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        shapes: impl IntoIterator<Item = EventShape>,
        manager: Arc<dyn Manager>,
    ) -> Self {
        self.entries
            .push((name.into(), shapes.into_iter().collect(), manager));
        self
    }

    pub fn build(self) -> Result<ManagerRegistry, RegistryError> {
        let mut seen_names = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.entries.len());

        for (name, shapes, manager) in self.entries {
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            let handler = manager.name();
            if handler.trim().is_empty() {
                return Err(RegistryError::UnnamedHandler { name });
            }
            if handler != name {
                return Err(RegistryError::NameMismatch {
                    handler: handler.to_string(),
                    name,
                });
            }
            if shapes.is_empty() {
                return Err(RegistryError::NoShapes { name });
            }
            let mut seen_shapes = HashSet::new();
            for shape in &shapes {
                if !seen_shapes.insert(*shape) {
                    return Err(RegistryError::DuplicateShape {
                        name,
                        shape: shape.to_string(),
                    });
                }
            }
            if !seen_names.insert(name.clone()) {
                return Err(RegistryError::DuplicateManager { name });
            }
            descriptors.push(ManagerDescriptor {
                name,
                shapes,
                manager,
            });
        }

        Ok(ManagerRegistry { descriptors })
    }
}

/// The built-in release train managers.
pub fn default_registry(ctx: &ManagerContext) -> Result<ManagerRegistry, RegistryError> {
    ManagerRegistry::builder()
        .register(
            BackmergeManager::NAME,
            [EventShape::Push],
            Arc::new(BackmergeManager::new(ctx.clone())),
        )
        .register(
            TrainManager::NAME,
            [EventShape::PullRequest],
            Arc::new(TrainManager::new(ctx.clone())),
        )
        .register(
            ManifestUpdateManager::NAME,
            [EventShape::Push],
            Arc::new(ManifestUpdateManager::new(ctx.clone())),
        )
        .register(
            ConflictCheckManager::NAME,
            [EventShape::PullRequest, EventShape::CheckRun],
            Arc::new(ConflictCheckManager::new(ctx.clone())),
        )
        .build()
}
