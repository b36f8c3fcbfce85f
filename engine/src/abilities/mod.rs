//! Ability registry
//!
//! Abilities are registered once at start-up and the registry is shared
//! read-only across tasks. Dispatch passes the model's argument mapping
//! through untouched; parameter lists only feed the catalogue.

pub mod builtin;
pub mod memory;

use sdk::{Ability, AbilityArgs, AbilityContext, AbilityError, AbilityOutput, AbilitySpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::memory::MemoryStore;
use crate::workspace::TaskWorkspace;

pub use builtin::{FinishAbility, ListFilesAbility, ReadFileAbility, WriteFileAbility};
pub use memory::{AddToMemoryAbility, ReadFromMemoryAbility};

/// Name of the ability that ends a task
pub const FINISH: &str = "finish";

#[derive(Default, Clone)]
pub struct AbilityRegistry {
    abilities: BTreeMap<String, Arc<dyn Ability>>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in ability
    pub fn with_builtins(workspace: TaskWorkspace, memory: Arc<dyn MemoryStore>) -> Self {
        let mut registry = Self::new();
        registry.register(FinishAbility);
        registry.register(ReadFileAbility::new(workspace.clone()));
        registry.register(WriteFileAbility::new(workspace.clone()));
        registry.register(ListFilesAbility::new(workspace.clone()));
        registry.register(AddToMemoryAbility::new(workspace, Arc::clone(&memory)));
        registry.register(ReadFromMemoryAbility::new(memory));
        registry
    }

    /// Add an ability, replacing any previous one with the same name
    pub fn register(&mut self, ability: impl Ability + 'static) -> &mut Self {
        let name = ability.spec().name;
        if self.abilities.contains_key(&name) {
            warn!("Replacing registered ability '{}'", name);
        }
        self.abilities.insert(name, Arc::new(ability));
        self
    }

    pub async fn invoke(
        &self,
        name: &str,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let ability = self
            .abilities
            .get(name)
            .ok_or_else(|| AbilityError::NotFound(name.to_string()))?;

        debug!("Invoking ability '{}' for task {}", name, ctx.task_id);
        ability.run(ctx, args).await
    }

    /// Prompt listing, one ability per line
    pub fn catalogue(&self) -> String {
        self.abilities
            .values()
            .map(|ability| format!("- {}", ability.spec()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn names(&self) -> Vec<&str> {
        self.abilities.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> Vec<AbilitySpec> {
        self.abilities.values().map(|a| a.spec()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.abilities.contains_key(name)
    }
}
