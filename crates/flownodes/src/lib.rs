//! Standard node library
//!
//! Executors for the four node kinds, the condition expression language,
//! and the provider seams the AI and action nodes call out through.

mod action;
mod ai;
mod condition;
mod debug;
mod error;
pub mod expr;
mod http;
mod time;
mod trigger;

pub use action::{ActionExecutor, ActionProvider, ActionRequest, StandardActionProvider};
pub use ai::{parse_completion, render_template, AiExecutor, AiProvider, AiRequest, OpenAiProvider};
pub use condition::ConditionExecutor;
pub use error::ProviderError;
pub use trigger::TriggerExecutor;

use flowruntime::NodeRegistry;
use std::sync::Arc;

/// Registry with one executor per node kind, wired to the given providers
pub fn standard_registry(
    ai: Arc<dyn AiProvider>,
    actions: Arc<dyn ActionProvider>,
) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry, ai, actions);
    registry
}

/// Register all standard executors with a registry
pub fn register_all(
    registry: &mut NodeRegistry,
    ai: Arc<dyn AiProvider>,
    actions: Arc<dyn ActionProvider>,
) {
    registry.register(Arc::new(TriggerExecutor));
    registry.register(Arc::new(AiExecutor::new(ai)));
    registry.register(Arc::new(ConditionExecutor));
    registry.register(Arc::new(ActionExecutor::new(actions)));
}
