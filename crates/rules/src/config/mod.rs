//! Rule configuration: YAML model, typed parameter access and file loading.

mod accessor;
mod loader;
mod model;

#[cfg(test)]
mod tests;

pub use accessor::{parse_bool, parse_enum, render_value, ConfigAccessor, Params};
pub use loader::{next_change, ConfigChange, ConfigLoader, DEBOUNCE_WINDOW};
pub use model::{
    ActionConfig, ComponentConfig, ConditionCheck, ConditionConfig, Defaults, EngineConfig,
    RuleConfig, Settings, TemplateConfig, TriggerConfig, TypedConfig,
};
