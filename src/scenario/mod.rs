pub mod compiler;
pub mod context;
pub mod directive;
pub mod pattern;

pub use compiler::{compile, CompiledScenario};
pub use context::ScenarioContext;
pub use directive::{Directive, DirectiveError};
pub use pattern::Pattern;
