//! Policy orchestration: intent -> rules -> validation -> conflict
//! detection -> merge -> vendor apply (spec §4.5).

pub mod conflict;
pub mod index;
pub mod intent;
pub mod merge;
pub mod orchestrator;
pub mod policy;
pub mod reaper;
pub mod rule;
pub mod store;
pub mod validate;

pub use conflict::ConflictRecord;
pub use index::SelectorIndex;
pub use intent::{Action, Direction, PolicyIntent, Protocol, Selector};
pub use orchestrator::{ApplyOutcome, PolicyOrchestrator};
pub use policy::{Policy, PolicyStatus};
pub use rule::{generate_rules, Rule};
pub use store::{InMemoryPolicyStore, PolicyStore};
pub use validate::{validate, ValidationResult};
