//! Automatic replies: compiled triggers, response templates and the engine
//! that ties them to customer data.

pub mod catalog;
pub mod engine;
pub mod pattern;
pub mod personalizer;
pub mod registry;
pub mod store;

pub use catalog::{ConfigurationIssue, MappingTable, Resolution, ResponseCatalog};
pub use engine::{EngineSettings, ReplySnapshot, SmartReply, SmartReplyEngine};
pub use pattern::{compile, CompileError, CompiledMatcher, MatchCaptures, PatternCompiler};
pub use personalizer::{FallbackLiterals, Personalizer, Placeholder, PlaceholderField};
pub use registry::{TriggerMatch, TriggerRegistry};
pub use store::{InMemoryReplyStore, ReplyStore, StoreError, StoredConfiguration};
