pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod smart_reply;

pub use directory::{CustomerDirectory, DirectoryError, InMemoryCustomerDirectory};
pub use domain::customer::{CustomerRecord, CustomerStatus};
pub use domain::mapping::Mapping;
pub use domain::response::{NewResponse, ReplyFormat, Response, ResponseId, ResponseUpdate};
pub use domain::trigger::{MatchKind, NewTrigger, Trigger, TriggerId, TriggerUpdate};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use smart_reply::{ConfigurationIssue, EngineSettings, SmartReply, SmartReplyEngine};
