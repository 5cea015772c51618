//! Chat transport surface for the smart reply engine.
//!
//! - **Events** (`events`) - envelopes, dispatcher, message and admin handlers
//! - **Commands** (`commands`) - the `/reply` administration grammar
//! - **Lanes** (`lanes`) - per-user ordered worker lanes
//! - **Runner** (`runner`) - polling loop with reconnect backoff
//! - **Telegram** (`telegram`) - Bot API transport over HTTPS
//!
//! ```text
//! Transport → PollingRunner → UserLanes → EventDispatcher → SmartReplyEngine
//!                  ↑                                   ↓
//!                  └──────────── OutgoingMessage ──────┘
//! ```

pub mod commands;
pub mod events;
pub mod lanes;
pub mod runner;
pub mod telegram;

pub use commands::{parse_reply_command, CommandParseError, CommandRouter, ReplyAdminService, ReplyCommand};
pub use events::{
    build_dispatcher, AdminCommandHandler, ChatEnvelope, ChatEvent, EventDispatcher,
    IncomingMessage, MessageHandler, OutgoingMessage, ReplyService,
};
pub use lanes::UserLanes;
pub use runner::{
    ChatTransport, LaneSettings, NoopChatTransport, PollingRunner, ReconnectPolicy, TransportError,
};
pub use telegram::TelegramTransport;
