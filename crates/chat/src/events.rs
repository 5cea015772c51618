use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use novaxa_core::domain::response::ReplyFormat;
use novaxa_core::smart_reply::{SmartReply, SmartReplyEngine};

use crate::commands::{is_reply_command, parse_reply_command, CommandRouter, ReplyAdminService};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub update_id: i64,
    pub event: ChatEvent,
}

impl ChatEnvelope {
    /// Wraps an inbound text message, routing `/reply` commands to the
    /// admin handler.
    pub fn from_message(update_id: i64, message: IncomingMessage) -> Self {
        let event = if is_reply_command(&message.text) {
            ChatEvent::AdminCommand(message)
        } else {
            ChatEvent::Message(message)
        };
        Self { update_id, event }
    }

    pub fn correlation_id(&self) -> String {
        format!("update-{}", self.update_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Message(IncomingMessage),
    AdminCommand(IncomingMessage),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Message(_) => ChatEventType::Message,
            Self::AdminCommand(_) => ChatEventType::AdminCommand,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::Message(message) | Self::AdminCommand(message) => Some(message.user_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Message,
    AdminCommand,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub reply_to_message_id: Option<i64>,
    pub text: String,
    pub format: ReplyFormat,
}

impl OutgoingMessage {
    pub fn text_reply(to: &IncomingMessage, text: impl Into<String>) -> Self {
        Self {
            chat_id: to.chat_id,
            reply_to_message_id: Some(to.message_id),
            text: text.into(),
            format: ReplyFormat::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutgoingMessage),
    Processed,
    Ignored,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(&self, envelope: &ChatEnvelope, ctx: &EventContext) -> HandlerResult;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(&self, envelope: &ChatEnvelope, ctx: &EventContext) -> HandlerResult {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return HandlerResult::Ignored;
        };

        handler.handle(envelope, ctx).await
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Message and admin handlers wired to one engine.
pub fn build_dispatcher(
    engine: Arc<SmartReplyEngine>,
    admin_user_ids: impl IntoIterator<Item = i64>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(engine.clone()));
    dispatcher.register(AdminCommandHandler::new(engine, admin_user_ids));
    dispatcher
}

#[async_trait]
pub trait ReplyService: Send + Sync {
    async fn reply(&self, user_id: i64, text: &str) -> Option<SmartReply>;
}

#[async_trait]
impl ReplyService for SmartReplyEngine {
    async fn reply(&self, user_id: i64, text: &str) -> Option<SmartReply> {
        SmartReplyEngine::reply(self, user_id, text).await
    }
}

pub struct MessageHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S> MessageHandler<S>
where
    S: ReplyService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: ReplyService + ?Sized + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Message
    }

    async fn handle(&self, envelope: &ChatEnvelope, ctx: &EventContext) -> HandlerResult {
        let ChatEvent::Message(message) = &envelope.event else {
            return HandlerResult::Ignored;
        };

        match self.service.reply(message.user_id, &message.text).await {
            Some(reply) => {
                debug!(
                    event_name = "chat.message.replied",
                    correlation_id = %ctx.correlation_id,
                    user_id = message.user_id,
                    trigger_id = %reply.trigger_id,
                    response_id = %reply.response_id,
                    "smart reply matched"
                );
                HandlerResult::Responded(OutgoingMessage {
                    chat_id: message.chat_id,
                    reply_to_message_id: Some(message.message_id),
                    text: reply.text,
                    format: reply.format,
                })
            }
            None => HandlerResult::Processed,
        }
    }
}

pub struct AdminCommandHandler<S: ?Sized> {
    router: CommandRouter<S>,
    admin_user_ids: HashSet<i64>,
}

impl<S> AdminCommandHandler<S>
where
    S: ReplyAdminService + ?Sized,
{
    pub fn new(service: Arc<S>, admin_user_ids: impl IntoIterator<Item = i64>) -> Self {
        Self { router: CommandRouter::new(service), admin_user_ids: admin_user_ids.into_iter().collect() }
    }
}

#[async_trait]
impl<S> EventHandler for AdminCommandHandler<S>
where
    S: ReplyAdminService + ?Sized + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::AdminCommand
    }

    async fn handle(&self, envelope: &ChatEnvelope, ctx: &EventContext) -> HandlerResult {
        let ChatEvent::AdminCommand(message) = &envelope.event else {
            return HandlerResult::Ignored;
        };

        if !self.admin_user_ids.contains(&message.user_id) {
            warn!(
                event_name = "chat.admin.denied",
                correlation_id = %ctx.correlation_id,
                user_id = message.user_id,
                "non-admin user attempted a smart reply command"
            );
            return HandlerResult::Responded(OutgoingMessage::text_reply(
                message,
                "Smart reply administration is restricted to administrators.",
            ));
        }

        let text = match parse_reply_command(&message.text) {
            Ok(command) => self.router.route(command, message.user_id, &ctx.correlation_id).await,
            Err(error) => format!("Error: {error}"),
        };
        HandlerResult::Responded(OutgoingMessage::text_reply(message, text))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use novaxa_core::directory::InMemoryCustomerDirectory;
    use novaxa_core::domain::customer::CustomerRecord;
    use novaxa_core::domain::response::{NewResponse, ReplyFormat};
    use novaxa_core::domain::trigger::{MatchKind, NewTrigger};
    use novaxa_core::smart_reply::{
        EngineSettings, InMemoryReplyStore, SmartReplyEngine, StoredConfiguration,
    };

    use super::{
        build_dispatcher, ChatEnvelope, ChatEvent, EventContext, EventDispatcher, HandlerResult,
        IncomingMessage,
    };

    const ADMIN: i64 = 900;

    async fn engine() -> Arc<SmartReplyEngine> {
        let engine = SmartReplyEngine::load(
            Arc::new(InMemoryReplyStore::new(StoredConfiguration::default())),
            Arc::new(InMemoryCustomerDirectory::new([CustomerRecord::new(1, "Maria")])),
            EngineSettings::default(),
        )
        .await
        .expect("engine");

        let trigger =
            engine.add_trigger(NewTrigger::new("γειά", MatchKind::Exact)).await.expect("trigger");
        let response =
            engine.add_response(NewResponse::markdown("*Hello* {name}")).await.expect("response");
        engine.set_mapping(&trigger.id, &response.id).await.expect("mapping");
        Arc::new(engine)
    }

    fn message(user_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage { chat_id: user_id, message_id: 77, user_id, text: text.to_owned() }
    }

    #[test]
    fn envelope_classifies_admin_commands() {
        let admin = ChatEnvelope::from_message(1, message(ADMIN, "/reply trigger list"));
        assert!(matches!(admin.event, ChatEvent::AdminCommand(_)));

        let plain = ChatEnvelope::from_message(2, message(1, "reply soon please"));
        assert!(matches!(plain.event, ChatEvent::Message(_)));
        assert_eq!(plain.event.user_id(), Some(1));
        assert_eq!(plain.correlation_id(), "update-2");
    }

    #[tokio::test]
    async fn message_handler_replies_with_rendered_template() {
        let dispatcher = build_dispatcher(engine().await, [ADMIN]);
        let envelope = ChatEnvelope::from_message(10, message(1, "Γειά"));

        let result = dispatcher.dispatch(&envelope, &EventContext::default()).await;

        let HandlerResult::Responded(outgoing) = result else {
            panic!("expected a reply, got {result:?}");
        };
        assert_eq!(outgoing.text, "*Hello* Maria");
        assert_eq!(outgoing.format, ReplyFormat::Markdown);
        assert_eq!(outgoing.reply_to_message_id, Some(77));
    }

    #[tokio::test]
    async fn unmatched_message_is_processed_silently() {
        let dispatcher = build_dispatcher(engine().await, [ADMIN]);
        let envelope = ChatEnvelope::from_message(11, message(1, "καλημέρα"));

        assert_eq!(
            dispatcher.dispatch(&envelope, &EventContext::default()).await,
            HandlerResult::Processed
        );
    }

    #[tokio::test]
    async fn admin_commands_require_listed_user() {
        let engine = engine().await;
        let dispatcher = build_dispatcher(engine.clone(), [ADMIN]);

        let denied = dispatcher
            .dispatch(
                &ChatEnvelope::from_message(12, message(1, "/reply trigger remove TRG_001")),
                &EventContext::default(),
            )
            .await;
        assert!(matches!(denied, HandlerResult::Responded(ref out) if out.text.contains("restricted")));
        assert_eq!(engine.list_triggers().len(), 1);

        let applied = dispatcher
            .dispatch(
                &ChatEnvelope::from_message(13, message(ADMIN, "/reply trigger remove TRG_001")),
                &EventContext::default(),
            )
            .await;
        assert!(
            matches!(applied, HandlerResult::Responded(ref out) if out.text == "Trigger TRG_001 removed.")
        );
        assert!(engine.list_triggers().is_empty());
    }

    #[tokio::test]
    async fn admin_parse_errors_are_answered() {
        let dispatcher = build_dispatcher(engine().await, [ADMIN]);
        let result = dispatcher
            .dispatch(
                &ChatEnvelope::from_message(14, message(ADMIN, "/reply trigger add")),
                &EventContext::default(),
            )
            .await;

        assert!(
            matches!(result, HandlerResult::Responded(ref out) if out.text.starts_with("Error: usage:"))
        );
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let envelope = ChatEnvelope {
            update_id: 1,
            event: ChatEvent::Unsupported { event_type: "sticker".to_owned() },
        };

        assert_eq!(
            dispatcher.dispatch(&envelope, &EventContext::default()).await,
            HandlerResult::Ignored
        );
        assert_eq!(build_dispatcher(engine().await, []).handler_count(), 2);
    }
}
