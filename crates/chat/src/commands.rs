use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use novaxa_core::domain::mapping::Mapping;
use novaxa_core::domain::response::{NewResponse, ReplyFormat, Response, ResponseId, ResponseUpdate};
use novaxa_core::domain::trigger::{MatchKind, NewTrigger, Trigger, TriggerId, TriggerUpdate};
use novaxa_core::errors::{ApplicationError, DomainError};
use novaxa_core::smart_reply::{ConfigurationIssue, SmartReplyEngine};

pub const COMMAND_PREFIX: &str = "/reply";

const PREVIEW_CHARS: usize = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyCommand {
    AddTrigger { match_kind: MatchKind, pattern: String },
    UpdateTrigger { id: TriggerId, match_kind: MatchKind, pattern: String },
    EnableTrigger(TriggerId),
    DisableTrigger(TriggerId),
    RemoveTrigger(TriggerId),
    ListTriggers,
    AddResponse { template: String, format: ReplyFormat },
    UpdateResponse { id: ResponseId, template: String },
    RemoveResponse(ResponseId),
    ListResponses,
    Map { trigger_id: TriggerId, response_id: ResponseId },
    Unmap(TriggerId),
    Check,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("not a /reply command")]
    NotAReplyCommand,
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    MatchKind(#[from] DomainError),
    #[error("unknown subcommand `{0}`; try `/reply help`")]
    Unknown(String),
}

/// True when `text` starts with `/reply`, optionally addressed as
/// `/reply@BotName`.
pub fn is_reply_command(text: &str) -> bool {
    let (head, _) = split_token(text.trim_start());
    command_word(head) == COMMAND_PREFIX
}

/// Parses a `/reply ...` admin command. Pattern and template arguments keep
/// their inner whitespace and line breaks.
pub fn parse_reply_command(text: &str) -> Result<ReplyCommand, CommandParseError> {
    let (head, rest) = split_token(text.trim());
    if command_word(head) != COMMAND_PREFIX {
        return Err(CommandParseError::NotAReplyCommand);
    }

    let (group, rest) = split_token(rest);
    match group.to_ascii_lowercase().as_str() {
        "" | "help" => Ok(ReplyCommand::Help),
        "trigger" => parse_trigger_command(rest),
        "response" => parse_response_command(rest),
        "map" => {
            let (trigger_id, rest) = split_token(rest);
            let (response_id, _) = split_token(rest);
            if trigger_id.is_empty() || response_id.is_empty() {
                return Err(CommandParseError::Usage("/reply map <trigger_id> <response_id>"));
            }
            Ok(ReplyCommand::Map {
                trigger_id: TriggerId::from(trigger_id),
                response_id: ResponseId::from(response_id),
            })
        }
        "unmap" => required_id(rest, "/reply unmap <trigger_id>")
            .map(|id| ReplyCommand::Unmap(TriggerId::from(id))),
        "check" => Ok(ReplyCommand::Check),
        other => Err(CommandParseError::Unknown(other.to_owned())),
    }
}

fn parse_trigger_command(args: &str) -> Result<ReplyCommand, CommandParseError> {
    let (verb, rest) = split_token(args);
    match verb.to_ascii_lowercase().as_str() {
        "add" => {
            let (kind, pattern) = split_token(rest);
            if kind.is_empty() || pattern.is_empty() {
                return Err(CommandParseError::Usage(
                    "/reply trigger add <exact|contains|regex> <pattern>",
                ));
            }
            Ok(ReplyCommand::AddTrigger {
                match_kind: kind.parse()?,
                pattern: pattern.trim_end().to_owned(),
            })
        }
        "update" => {
            let (id, rest) = split_token(rest);
            let (kind, pattern) = split_token(rest);
            if id.is_empty() || kind.is_empty() || pattern.is_empty() {
                return Err(CommandParseError::Usage(
                    "/reply trigger update <id> <exact|contains|regex> <pattern>",
                ));
            }
            Ok(ReplyCommand::UpdateTrigger {
                id: TriggerId::from(id),
                match_kind: kind.parse()?,
                pattern: pattern.trim_end().to_owned(),
            })
        }
        "enable" => required_id(rest, "/reply trigger enable <id>")
            .map(|id| ReplyCommand::EnableTrigger(TriggerId::from(id))),
        "disable" => required_id(rest, "/reply trigger disable <id>")
            .map(|id| ReplyCommand::DisableTrigger(TriggerId::from(id))),
        "remove" => required_id(rest, "/reply trigger remove <id>")
            .map(|id| ReplyCommand::RemoveTrigger(TriggerId::from(id))),
        "list" => Ok(ReplyCommand::ListTriggers),
        other => Err(CommandParseError::Unknown(format!("trigger {other}").trim_end().to_owned())),
    }
}

fn parse_response_command(args: &str) -> Result<ReplyCommand, CommandParseError> {
    let (verb, rest) = split_token(args);
    match verb.to_ascii_lowercase().as_str() {
        "add" => {
            let (format, template) = match split_token(rest) {
                ("--markdown", template) => (ReplyFormat::Markdown, template),
                _ => (ReplyFormat::Text, rest),
            };
            let template = template.trim_end();
            if template.is_empty() {
                return Err(CommandParseError::Usage("/reply response add [--markdown] <template>"));
            }
            Ok(ReplyCommand::AddResponse { template: template.to_owned(), format })
        }
        "update" => {
            let (id, template) = split_token(rest);
            let template = template.trim_end();
            if id.is_empty() || template.is_empty() {
                return Err(CommandParseError::Usage("/reply response update <id> <template>"));
            }
            Ok(ReplyCommand::UpdateResponse {
                id: ResponseId::from(id),
                template: template.to_owned(),
            })
        }
        "remove" => required_id(rest, "/reply response remove <id>")
            .map(|id| ReplyCommand::RemoveResponse(ResponseId::from(id))),
        "list" => Ok(ReplyCommand::ListResponses),
        other => {
            Err(CommandParseError::Unknown(format!("response {other}").trim_end().to_owned()))
        }
    }
}

fn required_id<'a>(args: &'a str, usage: &'static str) -> Result<&'a str, CommandParseError> {
    match split_token(args) {
        ("", _) => Err(CommandParseError::Usage(usage)),
        (id, _) => Ok(id),
    }
}

/// Splits off the first whitespace-delimited token. The remainder has its
/// leading whitespace removed and is otherwise untouched.
fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(index) => (&input[..index], input[index..].trim_start()),
        None => (input, ""),
    }
}

fn command_word(token: &str) -> &str {
    token.split('@').next().unwrap_or_default()
}

/// Administrative operations reachable from chat.
#[async_trait]
pub trait ReplyAdminService: Send + Sync {
    async fn add_trigger(&self, new: NewTrigger) -> Result<Trigger, ApplicationError>;
    async fn update_trigger(
        &self,
        id: &TriggerId,
        match_kind: MatchKind,
        pattern: String,
    ) -> Result<Trigger, ApplicationError>;
    async fn set_trigger_active(
        &self,
        id: &TriggerId,
        active: bool,
    ) -> Result<Trigger, ApplicationError>;
    async fn remove_trigger(&self, id: &TriggerId) -> Result<Trigger, ApplicationError>;
    async fn add_response(&self, new: NewResponse) -> Result<Response, ApplicationError>;
    async fn update_response(
        &self,
        id: &ResponseId,
        template: String,
    ) -> Result<Response, ApplicationError>;
    async fn remove_response(&self, id: &ResponseId) -> Result<Response, ApplicationError>;
    async fn set_mapping(
        &self,
        trigger_id: &TriggerId,
        response_id: &ResponseId,
    ) -> Result<Mapping, ApplicationError>;
    async fn remove_mapping(&self, trigger_id: &TriggerId) -> Result<Mapping, ApplicationError>;
    fn list_triggers(&self) -> Vec<Trigger>;
    fn list_responses(&self) -> Vec<Response>;
    fn list_mappings(&self) -> Vec<Mapping>;
    fn consistency_report(&self) -> Vec<ConfigurationIssue>;
}

#[async_trait]
impl ReplyAdminService for SmartReplyEngine {
    async fn add_trigger(&self, new: NewTrigger) -> Result<Trigger, ApplicationError> {
        SmartReplyEngine::add_trigger(self, new).await
    }

    /// Keeps the intent already recorded for the trigger.
    async fn update_trigger(
        &self,
        id: &TriggerId,
        match_kind: MatchKind,
        pattern: String,
    ) -> Result<Trigger, ApplicationError> {
        let intent = self
            .snapshot()
            .registry
            .get(id)
            .ok_or_else(|| DomainError::UnknownTrigger(id.clone()))?
            .intent
            .clone();
        SmartReplyEngine::update_trigger(self, id, TriggerUpdate { pattern, match_kind, intent })
            .await
    }

    async fn set_trigger_active(
        &self,
        id: &TriggerId,
        active: bool,
    ) -> Result<Trigger, ApplicationError> {
        if active {
            self.activate_trigger(id).await
        } else {
            self.deactivate_trigger(id).await
        }
    }

    async fn remove_trigger(&self, id: &TriggerId) -> Result<Trigger, ApplicationError> {
        SmartReplyEngine::remove_trigger(self, id).await
    }

    async fn add_response(&self, new: NewResponse) -> Result<Response, ApplicationError> {
        SmartReplyEngine::add_response(self, new).await
    }

    async fn update_response(
        &self,
        id: &ResponseId,
        template: String,
    ) -> Result<Response, ApplicationError> {
        SmartReplyEngine::update_response(self, id, ResponseUpdate { template, format: None }).await
    }

    async fn remove_response(&self, id: &ResponseId) -> Result<Response, ApplicationError> {
        SmartReplyEngine::remove_response(self, id).await
    }

    async fn set_mapping(
        &self,
        trigger_id: &TriggerId,
        response_id: &ResponseId,
    ) -> Result<Mapping, ApplicationError> {
        SmartReplyEngine::set_mapping(self, trigger_id, response_id).await
    }

    async fn remove_mapping(&self, trigger_id: &TriggerId) -> Result<Mapping, ApplicationError> {
        SmartReplyEngine::remove_mapping(self, trigger_id).await
    }

    fn list_triggers(&self) -> Vec<Trigger> {
        SmartReplyEngine::list_triggers(self)
    }

    fn list_responses(&self) -> Vec<Response> {
        SmartReplyEngine::list_responses(self)
    }

    fn list_mappings(&self) -> Vec<Mapping> {
        SmartReplyEngine::list_mappings(self)
    }

    fn consistency_report(&self) -> Vec<ConfigurationIssue> {
        SmartReplyEngine::consistency_report(self)
    }
}

pub struct CommandRouter<S: ?Sized> {
    service: Arc<S>,
}

impl<S> CommandRouter<S>
where
    S: ReplyAdminService + ?Sized,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Runs `command` and renders the outcome as plain text for the
    /// administrator. Failures are rendered too; nothing is propagated.
    pub async fn route(&self, command: ReplyCommand, user_id: i64, correlation_id: &str) -> String {
        let label = command_label(&command);
        let outcome = self.execute(command).await;

        match outcome {
            Ok(message) => {
                info!(
                    event_name = "chat.admin.command_applied",
                    correlation_id,
                    user_id,
                    command = label,
                    "admin command applied"
                );
                message
            }
            Err(error) => {
                let interface = error.into_interface(correlation_id);
                info!(
                    event_name = "chat.admin.command_rejected",
                    correlation_id,
                    user_id,
                    command = label,
                    error = %interface,
                    "admin command rejected"
                );
                format!("Error: {}", interface.admin_message())
            }
        }
    }

    async fn execute(&self, command: ReplyCommand) -> Result<String, ApplicationError> {
        let service = &self.service;
        Ok(match command {
            ReplyCommand::AddTrigger { match_kind, pattern } => {
                let trigger = service.add_trigger(NewTrigger::new(pattern, match_kind)).await?;
                format!("Trigger {} added ({} `{}`).", trigger.id, trigger.match_kind, trigger.pattern)
            }
            ReplyCommand::UpdateTrigger { id, match_kind, pattern } => {
                let trigger = service.update_trigger(&id, match_kind, pattern).await?;
                format!("Trigger {} updated ({} `{}`).", trigger.id, trigger.match_kind, trigger.pattern)
            }
            ReplyCommand::EnableTrigger(id) => {
                let trigger = service.set_trigger_active(&id, true).await?;
                format!("Trigger {} enabled.", trigger.id)
            }
            ReplyCommand::DisableTrigger(id) => {
                let trigger = service.set_trigger_active(&id, false).await?;
                format!("Trigger {} disabled.", trigger.id)
            }
            ReplyCommand::RemoveTrigger(id) => {
                let trigger = service.remove_trigger(&id).await?;
                format!("Trigger {} removed.", trigger.id)
            }
            ReplyCommand::ListTriggers => {
                render_trigger_list(&service.list_triggers(), &service.list_mappings())
            }
            ReplyCommand::AddResponse { template, format } => {
                let response = service.add_response(NewResponse { template, format }).await?;
                format!("Response {} added ({}).", response.id, response.format.as_str())
            }
            ReplyCommand::UpdateResponse { id, template } => {
                let response = service.update_response(&id, template).await?;
                format!("Response {} updated.", response.id)
            }
            ReplyCommand::RemoveResponse(id) => {
                let response = service.remove_response(&id).await?;
                format!("Response {} removed.", response.id)
            }
            ReplyCommand::ListResponses => render_response_list(&service.list_responses()),
            ReplyCommand::Map { trigger_id, response_id } => {
                let mapping = service.set_mapping(&trigger_id, &response_id).await?;
                format!("Mapped {} -> {}.", mapping.trigger_id, mapping.response_id)
            }
            ReplyCommand::Unmap(trigger_id) => {
                let mapping = service.remove_mapping(&trigger_id).await?;
                format!("Removed mapping {} -> {}.", mapping.trigger_id, mapping.response_id)
            }
            ReplyCommand::Check => render_report(&service.consistency_report()),
            ReplyCommand::Help => help_text().to_owned(),
        })
    }
}

fn command_label(command: &ReplyCommand) -> &'static str {
    match command {
        ReplyCommand::AddTrigger { .. } => "trigger.add",
        ReplyCommand::UpdateTrigger { .. } => "trigger.update",
        ReplyCommand::EnableTrigger(_) => "trigger.enable",
        ReplyCommand::DisableTrigger(_) => "trigger.disable",
        ReplyCommand::RemoveTrigger(_) => "trigger.remove",
        ReplyCommand::ListTriggers => "trigger.list",
        ReplyCommand::AddResponse { .. } => "response.add",
        ReplyCommand::UpdateResponse { .. } => "response.update",
        ReplyCommand::RemoveResponse(_) => "response.remove",
        ReplyCommand::ListResponses => "response.list",
        ReplyCommand::Map { .. } => "map",
        ReplyCommand::Unmap(_) => "unmap",
        ReplyCommand::Check => "check",
        ReplyCommand::Help => "help",
    }
}

fn render_trigger_list(triggers: &[Trigger], mappings: &[Mapping]) -> String {
    if triggers.is_empty() {
        return "No triggers configured.".to_owned();
    }

    let mut lines = vec![format!("Triggers ({}):", triggers.len())];
    for trigger in triggers {
        let state = if trigger.active { "" } else { ", disabled" };
        let target = mappings
            .iter()
            .find(|mapping| mapping.trigger_id == trigger.id)
            .map_or_else(|| "unmapped".to_owned(), |mapping| mapping.response_id.to_string());
        lines.push(format!(
            "{} [{}{}] {} -> {}",
            trigger.id, trigger.match_kind, state, trigger.pattern, target
        ));
    }
    lines.join("\n")
}

fn render_response_list(responses: &[Response]) -> String {
    if responses.is_empty() {
        return "No responses configured.".to_owned();
    }

    let mut lines = vec![format!("Responses ({}):", responses.len())];
    for response in responses {
        lines.push(format!(
            "{} ({}): {}",
            response.id,
            response.format.as_str(),
            preview(&response.template)
        ));
    }
    lines.join("\n")
}

fn render_report(issues: &[ConfigurationIssue]) -> String {
    if issues.is_empty() {
        return "Configuration is consistent.".to_owned();
    }

    let mut lines = vec![format!("{} issue(s) found:", issues.len())];
    lines.extend(issues.iter().map(|issue| format!("- {issue}")));
    lines.join("\n")
}

fn preview(template: &str) -> String {
    let first_line = template.lines().next().unwrap_or_default();
    let truncated = first_line.chars().count() > PREVIEW_CHARS || template.contains('\n');
    let mut shown: String = first_line.chars().take(PREVIEW_CHARS).collect();
    if truncated {
        shown.push('…');
    }
    shown
}

pub fn help_text() -> &'static str {
    "Smart reply administration:\n\
     /reply trigger add <exact|contains|regex> <pattern>\n\
     /reply trigger update <id> <exact|contains|regex> <pattern>\n\
     /reply trigger enable|disable|remove <id>\n\
     /reply trigger list\n\
     /reply response add [--markdown] <template>\n\
     /reply response update <id> <template>\n\
     /reply response remove <id>\n\
     /reply response list\n\
     /reply map <trigger_id> <response_id>\n\
     /reply unmap <trigger_id>\n\
     /reply check\n\
     Templates accept {name}, {first_name}, {email}, {status}, {notes}, {projects}, {user_id} and {regex_group_N}."
}
