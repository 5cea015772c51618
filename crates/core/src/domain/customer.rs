use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// CRM pipeline stage. Free-form statuses recorded by operators survive as
/// `Other` rather than being rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Lead,
    Active,
    Client,
    OnHold,
    Other(String),
}

impl CustomerStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "lead" => Self::Lead,
            "active" => Self::Active,
            "client" | "active client" => Self::Client,
            "on hold" | "onhold" => Self::OnHold,
            _ => Self::Other(raw.trim().to_owned()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Lead => "Lead",
            Self::Active => "Active",
            Self::Client => "Client",
            Self::OnHold => "On Hold",
            Self::Other(label) => label,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub status: CustomerStatus,
    pub notes: Vec<String>,
    pub project_tags: BTreeSet<String>,
}

impl CustomerRecord {
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            email: String::new(),
            status: CustomerStatus::Lead,
            notes: Vec::new(),
            project_tags: BTreeSet::new(),
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn status(mut self, status: CustomerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn project(mut self, tag: impl Into<String>) -> Self {
        self.project_tags.insert(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::CustomerStatus;

    #[test]
    fn status_parse_accepts_crm_spellings() {
        assert_eq!(CustomerStatus::parse("Lead"), CustomerStatus::Lead);
        assert_eq!(CustomerStatus::parse("Active Client"), CustomerStatus::Client);
        assert_eq!(CustomerStatus::parse("on_hold"), CustomerStatus::OnHold);
        assert_eq!(CustomerStatus::parse(" VIP "), CustomerStatus::Other("VIP".to_owned()));
    }

    #[test]
    fn status_label_round_trips_known_values() {
        for status in
            [CustomerStatus::Lead, CustomerStatus::Active, CustomerStatus::Client, CustomerStatus::OnHold]
        {
            assert_eq!(CustomerStatus::parse(status.label()), status);
        }
    }
}
