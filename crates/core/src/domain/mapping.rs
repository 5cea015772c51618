use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::response::ResponseId;
use crate::domain::trigger::TriggerId;

/// Links a trigger to the response it fires. One mapping per trigger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub trigger_id: TriggerId,
    pub response_id: ResponseId,
    pub updated_at: DateTime<Utc>,
}
