use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Stuck,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRequest {
    pub requested_date: DateTime<Utc>,
    pub reason: String,
    pub status: ExtensionStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub assigner_id: String,
    #[serde(default)]
    pub primary_assignee_ids: Vec<String>,
    #[serde(default)]
    pub support_assignee_ids: Vec<String>,
    pub deadline: DateTime<Utc>,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub extension_request: Option<ExtensionRequest>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn involves(&self, user_id: &str) -> bool {
        self.assigner_id == user_id || self.is_assignee(user_id)
    }

    pub fn is_assignee(&self, user_id: &str) -> bool {
        self.primary_assignee_ids.iter().any(|id| id == user_id)
            || self.support_assignee_ids.iter().any(|id| id == user_id)
    }

    pub fn assignee_ids(&self) -> impl Iterator<Item = &String> {
        self.primary_assignee_ids
            .iter()
            .chain(self.support_assignee_ids.iter())
    }
}
