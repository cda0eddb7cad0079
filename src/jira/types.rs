use serde::{Deserialize, Serialize};

/// A Jira user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub account_id: String,
  pub display_name: String,
  pub email_address: Option<String>,
  pub active: bool,
  pub time_zone: Option<String>,
}

/// Project metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub id: String,
  pub key: String,
  pub name: String,
  pub description: Option<String>,
  pub project_type: Option<String>,
  pub lead: Option<String>, // display name
}

/// Issue type (Bug, Story, Task, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueType {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub subtask: bool,
}

/// A project version (fix version / release)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVersion {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub released: bool,
  pub archived: bool,
  pub release_date: Option<String>,
}
