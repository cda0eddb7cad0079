//! Serde-deserializable types matching Jira API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(rename = "accountId", default)]
  pub account_id: String,
  #[serde(rename = "displayName", default)]
  pub display_name: String,
  #[serde(rename = "emailAddress")]
  pub email_address: Option<String>,
  #[serde(default = "default_active")]
  pub active: bool,
  #[serde(rename = "timeZone")]
  pub time_zone: Option<String>,
}

fn default_active() -> bool {
  true
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiIssueType {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub subtask: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiProject {
  pub id: String,
  pub key: String,
  pub name: String,
  pub description: Option<String>,
  #[serde(rename = "projectTypeKey")]
  pub project_type_key: Option<String>,
  pub lead: Option<ApiUser>,
  #[serde(rename = "issueTypes", default)]
  pub issue_types: Vec<ApiIssueType>,
}

#[derive(Debug, Deserialize)]
pub struct ApiVersion {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub released: bool,
  #[serde(default)]
  pub archived: bool,
  #[serde(rename = "releaseDate")]
  pub release_date: Option<String>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

use super::types::{IssueType, Project, ProjectVersion, User};

impl From<ApiUser> for User {
  fn from(u: ApiUser) -> Self {
    User {
      account_id: u.account_id,
      display_name: u.display_name,
      email_address: u.email_address.filter(|e| !e.is_empty()),
      active: u.active,
      time_zone: u.time_zone,
    }
  }
}

impl From<ApiIssueType> for IssueType {
  fn from(t: ApiIssueType) -> Self {
    IssueType {
      id: t.id,
      name: t.name,
      description: t.description.filter(|d| !d.is_empty()),
      subtask: t.subtask,
    }
  }
}

impl ApiProject {
  /// Split into the project itself and its issue types.
  pub fn into_parts(self) -> (Project, Vec<IssueType>) {
    let issue_types = self.issue_types.into_iter().map(IssueType::from).collect();
    let project = Project {
      id: self.id,
      key: self.key,
      name: self.name,
      description: self.description.filter(|d| !d.is_empty()),
      project_type: self.project_type_key,
      lead: self.lead.map(|u| u.display_name),
    };
    (project, issue_types)
  }
}

impl From<ApiVersion> for ProjectVersion {
  fn from(v: ApiVersion) -> Self {
    ProjectVersion {
      id: v.id,
      name: v.name,
      description: v.description,
      released: v.released,
      archived: v.archived,
      release_date: v.release_date,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_project_with_issue_types() {
    let json = r#"{
      "id": "10000",
      "key": "PROJ",
      "name": "Project",
      "description": "",
      "projectTypeKey": "software",
      "lead": {"accountId": "abc", "displayName": "Ada Lovelace"},
      "issueTypes": [
        {"id": "1", "name": "Bug", "description": "A problem", "subtask": false},
        {"id": "5", "name": "Sub-task", "subtask": true}
      ]
    }"#;

    let api: ApiProject = serde_json::from_str(json).unwrap();
    let (project, types) = api.into_parts();

    assert_eq!(project.key, "PROJ");
    assert_eq!(project.description, None);
    assert_eq!(project.lead.as_deref(), Some("Ada Lovelace"));
    assert_eq!(types.len(), 2);
    assert!(types[1].subtask);
  }

  #[test]
  fn user_defaults_to_active() {
    let api: ApiUser =
      serde_json::from_str(r#"{"accountId": "abc", "displayName": "Ada", "emailAddress": ""}"#)
        .unwrap();
    let user = User::from(api);

    assert!(user.active);
    assert_eq!(user.email_address, None);
  }
}
