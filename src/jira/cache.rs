//! Cache keys for Jira lookups.

use crate::cache::{CacheKey, KeyBuilder, Result};

/// Issue types change rarely; keep them longer than the default TTL.
const ISSUE_TYPES_TTL_SECS: u64 = 3600;

/// Query key types for Jira API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JiraQueryKey {
  /// Get a user by account id
  User { account_id: String },
  /// Free-text user search
  UserSearch { query: String, max_results: u32 },
  /// Users assignable in all of the given projects
  AssignableUsers {
    projects: Vec<String>,
    query: Option<String>,
    max_results: u32,
  },
  /// Get project metadata
  Project { key: String },
  /// All issue types of the instance
  IssueTypes,
  /// Issue types available in one project
  ProjectIssueTypes { project: String },
  /// Versions of one project
  ProjectVersions { project: String },
}

impl JiraQueryKey {
  /// Deterministic cache key for this query.
  ///
  /// Project keys are case-insensitive in Jira and search queries are
  /// normalized, so equivalent queries share one entry.
  pub fn cache_key(&self) -> Result<CacheKey> {
    match self {
      Self::User { account_id } => KeyBuilder::new().part("user", account_id).build(),
      Self::UserSearch { query, max_results } => KeyBuilder::new()
        .part("user_search", normalize_query(query))
        .part("max_results", max_results)
        .build_digest(),
      Self::AssignableUsers {
        projects,
        query,
        max_results,
      } => {
        let mut projects: Vec<String> = projects.iter().map(|p| p.trim().to_uppercase()).collect();
        projects.sort();
        projects.dedup();
        let query = query
          .as_deref()
          .map(normalize_query)
          .filter(|q| !q.is_empty());

        KeyBuilder::new()
          .part("assignable_users", projects)
          .part("query", query)
          .part("max_results", max_results)
          .build_digest()
      }
      Self::Project { key } => KeyBuilder::new()
        .part("project", key.to_uppercase())
        .build(),
      Self::IssueTypes => KeyBuilder::new().part("issue_types", "all").build(),
      Self::ProjectIssueTypes { project } => KeyBuilder::new()
        .part("project", project.to_uppercase())
        .part("issue_types", "all")
        .build(),
      Self::ProjectVersions { project } => KeyBuilder::new()
        .part("project", project.to_uppercase())
        .part("versions", "all")
        .build(),
    }
  }

  /// TTL override; `None` uses the cache default.
  pub fn ttl_secs(&self) -> Option<u64> {
    match self {
      Self::IssueTypes | Self::ProjectIssueTypes { .. } => Some(ISSUE_TYPES_TTL_SECS),
      _ => None,
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::User { account_id } => format!("user {}", account_id),
      Self::UserSearch { query, .. } => format!("users matching {}", query),
      Self::AssignableUsers { projects, .. } => {
        format!("users assignable in {}", projects.join(", "))
      }
      Self::Project { key } => format!("project {}", key),
      Self::IssueTypes => "all issue types".to_string(),
      Self::ProjectIssueTypes { project } => format!("issue types for project {}", project),
      Self::ProjectVersions { project } => format!("versions for project {}", project),
    }
  }
}

/// Trim and lowercase so that `" Ada@Acme.test"` and `"ada@acme.test"` share a key.
fn normalize_query(query: &str) -> String {
  query.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(query: JiraQueryKey) -> String {
    query.cache_key().unwrap().as_str().to_string()
  }

  #[test]
  fn readable_keys() {
    assert_eq!(
      key(JiraQueryKey::User {
        account_id: "5b10ac8d82e05b22cc7d4ef5".into()
      }),
      "user:5b10ac8d82e05b22cc7d4ef5"
    );
    assert_eq!(key(JiraQueryKey::Project { key: "proj".into() }), "project:PROJ");
    assert_eq!(key(JiraQueryKey::IssueTypes), "issue_types:all");
    assert_eq!(
      key(JiraQueryKey::ProjectIssueTypes {
        project: "Proj".into()
      }),
      "project:PROJ:issue_types:all"
    );
  }

  #[test]
  fn project_keys_are_scoped_under_project() {
    let project = key(JiraQueryKey::Project { key: "PROJ".into() });
    let types = key(JiraQueryKey::ProjectIssueTypes {
      project: "PROJ".into(),
    });
    let versions = key(JiraQueryKey::ProjectVersions {
      project: "PROJ".into(),
    });

    assert!(types.starts_with(&project));
    assert!(versions.starts_with(&project));
    assert_ne!(types, versions);
  }

  #[test]
  fn user_search_is_normalized_and_digested() {
    let a = key(JiraQueryKey::UserSearch {
      query: " Ada@Acme.test ".into(),
      max_results: 50,
    });
    let b = key(JiraQueryKey::UserSearch {
      query: "ada@acme.test".into(),
      max_results: 50,
    });
    let c = key(JiraQueryKey::UserSearch {
      query: "ada@acme.test".into(),
      max_results: 10,
    });

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("user_search:"));
    assert!(!a.contains("acme"));
  }

  #[test]
  fn assignable_users_ignore_project_order_and_case() {
    let assignable = |projects: &[&str], query: Option<&str>| {
      key(JiraQueryKey::AssignableUsers {
        projects: projects.iter().map(|p| p.to_string()).collect(),
        query: query.map(String::from),
        max_results: 50,
      })
    };

    let base = assignable(&["ALPHA", "BETA"], Some("ada"));
    assert!(base.starts_with("assignable_users:"));
    assert_eq!(base, assignable(&["beta", "alpha"], Some(" Ada ")));
    assert_eq!(base, assignable(&["BETA", "ALPHA", "beta"], Some("ada")));
    assert_ne!(base, assignable(&["ALPHA"], Some("ada")));
    assert_ne!(base, assignable(&["ALPHA", "BETA"], None));
    assert_eq!(
      assignable(&["ALPHA"], None),
      assignable(&["ALPHA"], Some("  "))
    );
  }

  #[test]
  fn issue_types_live_longer() {
    assert_eq!(JiraQueryKey::IssueTypes.ttl_secs(), Some(3600));
    assert_eq!(JiraQueryKey::Project { key: "P".into() }.ttl_secs(), None);
  }
}
