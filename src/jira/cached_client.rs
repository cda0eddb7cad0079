//! Cached Jira client that wraps JiraClient with transparent caching.

use std::future::Future;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::cache::{Cache, CacheStats};
use crate::config::Config;

use super::cache::JiraQueryKey;
use super::client::{JiraApi, JiraClient};
use super::types::{IssueType, Project, ProjectVersion, User};

/// Candidates fetched when resolving a user by email.
const EMAIL_SEARCH_LIMIT: u32 = 10;

/// Jira client with transparent caching support.
///
/// Same lookups as [`JiraClient`], answered from the cache when possible.
/// Concurrent identical lookups share one request.
pub struct CachedJiraClient<C = JiraClient> {
  inner: Arc<C>,
  cache: Cache,
}

impl<C> Clone for CachedJiraClient<C> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      cache: self.cache.clone(),
    }
  }
}

impl CachedJiraClient<JiraClient> {
  /// Create a cached client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let inner = JiraClient::new(config)?;
    let cache = Cache::from_config(&config.cache)?;

    info!(
      enabled = cache.is_enabled(),
      remote = cache.has_remote(),
      "cache ready"
    );

    Ok(Self::with_cache(inner, cache))
  }
}

impl<C: JiraApi> CachedJiraClient<C> {
  pub fn with_cache(inner: C, cache: Cache) -> Self {
    Self {
      inner: Arc::new(inner),
      cache,
    }
  }

  pub fn stats(&self) -> CacheStats {
    self.cache.stats()
  }

  /// Run `fetch` through the cache under the key and TTL of `query`.
  async fn cached<T, F, Fut>(&self, query: JiraQueryKey, fetch: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce(Arc<C>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let key = query.cache_key()?;
    debug!(query = %query.description(), key = %key, "cached lookup");

    let inner = Arc::clone(&self.inner);
    let value = self
      .cache
      .wrap_with_ttl(key.as_str(), query.ttl_secs(), move || fetch(inner))
      .await?;

    Ok(value)
  }

  /// Get a user by account id.
  pub async fn get_user(&self, account_id: &str) -> Result<User> {
    let query = JiraQueryKey::User {
      account_id: account_id.to_string(),
    };
    let account_id = account_id.to_string();

    self
      .cached(query, move |inner| async move {
        inner.get_user(&account_id).await
      })
      .await
  }

  /// Search users; results are cached per normalized query.
  pub async fn search_users(&self, query: &str, max_results: u32) -> Result<Vec<User>> {
    let key = JiraQueryKey::UserSearch {
      query: query.to_string(),
      max_results,
    };
    let query = query.to_string();

    self
      .cached(key, move |inner| async move {
        inner.search_users(&query, max_results).await
      })
      .await
  }

  /// Users assignable to issues in all of `project_keys`, optionally
  /// filtered by a name or email fragment.
  pub async fn find_assignable_users(
    &self,
    project_keys: &[String],
    query: Option<&str>,
    max_results: u32,
  ) -> Result<Vec<User>> {
    if project_keys.is_empty() {
      return Err(eyre!("At least one project key is required"));
    }

    let key = JiraQueryKey::AssignableUsers {
      projects: project_keys.to_vec(),
      query: query.map(String::from),
      max_results,
    };
    let projects = project_keys.to_vec();
    let query = query.map(String::from);

    self
      .cached(key, move |inner| async move {
        inner
          .find_assignable_users(&projects, query.as_deref(), max_results)
          .await
      })
      .await
  }

  /// Resolve a user by exact (case-insensitive) email address.
  pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
    let users = self.search_users(email, EMAIL_SEARCH_LIMIT).await?;
    Ok(find_user_by_email(users, email))
  }

  /// Resolve a user by account id, falling back to an email lookup.
  pub async fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<User>> {
    match self.get_user(identifier).await {
      Ok(user) => Ok(Some(user)),
      Err(e) => {
        debug!(identifier, error = %e, "not an account id, trying email");
        self.get_user_by_email(identifier).await
      }
    }
  }

  /// Get project metadata by key.
  pub async fn get_project(&self, key: &str) -> Result<Project> {
    let query = JiraQueryKey::Project {
      key: key.to_string(),
    };
    let key = key.to_string();

    self
      .cached(query, move |inner| async move { inner.get_project(&key).await })
      .await
  }

  /// Get all issue types of the instance.
  pub async fn get_issue_types(&self) -> Result<Vec<IssueType>> {
    self
      .cached(JiraQueryKey::IssueTypes, |inner| async move {
        inner.get_issue_types().await
      })
      .await
  }

  /// Get the issue types available in a project.
  pub async fn get_project_issue_types(&self, key: &str) -> Result<Vec<IssueType>> {
    let query = JiraQueryKey::ProjectIssueTypes {
      project: key.to_string(),
    };
    let key = key.to_string();

    self
      .cached(query, move |inner| async move {
        inner.get_project_issue_types(&key).await
      })
      .await
  }

  /// Look up an issue type id by name (case-insensitive) within a project.
  pub async fn get_issue_type_id_by_name(&self, project: &str, name: &str) -> Result<String> {
    let types = self.get_project_issue_types(project).await?;
    find_issue_type_id(&types, name).ok_or_else(|| {
      let available: Vec<&str> = types.iter().map(|t| t.name.as_str()).collect();
      eyre!(
        "Issue type '{}' not found in project {}. Available: {}",
        name,
        project,
        available.join(", ")
      )
    })
  }

  /// Get all versions of a project.
  pub async fn get_project_versions(&self, key: &str) -> Result<Vec<ProjectVersion>> {
    let query = JiraQueryKey::ProjectVersions {
      project: key.to_string(),
    };
    let key = key.to_string();

    self
      .cached(query, move |inner| async move {
        inner.get_project_versions(&key).await
      })
      .await
  }

  /// Find a project version by exact name.
  pub async fn get_version_by_name(
    &self,
    project: &str,
    name: &str,
  ) -> Result<Option<ProjectVersion>> {
    let versions = self.get_project_versions(project).await?;
    Ok(versions.into_iter().find(|v| v.name == name))
  }

  /// Versions filtered by release state.
  pub async fn get_versions_by_release(
    &self,
    project: &str,
    released: bool,
  ) -> Result<Vec<ProjectVersion>> {
    let versions = self.get_project_versions(project).await?;
    Ok(
      versions
        .into_iter()
        .filter(|v| v.released == released)
        .collect(),
    )
  }

  /// Drop every cached entry for a project (metadata, issue types, versions).
  pub async fn invalidate_project(&self, key: &str) -> Result<()> {
    let project = key.to_string();
    let queries = [
      JiraQueryKey::Project {
        key: project.clone(),
      },
      JiraQueryKey::ProjectIssueTypes {
        project: project.clone(),
      },
      JiraQueryKey::ProjectVersions { project },
    ];

    for query in queries {
      let key = query.cache_key()?;
      self.cache.delete(key.as_str()).await?;
    }

    debug!(project = key, "project cache invalidated");
    Ok(())
  }
}

fn find_user_by_email(users: Vec<User>, email: &str) -> Option<User> {
  let email = email.trim().to_lowercase();
  users.into_iter().find(|u| {
    u.email_address
      .as_deref()
      .is_some_and(|e| e.to_lowercase() == email)
  })
}

fn find_issue_type_id(types: &[IssueType], name: &str) -> Option<String> {
  let name = name.trim();
  types
    .iter()
    .find(|t| t.name.eq_ignore_ascii_case(name))
    .map(|t| t.id.clone())
}
