use crate::config::{AuthType, Config};
use crate::jira::api_types::{ApiIssueType, ApiProject, ApiUser, ApiVersion};
use crate::jira::types::{IssueType, Project, ProjectVersion, User};
use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

/// Read-only Jira lookups the cached client is built on.
#[async_trait]
pub trait JiraApi: Send + Sync + 'static {
  async fn get_user(&self, account_id: &str) -> Result<User>;
  async fn search_users(&self, query: &str, max_results: u32) -> Result<Vec<User>>;
  async fn find_assignable_users(
    &self,
    project_keys: &[String],
    query: Option<&str>,
    max_results: u32,
  ) -> Result<Vec<User>>;
  async fn get_project(&self, key: &str) -> Result<Project>;
  async fn get_issue_types(&self) -> Result<Vec<IssueType>>;
  async fn get_project_issue_types(&self, key: &str) -> Result<Vec<IssueType>>;
  async fn get_project_versions(&self, key: &str) -> Result<Vec<ProjectVersion>>;
}

/// Jira API client wrapper
#[derive(Clone)]
pub struct JiraClient {
  client: gouqi::r#async::Jira,
}

impl JiraClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;

    let credentials = match config.jira.effective_auth_type() {
      AuthType::Onpremise => gouqi::Credentials::Bearer(token),
      _ => gouqi::Credentials::Basic(config.jira.email.clone(), token),
    };

    let client = gouqi::r#async::Jira::new(&config.jira.url, credentials)
      .map_err(|e| eyre!("Failed to create Jira client: {}", e))?;

    Ok(Self { client })
  }

  async fn fetch_project(&self, key: &str) -> Result<ApiProject> {
    let endpoint = format!("/project/{}", encode(key));

    self
      .client
      .get("api", &endpoint)
      .await
      .map_err(|e| eyre!("Failed to get project {}: {}", key, e))
  }
}

#[async_trait]
impl JiraApi for JiraClient {
  /// Get a user by account id
  async fn get_user(&self, account_id: &str) -> Result<User> {
    let endpoint = format!("/user?accountId={}", encode(account_id));

    let user: ApiUser = self
      .client
      .get("api", &endpoint)
      .await
      .map_err(|e| eyre!("Failed to get user {}: {}", account_id, e))?;

    Ok(user.into())
  }

  /// Search users by name or email fragment
  async fn search_users(&self, query: &str, max_results: u32) -> Result<Vec<User>> {
    let endpoint = format!(
      "/user/search?query={}&maxResults={}",
      encode(query),
      max_results
    );

    let users: Vec<ApiUser> = self
      .client
      .get("api", &endpoint)
      .await
      .map_err(|e| eyre!("Failed to search users: {}", e))?;

    Ok(users.into_iter().map(User::from).collect())
  }

  /// Users assignable to issues in every one of `project_keys`
  async fn find_assignable_users(
    &self,
    project_keys: &[String],
    query: Option<&str>,
    max_results: u32,
  ) -> Result<Vec<User>> {
    let mut endpoint = format!(
      "/user/assignable/multiProjectSearch?projectKeys={}&maxResults={}",
      encode(&project_keys.join(",")),
      max_results
    );
    if let Some(q) = query.filter(|q| !q.is_empty()) {
      endpoint.push_str(&format!("&query={}", encode(q)));
    }

    let users: Vec<ApiUser> = self
      .client
      .get("api", &endpoint)
      .await
      .map_err(|e| eyre!("Failed to find assignable users: {}", e))?;

    Ok(users.into_iter().map(User::from).collect())
  }

  /// Get project metadata by key
  async fn get_project(&self, key: &str) -> Result<Project> {
    let (project, _) = self.fetch_project(key).await?.into_parts();
    Ok(project)
  }

  /// Get all issue types visible to the user
  async fn get_issue_types(&self) -> Result<Vec<IssueType>> {
    let types: Vec<ApiIssueType> = self
      .client
      .get("api", "/issuetype")
      .await
      .map_err(|e| eyre!("Failed to get issue types: {}", e))?;

    Ok(types.into_iter().map(IssueType::from).collect())
  }

  /// Get the issue types available in a project
  async fn get_project_issue_types(&self, key: &str) -> Result<Vec<IssueType>> {
    let (_, issue_types) = self.fetch_project(key).await?.into_parts();
    Ok(issue_types)
  }

  /// Get all versions of a project
  async fn get_project_versions(&self, key: &str) -> Result<Vec<ProjectVersion>> {
    let endpoint = format!("/project/{}/versions", encode(key));

    let versions: Vec<ApiVersion> = self
      .client
      .get("api", &endpoint)
      .await
      .map_err(|e| eyre!("Failed to get versions for project {}: {}", key, e))?;

    Ok(versions.into_iter().map(ProjectVersion::from).collect())
  }
}

fn encode(value: &str) -> String {
  url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_values_are_encoded() {
    assert_eq!(encode("ada@acme.test"), "ada%40acme.test");
    assert_eq!(encode("a b&c"), "a+b%26c");
    assert_eq!(encode("PROJ"), "PROJ");
  }
}
