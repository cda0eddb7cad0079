pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cache::JiraQueryKey;
pub use cached_client::CachedJiraClient;
pub use client::{JiraApi, JiraClient};
pub use types::{IssueType, Project, ProjectVersion, User};
