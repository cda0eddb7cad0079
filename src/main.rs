use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use jcache::config::Config;
use jcache::jira::CachedJiraClient;
use jcache::logging;

#[derive(Parser, Debug)]
#[command(name = "jcache")]
#[command(about = "Cached Jira lookups for users, projects and issue types")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/jcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Look up a user by account id or email
  User { id_or_email: String },
  /// List users assignable in all of the given projects
  Assignable {
    #[arg(required = true)]
    projects: Vec<String>,
    /// Filter by name or email fragment
    #[arg(short, long)]
    query: Option<String>,
    #[arg(long, default_value_t = 50)]
    max_results: u32,
  },
  /// Show project metadata
  Project { key: String },
  /// List issue types, optionally for one project
  IssueTypes {
    #[arg(short, long)]
    project: Option<String>,
  },
  /// Resolve an issue type name to its id
  IssueTypeId { project: String, name: String },
  /// List project versions
  Versions {
    key: String,
    /// Only released versions
    #[arg(long, conflicts_with = "unreleased")]
    released: bool,
    /// Only unreleased versions
    #[arg(long)]
    unreleased: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.log_stderr)?;

  let config = Config::load(args.config.as_deref())?;
  let client = CachedJiraClient::new(&config)?;

  match args.command {
    Command::User { id_or_email } => {
      let user = client
        .get_user_by_identifier(&id_or_email)
        .await?
        .ok_or_else(|| eyre!("No user found for {}", id_or_email))?;
      print_json(&user)?;
    }
    Command::Assignable {
      projects,
      query,
      max_results,
    } => {
      let users = client
        .find_assignable_users(&projects, query.as_deref(), max_results)
        .await?;
      print_json(&users)?;
    }
    Command::Project { key } => print_json(&client.get_project(&key).await?)?,
    Command::IssueTypes { project } => {
      let types = match project {
        Some(key) => client.get_project_issue_types(&key).await?,
        None => client.get_issue_types().await?,
      };
      print_json(&types)?;
    }
    Command::IssueTypeId { project, name } => {
      let id = client.get_issue_type_id_by_name(&project, &name).await?;
      print_json(&id)?;
    }
    Command::Versions {
      key,
      released,
      unreleased,
    } => {
      let versions = if released || unreleased {
        client.get_versions_by_release(&key, released).await?
      } else {
        client.get_project_versions(&key).await?
      };
      print_json(&versions)?;
    }
  }

  debug!(stats = ?client.stats(), "cache stats");
  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out = serde_json::to_string_pretty(value)?;
  println!("{}", out);
  Ok(())
}
