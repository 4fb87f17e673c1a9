use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::path::PathBuf;

use starlist::github::{DefaultClient, RefreshPolicy, RepositorySet};
use starlist::{CacheResult, Config};

#[derive(Parser, Debug)]
#[command(name = "starlist")]
#[command(about = "Fetch and cache the repositories a GitHub user has starred")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/starlist/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List starred repositories
  Fetch {
    /// GitHub username (default: github.username from the config file)
    #[arg(short, long)]
    user: Option<String>,

    /// use-cache, prefer-cache-on-failure or force-refresh
    #[arg(short, long)]
    policy: Option<RefreshPolicy>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Also fetch each repository's README
    #[arg(long)]
    readmes: bool,
  },
  /// Show the remaining GitHub API budget
  Limits,
  /// Delete expired cache entries
  Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = starlist::logging::init(&config.logging)?;

  let client = DefaultClient::new(&config)?;

  match args.command {
    Command::Fetch {
      user,
      policy,
      json,
      readmes,
    } => {
      let user = user
        .or_else(|| config.github.username.clone())
        .ok_or_else(|| eyre!("No user given. Pass --user or set github.username in the config file."))?;
      let policy = policy.unwrap_or(config.acquisition.refresh_policy);

      let result = client.get_repositories(&user, policy).await?;
      let readmes = if readmes {
        Some(client.readmes(&result.data.repositories).await)
      } else {
        None
      };

      if json {
        print_json(&user, &result, readmes.as_deref())?;
      } else {
        print_table(&user, &result, readmes.as_deref());
      }
    }
    Command::Limits => {
      let snapshot = client.check_rate_limit().await?;
      let limit = snapshot
        .limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| "?".to_string());
      println!(
        "{}/{} requests remaining, resets at {}",
        snapshot.remaining,
        limit,
        snapshot.reset_at.format("%Y-%m-%d %H:%M:%S UTC")
      );
    }
    Command::Prune => {
      let removed = client.purge_expired()?;
      println!("Removed {} expired cache entries", removed);
    }
  }

  Ok(())
}

type ReadmeResults = [(u64, starlist::Result<starlist::github::Readme>)];

fn print_table(user: &str, result: &CacheResult<RepositorySet>, readmes: Option<&ReadmeResults>) {
  let set = &result.data;
  for repo in &set.repositories {
    println!(
      "{:>7}  {:<50}  {}",
      repo.stargazers_count,
      repo.full_name,
      repo.language.as_deref().unwrap_or("-")
    );
  }

  let mut summary = format!(
    "\n{} starred repositories for {} (source: {}",
    set.repositories.len(),
    user,
    result.source
  );
  if let Some(cached_at) = result.cached_at {
    summary.push_str(&format!(", cached {}", cached_at.format("%Y-%m-%d %H:%M UTC")));
  }
  summary.push(')');
  if set.truncated {
    summary.push_str(", truncated at the page limit");
  }
  if set.dropped > 0 {
    summary.push_str(&format!(", {} invalid records dropped", set.dropped));
  }
  println!("{}", summary);

  if let Some(readmes) = readmes {
    let found = readmes
      .iter()
      .filter(|(_, r)| matches!(r, Ok(readme) if readme.content.is_some()))
      .count();
    let failed = readmes.iter().filter(|(_, r)| r.is_err()).count();
    println!("{} READMEs found, {} lookups failed", found, failed);
  }
}

fn print_json(
  user: &str,
  result: &CacheResult<RepositorySet>,
  readmes: Option<&ReadmeResults>,
) -> Result<()> {
  let mut output = json!({
    "user": user,
    "source": result.source.to_string(),
    "cached_at": result.cached_at,
    "truncated": result.data.truncated,
    "dropped": result.data.dropped,
    "repositories": result.data.repositories,
  });

  if let Some(readmes) = readmes {
    let entries: Vec<_> = readmes
      .iter()
      .map(|(id, r)| match r {
        Ok(readme) => json!({ "id": id, "full_name": readme.full_name, "content": readme.content }),
        Err(e) => json!({ "id": id, "error": e.to_string() }),
      })
      .collect();
    output["readmes"] = json!(entries);
  }

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}
