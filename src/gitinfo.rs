//! Source-control metadata exposed to templates as `.git`.
//!
//! Collected once per build from the `git` CLI. Every field degrades to a
//! placeholder when git is unavailable or the directory is not a repository;
//! missing metadata never fails a build.

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

static FETCH_REMOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+)\s+\(fetch\)$").expect("remote pattern is valid"));

pub const NO_TAGS: &str = "x.notags";
const UNKNOWN: &str = "unknown";

/// Read-only git metadata for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitInfo {
    /// Number of commits reachable from HEAD.
    pub revision_count: String,
    /// `git describe --tags --long`, e.g. `1.2-40-gabcdef`.
    pub project_version: String,
    /// First describe segment plus revision count, e.g. `1.2.42`.
    pub version: String,
    /// Committer date of HEAD, in UTC.
    pub date: String,
    /// Fetch URL of the first remote.
    pub repository: String,
}

impl GitInfo {
    /// Collect metadata for the repository containing `dir`.
    pub fn collect(dir: &Path) -> Self {
        let revision_count = git(dir, &["log", "--oneline"])
            .map(|out| count_revisions(&out).to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let project_version = git(dir, &["describe", "--tags", "--long"])
            .map(|out| out.trim().to_string())
            .unwrap_or_else(|| NO_TAGS.to_string());
        let date = git(dir, &["log", "-1", "--format=%cd"])
            .map(|out| out.trim().to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let repository = git(dir, &["remote", "-v"])
            .and_then(|out| fetch_url(&out))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let info = Self {
            version: version(&project_version, &revision_count),
            revision_count,
            project_version,
            date,
            repository,
        };
        tracing::info!(version = %info.version, date = %info.date, "git metadata");
        info
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).env("TZ", "UTC").current_dir(dir).output() {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(?args, error = %err, "cannot run git");
            return None;
        }
    };
    if !output.status.success() {
        tracing::warn!(
            ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git failed"
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn count_revisions(log: &str) -> usize {
    log.lines().filter(|line| !line.trim().is_empty()).count()
}

/// `<first describe segment>.<revision count>`.
fn version(project_version: &str, revision_count: &str) -> String {
    let major_minor = project_version.split('-').next().unwrap_or(project_version);
    format!("{major_minor}.{revision_count}")
}

fn fetch_url(remotes: &str) -> Option<String> {
    remotes
        .lines()
        .find_map(|line| FETCH_REMOTE.captures(line.trim_end()))
        .and_then(|caps| caps.get(1))
        .map(|url| url.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counts_nonblank_log_lines() {
        assert_eq!(count_revisions("abc123 Fix\ndef456 Add\n0a1b2c Init\n"), 3);
        assert_eq!(count_revisions(""), 0);
    }

    #[test]
    fn version_joins_describe_prefix_and_count() {
        assert_eq!(version("1.2-40-gabcdef", "42"), "1.2.42");
        assert_eq!(version(NO_TAGS, "7"), "x.notags.7");
    }

    #[test]
    fn fetch_url_takes_first_fetch_remote() {
        let remotes = "origin\tgit@example.com:site.git (push)\n\
                       origin\thttps://example.com/site.git (fetch)\n\
                       mirror\thttps://mirror.example.com/site.git (fetch)\n";
        assert_eq!(fetch_url(remotes).as_deref(), Some("https://example.com/site.git"));
        assert_eq!(fetch_url("origin\tx (push)\n"), None);
    }

    #[test]
    fn outside_a_repository_falls_back_to_placeholders() {
        let tmp = TempDir::new().unwrap();
        let info = GitInfo::collect(tmp.path());
        assert_eq!(info.project_version, NO_TAGS);
        assert_eq!(info.repository, UNKNOWN);
        assert!(info.version.starts_with("x.notags."));
    }
}
