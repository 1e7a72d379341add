//! Policy/campaign configuration: distributions, campaigns and apt repositories.
//!
//! This is the static configuration an operator hands to the fleet: which
//! Debian distributions are buildable, which campaigns (suites) run against
//! them, and where their merge proposals should be gated. It is loaded once
//! at startup and handed around as a shared, read-only value.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub distribution: Vec<Distribution>,
    pub campaign: Vec<Campaign>,
    pub apt_repository: Vec<AptRepository>,
    pub database_location: Option<String>,
    pub redis_location: Option<String>,
    pub logs_location: Option<String>,
    pub artifact_location: Option<String>,
    pub git_location: Option<String>,
    pub bzr_location: Option<String>,
    pub committer: Option<String>,
}

impl Config {
    /// Mirrors the teacher's protobuf-generated `Config::new()`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Distribution {
    pub name: Option<String>,
    pub archive_mirror_uri: Option<String>,
    pub component: Vec<String>,
    pub chroot: Option<String>,
    pub sbuild_path: Option<String>,
    pub lintian_profile: String,
    pub lintian_suppress_tag: Vec<String>,
    pub signed_by: Option<String>,
    pub build_command: Option<String>,
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AptRepository {
    pub name: Option<String>,
    pub url: Option<String>,
    pub component: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeProposalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub value_threshold: Option<i32>,
    pub commit_message: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for MergeProposalConfig {
    fn default() -> Self {
        MergeProposalConfig {
            enabled: true,
            value_threshold: None,
            commit_message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebianBuild {
    pub base_distribution: Option<String>,
    pub build_distribution: Option<String>,
    pub build_suffix: Option<String>,
    pub build_command: Option<String>,
    pub chroot: Option<String>,
    pub extra_build_distribution: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericBuild {
    pub chroot: Option<String>,
}

/// The `build` oneof: a campaign is either a Debian build or a generic one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildConfig {
    DebianBuild(DebianBuild),
    GenericBuild(GenericBuild),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Campaign {
    pub name: Option<String>,
    pub branch_name: Option<String>,
    pub merge_proposal: MergeProposalConfig,
    #[serde(flatten)]
    pub build: Option<BuildConfig>,
}

impl Campaign {
    /// Campaign name, or the empty string if unset (mirrors proto3 getters).
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn has_debian_build(&self) -> bool {
        matches!(self.build, Some(BuildConfig::DebianBuild(_)))
    }

    pub fn has_generic_build(&self) -> bool {
        matches!(self.build, Some(BuildConfig::GenericBuild(_)))
    }

    /// The Debian build config, or a default one if this campaign isn't a Debian build.
    pub fn debian_build(&self) -> std::borrow::Cow<'_, DebianBuild> {
        match &self.build {
            Some(BuildConfig::DebianBuild(b)) => std::borrow::Cow::Borrowed(b),
            _ => std::borrow::Cow::Owned(DebianBuild::default()),
        }
    }

    /// The generic build config, or a default one if this campaign isn't a generic build.
    pub fn generic_build(&self) -> std::borrow::Cow<'_, GenericBuild> {
        match &self.build {
            Some(BuildConfig::GenericBuild(b)) => std::borrow::Cow::Borrowed(b),
            _ => std::borrow::Cow::Owned(GenericBuild::default()),
        }
    }
}

pub fn read_file(file_path: &std::path::Path) -> Result<Config, Box<dyn std::error::Error>> {
    let mut file = File::open(file_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    read_string(&contents)
}

pub fn read_readable<R: Read>(mut readable: R) -> Result<Config, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    readable.read_to_string(&mut contents)?;

    read_string(&contents)
}

pub fn read_string(contents: &str) -> Result<Config, Box<dyn std::error::Error>> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
}

impl Config {
    pub fn get_distribution(&self, name: &str) -> Option<&Distribution> {
        self.distribution
            .iter()
            .find(|d| d.name.as_deref() == Some(name))
    }

    pub fn get_campaign(&self, name: &str) -> Option<&Campaign> {
        self.campaign
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
    }

    pub fn find_campaign_by_branch_name(&self, branch_name: &str) -> Option<(&str, &str)> {
        for campaign in &self.campaign {
            if let Some(campaign_branch_name) = &campaign.branch_name {
                if branch_name == campaign_branch_name {
                    return Some((campaign.name.as_deref().unwrap_or(""), "main"));
                }
            }
        }
        None
    }

    pub async fn pg_pool(&self) -> std::result::Result<sqlx::PgPool, sqlx::Error> {
        if let Some(db_location) = self.database_location.as_ref() {
            sqlx::postgres::PgPool::connect(db_location.as_str()).await
        } else {
            sqlx::postgres::PgPool::connect_with(sqlx::postgres::PgConnectOptions::new()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_string() {
        let contents = r#"
distribution:
  - name: test
"#;
        let config = read_string(contents).unwrap();
        assert_eq!(config.distribution.len(), 1);
        assert_eq!(config.distribution[0].name, Some("test".to_string()));
    }

    #[test]
    fn test_read_readable() {
        let contents = "distribution:\n  - name: test\n";
        let cursor = Cursor::new(contents.as_bytes());
        let config = read_readable(cursor).unwrap();
        assert_eq!(config.distribution.len(), 1);
        assert_eq!(config.distribution[0].name, Some("test".to_string()));
    }

    #[test]
    fn test_get_distribution() {
        let config = read_string("distribution:\n  - name: test\n").unwrap();
        assert_eq!(
            config.get_distribution("test").unwrap().name,
            Some("test".to_string())
        );
        assert!(config.get_distribution("test2").is_none());
    }

    #[test]
    fn test_get_campaign() {
        let config = read_string("campaign:\n  - name: test-campaign\n").unwrap();
        assert_eq!(
            config.get_campaign("test-campaign").unwrap().name,
            Some("test-campaign".to_string())
        );
        assert!(config.get_campaign("nonexistent").is_none());
    }

    #[test]
    fn test_find_campaign_by_branch_name() {
        let config = read_string(
            "campaign:\n  - name: test-campaign\n    branch_name: feature-branch\n",
        )
        .unwrap();

        assert_eq!(
            config.find_campaign_by_branch_name("feature-branch"),
            Some(("test-campaign", "main"))
        );
        assert!(config
            .find_campaign_by_branch_name("nonexistent-branch")
            .is_none());
    }

    #[test]
    fn test_campaign_build_oneof() {
        let config = read_string(
            "campaign:\n  - name: unstable\n    debian_build:\n        base_distribution: unstable\n        build_suffix: \"+janitor\"\n",
        )
        .unwrap();
        let campaign = config.get_campaign("unstable").unwrap();
        assert!(campaign.has_debian_build());
        assert!(!campaign.has_generic_build());
        assert_eq!(
            campaign.debian_build().base_distribution.as_deref(),
            Some("unstable")
        );
    }

    #[test]
    fn test_empty_config() {
        let config = read_string("").unwrap();
        assert_eq!(config.distribution.len(), 0);
        assert_eq!(config.campaign.len(), 0);
        assert_eq!(config.apt_repository.len(), 0);
    }

    #[test]
    fn test_invalid_config() {
        let result = read_string("distribution: [this is not a distribution list");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pg_pool_with_database_location() {
        let config =
            read_string("database_location: postgresql://localhost/nonexistent\n").unwrap();
        let result = config.pg_pool().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pg_pool_without_database_location() {
        let config = read_string("").unwrap();
        let result = config.pg_pool().await;
        assert!(result.is_err());
    }
}
