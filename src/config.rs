use anyhow::{anyhow, bail, Context, Result};
use dirs::config_dir;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::platform::Platform;

/// The desired-state document applied to every target repository
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Hosting platform the run targets
    pub platform: Platform,

    /// Organization (GitHub), group (GitLab) or workspace (Bitbucket)
    pub organization: String,

    /// API base override for enterprise or self-hosted installations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Branch names or patterns to protect, in application order
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,

    /// Protection rules applied to every protected branch
    #[serde(default)]
    pub branch_protection: BranchProtection,

    /// Team name to permission level, passed to the platform as-is
    #[serde(default)]
    pub team_access: BTreeMap<String, String>,

    /// Repository flags sent verbatim as a partial update
    #[serde(default = "default_repo_settings")]
    pub repo_settings: Map<String, Value>,

    /// Explicit target list; empty means discover every repository
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Discovery filters, ignored when `repositories` is set
    #[serde(default)]
    pub filters: FilterConfig,

    /// Execution settings
    #[serde(default)]
    pub run: RunConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Platform-neutral branch protection rules
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BranchProtection {
    /// Number of approving reviews required before merge
    #[serde(default = "default_required_reviews")]
    pub required_reviews: u32,

    /// Require review from code owners
    #[serde(default)]
    pub require_code_owner_reviews: bool,

    /// Dismiss approvals when new commits are pushed
    #[serde(default = "default_true")]
    pub dismiss_stale_reviews: bool,

    /// Require status checks to pass before merging
    #[serde(default = "default_true")]
    pub require_status_checks: bool,

    /// Require the branch to be up to date before merging
    #[serde(default = "default_true")]
    pub strict_status_checks: bool,

    /// Status check contexts that must pass
    #[serde(default)]
    pub status_check_contexts: Vec<String>,

    /// Apply the rules to administrators too
    #[serde(default)]
    pub enforce_admins: bool,

    /// Allow force pushes to the branch
    #[serde(default)]
    pub allow_force_pushes: bool,

    /// Allow the branch to be deleted
    #[serde(default)]
    pub allow_deletions: bool,
}

/// Repository discovery filters
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Repository names to skip
    #[serde(default)]
    pub exclude_repos: Vec<String>,

    /// Regular expression a repository name must match to be kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_pattern: Option<String>,

    /// Skip archived repositories
    #[serde(default = "default_true")]
    pub exclude_archived: bool,

    /// Skip forked repositories
    #[serde(default)]
    pub exclude_forks: bool,
}

/// Execution settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Maximum number of repositories processed at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single API call in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Page size used when enumerating repositories
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_protected_branches() -> Vec<String> {
    vec![
        "main".to_string(),
        "master".to_string(),
        "production".to_string(),
    ]
}
fn default_required_reviews() -> u32 {
    1
}
fn default_repo_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("has_issues".to_string(), Value::Bool(true));
    settings.insert("has_projects".to_string(), Value::Bool(true));
    settings.insert("has_wiki".to_string(), Value::Bool(false));
    settings.insert("allow_squash_merge".to_string(), Value::Bool(true));
    settings.insert("allow_merge_commit".to_string(), Value::Bool(true));
    settings.insert("allow_rebase_merge".to_string(), Value::Bool(false));
    settings.insert("delete_branch_on_merge".to_string(), Value::Bool(true));
    settings
}
fn default_max_parallel() -> usize {
    4
}
fn default_timeout() -> u64 {
    30
}
fn default_page_size() -> u32 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Largest page size every supported platform accepts
pub const MAX_PAGE_SIZE: u32 = 100;

impl Default for BranchProtection {
    fn default() -> Self {
        Self {
            required_reviews: default_required_reviews(),
            require_code_owner_reviews: false,
            dismiss_stale_reviews: default_true(),
            require_status_checks: default_true(),
            strict_status_checks: default_true(),
            status_check_contexts: Vec::new(),
            enforce_admins: false,
            allow_force_pushes: false,
            allow_deletions: false,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            exclude_repos: Vec::new(),
            include_pattern: None,
            exclude_archived: default_true(),
            exclude_forks: false,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout: default_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Create a document with default rules for one platform and organization
    pub fn new(platform: Platform, organization: impl Into<String>) -> Self {
        Self {
            platform,
            organization: organization.into(),
            api_base: None,
            protected_branches: default_protected_branches(),
            branch_protection: BranchProtection::default(),
            team_access: BTreeMap::new(),
            repo_settings: default_repo_settings(),
            repositories: Vec::new(),
            filters: FilterConfig::default(),
            run: RunConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load and validate configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Invalid desired-state document")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repowarden").join("config.yml"))
    }

    /// Expand `~` and environment variables in a user supplied path
    pub fn expand_path(raw: &str) -> Result<PathBuf> {
        let expanded = shellexpand::full(raw)
            .with_context(|| format!("Failed to expand path: {}", raw))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// Check the document for structural problems.
    ///
    /// Runs before any network call; semantic validity of team permission
    /// levels against the target platform is not checked here.
    pub fn validate(&self) -> Result<()> {
        if self.organization.trim().is_empty() {
            bail!("organization must not be empty");
        }

        if let Some(api_base) = &self.api_base {
            if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
                bail!("api_base must be an http(s) URL, got '{}'", api_base);
            }
        }

        let mut seen = HashSet::new();
        for branch in &self.protected_branches {
            if branch.trim().is_empty() {
                bail!("protected_branches must not contain empty names");
            }
            if !seen.insert(branch.as_str()) {
                bail!("protected branch '{}' is listed more than once", branch);
            }
        }

        for (team, permission) in &self.team_access {
            if team.trim().is_empty() {
                bail!("team_access contains an empty team name");
            }
            if permission.trim().is_empty() {
                bail!("team_access permission for '{}' must not be empty", team);
            }
        }

        if self.repositories.iter().any(|name| name.trim().is_empty()) {
            bail!("repositories must not contain empty names");
        }

        if let Some(pattern) = &self.filters.include_pattern {
            Regex::new(pattern)
                .map_err(|e| anyhow!("include_pattern '{}' is not a valid regex: {}", pattern, e))?;
        }

        if self.run.max_parallel == 0 {
            bail!("run.max_parallel must be at least 1");
        }
        if self.run.timeout == 0 {
            bail!("run.timeout must be at least 1 second");
        }
        if self.run.page_size == 0 || self.run.page_size > MAX_PAGE_SIZE {
            bail!("run.page_size must be between 1 and {}", MAX_PAGE_SIZE);
        }

        Ok(())
    }

    /// Whether the target set comes from the explicit repository list
    pub fn uses_explicit_repositories(&self) -> bool {
        !self.repositories.is_empty()
    }
}
