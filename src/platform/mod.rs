//! Hosting platform abstraction
//!
//! One [`PlatformClient`] implementation per hosting platform translates the
//! four core operations (list repositories, protect a branch, grant team
//! access, update repository flags) into that platform's REST calls.
//!
//! Not every platform supports every operation. Each client publishes a
//! [`Capabilities`] descriptor and callers check it before invoking an
//! optional operation; calling an unsupported operation yields
//! [`PlatformError::Unsupported`].
//!
//! HTTP-level failures (4xx/5xx) of mutating operations are reported as
//! [`OutcomeStatus::Failed`] and never surface as `Err`. Only transport
//! failures, timeouts and capability misuse come back as errors.

pub mod bitbucket;
pub mod github;
pub mod gitlab;
mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{BranchProtection, Config};
use crate::report::OutcomeStatus;

pub use bitbucket::BitbucketClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;

/// Upper bound on pages fetched during one enumeration
pub const MAX_PAGES: u32 = 1000;

/// Supported hosting platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GitHub,
    GitLab,
    Bitbucket,
}

impl Platform {
    /// All supported platforms
    pub fn all() -> &'static [Platform] {
        &[Platform::GitHub, Platform::GitLab, Platform::Bitbucket]
    }

    /// Name used in configuration files and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Platform::GitHub => "github",
            Platform::GitLab => "gitlab",
            Platform::Bitbucket => "bitbucket",
        }
    }

    /// Public API base used when the configuration does not override it
    pub fn default_api_base(&self) -> &'static str {
        match self {
            Platform::GitHub => "https://api.github.com",
            Platform::GitLab => "https://gitlab.com/api/v4",
            Platform::Bitbucket => "https://api.bitbucket.org/2.0",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(Platform::GitHub),
            "gitlab" => Ok(Platform::GitLab),
            "bitbucket" => Ok(Platform::Bitbucket),
            other => Err(format!(
                "unsupported platform '{}' (expected github, gitlab or bitbucket)",
                other
            )),
        }
    }
}

/// Which optional operations a platform client supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub team_access: bool,
    pub repository_settings: bool,
}

impl Capabilities {
    /// Branch protection only
    pub const PROTECTION_ONLY: Capabilities = Capabilities {
        team_access: false,
        repository_settings: false,
    };

    /// Every operation
    pub const FULL: Capabilities = Capabilities {
        team_access: true,
        repository_settings: true,
    };
}

/// Already-resolved credentials for one platform
#[derive(Clone)]
pub enum Credentials {
    /// Personal or project access token
    Token(String),
    /// Username and app password
    Basic { username: String, password: String },
}

// Custom Debug to keep secrets out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Credentials::Token(..)"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Credentials::Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Repository visibility as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
    #[default]
    Unknown,
}

/// A repository targeted by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoDescriptor {
    /// Name or slug, unique within the organization
    pub name: String,
    pub archived: bool,
    pub fork: bool,
    pub visibility: Visibility,
    pub default_branch: Option<String>,
}

impl RepoDescriptor {
    /// Descriptor for a repository named explicitly in the configuration.
    ///
    /// Nothing is known about it until an operation touches the platform.
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            archived: false,
            fork: false,
            visibility: Visibility::Unknown,
            default_branch: None,
        }
    }
}

/// Errors from platform operations
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// Connection refused, DNS failure, TLS error and similar
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete within its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Non-success response to a read request
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The response body could not be interpreted
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Credentials cannot be used with this platform
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The configured API base is not a usable URL
    #[error("invalid API base '{0}'")]
    InvalidApiBase(String),

    /// Enumeration hit the page limit before reaching an empty page
    #[error("listing did not end after {pages} pages; raise run.page_size")]
    PageLimit { pages: u32 },

    /// The operation is not offered by this platform
    #[error("{operation} is not supported on {platform}")]
    Unsupported {
        platform: Platform,
        operation: &'static str,
    },
}

impl PlatformError {
    pub fn unsupported(platform: Platform, operation: &'static str) -> Self {
        PlatformError::Unsupported {
            platform,
            operation,
        }
    }

    /// Whether this error indicates a caller defect rather than an environmental failure
    pub fn is_capability_misuse(&self) -> bool {
        matches!(self, PlatformError::Unsupported { .. })
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout(err.to_string())
        } else if err.is_decode() {
            PlatformError::Decode(err.to_string())
        } else {
            PlatformError::Transport(err.to_string())
        }
    }
}

/// Connection settings shared by every client variant
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API base override; the platform default is used when `None`
    pub api_base: Option<String>,
    /// Timeout applied to every HTTP call
    pub timeout: Duration,
    /// Page size used for enumeration
    pub page_size: u32,
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_base: config.api_base.clone(),
            timeout: Duration::from_secs(config.run.timeout),
            page_size: config.run.page_size,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base: None,
            timeout: Duration::from_secs(30),
            page_size: 100,
        }
    }
}

/// The contract every hosting platform client implements.
///
/// Implementations hold one authenticated session against one organization
/// and keep no remote state between calls.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Platform this client talks to
    fn platform(&self) -> Platform;

    /// Optional operations this client supports
    fn capabilities(&self) -> Capabilities;

    /// Organization, group or workspace the client is scoped to
    fn organization(&self) -> &str;

    /// Protection fields this platform has no equivalent for and drops
    fn ignored_protection_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Fetch one page (1-based) of the organization's repositories
    async fn list_repositories_page(&self, page: u32) -> Result<Vec<RepoDescriptor>, PlatformError>;

    /// Enumerate every repository, stopping at the first empty page.
    ///
    /// Any failed page aborts the enumeration, as does running past
    /// [`MAX_PAGES`] without an empty page.
    async fn list_repositories(&self) -> Result<Vec<RepoDescriptor>, PlatformError> {
        debug!(
            "Fetching repositories for {} organization: {}",
            self.platform(),
            self.organization()
        );

        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let items = self.list_repositories_page(page).await?;
            if items.is_empty() {
                break;
            }

            repositories.extend(items);
            debug!(
                "Fetched page {} ({} repositories so far)",
                page,
                repositories.len()
            );

            // Never return a truncated listing
            if page >= MAX_PAGES {
                warn!(
                    "Reached maximum pagination limit ({} pages) for {}",
                    MAX_PAGES,
                    self.organization()
                );
                return Err(PlatformError::PageLimit { pages: MAX_PAGES });
            }
            page += 1;
        }

        info!(
            "Found {} repositories in {}",
            repositories.len(),
            self.organization()
        );
        Ok(repositories)
    }

    /// Apply protection rules to one branch (or branch pattern)
    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<OutcomeStatus, PlatformError>;

    /// Grant a team a permission level on a repository
    async fn set_team_access(
        &self,
        _repo: &str,
        _team: &str,
        _permission: &str,
    ) -> Result<OutcomeStatus, PlatformError> {
        Err(PlatformError::unsupported(self.platform(), "team access"))
    }

    /// Apply repository flags as a partial update
    async fn set_repository_settings(
        &self,
        _repo: &str,
        _settings: &Map<String, Value>,
    ) -> Result<OutcomeStatus, PlatformError> {
        Err(PlatformError::unsupported(self.platform(), "repository settings"))
    }
}

/// Create the client variant for a platform.
///
/// Fails when the credential kind does not match the platform: GitHub and
/// GitLab take a token, Bitbucket takes a username and app password.
pub fn create_client(
    platform: Platform,
    organization: &str,
    credentials: &Credentials,
    options: &ClientOptions,
) -> Result<Box<dyn PlatformClient>, PlatformError> {
    let client: Box<dyn PlatformClient> = match (platform, credentials) {
        (Platform::GitHub, Credentials::Token(token)) => {
            Box::new(GitHubClient::new(token, organization, options)?)
        }
        (Platform::GitLab, Credentials::Token(token)) => {
            Box::new(GitLabClient::new(token, organization, options)?)
        }
        (Platform::Bitbucket, Credentials::Basic { username, password }) => Box::new(
            BitbucketClient::new(username, password, organization, options)?,
        ),
        (platform, _) => {
            return Err(PlatformError::InvalidCredentials(format!(
                "{} requires {}",
                platform,
                match platform {
                    Platform::Bitbucket => "a username and app password",
                    _ => "an access token",
                }
            )))
        }
    };

    debug!("Created {} client for {}", platform, organization);
    Ok(client)
}
