//! GitHub REST v3 client
//!
//! The only platform that supports every operation: branch protection,
//! team access and repository settings.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::http::{build_client, endpoint, outcome_from_response, parse_api_base, read_page, secret_header};
use super::{
    Capabilities, ClientOptions, Platform, PlatformClient, PlatformError, RepoDescriptor,
    Visibility,
};
use crate::config::BranchProtection;
use crate::report::OutcomeStatus;

/// Repository fields read from `GET /orgs/{org}/repos`
#[derive(Debug, Deserialize)]
struct GitHubRepository {
    name: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    private: bool,
    visibility: Option<String>,
    default_branch: Option<String>,
}

impl From<GitHubRepository> for RepoDescriptor {
    fn from(repo: GitHubRepository) -> Self {
        let visibility = match repo.visibility.as_deref() {
            Some("internal") => Visibility::Internal,
            Some("private") => Visibility::Private,
            Some("public") => Visibility::Public,
            _ if repo.private => Visibility::Private,
            _ => Visibility::Public,
        };

        RepoDescriptor {
            name: repo.name,
            archived: repo.archived,
            fork: repo.fork,
            visibility,
            default_branch: repo.default_branch,
        }
    }
}

/// Map protection rules onto GitHub's branch protection payload.
///
/// `required_status_checks` is null unless status checks are required, and
/// push restrictions are always cleared.
pub fn protection_payload(protection: &BranchProtection) -> Value {
    let status_checks = if protection.require_status_checks {
        json!({
            "strict": protection.strict_status_checks,
            "contexts": protection.status_check_contexts,
        })
    } else {
        Value::Null
    };

    json!({
        "required_status_checks": status_checks,
        "enforce_admins": protection.enforce_admins,
        "required_pull_request_reviews": {
            "dismissal_restrictions": {},
            "dismiss_stale_reviews": protection.dismiss_stale_reviews,
            "require_code_owner_reviews": protection.require_code_owner_reviews,
            "required_approving_review_count": protection.required_reviews,
        },
        "restrictions": Value::Null,
        "allow_force_pushes": protection.allow_force_pushes,
        "allow_deletions": protection.allow_deletions,
    })
}

/// GitHub client scoped to one organization
pub struct GitHubClient {
    http: Client,
    organization: String,
    api_base: Url,
    page_size: u32,
}

impl GitHubClient {
    pub fn new(
        token: &str,
        organization: impl Into<String>,
        options: &ClientOptions,
    ) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, secret_header(&format!("token {}", token))?);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let api_base = options
            .api_base
            .as_deref()
            .unwrap_or(Platform::GitHub.default_api_base());

        Ok(Self {
            http: build_client(headers, options.timeout)?,
            organization: organization.into(),
            api_base: parse_api_base(api_base)?,
            page_size: options.page_size,
        })
    }

    fn repo_url(&self, repo: &str, rest: &[&str]) -> Url {
        let mut segments = vec!["repos", self.organization.as_str(), repo];
        segments.extend_from_slice(rest);
        endpoint(&self.api_base, &segments)
    }
}

#[async_trait]
impl PlatformClient for GitHubClient {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    fn organization(&self) -> &str {
        &self.organization
    }

    async fn list_repositories_page(&self, page: u32) -> Result<Vec<RepoDescriptor>, PlatformError> {
        let url = endpoint(&self.api_base, &["orgs", self.organization.as_str(), "repos"]);
        let page_param = page.to_string();
        let per_page = self.page_size.to_string();

        let response = self
            .http
            .get(url)
            .query(&[
                ("type", "all"),
                ("per_page", per_page.as_str()),
                ("page", page_param.as_str()),
            ])
            .send()
            .await?;

        let repos: Vec<GitHubRepository> = read_page(response).await?;
        Ok(repos.into_iter().map(RepoDescriptor::from).collect())
    }

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<OutcomeStatus, PlatformError> {
        let url = self.repo_url(repo, &["branches", branch, "protection"]);
        debug!("PUT {}", url);

        let response = self
            .http
            .put(url)
            .json(&protection_payload(protection))
            .send()
            .await?;

        outcome_from_response(response).await
    }

    async fn set_team_access(
        &self,
        repo: &str,
        team: &str,
        permission: &str,
    ) -> Result<OutcomeStatus, PlatformError> {
        let url = endpoint(
            &self.api_base,
            &[
                "orgs",
                self.organization.as_str(),
                "teams",
                team,
                "repos",
                self.organization.as_str(),
                repo,
            ],
        );
        debug!("PUT {}", url);

        let response = self
            .http
            .put(url)
            .json(&json!({ "permission": permission }))
            .send()
            .await?;

        outcome_from_response(response).await
    }

    async fn set_repository_settings(
        &self,
        repo: &str,
        settings: &Map<String, Value>,
    ) -> Result<OutcomeStatus, PlatformError> {
        let url = self.repo_url(repo, &[]);
        debug!("PATCH {}", url);

        let response = self.http.patch(url).json(settings).send().await?;

        outcome_from_response(response).await
    }
}
