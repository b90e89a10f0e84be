//! Bitbucket Cloud REST 2.0 client
//!
//! Supports branch protection only, expressed as a single
//! `require_approvals_to_merge` branch restriction per pattern.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{build_client, endpoint, outcome_from_response, parse_api_base, read_page};
use super::{
    Capabilities, ClientOptions, Platform, PlatformClient, PlatformError, RepoDescriptor,
    Visibility,
};
use crate::config::BranchProtection;
use crate::report::OutcomeStatus;

/// Fields of [`BranchProtection`] a merge-approval restriction cannot express
const IGNORED_FIELDS: &[&str] = &[
    "require_code_owner_reviews",
    "dismiss_stale_reviews",
    "require_status_checks",
    "strict_status_checks",
    "status_check_contexts",
    "enforce_admins",
    "allow_force_pushes",
    "allow_deletions",
];

#[derive(Debug, Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    values: Vec<BitbucketRepository>,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepository {
    slug: String,
    #[serde(default)]
    is_private: bool,
    parent: Option<Value>,
    mainbranch: Option<MainBranch>,
}

#[derive(Debug, Deserialize)]
struct MainBranch {
    name: String,
}

impl From<BitbucketRepository> for RepoDescriptor {
    fn from(repo: BitbucketRepository) -> Self {
        RepoDescriptor {
            name: repo.slug,
            // Bitbucket Cloud has no archived state
            archived: false,
            fork: repo.parent.as_ref().is_some_and(|parent| !parent.is_null()),
            visibility: if repo.is_private {
                Visibility::Private
            } else {
                Visibility::Public
            },
            default_branch: repo.mainbranch.map(|branch| branch.name),
        }
    }
}

/// Map protection rules onto a Bitbucket branch restriction
pub fn protection_payload(branch: &str, protection: &BranchProtection) -> Value {
    json!({
        "kind": "require_approvals_to_merge",
        "branch_match_kind": "glob",
        "pattern": branch,
        "value": protection.required_reviews,
    })
}

/// Bitbucket client scoped to one workspace
pub struct BitbucketClient {
    http: Client,
    username: String,
    password: String,
    workspace: String,
    api_base: Url,
    page_size: u32,
}

impl BitbucketClient {
    pub fn new(
        username: &str,
        password: &str,
        workspace: impl Into<String>,
        options: &ClientOptions,
    ) -> Result<Self, PlatformError> {
        if username.is_empty() || username.contains(':') {
            return Err(PlatformError::InvalidCredentials(
                "Bitbucket username must be non-empty and must not contain ':'".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let api_base = options
            .api_base
            .as_deref()
            .unwrap_or(Platform::Bitbucket.default_api_base());

        Ok(Self {
            http: build_client(headers, options.timeout)?,
            username: username.to_string(),
            password: password.to_string(),
            workspace: workspace.into(),
            api_base: parse_api_base(api_base)?,
            page_size: options.page_size,
        })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }
}

#[async_trait]
impl PlatformClient for BitbucketClient {
    fn platform(&self) -> Platform {
        Platform::Bitbucket
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PROTECTION_ONLY
    }

    fn organization(&self) -> &str {
        &self.workspace
    }

    fn ignored_protection_fields(&self) -> &'static [&'static str] {
        IGNORED_FIELDS
    }

    async fn list_repositories_page(&self, page: u32) -> Result<Vec<RepoDescriptor>, PlatformError> {
        let url = endpoint(&self.api_base, &["repositories", self.workspace.as_str()]);
        let page_param = page.to_string();
        let page_len = self.page_size.to_string();

        let response = self
            .request(Method::GET, url)
            .query(&[("pagelen", page_len.as_str()), ("page", page_param.as_str())])
            .send()
            .await?;

        let page: RepositoryPage = read_page(response).await?;
        Ok(page.values.into_iter().map(RepoDescriptor::from).collect())
    }

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<OutcomeStatus, PlatformError> {
        let url = endpoint(
            &self.api_base,
            &[
                "repositories",
                self.workspace.as_str(),
                repo,
                "branch-restrictions",
            ],
        );
        debug!("POST {}", url);

        let response = self
            .request(Method::POST, url)
            .json(&protection_payload(branch, protection))
            .send()
            .await?;

        outcome_from_response(response).await
    }
}
