//! GitLab REST v4 client
//!
//! Supports branch protection only. Projects are addressed by their
//! URL-encoded `group/project` path.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{build_client, endpoint, outcome_from_response, parse_api_base, read_page, secret_header};
use super::{
    Capabilities, ClientOptions, Platform, PlatformClient, PlatformError, RepoDescriptor,
    Visibility,
};
use crate::config::BranchProtection;
use crate::report::OutcomeStatus;

/// GitLab access level: no one
const NO_ACCESS: u8 = 0;
/// GitLab access level: developers and maintainers
const DEVELOPER_ACCESS: u8 = 30;

/// Fields of [`BranchProtection`] GitLab's protected branches API has no equivalent for
const IGNORED_FIELDS: &[&str] = &[
    "required_reviews",
    "dismiss_stale_reviews",
    "require_status_checks",
    "strict_status_checks",
    "status_check_contexts",
    "enforce_admins",
    "allow_deletions",
];

#[derive(Debug, Deserialize)]
struct GitLabProject {
    path: String,
    #[serde(default)]
    archived: bool,
    forked_from_project: Option<Value>,
    visibility: Option<String>,
    default_branch: Option<String>,
}

impl From<GitLabProject> for RepoDescriptor {
    fn from(project: GitLabProject) -> Self {
        let visibility = match project.visibility.as_deref() {
            Some("public") => Visibility::Public,
            Some("private") => Visibility::Private,
            Some("internal") => Visibility::Internal,
            _ => Visibility::Unknown,
        };

        RepoDescriptor {
            name: project.path,
            archived: project.archived,
            fork: project
                .forked_from_project
                .as_ref()
                .is_some_and(|parent| !parent.is_null()),
            visibility,
            default_branch: project.default_branch,
        }
    }
}

/// Map protection rules onto GitLab's protected branch payload.
///
/// Pushes are closed to everyone unless force pushes are allowed; merges are
/// open to developers.
pub fn protection_payload(branch: &str, protection: &BranchProtection) -> Value {
    let push_access_level = if protection.allow_force_pushes {
        DEVELOPER_ACCESS
    } else {
        NO_ACCESS
    };

    json!({
        "name": branch,
        "push_access_level": push_access_level,
        "merge_access_level": DEVELOPER_ACCESS,
        "allow_force_push": protection.allow_force_pushes,
        "code_owner_approval_required": protection.require_code_owner_reviews,
    })
}

/// GitLab client scoped to one group
pub struct GitLabClient {
    http: Client,
    group: String,
    api_base: Url,
    page_size: u32,
}

impl GitLabClient {
    pub fn new(
        token: &str,
        group: impl Into<String>,
        options: &ClientOptions,
    ) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        headers.insert("private-token", secret_header(token)?);

        let api_base = options
            .api_base
            .as_deref()
            .unwrap_or(Platform::GitLab.default_api_base());

        Ok(Self {
            http: build_client(headers, options.timeout)?,
            group: group.into(),
            api_base: parse_api_base(api_base)?,
            page_size: options.page_size,
        })
    }

    fn project_id(&self, repo: &str) -> String {
        format!("{}/{}", self.group, repo)
    }
}

#[async_trait]
impl PlatformClient for GitLabClient {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PROTECTION_ONLY
    }

    fn organization(&self) -> &str {
        &self.group
    }

    fn ignored_protection_fields(&self) -> &'static [&'static str] {
        IGNORED_FIELDS
    }

    async fn list_repositories_page(&self, page: u32) -> Result<Vec<RepoDescriptor>, PlatformError> {
        let url = endpoint(&self.api_base, &["groups", self.group.as_str(), "projects"]);
        let page_param = page.to_string();
        let per_page = self.page_size.to_string();

        let response = self
            .http
            .get(url)
            .query(&[("per_page", per_page.as_str()), ("page", page_param.as_str())])
            .send()
            .await?;

        let projects: Vec<GitLabProject> = read_page(response).await?;
        Ok(projects.into_iter().map(RepoDescriptor::from).collect())
    }

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<OutcomeStatus, PlatformError> {
        let project_id = self.project_id(repo);
        let url = endpoint(
            &self.api_base,
            &["projects", project_id.as_str(), "protected_branches"],
        );
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .json(&protection_payload(branch, protection))
            .send()
            .await?;

        outcome_from_response(response).await
    }
}
