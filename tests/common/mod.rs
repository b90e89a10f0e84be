//! Common test utilities and helpers for RepoWarden tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use repowarden::config::BranchProtection;
use repowarden::{
    Capabilities, Config, OutcomeStatus, Platform, PlatformClient, PlatformError, RepoDescriptor,
};

/// How a scripted call misbehaves
#[derive(Debug, Clone)]
pub enum Fault {
    /// The platform answers with this HTTP status
    Http(u16),
    /// The connection fails before a response arrives
    Transport,
    /// The client gives up waiting for a response
    Timeout,
    /// The call succeeds after sleeping this long
    Delay(Duration),
}

/// In-memory platform client that records every call.
///
/// Calls are recorded as short strings: `protect <repo> <branch>`,
/// `team <repo> <team> <permission>` and `settings <repo>`.
pub struct FakeClient {
    platform: Platform,
    capabilities: Capabilities,
    /// Claim capabilities but still answer optional operations with `Unsupported`
    misreport_capabilities: bool,
    pages: Vec<Vec<RepoDescriptor>>,
    page_fault: Option<(u32, Fault)>,
    faults: HashMap<String, Fault>,
    ignored_fields: &'static [&'static str],
    calls: Mutex<Vec<String>>,
    page_requests: Mutex<Vec<u32>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeClient {
    pub fn new(platform: Platform, capabilities: Capabilities) -> Self {
        Self {
            platform,
            capabilities,
            misreport_capabilities: false,
            pages: Vec::new(),
            page_fault: None,
            faults: HashMap::new(),
            ignored_fields: &[],
            calls: Mutex::new(Vec::new()),
            page_requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn github() -> Self {
        Self::new(Platform::GitHub, Capabilities::FULL)
    }

    pub fn gitlab() -> Self {
        Self::new(Platform::GitLab, Capabilities::PROTECTION_ONLY)
    }

    /// Serve these repositories on a single page
    pub fn with_repos(self, repos: Vec<RepoDescriptor>) -> Self {
        self.with_pages(vec![repos])
    }

    pub fn with_names(self, names: &[&str]) -> Self {
        self.with_repos(names.iter().map(|n| RepoDescriptor::declared(*n)).collect())
    }

    /// Serve these pages in order, followed by empty pages
    pub fn with_pages(mut self, pages: Vec<Vec<RepoDescriptor>>) -> Self {
        self.pages = pages;
        self
    }

    /// Answer this listing page with a 500
    pub fn failing_page(self, page: u32) -> Self {
        self.page_fault(page, Fault::Http(500))
    }

    pub fn page_fault(mut self, page: u32, fault: Fault) -> Self {
        self.page_fault = Some((page, fault));
        self
    }

    pub fn fault(mut self, call: &str, fault: Fault) -> Self {
        self.faults.insert(call.to_string(), fault);
        self
    }

    pub fn ignoring(mut self, fields: &'static [&'static str]) -> Self {
        self.ignored_fields = fields;
        self
    }

    pub fn misreporting_capabilities(mut self) -> Self {
        self.capabilities = Capabilities::FULL;
        self.misreport_capabilities = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, repo: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').nth(1) == Some(repo))
            .collect()
    }

    pub fn page_requests(&self) -> Vec<u32> {
        self.page_requests.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn mutate(&self, call: String) -> Result<OutcomeStatus, PlatformError> {
        self.calls.lock().unwrap().push(call.clone());

        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        match self.faults.get(&call) {
            Some(Fault::Http(status)) => Ok(OutcomeStatus::failed(format!(
                "HTTP {}: rejected",
                status
            ))),
            Some(fault @ (Fault::Transport | Fault::Timeout)) => Err(fault_error(fault)),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(OutcomeStatus::Applied)
            }
            None => {
                // Yield so concurrently scheduled repositories interleave
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(OutcomeStatus::Applied)
            }
        }
    }
}

/// Counts a call as in flight until dropped, including when a timeout
/// cancels it mid-call
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

fn fault_error(fault: &Fault) -> PlatformError {
    match fault {
        Fault::Http(status) => PlatformError::Api {
            status: *status,
            message: "rejected".to_string(),
        },
        Fault::Timeout => PlatformError::Timeout("operation timed out".to_string()),
        Fault::Transport | Fault::Delay(_) => {
            PlatformError::Transport("connection reset by peer".to_string())
        }
    }
}

#[async_trait]
impl PlatformClient for FakeClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn organization(&self) -> &str {
        "acme"
    }

    fn ignored_protection_fields(&self) -> &'static [&'static str] {
        self.ignored_fields
    }

    async fn list_repositories_page(&self, page: u32) -> Result<Vec<RepoDescriptor>, PlatformError> {
        self.page_requests.lock().unwrap().push(page);

        match &self.page_fault {
            Some((failing, Fault::Delay(delay))) if *failing == page => {
                tokio::time::sleep(*delay).await;
            }
            Some((failing, fault)) if *failing == page => return Err(fault_error(fault)),
            _ => {}
        }

        let index = (page - 1) as usize;
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        _protection: &BranchProtection,
    ) -> Result<OutcomeStatus, PlatformError> {
        self.mutate(format!("protect {} {}", repo, branch)).await
    }

    async fn set_team_access(
        &self,
        repo: &str,
        team: &str,
        permission: &str,
    ) -> Result<OutcomeStatus, PlatformError> {
        if self.misreport_capabilities {
            return Err(PlatformError::unsupported(self.platform, "team access"));
        }
        self.mutate(format!("team {} {} {}", repo, team, permission)).await
    }

    async fn set_repository_settings(
        &self,
        repo: &str,
        _settings: &Map<String, Value>,
    ) -> Result<OutcomeStatus, PlatformError> {
        if self.misreport_capabilities {
            return Err(PlatformError::unsupported(self.platform, "repository settings"));
        }
        self.mutate(format!("settings {}", repo)).await
    }
}

/// Repository descriptor with explicit archive and fork flags
pub fn repo(name: &str, archived: bool, fork: bool) -> RepoDescriptor {
    RepoDescriptor {
        archived,
        fork,
        ..RepoDescriptor::declared(name)
    }
}

/// `count` repositories named `repo-<page>-<n>`
pub fn page_of(page: usize, count: usize) -> Vec<RepoDescriptor> {
    (0..count)
        .map(|n| RepoDescriptor::declared(format!("repo-{}-{}", page, n)))
        .collect()
}

/// Config protecting `branches`, granting `teams`, with the default settings
pub fn config_with(branches: &[&str], teams: &[(&str, &str)]) -> Config {
    let mut config = Config::new(Platform::GitHub, "acme");
    config.protected_branches = branches.iter().map(|b| b.to_string()).collect();
    config.team_access = teams
        .iter()
        .map(|(team, permission)| (team.to_string(), permission.to_string()))
        .collect();
    config
}

/// Minimal valid YAML document for CLI tests
pub fn minimal_yaml(api_base: &str) -> String {
    format!(
        r#"
platform: github
organization: acme
api_base: "{}"
protected_branches: [main]
team_access:
  developers: push
repositories: [web]
run:
  timeout: 5
"#,
        api_base
    )
}
