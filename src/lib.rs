//! RepoWarden - Bulk repository policy enforcement
//!
//! RepoWarden applies one desired-state document (branch protection rules,
//! team access grants and repository settings) to every repository of an
//! organization on GitHub, GitLab or Bitbucket.
//!
//! ## Core Features
//!
//! - **Multi-Platform**: One client per hosting platform behind a common trait
//! - **Capability Gating**: Operations a platform lacks are skipped, never faked
//! - **Discovery**: Paginated enumeration with archive, fork, name and pattern filters
//! - **Failure Isolation**: A rejected operation never stops the rest of the run
//! - **Bounded Concurrency**: Repositories are processed by a fixed-size pool
//!
//! ## Modules
//!
//! - [`config`]: Desired-state document parsing and validation
//! - [`platform`]: Hosting platform clients
//! - [`discovery`]: Target repository resolution
//! - [`reconcile`]: Applying the desired state
//! - [`report`]: Per-operation outcomes and run summaries

pub mod config;
pub mod discovery;
pub mod platform;
pub mod reconcile;
pub mod report;

pub use config::{BranchProtection, Config};
pub use discovery::{RepoFilter, RepositoryDiscovery};
pub use platform::{
    create_client, Capabilities, ClientOptions, Credentials, Platform, PlatformClient,
    PlatformError, RepoDescriptor,
};
pub use reconcile::{CancelFlag, Reconciler, RunError};
pub use report::{Operation, OperationOutcome, OutcomeStatus, RunReport, RunSummary};
