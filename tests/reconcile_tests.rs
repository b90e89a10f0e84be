//! End-to-end reconciler behavior against a scripted platform client

mod common;

use assert_matches::assert_matches;
use std::sync::Arc;
use std::time::Duration;

use common::{config_with, page_of, repo, FakeClient, Fault};
use repowarden::platform::MAX_PAGES;
use repowarden::report::{Operation, Phase};
use repowarden::{Capabilities, CancelFlag, Config, OutcomeStatus, PlatformError, Reconciler, RunError};

fn reconciler(client: &Arc<FakeClient>, config: Config) -> Reconciler {
    Reconciler::new(client.clone(), Arc::new(config)).expect("reconciler should build")
}

fn statuses(report: &repowarden::RunReport, repo: &str) -> Vec<(String, OutcomeStatus)> {
    report
        .outcomes()
        .filter(|o| o.repository == repo)
        .map(|o| (o.operation.to_string(), o.status.clone()))
        .collect()
}

#[tokio::test]
async fn test_operations_run_in_phase_order() {
    let client = Arc::new(FakeClient::github().with_names(&["web"]));
    let config = config_with(
        &["main", "production"],
        &[("developers", "push"), ("admins", "admin")],
    );

    let report = reconciler(&client, config).run().await.unwrap();

    assert_eq!(
        client.calls_for("web"),
        vec![
            "protect web main",
            "protect web production",
            "team web admins admin",
            "team web developers push",
            "settings web",
        ]
    );

    let phases: Vec<Phase> = report.outcomes().map(|o| o.operation.phase()).collect();
    let mut sorted = phases.clone();
    sorted.sort();
    assert_eq!(phases, sorted);
    assert!(!report.has_failures());
}

#[test]
fn test_plan_follows_capabilities() {
    let client = Arc::new(FakeClient::github());
    let config = config_with(&["main", "production"], &[("developers", "push")]);
    let reconciler = reconciler(&client, config);

    let full: Vec<Phase> = reconciler
        .plan(Capabilities::FULL)
        .iter()
        .map(Operation::phase)
        .collect();
    assert_eq!(
        full,
        vec![
            Phase::BranchProtection,
            Phase::BranchProtection,
            Phase::TeamAccess,
            Phase::Settings,
        ]
    );

    let limited = reconciler.plan(Capabilities::PROTECTION_ONLY);
    assert_eq!(limited.len(), 2);
    assert!(limited.iter().all(|op| op.phase() == Phase::BranchProtection));
}

#[tokio::test]
async fn test_rejected_protection_does_not_stop_other_operations() {
    let client = Arc::new(
        FakeClient::github()
            .with_names(&["web", "api"])
            .fault("protect web main", Fault::Http(403)),
    );
    let config = config_with(&["main", "production"], &[("developers", "push")]);

    let report = reconciler(&client, config).run().await.unwrap();

    let web = statuses(&report, "web");
    assert_eq!(web.len(), 4);
    assert_matches!(&web[0].1, OutcomeStatus::Failed { cause } if cause.contains("403"));
    assert_eq!(web[1].1, OutcomeStatus::Applied);
    assert_eq!(web[2].1, OutcomeStatus::Applied);
    assert_eq!(web[3].1, OutcomeStatus::Applied);

    assert!(statuses(&report, "api")
        .iter()
        .all(|(_, status)| *status == OutcomeStatus::Applied));

    let summary = report.summary();
    assert_eq!(summary.repositories, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.applied, 7);
}

#[tokio::test]
async fn test_transport_error_becomes_failed_outcome() {
    let client = Arc::new(
        FakeClient::github()
            .with_names(&["web"])
            .fault("team web developers push", Fault::Transport),
    );
    let config = config_with(&["main"], &[("developers", "push")]);

    let report = reconciler(&client, config).run().await.unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].operation,
        Operation::TeamAccess {
            team: "developers".to_string(),
            permission: "push".to_string(),
        }
    );
    assert_matches!(
        &failures[0].status,
        OutcomeStatus::Failed { cause } if cause.contains("connection reset")
    );
    // Settings still ran after the failed grant
    assert_eq!(client.calls_for("web").last().map(String::as_str), Some("settings web"));
}

#[tokio::test]
async fn test_unsupported_phases_are_skipped() {
    let client = Arc::new(FakeClient::gitlab().with_names(&["billing", "ledger"]));
    let config = config_with(&["main", "master"], &[("developers", "push")]);

    let report = reconciler(&client, config).run().await.unwrap();

    assert!(client.calls().iter().all(|call| call.starts_with("protect ")));
    assert_eq!(client.calls().len(), 4);
    assert!(report
        .outcomes()
        .all(|o| o.operation.phase() == Phase::BranchProtection));
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_ignored_protection_fields_do_not_fail_the_run() {
    let client = Arc::new(
        FakeClient::gitlab()
            .with_names(&["billing"])
            .ignoring(&["required_reviews", "enforce_admins"]),
    );
    let config = config_with(&["main"], &[]);

    let report = reconciler(&client, config).run().await.unwrap();

    assert_eq!(statuses(&report, "billing").len(), 1);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_discovery_failure_aborts_before_any_operation() {
    let client = Arc::new(
        FakeClient::github()
            .with_pages(vec![page_of(1, 100), page_of(2, 100)])
            .failing_page(2),
    );
    let config = config_with(&["main"], &[]);

    let result = reconciler(&client, config).run().await;

    assert_matches!(result, Err(RunError::Discovery(_)));
    assert_eq!(client.page_requests(), vec![1, 2]);
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_listing_transport_error_aborts_the_run() {
    let client = Arc::new(
        FakeClient::github()
            .with_pages(vec![page_of(1, 100), page_of(2, 100)])
            .page_fault(2, Fault::Transport),
    );

    let result = reconciler(&client, config_with(&["main"], &[("developers", "push")]))
        .run()
        .await;

    assert_matches!(result, Err(RunError::Discovery(PlatformError::Transport(_))));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_listing_timeout_aborts_the_run() {
    let client = Arc::new(
        FakeClient::github()
            .with_pages(vec![page_of(1, 10)])
            .page_fault(1, Fault::Timeout),
    );

    let result = reconciler(&client, config_with(&["main"], &[])).run().await;

    assert_matches!(result, Err(RunError::Discovery(PlatformError::Timeout(_))));
    assert_eq!(client.page_requests(), vec![1]);
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_listing_past_page_limit_is_fatal() {
    let pages: Vec<_> = (1..=MAX_PAGES as usize + 1).map(|n| page_of(n, 1)).collect();
    let client = Arc::new(FakeClient::github().with_pages(pages));
    let mut config = config_with(&["main"], &[]);
    config.run.page_size = 1;

    let reconciler = reconciler(&client, config);

    assert_matches!(
        reconciler.discover().await,
        Err(RunError::Discovery(PlatformError::PageLimit { pages })) if pages == MAX_PAGES
    );
    assert_matches!(reconciler.run().await, Err(RunError::Discovery(_)));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_explicit_repositories_skip_enumeration() {
    let client = Arc::new(FakeClient::github().with_names(&["other"]));
    let mut config = config_with(&["main"], &[]);
    config.repositories = vec!["web".to_string(), "api".to_string(), "web".to_string()];

    let report = reconciler(&client, config).run().await.unwrap();

    assert!(client.page_requests().is_empty());
    let repos: Vec<_> = report
        .repositories
        .iter()
        .map(|r| r.repository.as_str())
        .collect();
    assert_eq!(repos, vec!["web", "api"]);
    assert!(client.calls_for("other").is_empty());
}

#[tokio::test]
async fn test_enumeration_reads_every_page() {
    let client = Arc::new(FakeClient::github().with_pages(vec![
        page_of(1, 100),
        page_of(2, 100),
        page_of(3, 37),
    ]));
    let config = config_with(&["main"], &[]);

    let repos = reconciler(&client, config).discover().await.unwrap();

    assert_eq!(repos.len(), 237);
    assert_eq!(client.page_requests(), vec![1, 2, 3, 4]);
    assert_eq!(repos[0].name, "repo-1-0");
    assert_eq!(repos[236].name, "repo-3-36");
}

#[tokio::test]
async fn test_filters_apply_to_enumerated_repositories() {
    let client = Arc::new(FakeClient::github().with_repos(vec![
        repo("a", true, false),
        repo("b", false, true),
        repo("legacy", false, false),
        repo("c", false, false),
    ]));
    let mut config = config_with(&["main"], &[]);
    config.filters.exclude_archived = true;
    config.filters.exclude_forks = false;
    config.filters.exclude_repos = vec!["legacy".to_string()];

    let report = reconciler(&client, config).run().await.unwrap();

    let repos: Vec<_> = report
        .repositories
        .iter()
        .map(|r| r.repository.as_str())
        .collect();
    assert_eq!(repos, vec!["b", "c"]);
    assert!(client.calls_for("a").is_empty());
    assert!(client.calls_for("legacy").is_empty());
}

#[tokio::test]
async fn test_dry_run_makes_no_mutating_calls() {
    let client = Arc::new(FakeClient::github().with_names(&["web", "api"]));
    let config = config_with(&["main", "production"], &[("developers", "push")]);

    let report = reconciler(&client, config)
        .dry_run(true)
        .run()
        .await
        .unwrap();

    assert!(client.calls().is_empty());
    assert_eq!(client.page_requests(), vec![1, 2]);
    assert!(report.dry_run);

    let summary = report.summary();
    assert_eq!(summary.planned, 8);
    assert_eq!(summary.applied, 0);
    assert!(report
        .outcomes()
        .all(|o| o.status == OutcomeStatus::Planned));
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let client = Arc::new(FakeClient::github().with_names(&["web", "api", "docs"]));
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = reconciler(&client, config_with(&["main"], &[]))
        .with_cancel_flag(cancel)
        .run()
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.skipped, 3);
    assert!(report.repositories.is_empty());
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_run_finishes_in_flight_repository() {
    let client = Arc::new(
        FakeClient::github()
            .with_names(&["web", "api", "docs"])
            .fault("protect web main", Fault::Delay(Duration::from_millis(300))),
    );
    let mut config = config_with(&["main"], &[]);
    config.run.max_parallel = 1;

    let cancel = CancelFlag::new();
    let reconciler = reconciler(&client, config).with_cancel_flag(cancel.clone());

    let (result, _) = tokio::join!(reconciler.run(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let report = result.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.repositories.len(), 1);
    assert_eq!(report.repositories[0].repository, "web");
    assert!(!report.repositories[0].has_failures());
    assert!(client.calls_for("api").is_empty());
}

#[tokio::test]
async fn test_parallelism_is_bounded_and_order_preserved() {
    let names = ["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7"];
    let client = Arc::new(FakeClient::github().with_names(&names));
    let mut config = config_with(&["main", "production"], &[]);
    config.run.max_parallel = 3;

    let report = reconciler(&client, config).run().await.unwrap();

    assert!(client.peak_in_flight() <= 3);
    assert!(client.peak_in_flight() >= 1);

    let repos: Vec<_> = report
        .repositories
        .iter()
        .map(|r| r.repository.as_str())
        .collect();
    assert_eq!(repos, names);
}

#[tokio::test]
async fn test_slow_operation_times_out() {
    let client = Arc::new(
        FakeClient::github()
            .with_names(&["web"])
            .fault("protect web main", Fault::Delay(Duration::from_secs(3))),
    );
    let mut config = config_with(&["main", "production"], &[]);
    config.run.timeout = 1;

    let report = reconciler(&client, config).run().await.unwrap();

    let web = statuses(&report, "web");
    assert_matches!(&web[0].1, OutcomeStatus::Failed { cause } if cause.contains("timed out"));
    assert_eq!(web[1].1, OutcomeStatus::Applied);
    // The abandoned call no longer counts as in flight
    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_capability_misuse_aborts_the_run() {
    let client = Arc::new(
        FakeClient::gitlab()
            .with_names(&["billing"])
            .misreporting_capabilities(),
    );
    let config = config_with(&["main"], &[("developers", "push")]);

    let result = reconciler(&client, config).run().await;

    assert_matches!(result, Err(RunError::Capability(_)));
}
