//! Export worker runs against a local state root

use hostagent::core::session::{CursorStatus, CursorStore};
use hostagent::core::worker::{run_worker, IntegrationRegistry, WorkerSettings};
use hostagent::domain::{IntegrationId, SourceType, WorkerIntegration};
use serde_json::{json, Value};
use tempfile::TempDir;

fn settings(dir: &TempDir, concurrency: usize) -> WorkerSettings {
    WorkerSettings {
        job_id: "job-1".to_string(),
        customer_id: "acme".to_string(),
        state_root: dir.path().to_path_buf(),
        concurrency,
        failure_threshold: 10,
        progress_interval_ms: 50,
        reprocess_historical: false,
    }
}

fn repos(count: usize, failing: std::ops::RangeInclusive<usize>) -> Value {
    let projects: Vec<Value> = (1..=count)
        .map(|i| {
            let mut project = json!({
                "ref_id": i.to_string(),
                "readable_id": format!("acme/repo-{i}"),
                "records": [{"sha": format!("{i:040}")}],
            });
            if failing.contains(&i) {
                project["fail"] = json!("rate limited");
            }
            project
        })
        .collect();
    json!({ "projects": projects })
}

fn integration(id: &str, source_type: SourceType, settings: Value) -> WorkerIntegration {
    WorkerIntegration {
        id: IntegrationId::new(id).unwrap(),
        name: "static".to_string(),
        source_type,
        settings,
    }
}

#[tokio::test]
async fn test_failure_threshold_skips_remaining_projects() {
    let dir = TempDir::new().unwrap();
    let integrations = vec![integration("gh-1", SourceType::Sourcecode, repos(15, 1..=11))];

    let result = run_worker(
        settings(&dir, 1),
        integrations,
        &IntegrationRegistry::with_defaults(),
    )
    .await
    .unwrap();

    let gh = &result.integrations[0];
    assert!(gh.error.is_none());
    assert_eq!(gh.failed_projects(), 11);
    assert_eq!(gh.projects.len(), 11);
    assert_eq!(gh.skipped.len(), 4);
    assert!(!result.is_successful());

    // Skipped ids are the stable external ids, never raw ref ids.
    assert!(gh.skipped.iter().all(|id| id.len() == 64));

    // Neither failed projects nor the root move their cursors.
    let cursors = CursorStore::open(dir.path()).unwrap();
    let root = cursors.get("gh-1/repo").unwrap();
    assert!(root.cursor.is_none());
    let failed = cursors.get("gh-1/repo/acme/repo-1").unwrap();
    assert_eq!(failed.status, CursorStatus::InProgress);
    assert!(failed.cursor.is_none());
}

#[tokio::test]
async fn test_successful_run_commits_every_cursor() {
    let dir = TempDir::new().unwrap();
    let integrations = vec![
        integration("gh-1", SourceType::Sourcecode, repos(5, 1..=0)),
        integration(
            "jira-1",
            SourceType::Work,
            json!({"projects": [{"ref_id": "10", "readable_id": "PLAT", "records": [{"key": "PLAT-1"}]}]}),
        ),
    ];

    let result = run_worker(
        settings(&dir, 3),
        integrations,
        &IntegrationRegistry::with_defaults(),
    )
    .await
    .unwrap();

    assert!(result.is_successful());
    assert_eq!(result.total_projects(), 6);

    let cursors = CursorStore::open(dir.path()).unwrap();
    for key in ["gh-1/repo", "gh-1/repo/acme/repo-3", "jira-1/project", "jira-1/project/PLAT"] {
        let entry = cursors.get(key).unwrap_or_else(|| panic!("missing cursor {key}"));
        assert_eq!(entry.status, CursorStatus::Completed, "{key}");
        assert!(entry.cursor.is_some(), "{key}");
    }

    let repos = std::fs::read_to_string(dir.path().join("export/sourcecode/gh-1/repo.ndjson")).unwrap();
    assert_eq!(repos.lines().count(), 5);
    let issues = std::fs::read_to_string(dir.path().join("export/work/jira-1/project.ndjson")).unwrap();
    assert_eq!(issues.lines().count(), 1);
}

#[tokio::test]
async fn test_unknown_integration_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut unknown = integration("cal-1", SourceType::Calendar, json!({}));
    unknown.name = "exchange".to_string();
    let integrations = vec![unknown, integration("gh-1", SourceType::Sourcecode, repos(1, 1..=0))];

    let result = run_worker(
        settings(&dir, 2),
        integrations,
        &IntegrationRegistry::with_defaults(),
    )
    .await
    .unwrap();

    assert!(result.integrations[0].error.as_deref().unwrap().contains("exchange"));
    assert!(result.integrations[1].is_successful());
}
