//! Manifest directory to engine, through the serial event loop.

mod common;

use std::fs;
use std::time::Duration;

use common::*;
use promconf::{Controller, ManifestSource, ResourceEvent, RunSummary};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RULE_MANIFEST: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: node-rules
  namespace: monitoring
  annotations:
    prometheus.net/id: "0"
    prometheus.net/rule: "true"
data:
  node.yml: |
    - name: node
      rules:
      - alert: NodeDown
        expr: up == 0
"#;

const JOB_MANIFEST: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: node-jobs
  namespace: monitoring
  annotations:
    prometheus.net/id: "0"
    prometheus.net/job: "true"
data:
  node.yml: |
    - job_name: node
      static_configs:
      - targets: ['node-exporter:9100']
"#;

const FOREIGN_MANIFEST: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: other
  annotations:
    prometheus.net/id: "7"
    prometheus.net/job: "true"
data:
  other.yml: "- job_name: other"
"#;

async fn dispatch_all(harness: &TestHarness, events: Vec<ResourceEvent>) -> RunSummary {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        tx.send(event).await.unwrap();
    }
    drop(tx);

    Controller::new(harness.engine.clone())
        .run(rx, CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_manifests_are_reconciled_in_order() {
    let harness = TestHarness::new();
    harness.write_template(TEMPLATE);
    let manifests = TempDir::new().unwrap();
    fs::write(manifests.path().join("rules.yaml"), RULE_MANIFEST).unwrap();
    fs::write(
        manifests.path().join("jobs.yaml"),
        format!("{}---\n{}", JOB_MANIFEST, FOREIGN_MANIFEST),
    )
    .unwrap();

    let mut source = ManifestSource::new(manifests.path());
    let events = source.rescan().unwrap();
    assert_eq!(events.len(), 3);

    let summary = dispatch_all(&harness, events).await;

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.applied, 2);
    assert_eq!(summary.ignored, 1);
    assert_eq!(harness.rule_files(), vec!["monitoring-node-rules-node.yml"]);
    assert_eq!(harness.job_files(), vec!["monitoring-node-jobs-node.yml"]);
    assert!(harness.merged().unwrap().contains("node-exporter:9100"));
    assert_eq!(harness.reloads(), 2);

    // Resync deliveries are suppressed as unchanged.
    let summary = dispatch_all(&harness, source.resync()).await;
    assert_eq!(summary.ignored, 3);
    assert_eq!(harness.reloads(), 2);

    // Removing the job manifest removes the job and rebuilds.
    fs::remove_file(manifests.path().join("jobs.yaml")).unwrap();
    let summary = dispatch_all(&harness, source.rescan().unwrap()).await;
    assert_eq!(summary.processed, 2);
    assert!(harness.job_files().is_empty());
    assert!(!harness.merged().unwrap().contains("node-exporter"));
}

#[tokio::test]
async fn test_run_stops_on_cancellation() {
    let harness = TestHarness::new();
    let controller = Controller::new(harness.engine.clone());
    let (_tx, rx) = mpsc::channel::<ResourceEvent>(1);
    let shutdown = CancellationToken::new();

    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(5), controller.run(rx, shutdown))
        .await
        .unwrap();
    assert_eq!(summary, RunSummary::default());
}
