//! Predefined scenarios for the KRDO cluster simulation
//!
//! Each scenario drives a fresh accelerated cluster through one
//! election or synchronization story and reports pass/fail with a
//! human-readable detail line plus the final node listing.

use chrono::{DateTime, Utc};
use krdo_core::{Cluster, ClusterConfig, ClusterError, NodeId, NodeStatus, SyncOutcome};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

/// How long scenarios wait for election convergence. Elections settle
/// at mailbox speed, independent of the tick interval.
const CONVERGE_DEADLINE: Duration = Duration::from_secs(2);

/// Errors from scenario execution
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Scenario execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Report serialization failed: {0}")]
    SerializeError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Scenario configuration
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ScenarioKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    MultiElect,
    FailDuringElection,
    SilentLeave,
    KillThenElect,
    RemoveHighest,
    SyncRoundTrip,
}

/// Scenario execution report
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub description: String,
    pub passed: bool,
    pub detail: String,
    pub duration_ms: u64,
    pub nodes: Vec<NodeStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Suite results
#[derive(Debug, Clone, Serialize)]
pub struct SuiteResults {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ScenarioReport>,
}

impl SuiteResults {
    /// Generate JUnit XML report
    pub fn to_junit_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuite name=\"KRDO Scenarios\" tests=\"{}\" failures=\"{}\" errors=\"0\">\n",
            self.total, self.failed
        ));

        for report in &self.results {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" time=\"{:.3}\"",
                report.name,
                report.duration_ms as f64 / 1000.0
            ));

            if report.passed {
                xml.push_str(" />\n");
            } else {
                xml.push_str(">\n");
                xml.push_str(&format!("    <failure message=\"{}\"/>\n", report.detail));
                xml.push_str("  </testcase>\n");
            }
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}

/// Get a predefined scenario by name
pub fn get_scenario(name: &str) -> Result<ScenarioConfig, ScenarioError> {
    match name.to_lowercase().as_str() {
        "multi-elect" | "multi_elect" => Ok(ScenarioConfig {
            name: "multi-elect",
            description: "Two nodes contest concurrently; one winner",
            kind: ScenarioKind::MultiElect,
        }),

        "fail-during-election" | "fail_during_election" => Ok(ScenarioConfig {
            name: "fail-during-election",
            description: "A bystander node crashes mid-round",
            kind: ScenarioKind::FailDuringElection,
        }),

        "silent-leave" | "silent_leave" => Ok(ScenarioConfig {
            name: "silent-leave",
            description: "Coordinator crashes silently; sync timeout detects it",
            kind: ScenarioKind::SilentLeave,
        }),

        "kill-then-elect" | "kill_then_elect" => Ok(ScenarioConfig {
            name: "kill-then-elect",
            description: "A dead non-highest node does not block the round",
            kind: ScenarioKind::KillThenElect,
        }),

        "remove-highest" | "remove_highest" => Ok(ScenarioConfig {
            name: "remove-highest",
            description: "Graceful removal of the highest node shifts the win",
            kind: ScenarioKind::RemoveHighest,
        }),

        "sync-round-trip" | "sync_round_trip" => Ok(ScenarioConfig {
            name: "sync-round-trip",
            description: "A requester pulls its clock back to the coordinator",
            kind: ScenarioKind::SyncRoundTrip,
        }),

        _ => Err(ScenarioError::UnknownScenario(name.to_string())),
    }
}

/// Get all predefined scenario names
pub fn list_scenarios() -> Vec<&'static str> {
    vec![
        "multi-elect",
        "fail-during-election",
        "silent-leave",
        "kill-then-elect",
        "remove-highest",
        "sync-round-trip",
    ]
}

/// Run one scenario against a fresh cluster
pub async fn run_scenario(
    config: &ScenarioConfig,
    cluster_config: ClusterConfig,
) -> Result<ScenarioReport, ScenarioError> {
    let start = Instant::now();
    info!("Starting scenario: {}", config.name);

    let cluster = Cluster::new(cluster_config);
    let outcome = match config.kind {
        ScenarioKind::MultiElect => multi_elect(&cluster).await,
        ScenarioKind::FailDuringElection => fail_during_election(&cluster).await,
        ScenarioKind::SilentLeave => silent_leave(&cluster).await,
        ScenarioKind::KillThenElect => kill_then_elect(&cluster).await,
        ScenarioKind::RemoveHighest => remove_highest(&cluster).await,
        ScenarioKind::SyncRoundTrip => sync_round_trip(&cluster).await,
    };
    let nodes = cluster.list_nodes().await;
    cluster.shutdown().await;

    let (passed, detail) = outcome?;
    let duration = start.elapsed();
    info!("Scenario {} finished in {:?}", config.name, duration);

    Ok(ScenarioReport {
        name: config.name.to_string(),
        description: config.description.to_string(),
        passed,
        detail,
        duration_ms: duration.as_millis() as u64,
        nodes,
        timestamp: Utc::now(),
    })
}

/// Run every scenario, writing one JSON report per scenario
pub async fn run_suite(
    output_dir: &Path,
    cluster_config: ClusterConfig,
) -> Result<SuiteResults, ScenarioError> {
    std::fs::create_dir_all(output_dir)?;

    let scenarios = list_scenarios();
    let mut results = Vec::new();
    let mut passed = 0;
    let mut failed = 0;

    for scenario_name in &scenarios {
        let config = get_scenario(scenario_name)?;
        let report = run_scenario(&config, cluster_config).await?;

        let report_path = output_dir.join(format!("{}.json", scenario_name));
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;

        if report.passed {
            info!("Scenario {} PASSED: {}", scenario_name, report.detail);
            passed += 1;
        } else {
            error!("Scenario {} FAILED: {}", scenario_name, report.detail);
            failed += 1;
        }
        results.push(report);
    }

    Ok(SuiteResults {
        total: scenarios.len(),
        passed,
        failed,
        results,
    })
}

fn exec_err(e: ClusterError) -> ScenarioError {
    ScenarioError::ExecutionFailed(e.to_string())
}

async fn spawn_nodes(cluster: &Cluster, count: usize) -> Vec<NodeId> {
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(cluster.create_node().await);
    }
    ids
}

async fn wait_for<F>(cluster: &Cluster, deadline: Duration, check: F) -> bool
where
    F: Fn(&[NodeStatus]) -> bool,
{
    let started = Instant::now();
    loop {
        if check(&cluster.list_nodes().await) {
            return true;
        }
        if started.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Every live node recognizes the given coordinator
async fn converged_on(cluster: &Cluster, coordinator: NodeId, deadline: Duration) -> bool {
    wait_for(cluster, deadline, |statuses| {
        statuses
            .iter()
            .filter(|s| !s.dead)
            .all(|s| s.known_coordinator == Some(coordinator))
    })
    .await
}

fn clock_of(statuses: &[NodeStatus], id: NodeId) -> f64 {
    statuses
        .iter()
        .find(|s| s.id == id)
        .map(|s| s.clock)
        .unwrap_or(f64::NAN)
}

async fn multi_elect(cluster: &Cluster) -> Result<(bool, String), ScenarioError> {
    let ids = spawn_nodes(cluster, 5).await;
    let highest = ids[4];

    let (first, second) = tokio::join!(
        cluster.trigger_election(ids[0]),
        cluster.trigger_election(ids[1]),
    );
    first.map_err(exec_err)?;
    second.map_err(exec_err)?;

    if converged_on(cluster, highest, CONVERGE_DEADLINE).await {
        Ok((true, format!("both rounds converged on node {}", highest)))
    } else {
        Ok((false, format!("cluster did not converge on node {}", highest)))
    }
}

async fn fail_during_election(cluster: &Cluster) -> Result<(bool, String), ScenarioError> {
    let ids = spawn_nodes(cluster, 5).await;
    let highest = ids[4];
    let victim = ids[2];

    let (election, kill) = tokio::join!(
        cluster.trigger_election(ids[0]),
        cluster.kill_node(victim),
    );
    election.map_err(exec_err)?;
    kill.map_err(exec_err)?;

    if !converged_on(cluster, highest, CONVERGE_DEADLINE).await {
        return Ok((false, format!("round did not finish after node {} crashed", victim)));
    }
    let statuses = cluster.list_nodes().await;
    if statuses.iter().any(|s| s.id == victim && s.dead) {
        Ok((
            true,
            format!("node {} crashed mid-round, node {} still won", victim, highest),
        ))
    } else {
        Ok((false, format!("node {} is not flagged dead", victim)))
    }
}

async fn silent_leave(cluster: &Cluster) -> Result<(bool, String), ScenarioError> {
    let ids = spawn_nodes(cluster, 5).await;
    let highest = ids[4];
    let successor = ids[3];

    cluster.trigger_election(ids[0]).await.map_err(exec_err)?;
    if !converged_on(cluster, highest, CONVERGE_DEADLINE).await {
        return Ok((false, format!("initial round did not converge on node {}", highest)));
    }

    // The coordinator crashes without telling anyone. Nothing changes
    // until a requester's sync attempt times out.
    cluster.kill_node(highest).await.map_err(exec_err)?;
    let outcome = cluster.trigger_sync(ids[0]).await.map_err(exec_err)?;
    if outcome != (SyncOutcome::TimedOut { presumed_dead: highest }) {
        return Ok((false, format!("expected a sync timeout, got {:?}", outcome)));
    }

    let deadline = cluster.config().sync_timeout + CONVERGE_DEADLINE;
    if converged_on(cluster, successor, deadline).await {
        Ok((
            true,
            format!(
                "silent crash of node {} detected by timeout; node {} took over",
                highest, successor
            ),
        ))
    } else {
        Ok((false, format!("survivors did not converge on node {}", successor)))
    }
}

async fn kill_then_elect(cluster: &Cluster) -> Result<(bool, String), ScenarioError> {
    let ids = spawn_nodes(cluster, 5).await;
    let highest = ids[4];
    let victim = ids[3];

    cluster.kill_node(victim).await.map_err(exec_err)?;

    let statuses = cluster.list_nodes().await;
    if statuses.len() != 5 {
        return Ok((false, "killed node fell out of the listing".to_string()));
    }
    if !statuses.iter().any(|s| s.id == victim && s.dead) {
        return Ok((false, format!("node {} is not flagged dead", victim)));
    }

    cluster.trigger_election(ids[0]).await.map_err(exec_err)?;
    if converged_on(cluster, highest, CONVERGE_DEADLINE).await {
        Ok((
            true,
            format!("dead node {} did not block the round; node {} won", victim, highest),
        ))
    } else {
        Ok((false, format!("round blocked by dead node {}", victim)))
    }
}

async fn remove_highest(cluster: &Cluster) -> Result<(bool, String), ScenarioError> {
    let ids = spawn_nodes(cluster, 5).await;
    let successor = ids[3];

    cluster.remove_node(ids[4]).await.map_err(exec_err)?;

    cluster.trigger_election(ids[0]).await.map_err(exec_err)?;
    let converged = wait_for(cluster, CONVERGE_DEADLINE, |statuses| {
        statuses.len() == 4 && statuses.iter().all(|s| s.known_coordinator == Some(successor))
    })
    .await;

    if converged {
        Ok((true, format!("node {} won after the removal", successor)))
    } else {
        Ok((false, format!("cluster did not converge on node {}", successor)))
    }
}

async fn sync_round_trip(cluster: &Cluster) -> Result<(bool, String), ScenarioError> {
    let requester = cluster.create_node().await;
    cluster.create_node().await;

    // Let the early clocks run ahead before the coordinator exists, so
    // the pull is visible.
    tokio::time::sleep(cluster.config().tick_interval * 8).await;
    let coordinator = cluster.create_node().await;

    cluster.trigger_election(requester).await.map_err(exec_err)?;
    if !converged_on(cluster, coordinator, CONVERGE_DEADLINE).await {
        return Ok((false, format!("cluster did not converge on node {}", coordinator)));
    }
    let before = clock_of(&cluster.list_nodes().await, requester);

    let outcome = cluster.trigger_sync(requester).await.map_err(exec_err)?;
    if outcome != (SyncOutcome::Serviced { coordinator }) {
        return Ok((false, format!("expected a serviced sync, got {:?}", outcome)));
    }

    let pulled = wait_for(cluster, CONVERGE_DEADLINE, |statuses| {
        let requester_clock = clock_of(statuses, requester);
        let coordinator_clock = clock_of(statuses, coordinator);
        requester_clock + 4.0 < before && (requester_clock - coordinator_clock).abs() <= 3.0
    })
    .await;

    if pulled {
        Ok((
            true,
            format!("node {} pulled its clock back to coordinator {}", requester, coordinator),
        ))
    } else {
        Ok((false, "requester clock was not pulled to the coordinator".to_string()))
    }
}
