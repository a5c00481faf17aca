//! Interactive console: line parsing and command execution
//!
//! Commands mirror the administrative surface of the cluster facade,
//! plus three canned demonstration scenarios that spawn five fresh
//! nodes each and drive them concurrently.

use krdo_core::{Cluster, ClusterError, NodeId, NodeStatus, SyncOutcome};
use thiserror::Error;

/// A parsed console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartNode,
    RemoveNode(NodeId),
    KillNode(NodeId),
    InitiateElection(NodeId),
    RequestSync(NodeId),
    ListNodes,
    MultiElect,
    FailDuringElection,
    SilentLeave,
    Help,
    Quit,
}

/// Console input the parser cannot turn into a command
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {usage}")]
    Malformed { usage: &'static str },
}

/// Parse one console line
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&name) = parts.first() else {
        return Err(ParseError::Unknown(line.trim().to_string()));
    };

    match name {
        "startNode" => no_args(&parts, Command::StartNode, "startNode"),
        "removeNode" => with_id(&parts, Command::RemoveNode, "removeNode <nodeID>"),
        "killNode" => with_id(&parts, Command::KillNode, "killNode <nodeID>"),
        "initiateElection" => {
            with_id(&parts, Command::InitiateElection, "initiateElection <nodeID>")
        }
        "requestSync" => with_id(&parts, Command::RequestSync, "requestSync <nodeID>"),
        "listNodes" => no_args(&parts, Command::ListNodes, "listNodes"),
        "multiElect" => no_args(&parts, Command::MultiElect, "multiElect"),
        "failDuringElection" => no_args(&parts, Command::FailDuringElection, "failDuringElection"),
        "silentLeave" => no_args(&parts, Command::SilentLeave, "silentLeave"),
        "help" => no_args(&parts, Command::Help, "help"),
        "quit" | "exit" => no_args(&parts, Command::Quit, "quit"),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn no_args(parts: &[&str], command: Command, usage: &'static str) -> Result<Command, ParseError> {
    if parts.len() != 1 {
        return Err(ParseError::Malformed { usage });
    }
    Ok(command)
}

fn with_id<F>(parts: &[&str], build: F, usage: &'static str) -> Result<Command, ParseError>
where
    F: Fn(NodeId) -> Command,
{
    if parts.len() != 2 {
        return Err(ParseError::Malformed { usage });
    }
    let id = parts[1]
        .parse()
        .map_err(|_| ParseError::Malformed { usage })?;
    Ok(build(id))
}

/// Run one command against the cluster. Returns `false` once the
/// console should stop.
pub async fn execute(cluster: &Cluster, command: Command) -> bool {
    match command {
        Command::StartNode => {
            let id = cluster.create_node().await;
            println!("Node {} started...", id);
        }
        Command::RemoveNode(id) => match cluster.remove_node(id).await {
            Ok(()) => println!("Node {} removed", id),
            Err(e) => println!("{}", e),
        },
        Command::KillNode(id) => report_kill(id, cluster.kill_node(id).await),
        Command::InitiateElection(id) => {
            if let Err(e) = cluster.trigger_election(id).await {
                println!("{}", e);
            }
        }
        Command::RequestSync(id) => match cluster.trigger_sync(id).await {
            Ok(SyncOutcome::Serviced { coordinator }) => {
                println!("Node {} synchronized with coordinator {}", id, coordinator)
            }
            Ok(SyncOutcome::TimedOut { presumed_dead }) => println!(
                "Node {} timed out waiting for coordinator {}; election started",
                id, presumed_dead
            ),
            Err(e) => println!("{}", e),
        },
        Command::ListNodes => print_listing(&cluster.list_nodes().await),
        Command::MultiElect => multi_elect(cluster).await,
        Command::FailDuringElection => fail_during_election(cluster).await,
        Command::SilentLeave => silent_leave(cluster).await,
        Command::Help => print_help(),
        Command::Quit => {
            println!("Shutting down...");
            cluster.shutdown().await;
            return false;
        }
    }
    true
}

fn report_kill(id: NodeId, result: Result<(), ClusterError>) {
    match result {
        Ok(()) => println!("Node {} has now been killed", id),
        Err(e) => println!("{}", e),
    }
}

fn print_listing(statuses: &[NodeStatus]) {
    for status in statuses {
        println!("NodeID: {}", status.id);
        println!("Local Clock: {:.3}", status.clock);
        match status.known_coordinator {
            Some(id) => println!("Known Coordinator: {}", id),
            None => println!("Known Coordinator: none"),
        }
        println!("Dead: {}", status.dead);
        println!("Election Invoked: {}", status.election_invoked);
        println!();
    }
}

pub fn print_help() {
    println!("\nCommands:");
    println!("  startNode                 - Start a new node");
    println!("  removeNode <nodeID>       - Remove a node gracefully");
    println!("  killNode <nodeID>         - Crash a node in place");
    println!("  initiateElection <nodeID> - Start a bully election round");
    println!("  requestSync <nodeID>      - Pull the coordinator's clock");
    println!("  listNodes                 - Show every node's state");
    println!("  multiElect                - Demo: two concurrent elections");
    println!("  failDuringElection        - Demo: crash mid-election");
    println!("  silentLeave               - Demo: a killed node stays listed");
    println!("  help                      - Show this list");
    println!("  quit                      - Exit\n");
}

/// Spawn the five fresh nodes every canned scenario works on
async fn spawn_five(cluster: &Cluster) -> NodeId {
    let base = cluster.create_node().await;
    println!("Node {} started...", base);
    for _ in 0..4 {
        let id = cluster.create_node().await;
        println!("Node {} started...", id);
    }
    base
}

/// Two nodes contest concurrently. The nomination latch and the victory
/// overwrite keep the outcome single-winner.
async fn multi_elect(cluster: &Cluster) {
    let base = spawn_five(cluster).await;
    let (first, second) = tokio::join!(
        cluster.trigger_election(base),
        cluster.trigger_election(base + 1),
    );
    for result in [first, second] {
        if let Err(e) = result {
            println!("{}", e);
        }
    }
    print_listing(&cluster.list_nodes().await);
}

/// A node that neither initiated nor can win crashes while the round
/// runs; the protocol finishes regardless.
async fn fail_during_election(cluster: &Cluster) {
    let base = spawn_five(cluster).await;
    let victim = base + 2;
    let (election, kill) = tokio::join!(
        cluster.trigger_election(base),
        cluster.kill_node(victim),
    );
    if let Err(e) = election {
        println!("{}", e);
    }
    report_kill(victim, kill);
    print_listing(&cluster.list_nodes().await);
}

/// A silent crash: the node stays registered and listed, flagged dead
async fn silent_leave(cluster: &Cluster) {
    let base = spawn_five(cluster).await;
    let victim = base + 3;
    report_kill(victim, cluster.kill_node(victim).await);
    print_listing(&cluster.list_nodes().await);
}
