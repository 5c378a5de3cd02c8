mod common;

use common::{block_entry, create_file, delete_file, discard_logger, eventually, now_ms, set_ttl_delete, Domains};
use metajournal::{
    ElectionEvent, EmbeddedJournalConfig, EmbeddedJournalSystem, Event, FollowerEventData, JournalError, JournalOptions,
    LocalNetwork, MembershipChangeError, OperationId, QuorumController, RaftMemberInfo, RaftOptions, RaftRole,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

fn member(replica_id: &str, port: u16) -> RaftMemberInfo {
    RaftMemberInfo {
        replica_id: replica_id.to_string(),
        ip_addr: Ipv4Addr::LOCALHOST,
        raft_internal_rpc_port: port,
    }
}

fn raft_options() -> RaftOptions {
    RaftOptions {
        leader_heartbeat_duration: Some(Duration::from_millis(50)),
        follower_min_timeout: Some(Duration::from_millis(200)),
        follower_max_timeout: Some(Duration::from_millis(400)),
        leader_append_entries_timeout: Some(Duration::from_millis(100)),
        snapshot_retained_entries: Some(2),
        client_write_timeout: Some(Duration::from_secs(2)),
        ..RaftOptions::default()
    }
}

struct Node {
    domains: Domains,
    journal: EmbeddedJournalSystem,
}

/// A quorum of replicas talking over a `LocalNetwork`.
struct TestCluster {
    directory: TempDir,
    network: LocalNetwork,
    members: Vec<RaftMemberInfo>,
    journal_options: JournalOptions,
    nodes: HashMap<String, Node>,
}

impl TestCluster {
    async fn start(size: usize) -> Self {
        Self::start_with_options(size, JournalOptions::default()).await
    }

    async fn start_with_options(size: usize, journal_options: JournalOptions) -> Self {
        let directory = tempfile::tempdir().unwrap();
        let members: Vec<RaftMemberInfo> = (0..size)
            .map(|i| member(&format!("replica-{}", i), 7000 + i as u16))
            .collect();
        let mut cluster = TestCluster {
            directory,
            network: LocalNetwork::new(),
            members: members.clone(),
            journal_options,
            nodes: HashMap::new(),
        };
        for member in members {
            cluster.start_node(&member.replica_id, false).await;
        }
        cluster
    }

    fn data_directory(&self, replica_id: &str) -> PathBuf {
        self.directory.path().join(replica_id)
    }

    async fn start_node(&mut self, replica_id: &str, join_existing_cluster: bool) {
        let domains = Domains::new();
        let config = EmbeddedJournalConfig {
            my_replica_id: replica_id.to_string(),
            cluster_members: self.members.clone(),
            join_existing_cluster,
            data_directory: self.data_directory(replica_id),
            info_logger: discard_logger(),
            local_network: Some(self.network.clone()),
            raft_options: raft_options(),
            journal_options: self.journal_options.clone(),
        };
        let journal = metajournal::try_create_embedded_journal(config, domains.journaled())
            .await
            .unwrap();
        self.nodes.insert(replica_id.to_string(), Node { domains, journal });
    }

    async fn stop_node(&mut self, replica_id: &str) {
        let node = self.nodes.remove(replica_id).unwrap();
        node.journal.shutdown().await;
    }

    fn node(&self, replica_id: &str) -> &Node {
        &self.nodes[replica_id]
    }

    /// The replica that considers itself leader, once exactly one of the given replicas does.
    async fn leader_among(&self, candidates: &[String]) -> Option<String> {
        let mut leaders = Vec::new();
        for replica_id in candidates {
            let info = match self.nodes[replica_id].journal.quorum_controller().get_quorum_info().await {
                Ok(info) => info,
                Err(_) => continue,
            };
            let me = info.members.iter().find(|m| &m.replica_id == replica_id);
            if matches!(me, Some(m) if m.role == RaftRole::Leader) {
                leaders.push(replica_id.clone());
            }
        }
        if leaders.len() == 1 {
            leaders.pop()
        } else {
            None
        }
    }

    async fn wait_for_leader(&self, candidates: &[String]) -> String {
        let deadline = Instant::now() + CONVERGE_TIMEOUT;
        loop {
            if let Some(leader) = self.leader_among(candidates).await {
                return leader;
            }
            assert!(Instant::now() < deadline, "No leader elected among {:?}", candidates);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stops every replica, then starts them all again from their data directories.
    async fn restart_all(&mut self) {
        let replica_ids = self.replica_ids();
        for replica_id in replica_ids.iter() {
            self.stop_node(replica_id).await;
        }
        for replica_id in replica_ids.iter() {
            self.start_node(replica_id, false).await;
        }
    }

    fn controllers(&self) -> Vec<(String, QuorumController)> {
        self.nodes
            .iter()
            .map(|(replica_id, node)| (replica_id.clone(), node.journal.quorum_controller()))
            .collect()
    }

    fn replica_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn shutdown(self) {
        for (_, node) in self.nodes {
            node.journal.shutdown().await;
        }
    }
}

async fn write_files(journal: &EmbeddedJournalSystem, paths: &[&str]) -> Result<(), JournalError> {
    let mut context = journal.create_journal_context();
    for (i, path) in paths.iter().enumerate() {
        context.append(create_file(path, i as i64, 0));
    }
    context.close().await.map(|_| ())
}

async fn wait_for_files(node: &Node, count: usize) -> bool {
    eventually(CONVERGE_TIMEOUT, || async move { node.domains.namespace.files().len() == count }).await
}

/// Journals a delete for every file whose delete-on-expiry TTL ran out, the way the master's TTL
/// checker does on the leader.
async fn expire_files(node: &Node) -> Result<usize, JournalError> {
    let expired = node.domains.namespace.expired(now_ms());
    if expired.is_empty() {
        return Ok(0);
    }
    let mut context = node.journal.create_journal_context();
    for (path, id) in expired.iter() {
        context.append(delete_file(path, *id));
    }
    context.close().await?;
    Ok(expired.len())
}

/// Polls every replica's own view and records who claims leadership in which term.
struct LeaderSampler {
    stop: Arc<AtomicBool>,
    task: JoinHandle<HashMap<u64, HashSet<String>>>,
}

impl LeaderSampler {
    fn start(controllers: Vec<(String, QuorumController)>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn({
            let stop = stop.clone();
            async move {
                let mut leaders: HashMap<u64, HashSet<String>> = HashMap::new();
                while !stop.load(Ordering::SeqCst) {
                    for (replica_id, controller) in controllers.iter() {
                        let info = match controller.get_quorum_info().await {
                            Ok(info) => info,
                            Err(_) => continue,
                        };
                        let me = info.members.iter().find(|m| &m.replica_id == replica_id);
                        if matches!(me, Some(m) if m.role == RaftRole::Leader) {
                            leaders.entry(info.term).or_default().insert(replica_id.clone());
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                leaders
            }
        });
        LeaderSampler { stop, task }
    }

    async fn finish(self) -> HashMap<u64, HashSet<String>> {
        self.stop.store(true, Ordering::SeqCst);
        self.task.await.unwrap()
    }
}

fn assert_single_leader_per_term(leaders: &HashMap<u64, HashSet<String>>) {
    assert!(!leaders.is_empty(), "No leader was ever observed");
    for (term, replica_ids) in leaders.iter() {
        assert_eq!(replica_ids.len(), 1, "Term {} had leaders {:?}", term, replica_ids);
    }
}

#[tokio::test]
async fn leader_accepts_writes_and_followers_redirect() {
    let cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;

    write_files(&cluster.node(&leader).journal, &["/a", "/b"]).await.unwrap();

    let follower = cluster.replica_ids().into_iter().find(|id| id != &leader).unwrap();
    match write_files(&cluster.node(&follower).journal, &["/c"]).await {
        Err(JournalError::LeaderRedirect(info)) => assert_eq!(info.replica_id, leader),
        other => panic!("Unexpected result {:?}", other),
    }

    for replica_id in cluster.replica_ids() {
        assert!(wait_for_files(cluster.node(&replica_id), 2).await, "{} did not catch up", replica_id);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn every_domain_receives_its_entries_in_order() {
    let cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    let journal = &cluster.node(&leader).journal;

    let mut context = journal.create_journal_context();
    context.append(create_file("/x", 1, 0));
    context.append(block_entry());
    context.append(create_file("/y", 2, 0));
    let receipt = context.close().await.unwrap();
    assert!(!receipt.duplicate);
    assert!(receipt.last_sequence_number.is_some());

    for replica_id in cluster.replica_ids() {
        let node = cluster.node(&replica_id);
        assert!(wait_for_files(node, 2).await);
        assert!(eventually(CONVERGE_TIMEOUT, || async move { node.domains.block.applied().len() == 1 }).await);
        assert!(node.domains.table.applied().is_empty());
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn retried_operation_commits_once() {
    let cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    let journal = &cluster.node(&leader).journal;
    let operation_id = OperationId::random();

    let mut context = journal.create_journal_context_with_operation_id(operation_id);
    context.append(block_entry());
    assert!(!context.close().await.unwrap().duplicate);

    let mut context = journal.create_journal_context_with_operation_id(operation_id);
    context.append(block_entry());
    assert!(context.close().await.unwrap().duplicate);

    for replica_id in cluster.replica_ids() {
        let node = cluster.node(&replica_id);
        assert!(eventually(CONVERGE_TIMEOUT, || async move { node.domains.block.applied().len() == 1 }).await);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn isolated_leader_is_replaced() {
    let cluster = TestCluster::start(3).await;
    let old_leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    write_files(&cluster.node(&old_leader).journal, &["/before"]).await.unwrap();

    cluster.network.disconnect(&old_leader);
    let survivors: Vec<String> = cluster
        .replica_ids()
        .into_iter()
        .filter(|id| id != &old_leader)
        .collect();
    let new_leader = cluster.wait_for_leader(&survivors).await;
    assert_ne!(new_leader, old_leader);

    // The isolated leader can't commit anything.
    let result = write_files(&cluster.node(&old_leader).journal, &["/lost"]).await;
    assert!(result.is_err());

    write_files(&cluster.node(&new_leader).journal, &["/after"]).await.unwrap();

    cluster.network.reconnect(&old_leader);
    let old = cluster.node(&old_leader);
    assert!(
        eventually(CONVERGE_TIMEOUT, || async move {
            let files = old.domains.namespace.files();
            files.contains_key("/before") && files.contains_key("/after") && !files.contains_key("/lost")
        })
        .await
    );
    cluster.shutdown().await;
}

#[tokio::test]
async fn writes_survive_losing_the_leader() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    for i in 0..10 {
        let path = format!("/kept/{}", i);
        write_files(&cluster.node(&leader).journal, &[path.as_str()]).await.unwrap();
    }

    cluster.stop_node(&leader).await;
    let new_leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    assert!(wait_for_files(cluster.node(&new_leader), 10).await);

    write_files(&cluster.node(&new_leader).journal, &["/eleventh"]).await.unwrap();
    for replica_id in cluster.replica_ids() {
        assert!(wait_for_files(cluster.node(&replica_id), 11).await);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn members_can_be_added_and_removed() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    write_files(&cluster.node(&leader).journal, &["/a"]).await.unwrap();

    let newcomer = member("replica-3", 7003);
    cluster.members.push(newcomer.clone());
    cluster.start_node(&newcomer.replica_id, true).await;
    let sampler = LeaderSampler::start(cluster.controllers());

    let controller = cluster.node(&leader).journal.quorum_controller();
    let added = eventually(CONVERGE_TIMEOUT, || {
        let controller = controller.clone();
        let newcomer = newcomer.clone();
        async move {
            match controller.add_member(newcomer).await {
                Ok(()) => true,
                Err(MembershipChangeError::ChangeInProgress) => false,
                Err(e) => panic!("Unexpected error {:?}", e),
            }
        }
    })
    .await;
    assert!(added);

    assert!(wait_for_files(cluster.node("replica-3"), 1).await);
    let info = controller.get_quorum_info().await.unwrap();
    assert_eq!(info.members.len(), 4);
    assert_eq!(info.leader_id.as_deref(), Some(leader.as_str()));

    // Only members can be removed.
    match controller.remove_member("replica-9").await {
        Err(MembershipChangeError::Invalid(_)) => {}
        other => panic!("Unexpected result {:?}", other),
    }

    let removed = cluster
        .replica_ids()
        .into_iter()
        .find(|id| id != &leader && id != "replica-3")
        .unwrap();
    controller.remove_member(&removed).await.unwrap();
    let info = controller.get_quorum_info().await.unwrap();
    assert!(info.members.iter().all(|m| m.replica_id != removed));
    assert_eq!(info.members.len(), 3);

    write_files(&cluster.node(&leader).journal, &["/b"]).await.unwrap();
    assert!(wait_for_files(cluster.node("replica-3"), 2).await);

    assert_single_leader_per_term(&sampler.finish().await);
    cluster.shutdown().await;
}

#[tokio::test]
async fn expired_ttl_deletes_file_after_full_restart() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    write_files(&cluster.node(&leader).journal, &["/ttl", "/keep"]).await.unwrap();

    let mut context = cluster.node(&leader).journal.create_journal_context();
    context.append(set_ttl_delete("/ttl", 3000, now_ms()));
    context.close().await.unwrap();
    for replica_id in cluster.replica_ids() {
        let node = cluster.node(&replica_id);
        let has_ttl = eventually(CONVERGE_TIMEOUT, || async move {
            matches!(node.domains.namespace.file("/ttl"), Some(file) if file.ttl == 3000)
        })
        .await;
        assert!(has_ttl, "{} never saw the TTL", replica_id);
    }
    // Not yet due.
    assert_eq!(expire_files(cluster.node(&leader)).await.unwrap(), 0);

    cluster.restart_all().await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    assert!(wait_for_files(cluster.node(&leader), 2).await);

    let node = cluster.node(&leader);
    let expired = eventually(CONVERGE_TIMEOUT, || async move {
        expire_files(node).await.unwrap_or(0) > 0 || node.domains.namespace.file("/ttl").is_none()
    })
    .await;
    assert!(expired);
    for replica_id in cluster.replica_ids() {
        let node = cluster.node(&replica_id);
        let gone = eventually(CONVERGE_TIMEOUT, || async move {
            let files = node.domains.namespace.files();
            !files.contains_key("/ttl") && files.contains_key("/keep")
        })
        .await;
        assert!(gone, "{} still has the expired file", replica_id);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn replica_restarts_from_snapshot_and_log() {
    let mut cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;

    write_files(&cluster.node(&leader).journal, &["/one", "/two"]).await.unwrap();
    let covered = cluster.node(&leader).journal.trigger_checkpoint().await.unwrap();
    assert!(covered.is_some());
    write_files(&cluster.node(&leader).journal, &["/three"]).await.unwrap();

    let follower = cluster.replica_ids().into_iter().find(|id| id != &leader).unwrap();
    assert!(wait_for_files(cluster.node(&follower), 3).await);
    cluster.node(&follower).journal.trigger_checkpoint().await.unwrap();

    cluster.stop_node(&follower).await;
    write_files(&cluster.node(&leader).journal, &["/four"]).await.unwrap();

    cluster.start_node(&follower, false).await;
    let restarted = cluster.node(&follower);
    assert!(wait_for_files(restarted, 4).await);
    assert!(restarted.domains.namespace.file("/one").is_some());
    assert!(restarted.domains.namespace.file("/four").is_some());

    cluster.shutdown().await;
}

#[tokio::test]
async fn lagging_replica_catches_up_from_snapshot() {
    // Small segments so compaction actually drops entries the stopped replica lacks.
    let options = JournalOptions {
        segment_size_bytes: Some(256),
        ..JournalOptions::default()
    };
    let mut cluster = TestCluster::start_with_options(3, options).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;
    let lagging = cluster.replica_ids().into_iter().find(|id| id != &leader).unwrap();

    cluster.stop_node(&lagging).await;
    for i in 0..20 {
        let path = format!("/snap/{}", i);
        write_files(&cluster.node(&leader).journal, &[path.as_str()]).await.unwrap();
    }
    cluster.node(&leader).journal.trigger_checkpoint().await.unwrap();
    let leader_log = cluster.data_directory(&leader).join("raft-log");
    let first_segment = leader_log.join(format!("segment-{:020}.log", 1));
    assert!(!first_segment.exists(), "{:?} survived compaction", first_segment);

    cluster.start_node(&lagging, false).await;
    let caught_up = cluster.node(&lagging);
    assert!(wait_for_files(caught_up, 20).await);
    assert!(caught_up.domains.namespace.restores() >= 1);
    let snapshots = cluster.data_directory(&lagging).join("snapshots");
    assert!(std::fs::read_dir(&snapshots).unwrap().next().is_some());

    cluster.shutdown().await;
}

#[tokio::test]
async fn event_listener_follows_the_role() {
    let cluster = TestCluster::start(3).await;
    let leader = cluster.wait_for_leader(&cluster.replica_ids()).await;

    let mut listener = cluster.node(&leader).journal.event_listener();
    let led = tokio::time::timeout(CONVERGE_TIMEOUT, listener.wait_until_leader()).await;
    assert!(matches!(led, Ok(true)));
    assert_eq!(listener.current_event(), Event::Election(ElectionEvent::Leader));

    let follower = cluster.replica_ids().into_iter().find(|id| id != &leader).unwrap();
    let listener = cluster.node(&follower).journal.event_listener();
    let follower_event = Event::Election(ElectionEvent::Follower(FollowerEventData {
        leader_replica_id: leader.clone(),
    }));
    assert!(eventually(CONVERGE_TIMEOUT, || async { listener.current_event() == follower_event }).await);

    cluster.shutdown().await;
}
