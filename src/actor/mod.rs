use crate::commitlog::Log;
use crate::journal::SequenceNumber;
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReplyFromPeer,
    EnqueueForReplicationError, EnqueueForReplicationInput, EnqueueForReplicationOutput, HeartbeatTick,
    InstallSnapshotError, InstallSnapshotInput, InstallSnapshotOutput, InstallSnapshotReplyFromPeer,
    MembershipChange, PersistentLocalState, QuorumState, Replica, RequestVoteError, RequestVoteInput,
    RequestVoteOutput, RequestVoteReplyFromPeer, SnapshotError, SnapshotPersisted, WriteAheadLogEntry,
};
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};

// Disk interaction is synchronous on the actor, except snapshot writes, which are spawned and
// report back through `SnapshotPersisted`.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Write to disk, replicate, respond once applied.
    // Candidate/Follower: Redirect.
    EnqueueForReplication(
        EnqueueForReplicationInput,
        Callback<EnqueueForReplicationOutput, EnqueueForReplicationError>,
    ),

    // Leader: Append a config entry. Respond once committed.
    // Candidate/Follower: Redirect.
    ChangeMembership(MembershipChange, Callback<(), EnqueueForReplicationError>),

    // All: Grant vote if applicable (includes write to disk). Transition to follower on newer term.
    RequestVote(RequestVoteInput, Callback<RequestVoteOutput, RequestVoteError>),

    // Candidate: Transition to leader if quorum vote.
    // Leader/Follower: discard
    RequestVoteReplyFromPeer(RequestVoteReplyFromPeer),

    // All: Transition to follower if applicable. Reconcile log. Respond to request.
    AppendEntries(AppendEntriesInput, Callback<AppendEntriesOutput, AppendEntriesError>),

    // Leader: Track peer progress, commit and apply what a majority has.
    // Candidate/Follower: discard
    AppendEntriesReplyFromPeer(AppendEntriesReplyFromPeer),

    // All: Replace state with the leader's snapshot.
    InstallSnapshot(InstallSnapshotInput, Callback<InstallSnapshotOutput, InstallSnapshotError>),

    // Leader: Resume replication after the snapshot.
    // Candidate/Follower: discard
    InstallSnapshotReplyFromPeer(InstallSnapshotReplyFromPeer),

    // Leader: Send AppendEntries (or a snapshot) to one peer.
    // Candidate/Follower: discard
    Heartbeat(HeartbeatTick),

    // Leader: discard
    // Candidate/Follower: Transition to candidate. Trigger new election.
    FollowerTimeout,

    QuorumState(Callback<QuorumState, ActorExited>),
    TriggerSnapshot(Callback<Option<SequenceNumber>, SnapshotError>),
    SnapshotPersisted(SnapshotPersisted),

    Shutdown,
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Debug>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Debug> Callback<O, E> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<O, E>>) {
        let (tx, rx) = oneshot::channel();
        (Callback(tx), rx)
    }

    pub(crate) fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Replica actor is dead RIP")]
pub(crate) struct ActorExited;

/// Errors that can say the actor went away before answering.
pub(crate) trait FromActorExited {
    fn actor_exited() -> Self;
}

impl FromActorExited for ActorExited {
    fn actor_exited() -> Self {
        ActorExited
    }
}

impl FromActorExited for EnqueueForReplicationError {
    fn actor_exited() -> Self {
        EnqueueForReplicationError::ActorExited
    }
}

impl FromActorExited for RequestVoteError {
    fn actor_exited() -> Self {
        RequestVoteError::ActorExited
    }
}

impl FromActorExited for AppendEntriesError {
    fn actor_exited() -> Self {
        AppendEntriesError::ActorExited
    }
}

impl FromActorExited for InstallSnapshotError {
    fn actor_exited() -> Self {
        InstallSnapshotError::ActorExited
    }
}

impl FromActorExited for SnapshotError {
    fn actor_exited() -> Self {
        SnapshotError::ActorExited
    }
}

/// ActorClient keeps the actor alive. Once every ActorClient is dropped, the event loop drains
/// and exits.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: Arc<mpsc::Sender<Event>>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: Arc::new(tx) }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: Arc::downgrade(&self.sender),
        }
    }
}

/// WeakActorClient is held by whatever the actor itself owns (timers, spawned RPCs, the RPC
/// server), so the actor doesn't keep itself alive.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: Weak<mpsc::Sender<Event>>,
}

impl WeakActorClient {
    pub(crate) async fn enqueue_for_replication(
        &self,
        input: EnqueueForReplicationInput,
    ) -> Result<EnqueueForReplicationOutput, EnqueueForReplicationError> {
        self.call(|callback| Event::EnqueueForReplication(input, callback)).await
    }

    pub(crate) async fn change_membership(&self, change: MembershipChange) -> Result<(), EnqueueForReplicationError> {
        self.call(|callback| Event::ChangeMembership(change, callback)).await
    }

    pub(crate) async fn request_vote(&self, input: RequestVoteInput) -> Result<RequestVoteOutput, RequestVoteError> {
        self.call(|callback| Event::RequestVote(input, callback)).await
    }

    pub(crate) async fn append_entries(
        &self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        self.call(|callback| Event::AppendEntries(input, callback)).await
    }

    pub(crate) async fn install_snapshot(
        &self,
        input: InstallSnapshotInput,
    ) -> Result<InstallSnapshotOutput, InstallSnapshotError> {
        self.call(|callback| Event::InstallSnapshot(input, callback)).await
    }

    pub(crate) async fn quorum_state(&self) -> Result<QuorumState, ActorExited> {
        self.call(Event::QuorumState).await
    }

    pub(crate) async fn trigger_snapshot(&self) -> Result<Option<SequenceNumber>, SnapshotError> {
        self.call(Event::TriggerSnapshot).await
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        reply: RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::RequestVoteReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        reply: AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::AppendEntriesReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_install_snapshot_reply_from_peer(
        &self,
        reply: InstallSnapshotReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::InstallSnapshotReplyFromPeer(reply)).await
    }

    pub(crate) async fn notify_snapshot_persisted(&self, persisted: SnapshotPersisted) -> Result<(), ActorExited> {
        self.send(Event::SnapshotPersisted(persisted)).await
    }

    pub(crate) async fn heartbeat(&self, tick: HeartbeatTick) -> Result<(), ActorExited> {
        self.send(Event::Heartbeat(tick)).await
    }

    pub(crate) async fn follower_timeout(&self) -> Result<(), ActorExited> {
        self.send(Event::FollowerTimeout).await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ActorExited> {
        self.send(Event::Shutdown).await
    }

    async fn call<O, E>(&self, to_event: impl FnOnce(Callback<O, E>) -> Event) -> Result<O, E>
    where
        O: Debug,
        E: Debug + FromActorExited,
    {
        let (callback, rx) = Callback::new();
        self.send(to_event(callback)).await.map_err(|_| E::actor_exited())?;

        rx.await.unwrap_or_else(|_| Err(E::actor_exited()))
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    receiver: mpsc::Receiver<Event>,
    replica: Replica<L, S>,
}

impl<L, S> ReplicaActor<L, S>
where
    L: Log<WriteAheadLogEntry> + Send + 'static,
    S: PersistentLocalState + Send + 'static,
{
    pub(crate) fn new(receiver: mpsc::Receiver<Event>, replica: Replica<L, S>) -> Self {
        ReplicaActor { receiver, replica }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            if let Event::Shutdown = event {
                break;
            }
            self.handle_event(event);
        }
        self.replica.shut_down();
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and/or come as a callback to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::EnqueueForReplication(input, callback) => {
                self.replica.handle_enqueue_for_replication(input, callback);
            }
            Event::ChangeMembership(change, callback) => {
                self.replica.handle_change_membership(change, callback);
            }
            Event::RequestVote(input, callback) => {
                callback.send(self.replica.server_handle_request_vote(input));
            }
            Event::RequestVoteReplyFromPeer(reply) => {
                self.replica.handle_request_vote_reply_from_peer(reply);
            }
            Event::AppendEntries(input, callback) => {
                callback.send(self.replica.server_handle_append_entries(input));
            }
            Event::AppendEntriesReplyFromPeer(reply) => {
                self.replica.handle_append_entries_reply_from_peer(reply);
            }
            Event::InstallSnapshot(input, callback) => {
                callback.send(self.replica.server_handle_install_snapshot(input));
            }
            Event::InstallSnapshotReplyFromPeer(reply) => {
                self.replica.handle_install_snapshot_reply_from_peer(reply);
            }
            Event::Heartbeat(tick) => {
                self.replica.handle_heartbeat(tick);
            }
            Event::FollowerTimeout => {
                self.replica.handle_follower_timeout();
            }
            Event::QuorumState(callback) => {
                callback.send(Ok(self.replica.quorum_state()));
            }
            Event::TriggerSnapshot(callback) => {
                self.replica.handle_trigger_snapshot(callback);
            }
            Event::SnapshotPersisted(persisted) => {
                self.replica.handle_snapshot_persisted(persisted);
            }
            Event::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn weak_client_fails_once_actor_is_gone() {
        let (client, rx) = ActorClient::new(1);
        let weak = client.weak();

        drop(rx);
        assert!(weak.follower_timeout().await.is_err());

        let (client2, _rx2) = ActorClient::new(1);
        let weak2 = client2.weak();
        drop(client2);
        drop(client);
        assert!(weak2.follower_timeout().await.is_err());
    }

    #[tokio::test]
    async fn unanswered_call_maps_to_actor_exited() {
        let (client, mut rx) = ActorClient::new(1);
        let weak = client.weak();

        let caller = tokio::spawn(async move { weak.quorum_state().await });
        match rx.recv().await {
            Some(Event::QuorumState(callback)) => drop(callback),
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(matches!(caller.await.unwrap(), Err(ActorExited)));
    }
}
