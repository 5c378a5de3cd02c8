use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::replica::election::state_change_listener::{self, ElectionStateChangeNotifier};
use crate::replica::election::timers::{FollowerTimerHandle, HeartbeatTimerHandle};
use crate::replica::election::{ElectionStateChangeListener, ElectionStateSnapshot, LeaderStateTracker, PeerState};
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use crate::replica::replica_api::RaftRole;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub(crate) my_replica_id: ReplicaId,
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
}

/// Who this replica believes is leading the current term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CurrentLeader {
    Me,
    Other(ReplicaId),
    Unknown,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    state_change_notifier: ElectionStateChangeNotifier,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        actor_client: WeakActorClient,
    ) -> (Self, ElectionStateChangeListener) {
        let initial_state = State::Follower(FollowerState::new(None, &config, actor_client.clone()));
        let (notifier, listener) = state_change_listener::new(Self::current_state_impl(&initial_state));

        let election_state = Self {
            state: initial_state,
            config,
            actor_client,
            state_change_notifier: notifier,
        };

        (election_state, listener)
    }

    pub(crate) fn transition_to_follower(&mut self, new_leader: Option<ReplicaId>) {
        self.state = State::Follower(FollowerState::new(new_leader, &self.config, self.actor_client.clone()));
        self.notify_new_state();
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let mut cs = CandidateState::new(&self.config, self.actor_client.clone());
        cs.add_received_vote(self.config.my_replica_id.clone());

        self.state = State::Candidate(cs);
        self.notify_new_state();
    }

    pub(crate) fn transition_to_leader(
        &mut self,
        term: Term,
        peer_ids: HashSet<ReplicaId>,
        latest_log_index: Option<Index>,
    ) {
        let mut tracker = LeaderStateTracker::new(HashMap::with_capacity(peer_ids.len()));
        for peer_id in peer_ids {
            let peer_state = self.new_peer_state(&peer_id, term, latest_log_index);
            tracker.insert(peer_id, peer_state);
        }

        self.state = State::Leader(LeaderState { term, tracker });
        self.notify_new_state();
    }

    /// Starts tracking peers that joined the replication set and stops tracking those that left.
    /// No-op unless leader.
    pub(crate) fn sync_leader_peers(&mut self, peer_ids: &HashSet<ReplicaId>, latest_log_index: Option<Index>) {
        let term = match &self.state {
            State::Leader(ls) => ls.term,
            _ => return,
        };
        let missing: Vec<ReplicaId> = match &self.state {
            State::Leader(ls) => peer_ids
                .iter()
                .filter(|id| ls.tracker.peer_state(id).is_none())
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        let new_states: Vec<(ReplicaId, PeerState)> = missing
            .into_iter()
            .map(|id| {
                let state = self.new_peer_state(&id, term, latest_log_index);
                (id, state)
            })
            .collect();

        if let State::Leader(ls) = &mut self.state {
            ls.tracker.retain(|id| peer_ids.contains(id));
            for (id, state) in new_states {
                ls.tracker.insert(id, state);
            }
        }
    }

    fn new_peer_state(&self, peer_id: &ReplicaId, term: Term, latest_log_index: Option<Index>) -> PeerState {
        let heartbeat_timer = HeartbeatTimerHandle::spawn_timer_task(
            self.config.leader_heartbeat_duration,
            self.actor_client.clone(),
            peer_id.clone(),
            term,
        );
        PeerState::new(heartbeat_timer, latest_log_index)
    }

    pub(crate) fn current_state(&self) -> ElectionStateSnapshot {
        Self::current_state_impl(&self.state)
    }

    fn current_state_impl(state: &State) -> ElectionStateSnapshot {
        match state {
            State::Leader(_) => ElectionStateSnapshot::Leader,
            State::Candidate(_) => ElectionStateSnapshot::Candidate,
            State::Follower(FollowerState { leader: None, .. }) => ElectionStateSnapshot::FollowerNoLeader,
            State::Follower(FollowerState {
                leader: Some(leader_id),
                ..
            }) => ElectionStateSnapshot::Follower(leader_id.clone()),
        }
    }

    fn notify_new_state(&self) {
        self.state_change_notifier
            .notify_new_state(Self::current_state_impl(&self.state));
    }

    pub(crate) fn current_leader(&self) -> CurrentLeader {
        match &self.state {
            State::Leader(_) => CurrentLeader::Me,
            State::Candidate(_) => CurrentLeader::Unknown,
            State::Follower(FollowerState { leader: Some(id), .. }) => CurrentLeader::Other(id.clone()),
            State::Follower(FollowerState { leader: None, .. }) => CurrentLeader::Unknown,
        }
    }

    pub(crate) fn role(&self) -> RaftRole {
        match &self.state {
            State::Leader(_) => RaftRole::Leader,
            State::Candidate(_) => RaftRole::Candidate,
            State::Follower(_) => RaftRole::Follower,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.follower_timeout_tracker.reset_timeout();
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader_id: &ReplicaId) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader_id.clone());
                self.notify_new_state();
            }
        }
    }

    /// Returns everyone who voted for us so far, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<&HashSet<ReplicaId>> {
        if let State::Candidate(cs) = &mut self.state {
            cs.add_received_vote(vote_from);
            Some(&cs.received_votes_from)
        } else {
            None
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        if let State::Leader(ls) = &self.state {
            Some(&ls.tracker)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(_) => write!(f, "Candidate"),
            State::Follower(FollowerState {
                leader: Some(leader_id),
                ..
            }) => write!(f, "Follower(Leader={:?})", leader_id),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
        }
    }
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderState {
    term: Term,
    tracker: LeaderStateTracker,
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
    // Election timeout: start another election if this one doesn't conclude.
    _follower_timeout_tracker: FollowerTimerHandle,
}

struct FollowerState {
    leader: Option<ReplicaId>,
    follower_timeout_tracker: FollowerTimerHandle,
}

impl CandidateState {
    fn new(config: &ElectionConfig, actor_client: WeakActorClient) -> Self {
        Self {
            received_votes_from: HashSet::with_capacity(3),
            _follower_timeout_tracker: FollowerTimerHandle::spawn_timer_task(
                config.follower_min_timeout,
                config.follower_max_timeout,
                actor_client,
            ),
        }
    }

    fn add_received_vote(&mut self, vote_from: ReplicaId) {
        self.received_votes_from.insert(vote_from);
    }
}

impl FollowerState {
    fn new(leader: Option<ReplicaId>, config: &ElectionConfig, actor_client: WeakActorClient) -> Self {
        Self {
            leader,
            follower_timeout_tracker: FollowerTimerHandle::spawn_timer_task(
                config.follower_min_timeout,
                config.follower_max_timeout,
                actor_client,
            ),
        }
    }
}
