use crate::replica::ElectionStateChangeListener;
use crate::replica::ElectionStateSnapshot;

/// Something the local replica observed about the quorum.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// The replica's role changed. Only the latest role is kept: if it changes several times
    /// between two `next_event()` calls, the listener sees the last change only.
    Election(ElectionEvent),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ElectionEvent {
    /// Writes through this replica are accepted.
    Leader,
    Candidate,
    Follower(FollowerEventData),
    FollowerNoLeader,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FollowerEventData {
    pub leader_replica_id: String,
}

/// EventListener lets the master process follow its replica's role, e.g. to start serving
/// metadata writes once it leads and stop once it doesn't.
pub struct EventListener {
    election_state_change_listener: ElectionStateChangeListener,
}

impl EventListener {
    pub(crate) fn new(election_state_change_listener: ElectionStateChangeListener) -> Self {
        EventListener {
            election_state_change_listener,
        }
    }

    /// Waits for the next role change. None once the replica has shut down.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.election_state_change_listener
            .next()
            .await
            .map(|election_state| Event::Election(election_event(election_state)))
    }

    /// The role as of now, without waiting.
    pub fn current_event(&self) -> Event {
        Event::Election(election_event(self.election_state_change_listener.current()))
    }

    /// Returns true once this replica leads, which may be immediately. False if the replica shuts
    /// down first.
    pub async fn wait_until_leader(&mut self) -> bool {
        if matches!(self.election_state_change_listener.current(), ElectionStateSnapshot::Leader) {
            return true;
        }
        while let Some(election_state) = self.election_state_change_listener.next().await {
            if let ElectionStateSnapshot::Leader = election_state {
                return true;
            }
        }
        false
    }
}

fn election_event(election_state: ElectionStateSnapshot) -> ElectionEvent {
    match election_state {
        ElectionStateSnapshot::Leader => ElectionEvent::Leader,
        ElectionStateSnapshot::Candidate => ElectionEvent::Candidate,
        ElectionStateSnapshot::Follower(leader_id) => ElectionEvent::Follower(FollowerEventData {
            leader_replica_id: leader_id.into_inner(),
        }),
        ElectionStateSnapshot::FollowerNoLeader => ElectionEvent::FollowerNoLeader,
    }
}
