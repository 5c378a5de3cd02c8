use crate::replica::peers::ReplicaId;
use tokio::sync::watch;

/// The replica's role, as published to listeners outside the actor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ElectionStateSnapshot {
    Leader,
    Candidate,
    Follower(ReplicaId),
    FollowerNoLeader,
}

pub(super) fn new(initial_state: ElectionStateSnapshot) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (tx, rx) = watch::channel(initial_state);

    (ElectionStateChangeNotifier { tx }, ElectionStateChangeListener { rx })
}

pub(super) struct ElectionStateChangeNotifier {
    tx: watch::Sender<ElectionStateSnapshot>,
}

impl ElectionStateChangeNotifier {
    /// Publishes `new_state` unless it is what listeners already see. A follower hearing from the
    /// same leader again is not a change.
    pub(super) fn notify_new_state(&self, new_state: ElectionStateSnapshot) {
        if *self.tx.borrow() == new_state {
            return;
        }
        // No listeners left is fine.
        let _ = self.tx.send(new_state);
    }
}

#[derive(Clone)]
pub(crate) struct ElectionStateChangeListener {
    rx: watch::Receiver<ElectionStateSnapshot>,
}

impl ElectionStateChangeListener {
    /// Waits for the next change. Changes in between calls collapse into the latest one. None
    /// once the notifier is gone.
    pub(crate) async fn next(&mut self) -> Option<ElectionStateSnapshot> {
        match self.rx.changed().await {
            Ok(_) => Some(self.rx.borrow().clone()),
            Err(_) => None,
        }
    }

    pub(crate) fn current(&self) -> ElectionStateSnapshot {
        self.rx.borrow().clone()
    }
}
