use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::election::timers::deadline::Deadline;
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use crate::replica::replica_api::HeartbeatTick;
use std::sync::{Arc, Weak};
use tokio::time::Duration;

/// HeartbeatTimerHandle makes the leader contact one peer at least every heartbeat duration.
/// Dropping the handle stops the timer.
pub(crate) struct HeartbeatTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    heartbeat_duration: Duration,
    next_heartbeat_time: Deadline,
    clock: C,
}

struct HeartbeatTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    actor_client: WeakActorClient,
    tick: HeartbeatTick,
    clock: C,
}

impl HeartbeatTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        peer_id: ReplicaId,
        term: Term,
    ) -> Self {
        let (task, handle) = HeartbeatTimerTask::new(heartbeat_duration, actor_client, peer_id, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> HeartbeatTimerHandle<C> {
    /// Pushes the next tick a full heartbeat duration out, e.g. after contacting the peer anyway.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.shared.reset_heartbeat_timer();
    }
}

impl<C: Clock> Shared<C> {
    fn reset_heartbeat_timer(&self) {
        self.next_heartbeat_time
            .set(self.clock.now() + self.heartbeat_duration);
    }
}

impl<C: Clock> HeartbeatTimerTask<C> {
    fn new(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        peer_id: ReplicaId,
        term: Term,
        clock: C,
    ) -> (Self, HeartbeatTimerHandle<C>) {
        let shared = Arc::new(Shared {
            heartbeat_duration,
            next_heartbeat_time: Deadline::default(),
            clock: clock.clone(),
        });

        let task = HeartbeatTimerTask {
            weak_shared: Arc::downgrade(&shared),
            actor_client,
            tick: HeartbeatTick { peer_id, term },
            clock,
        };

        (task, HeartbeatTimerHandle { shared })
    }

    async fn run(mut self) {
        // The deadline starts out empty, so a new leader (or a new member) gets its first tick
        // immediately.
        loop {
            let wake_time = match self.weak_shared.upgrade() {
                None => return,
                Some(shared) => shared.next_heartbeat_time.take(),
            };

            match wake_time {
                Some(wake_time) => self.clock.sleep_until(wake_time).await,
                None => {
                    if self.actor_client.heartbeat(self.tick.clone()).await.is_err() {
                        return;
                    }
                    match self.weak_shared.upgrade() {
                        Some(shared) => shared.reset_heartbeat_timer(),
                        None => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::clock::mocked_clock;
    use crate::replica::election::timers::test_utils::TestUtilActor;

    #[tokio::test]
    async fn ticks_every_heartbeat_until_dropped() {
        let heartbeat = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut clock) = mocked_clock();

        let expected = HeartbeatTick {
            peer_id: ReplicaId::new("peer-123"),
            term: Term::new(10),
        };
        let (timer_task, timer_handle) = HeartbeatTimerTask::new(
            heartbeat,
            strong_actor_client.weak(),
            expected.peer_id.clone(),
            expected.term,
            mock_clock,
        );
        let join_handle = tokio::task::spawn(timer_task.run());

        // First tick right away.
        actor.assert_heartbeat_event(expected.clone()).await;
        actor.assert_no_event().await;

        for _ in 0..5 {
            clock.advance(heartbeat);
            actor.assert_heartbeat_event(expected.clone()).await;
            actor.assert_no_event().await;
        }

        // A long pause doesn't queue up a burst of ticks.
        clock.advance(heartbeat * 5);
        actor.assert_heartbeat_event(expected.clone()).await;
        actor.assert_no_event().await;

        drop(timer_handle);
        clock.advance(heartbeat);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn reset_postpones_the_tick() {
        let heartbeat = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut clock) = mocked_clock();

        let expected = HeartbeatTick {
            peer_id: ReplicaId::new("peer-123"),
            term: Term::new(3),
        };
        let (timer_task, timer_handle) = HeartbeatTimerTask::new(
            heartbeat,
            strong_actor_client.weak(),
            expected.peer_id.clone(),
            expected.term,
            mock_clock,
        );
        tokio::task::spawn(timer_task.run());
        actor.assert_heartbeat_event(expected.clone()).await;

        for _ in 0..5 {
            clock.advance(heartbeat / 2);
            timer_handle.reset_heartbeat_timer();
        }
        actor.assert_no_event().await;
        assert_eq!(clock.elapsed_time(), heartbeat * 5 / 2);

        // Last reset at T=2.5, so the tick is due at T=3.5.
        clock.advance(heartbeat / 2);
        actor.assert_no_event().await;
        clock.advance(heartbeat / 2);
        actor.assert_heartbeat_event(expected).await;
        assert_eq!(clock.elapsed_time(), heartbeat * 7 / 2);
    }
}
