use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::election::timers::deadline::Deadline;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};

/// FollowerTimerHandle fires an election timeout at the actor unless it keeps being reset.
/// Dropping the handle stops the timer.
pub(crate) struct FollowerTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    next_wake_time: Deadline,
    timeout_range: RangeInclusive<Duration>,
    clock: C,
}

struct FollowerTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    actor_client: WeakActorClient,
    clock: C,
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_timer_task(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
    ) -> Self {
        let (task, handle) = FollowerTimerTask::new(min_timeout, max_timeout, actor_client, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> FollowerTimerHandle<C> {
    pub(crate) fn reset_timeout(&self) {
        self.shared.reset_timeout();
    }
}

impl<C: Clock> Shared<C> {
    fn reset_timeout(&self) {
        self.next_wake_time.set(self.clock.now() + self.random_timeout());
    }

    fn random_timeout(&self) -> Duration {
        rand::thread_rng().gen_range(self.timeout_range.clone())
    }
}

impl<C: Clock> FollowerTimerTask<C> {
    fn new(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
        clock: C,
    ) -> (Self, FollowerTimerHandle<C>) {
        let shared = Arc::new(Shared {
            next_wake_time: Deadline::default(),
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
            clock: clock.clone(),
        });
        // The first deadline must be in place before the task runs, or it would time out
        // right away.
        shared.reset_timeout();

        let task = FollowerTimerTask {
            weak_shared: Arc::downgrade(&shared),
            actor_client,
            clock,
        };

        (task, FollowerTimerHandle { shared })
    }

    async fn run(mut self) {
        loop {
            match self.next_step() {
                Step::Exit => return,
                Step::SleepUntil(wake_time) => self.clock.sleep_until(wake_time).await,
                Step::Timeout(backoff) => {
                    // We slept until the deadline and nobody reset it: no word from a leader.
                    if self.actor_client.follower_timeout().await.is_err() {
                        return;
                    }
                    // Keep running in case the actor stays follower (it may have raced with an
                    // AppendEntries). Jittered so split votes don't repeat in lockstep.
                    self.clock.sleep(backoff).await;
                }
            }
        }
    }

    fn next_step(&self) -> Step {
        // Only hold the handle's state briefly. The handle dropping means we're no longer
        // follower (or candidate) of the same term.
        match self.weak_shared.upgrade() {
            None => Step::Exit,
            Some(shared) => match shared.next_wake_time.take() {
                Some(wake_time) => Step::SleepUntil(wake_time),
                None => Step::Timeout(shared.random_timeout()),
            },
        }
    }
}

enum Step {
    Exit,
    SleepUntil(Instant),
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::clock::{mocked_clock, MockClock, MockClockController};
    use crate::replica::election::timers::test_utils::TestUtilActor;
    use tokio::task::JoinHandle;

    fn spawn(
        timeout: Duration,
    ) -> (
        FollowerTimerHandle<MockClock>,
        TestUtilActor,
        MockClockController,
        ActorClient,
        JoinHandle<()>,
    ) {
        let (strong_actor_client, rx) = ActorClient::new(10);
        let (mock_clock, controller) = mocked_clock();
        // Jitter isn't under test, so min and max are the same.
        let (timer_task, timer_handle) =
            FollowerTimerTask::new(timeout, timeout, strong_actor_client.weak(), mock_clock);
        let join_handle = tokio::task::spawn(timer_task.run());

        (timer_handle, TestUtilActor::new(rx), controller, strong_actor_client, join_handle)
    }

    #[tokio::test]
    async fn resets_postpone_the_timeout() {
        let timeout = Duration::from_millis(100);
        let (timer_handle, mut actor, mut clock, _client, _join) = spawn(timeout);
        actor.assert_no_event().await;

        for _ in 0..5 {
            clock.advance(timeout / 2);
            timer_handle.reset_timeout();
        }
        actor.assert_no_event().await;
        assert_eq!(clock.elapsed_time(), timeout * 5 / 2);

        // Last reset was at T=2.5, so nothing before T=3.5.
        let one_ns = Duration::from_nanos(1);
        clock.advance(timeout - one_ns);
        actor.assert_no_event().await;

        clock.advance(one_ns);
        actor.assert_follower_timeout_event().await;
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_task() {
        let timeout = Duration::from_millis(100);
        let (timer_handle, mut actor, mut clock, _client, join_handle) = spawn(timeout);

        drop(timer_handle);
        clock.advance(timeout * 2);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn keeps_running_after_a_timeout() {
        let timeout = Duration::from_millis(100);
        let (timer_handle, mut actor, mut clock, _client, _join) = spawn(timeout);
        actor.assert_no_event().await;

        // The actor may get the timeout while a reset is already queued behind it.
        clock.advance(timeout);
        actor.assert_follower_timeout_event().await;
        timer_handle.reset_timeout();

        for _ in 0..5 {
            clock.advance(timeout / 2);
            timer_handle.reset_timeout();
        }
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn stops_when_the_actor_is_gone() {
        let timeout = Duration::from_millis(100);
        let (_timer_handle, actor, mut clock, client, join_handle) = spawn(timeout);

        drop(actor);
        drop(client);
        clock.advance(timeout);
        join_handle.await.unwrap();
    }
}
