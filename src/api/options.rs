use std::convert::TryFrom;
use tokio::time::Duration;

/// Timing and batching knobs of the replicated (embedded) journal. Unset values take defaults.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    pub leader_append_entries_timeout: Option<Duration>,
    /// Most log entries sent in one AppendEntries request.
    pub max_entries_per_append: Option<usize>,
    /// How many log entries to keep behind a snapshot, so briefly lagging followers can catch up
    /// without a snapshot transfer.
    pub snapshot_retained_entries: Option<u64>,
    /// How long a write waits to commit before failing as unavailable.
    pub client_write_timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub(crate) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub leader_append_entries_timeout: Duration,
    pub max_entries_per_append: usize,
    pub snapshot_retained_entries: u64,
    pub client_write_timeout: Duration,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }
        if self.leader_append_entries_timeout >= self.follower_min_timeout {
            return Err("Leader's AppendEntries RPC timeout must be less than the follower's heartbeat timeout");
        }
        if self.max_entries_per_append == 0 {
            return Err("AppendEntries must be allowed to carry at least one entry");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options.leader_heartbeat_duration.unwrap_or(Duration::from_millis(100)),
            follower_min_timeout: options.follower_min_timeout.unwrap_or(Duration::from_millis(500)),
            follower_max_timeout: options.follower_max_timeout.unwrap_or(Duration::from_millis(1500)),
            leader_append_entries_timeout: options
                .leader_append_entries_timeout
                .unwrap_or(Duration::from_millis(300)),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
            snapshot_retained_entries: options.snapshot_retained_entries.unwrap_or(1024),
            client_write_timeout: options.client_write_timeout.unwrap_or(Duration::from_secs(10)),
        };

        values.validate()?;
        Ok(values)
    }
}

/// Knobs shared by both journal modes. Unset values take defaults.
#[derive(Clone, Debug, Default)]
pub struct JournalOptions {
    /// Entries applied since the last checkpoint that trigger a new one.
    pub checkpoint_period_entries: Option<u64>,
    /// Bytes logged since the last checkpoint that trigger a new one (UFS journal only).
    pub log_size_bytes_max: Option<u64>,
    /// A log segment is sealed once it grows past this size.
    pub segment_size_bytes: Option<u64>,
    /// Checkpoints kept on disk, newest first.
    pub retained_checkpoints: Option<usize>,
    /// Recently applied operation ids remembered for duplicate detection.
    pub operation_id_window: Option<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct JournalOptionsValidated {
    pub checkpoint_period_entries: u64,
    pub log_size_bytes_max: u64,
    pub segment_size_bytes: u64,
    pub retained_checkpoints: usize,
    pub operation_id_window: usize,
}

impl JournalOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.checkpoint_period_entries == 0 {
            return Err("Checkpoint period must be at least one entry");
        }
        if self.segment_size_bytes == 0 || self.log_size_bytes_max == 0 {
            return Err("Log size limits must be positive");
        }
        if self.retained_checkpoints == 0 {
            return Err("At least one checkpoint must be retained");
        }

        Ok(())
    }
}

impl TryFrom<JournalOptions> for JournalOptionsValidated {
    type Error = &'static str;

    fn try_from(options: JournalOptions) -> Result<Self, Self::Error> {
        let values = JournalOptionsValidated {
            checkpoint_period_entries: options.checkpoint_period_entries.unwrap_or(100_000),
            log_size_bytes_max: options.log_size_bytes_max.unwrap_or(10 * 1024 * 1024),
            segment_size_bytes: options.segment_size_bytes.unwrap_or(4 * 1024 * 1024),
            retained_checkpoints: options.retained_checkpoints.unwrap_or(2),
            operation_id_window: options.operation_id_window.unwrap_or(4096),
        };

        values.validate()?;
        Ok(values)
    }
}
