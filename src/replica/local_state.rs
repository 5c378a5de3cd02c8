use crate::codec;
use crate::commitlog::sync_directory;
use crate::grpc::ProtoLocalState;
use crate::replica::peers::ReplicaId;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub(crate) struct Term(u64);

impl Term {
    pub(crate) fn new(term: u64) -> Self {
        Term(term)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever the Raft protocol requires that something is persisted to a
/// durable store to guarantee safety. Not everything that uses disk has to go through this, only
/// algorithm-correctness-critical ones.
///
/// Store methods should be implemented atomically via a CAS like operation. Similar to most CAS
/// method signatures, the CAS store methods will return true if we have mutated state. A mutation
/// is only visible once it is durable; on IO failure the previous state stays in effect.
pub(crate) trait PersistentLocalState {
    /// Set current term to `new_term` atomically, iff it is larger than current term.
    fn store_term_if_increased(&mut self, new_term: Term) -> io::Result<bool>;

    /// Store our vote for the latest term iff the latest term (internal state) is the same term as
    /// the one provided, and we have not stored a vote for the latest term.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: ReplicaId) -> io::Result<bool>;

    /// Return the new term. Used when transitioning to candidate.
    fn increment_term_and_vote_for_self(&mut self) -> io::Result<Term>;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>);
}

/// Term and vote held in RAM. Forgets everything on restart, which is only safe in tests.
pub(crate) struct VolatileLocalState {
    current_term: Term,
    voted_for_this_term: Option<Arc<ReplicaId>>,
    my_replica_id: Arc<ReplicaId>,
}

impl VolatileLocalState {
    pub(crate) fn new(my_replica_id: ReplicaId) -> Self {
        VolatileLocalState {
            current_term: Term::new(0),
            voted_for_this_term: None,
            my_replica_id: Arc::new(my_replica_id),
        }
    }
}

impl PersistentLocalState for VolatileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> io::Result<bool> {
        if new_term <= self.current_term {
            return Ok(false);
        }
        self.current_term = new_term;
        self.voted_for_this_term = None;
        Ok(true)
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> io::Result<bool> {
        if expected_term != self.current_term || self.voted_for_this_term.is_some() {
            return Ok(false);
        }
        self.voted_for_this_term.replace(Arc::new(vote));
        Ok(true)
    }

    fn increment_term_and_vote_for_self(&mut self) -> io::Result<Term> {
        self.current_term.incr();
        self.voted_for_this_term.replace(self.my_replica_id.clone());

        Ok(self.current_term)
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>) {
        (self.current_term, self.voted_for_this_term.clone())
    }
}

/// Term and vote kept in a single file. Each change writes a temp file, fsyncs it, and renames it
/// over the previous one, so a crash leaves either the old or the new state.
pub(crate) struct DurableLocalState {
    path: PathBuf,
    current_term: Term,
    voted_for_this_term: Option<Arc<ReplicaId>>,
    my_replica_id: Arc<ReplicaId>,
}

impl DurableLocalState {
    pub(crate) fn open(path: impl Into<PathBuf>, my_replica_id: ReplicaId) -> io::Result<Self> {
        let path = path.into();
        let (current_term, voted_for_this_term) = match fs::read(&path) {
            Ok(bytes) => {
                let stored: ProtoLocalState = codec::decode_message(&bytes)?;
                let vote = if stored.voted_for.is_empty() {
                    None
                } else {
                    Some(Arc::new(ReplicaId::new(stored.voted_for)))
                };
                (Term::new(stored.current_term), vote)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Term::new(0), None),
            Err(e) => return Err(e),
        };

        Ok(DurableLocalState {
            path,
            current_term,
            voted_for_this_term,
            my_replica_id: Arc::new(my_replica_id),
        })
    }

    fn persist(&self, term: Term, vote: Option<&ReplicaId>) -> io::Result<()> {
        let bytes = codec::encode_message(&ProtoLocalState {
            current_term: term.as_u64(),
            voted_for: vote.map(|id| id.as_str().to_string()).unwrap_or_default(),
        });

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            sync_directory(parent)?;
        }

        Ok(())
    }
}

impl PersistentLocalState for DurableLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> io::Result<bool> {
        if new_term <= self.current_term {
            return Ok(false);
        }
        self.persist(new_term, None)?;
        self.current_term = new_term;
        self.voted_for_this_term = None;
        Ok(true)
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> io::Result<bool> {
        if expected_term != self.current_term || self.voted_for_this_term.is_some() {
            return Ok(false);
        }
        self.persist(self.current_term, Some(&vote))?;
        self.voted_for_this_term.replace(Arc::new(vote));
        Ok(true)
    }

    fn increment_term_and_vote_for_self(&mut self) -> io::Result<Term> {
        let mut new_term = self.current_term;
        new_term.incr();
        self.persist(new_term, Some(self.my_replica_id.as_ref()))?;
        self.current_term = new_term;
        self.voted_for_this_term.replace(self.my_replica_id.clone());

        Ok(self.current_term)
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>) {
        (self.current_term, self.voted_for_this_term.clone())
    }
}
