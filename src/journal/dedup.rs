use crate::journal::OperationId;
use std::collections::{HashSet, VecDeque};

/// OperationIdWindow remembers the most recently applied operation ids, oldest evicted first.
#[derive(Debug, Clone)]
pub struct OperationIdWindow {
    capacity: usize,
    order: VecDeque<OperationId>,
    members: HashSet<OperationId>,
}

impl OperationIdWindow {
    pub fn new(capacity: usize) -> Self {
        OperationIdWindow {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, operation_id: &OperationId) -> bool {
        self.members.contains(operation_id)
    }

    pub fn insert(&mut self, operation_id: OperationId) {
        if self.capacity == 0 || !self.members.insert(operation_id) {
            return;
        }
        self.order.push_back(operation_id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OperationId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
