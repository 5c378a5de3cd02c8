use crate::commitlog::{Entry, Index, Log};
use std::collections::VecDeque;
use std::convert::TryFrom;
use std::io;
use std::marker::PhantomData;

/// InMemoryLog keeps serialized entries in RAM. Nothing survives a restart, so it is only suited to
/// tests and throwaway replicas. See storage.rs for the durable log.
pub struct InMemoryLog<E: Entry> {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    log: VecDeque<Vec<u8>>,
    first_index: Index,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Self {
        InMemoryLog {
            log: VecDeque::new(),
            first_index: Index::start_index(),
            _pd: PhantomData::default(),
        }
    }

    fn position(&self, index: Index) -> Option<usize> {
        if index < self.first_index {
            return None;
        }
        let position = (index.as_u64() - self.first_index.as_u64()) as usize;
        if position < self.log.len() {
            Some(position)
        } else {
            None
        }
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let appended_index = self.next_index();
        self.log.push_back(entry.into());

        Ok(appended_index)
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        match self.position(index) {
            Some(position) => E::try_from(self.log[position].clone()).map(Some),
            None => Ok(None),
        }
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if index <= self.first_index {
            self.log.clear();
        } else if let Some(position) = self.position(index) {
            self.log.truncate(position);
        }

        Ok(())
    }

    fn truncate_prefix(&mut self, index: Index) -> Result<(), io::Error> {
        while self.first_index < index && !self.log.is_empty() {
            self.log.pop_front();
            self.first_index = self.first_index.plus(1);
        }

        Ok(())
    }

    fn reset(&mut self, next_index: Index) -> Result<(), io::Error> {
        self.log.clear();
        self.first_index = next_index;

        Ok(())
    }

    fn first_index(&self) -> Index {
        self.first_index
    }

    fn next_index(&self) -> Index {
        self.first_index.plus(self.log.len() as u64)
    }
}
