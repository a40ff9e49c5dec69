//! Bounded FIFO of inbound streams waiting to be claimed.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::stream::StreamShared;
use crate::transport::StreamKind;

/// Inbound streams the peer opened that the application has not accepted yet.
///
/// Capacity is tracked per stream kind. A stream that arrives while its kind
/// is at capacity is handed back to the caller to be refused.
#[derive(Debug)]
pub(crate) struct AcceptQueue {
    queue: VecDeque<Arc<StreamShared>>,
    max_bidi: usize,
    max_uni: usize,
    bidi: usize,
    uni: usize,
}

impl AcceptQueue {
    pub(crate) fn new(max_bidi: u32, max_uni: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            max_bidi: max_bidi as usize,
            max_uni: max_uni as usize,
            bidi: 0,
            uni: 0,
        }
    }

    /// Whether nothing can ever be accepted.
    pub(crate) fn is_disabled(&self) -> bool {
        self.max_bidi == 0 && self.max_uni == 0
    }

    /// Enqueue `stream`, or hand it back if its kind is at capacity.
    pub(crate) fn push(&mut self, stream: Arc<StreamShared>) -> Result<(), Arc<StreamShared>> {
        let (count, max) = match stream.id().kind() {
            StreamKind::Bidirectional => (&mut self.bidi, self.max_bidi),
            StreamKind::Unidirectional => (&mut self.uni, self.max_uni),
        };
        if *count >= max {
            return Err(stream);
        }
        *count += 1;
        self.queue.push_back(stream);
        Ok(())
    }

    /// Dequeue the oldest stream.
    pub(crate) fn pop(&mut self) -> Option<Arc<StreamShared>> {
        let stream = self.queue.pop_front()?;
        match stream.id().kind() {
            StreamKind::Bidirectional => self.bidi -= 1,
            StreamKind::Unidirectional => self.uni -= 1,
        }
        Some(stream)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Remove every queued stream.
    pub(crate) fn drain(&mut self) -> Vec<Arc<StreamShared>> {
        self.bidi = 0;
        self.uni = 0;
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Side, StreamId};

    fn stream(kind: StreamKind, index: u64) -> Arc<StreamShared> {
        Arc::new(StreamShared::new(
            StreamId::new(Side::Client, kind, index),
            Side::Server,
        ))
    }

    #[test]
    fn fifo_order() {
        let mut queue = AcceptQueue::new(4, 4);
        queue.push(stream(StreamKind::Bidirectional, 0)).unwrap();
        queue.push(stream(StreamKind::Unidirectional, 0)).unwrap();
        queue.push(stream(StreamKind::Bidirectional, 1)).unwrap();

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|s| s.id().raw())
            .collect();
        assert_eq!(order, vec![0, 2, 4]);
    }

    #[test]
    fn capacity_is_per_kind() {
        let mut queue = AcceptQueue::new(1, 0);
        queue.push(stream(StreamKind::Bidirectional, 0)).unwrap();

        let refused = queue.push(stream(StreamKind::Bidirectional, 1)).unwrap_err();
        assert_eq!(refused.id().index(), 1);
        assert!(queue.push(stream(StreamKind::Unidirectional, 0)).is_err());

        // Claiming frees the slot
        queue.pop().unwrap();
        assert!(queue.push(stream(StreamKind::Bidirectional, 2)).is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn disabled_and_drain() {
        assert!(AcceptQueue::new(0, 0).is_disabled());

        let mut queue = AcceptQueue::new(2, 2);
        assert!(!queue.is_disabled());
        queue.push(stream(StreamKind::Bidirectional, 0)).unwrap();
        queue.push(stream(StreamKind::Unidirectional, 0)).unwrap();
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.pop().is_none());
        queue.push(stream(StreamKind::Bidirectional, 1)).unwrap();
        queue.push(stream(StreamKind::Bidirectional, 2)).unwrap();
    }
}
