//! Recently-seen message ids, kept per connection.

use std::collections::{HashSet, VecDeque};

use crate::model::MessageId;

/// Bounded set of message ids. The oldest id is forgotten once `capacity`
/// is exceeded.
#[derive(Debug, Clone)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`. Returns false if it was already seen.
    pub fn insert(&mut self, id: MessageId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sighting_is_a_duplicate() {
        let mut ids = RecentIds::new(8);
        let id = MessageId::new();
        assert!(ids.insert(id));
        assert!(!ids.insert(id));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn forgets_oldest_beyond_capacity() {
        let mut ids = RecentIds::new(2);
        let (a, b, c) = (MessageId::new(), MessageId::new(), MessageId::new());
        ids.insert(a);
        ids.insert(b);
        ids.insert(c);
        assert!(!ids.contains(&a));
        assert!(ids.contains(&b) && ids.contains(&c));
        assert!(ids.insert(a));
    }
}
