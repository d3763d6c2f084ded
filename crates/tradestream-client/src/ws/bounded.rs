/*
[INPUT]:  Items with optional identity
[OUTPUT]: Newest-first capacity bounded list with upsert-by-id
[POS]:    State layer - recent trades, payments, notifications
[UPDATE]: When changing eviction or matching rules
*/

use std::collections::VecDeque;

use crate::types::{Notification, Payment, SystemAlert, Trade};

/// Items that can be matched for in-place replacement
pub trait Identified {
    fn item_id(&self) -> Option<&str>;
}

impl Identified for Trade {
    fn item_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Identified for Payment {
    fn item_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

// Every notification is distinct, even when the backend attaches an id.
impl Identified for Notification {
    fn item_id(&self) -> Option<&str> {
        None
    }
}

impl Identified for SystemAlert {
    fn item_id(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// Replaced the element at this index
    Replaced(usize),
    /// Inserted at the front; carries whether the tail was evicted
    Inserted { evicted: bool },
}

/// Newest-first list that never grows past `capacity`
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedList<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedList<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Insert at the front, evicting the oldest element when full.
    /// Returns true if something was evicted.
    pub fn push_front(&mut self, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_back();
            true
        } else {
            false
        };
        self.items.push_front(item);
        evicted
    }
}

impl<T: Identified> BoundedList<T> {
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|existing| existing.item_id() == Some(id))
    }

    pub fn find(&self, id: &str) -> Option<&T> {
        self.position(id).and_then(|index| self.items.get(index))
    }

    /// Replace the element with the same id in place, otherwise insert at the front
    pub fn upsert(&mut self, item: T) -> Upsert {
        if let Some(index) = item.item_id().and_then(|id| self.position(id)) {
            self.items[index] = item;
            return Upsert::Replaced(index);
        }
        let evicted = self.push_front(item);
        Upsert::Inserted { evicted }
    }
}

impl<T: Clone> BoundedList<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
