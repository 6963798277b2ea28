//! Arena-backed FIFO queue with O(1) remove-by-key
//!
//! Replaces intrusive linked lists of blocked threads. Nodes live in a
//! `Vec` and link to each other by index; removed slots go on a free list
//! and bump their generation, so a stale `QueueKey` can never remove a
//! later occupant of the same slot.
//!
//! # Complexity
//!
//! - `push_back`: O(1) amortized
//! - `remove`: O(1)
//! - iteration: O(len), FIFO order

const NIL: u32 = u32::MAX;

/// Handle to an element in a `WaitQueue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey {
    index: u32,
    generation: u32,
}

struct Node<T> {
    value: Option<T>,
    prev: u32,
    next: u32,
    generation: u32,
}

/// FIFO queue of waits owned by one capability
pub struct WaitQueue<T> {
    nodes: Vec<Node<T>>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    len: usize,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the tail, returning the key for later removal
    pub fn push_back(&mut self, value: T) -> QueueKey {
        let index = match self.free.pop() {
            Some(i) => {
                let node = &mut self.nodes[i as usize];
                node.value = Some(value);
                node.prev = self.tail;
                node.next = NIL;
                i
            }
            None => {
                let i = self.nodes.len() as u32;
                self.nodes.push(Node {
                    value: Some(value),
                    prev: self.tail,
                    next: NIL,
                    generation: 0,
                });
                i
            }
        };

        if self.tail == NIL {
            self.head = index;
        } else {
            self.nodes[self.tail as usize].next = index;
        }
        self.tail = index;
        self.len += 1;

        QueueKey {
            index,
            generation: self.nodes[index as usize].generation,
        }
    }

    /// Remove by key. Returns `None` for a stale or already-removed key.
    pub fn remove(&mut self, key: QueueKey) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        let (prev, next) = {
            let node = &self.nodes[key.index as usize];
            (node.prev, node.next)
        };

        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }

        let node = &mut self.nodes[key.index as usize];
        node.generation = node.generation.wrapping_add(1);
        node.prev = NIL;
        node.next = NIL;
        self.free.push(key.index);
        self.len -= 1;
        node.value.take()
    }

    #[inline]
    pub fn contains(&self, key: QueueKey) -> bool {
        self.nodes
            .get(key.index as usize)
            .map_or(false, |n| n.generation == key.generation && n.value.is_some())
    }

    pub fn get(&self, key: QueueKey) -> Option<&T> {
        if !self.contains(key) {
            return None;
        }
        self.nodes[key.index as usize].value.as_ref()
    }

    pub fn get_mut(&mut self, key: QueueKey) -> Option<&mut T> {
        if !self.contains(key) {
            return None;
        }
        self.nodes[key.index as usize].value.as_mut()
    }

    /// Iterate in FIFO (registration) order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Visit every element mutably, in FIFO order
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        let mut cursor = self.head;
        while cursor != NIL {
            let node = &mut self.nodes[cursor as usize];
            if let Some(v) = node.value.as_mut() {
                f(v);
            }
            cursor = node.next;
        }
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO iterator over `(key, value)` pairs
pub struct Iter<'a, T> {
    queue: &'a WaitQueue<T>,
    cursor: u32,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (QueueKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor != NIL {
            let index = self.cursor;
            let node = &self.queue.nodes[index as usize];
            self.cursor = node.next;
            if let Some(v) = node.value.as_ref() {
                return Some((QueueKey { index, generation: node.generation }, v));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<T: Copy>(q: &WaitQueue<T>) -> Vec<T> {
        q.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut q = WaitQueue::new();
        for i in 0..5 {
            q.push_back(i);
        }
        assert_eq!(values(&q), vec![0, 1, 2, 3, 4]);
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let mut q = WaitQueue::new();
        let a = q.push_back('a');
        let b = q.push_back('b');
        let c = q.push_back('c');
        let d = q.push_back('d');

        assert_eq!(q.remove(b), Some('b'));
        assert_eq!(values(&q), vec!['a', 'c', 'd']);
        assert_eq!(q.remove(a), Some('a'));
        assert_eq!(q.remove(d), Some('d'));
        assert_eq!(values(&q), vec!['c']);
        assert_eq!(q.remove(c), Some('c'));
        assert!(q.is_empty());
        assert_eq!(q.iter().next(), None);
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut q = WaitQueue::new();
        let k = q.push_back(1);
        assert_eq!(q.remove(k), Some(1));
        assert_eq!(q.remove(k), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_stale_key_after_slot_reuse() {
        let mut q = WaitQueue::new();
        let old = q.push_back(1);
        q.remove(old);

        // Same slot, new generation
        let new = q.push_back(2);
        assert!(!q.contains(old));
        assert_eq!(q.remove(old), None);
        assert_eq!(q.get(new), Some(&2));
    }

    #[test]
    fn test_reuse_keeps_order() {
        let mut q = WaitQueue::new();
        let a = q.push_back(1);
        q.push_back(2);
        q.remove(a);
        q.push_back(3);
        assert_eq!(values(&q), vec![2, 3]);
    }

    #[test]
    fn test_get_mut_and_for_each() {
        let mut q = WaitQueue::new();
        let k = q.push_back(10);
        q.push_back(20);
        *q.get_mut(k).unwrap() += 1;
        q.for_each_mut(|v| *v *= 2);
        assert_eq!(values(&q), vec![22, 40]);
    }
}
