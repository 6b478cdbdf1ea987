//! # Arena-Indexed Free List
//!
//! A doubly-linked list whose nodes live in a `Vec` indexed by flat page
//! number. Links are `u32` arena indices rather than pointers, so unlinking
//! an arbitrary page is O(1) and there is nothing to free or dangle.
//!
//! ```text
//! index:  0     1     2     3     4     5
//!       [ - ] [1↔3] [ - ] [1↔5] [ - ] [3↔-]
//!
//! head = 1, tail = 5, order = 1 -> 3 -> 5
//! ```
//!
//! Each index can be linked at most once. The device keeps its stale pages
//! (reclaimed, not yet erased) here: reclaim pushes, reallocation or block
//! erase unlinks.

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub struct FreeListNode {
    prev: u32,
    next: u32,
    linked: bool,
}

impl FreeListNode {
    const UNLINKED: Self = Self {
        prev: NIL,
        next: NIL,
        linked: false,
    };
}

#[derive(Debug)]
pub struct FreeList {
    nodes: Vec<FreeListNode>,
    head: u32,
    tail: u32,
    len: usize,
}

impl FreeList {
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity < NIL as usize);
        Self {
            nodes: vec![FreeListNode::UNLINKED; capacity],
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, index: u32) -> bool {
        self.nodes
            .get(index as usize)
            .map(|n| n.linked)
            .unwrap_or(false)
    }

    /// Appends `index`. Returns false if it is out of range or already linked.
    pub fn push_back(&mut self, index: u32) -> bool {
        if index as usize >= self.nodes.len() || self.nodes[index as usize].linked {
            return false;
        }

        let old_tail = self.tail;
        self.nodes[index as usize] = FreeListNode {
            prev: old_tail,
            next: NIL,
            linked: true,
        };

        if old_tail == NIL {
            self.head = index;
        } else {
            self.nodes[old_tail as usize].next = index;
        }
        self.tail = index;
        self.len += 1;
        true
    }

    pub fn pop_front(&mut self) -> Option<u32> {
        let head = self.head;
        if head == NIL {
            return None;
        }
        self.remove(head);
        Some(head)
    }

    /// Unlinks `index`. Returns false if it was not linked.
    pub fn remove(&mut self, index: u32) -> bool {
        if !self.contains(index) {
            return false;
        }

        let FreeListNode { prev, next, .. } = self.nodes[index as usize];

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

        self.nodes[index as usize] = FreeListNode::UNLINKED;
        self.len -= 1;
        true
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a> {
    list: &'a FreeList,
    cursor: u32,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == NIL {
            return None;
        }
        let current = self.cursor;
        self.cursor = self.list.nodes[current as usize].next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_list_is_empty() {
        let list = FreeList::with_capacity(8);

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.capacity(), 8);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn push_back_preserves_insertion_order() {
        let mut list = FreeList::with_capacity(8);

        assert!(list.push_back(5));
        assert!(list.push_back(1));
        assert!(list.push_back(7));

        assert_eq!(list.iter().collect::<Vec<_>>(), vec![5, 1, 7]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn push_back_rejects_duplicates_and_out_of_range() {
        let mut list = FreeList::with_capacity(4);

        assert!(list.push_back(2));
        assert!(!list.push_back(2));
        assert!(!list.push_back(4));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_middle_head_and_tail() {
        let mut list = FreeList::with_capacity(8);
        for i in [0, 1, 2, 3, 4] {
            list.push_back(i);
        }

        assert!(list.remove(2));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![0, 1, 3, 4]);

        assert!(list.remove(0));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 3, 4]);

        assert!(list.remove(4));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 3]);

        assert!(!list.remove(4));
        assert!(!list.contains(4));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn pop_front_drains_in_order() {
        let mut list = FreeList::with_capacity(4);
        list.push_back(3);
        list.push_back(0);

        assert_eq!(list.pop_front(), Some(3));
        assert_eq!(list.pop_front(), Some(0));
        assert_eq!(list.pop_front(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn removed_index_can_be_relinked() {
        let mut list = FreeList::with_capacity(4);
        list.push_back(1);
        list.push_back(2);
        list.remove(1);

        assert!(list.push_back(1));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn removing_last_element_resets_head_and_tail() {
        let mut list = FreeList::with_capacity(2);
        list.push_back(1);
        list.remove(1);

        assert!(list.is_empty());
        assert!(list.push_back(0));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![0]);
    }
}
