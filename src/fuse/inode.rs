//! Inode numbers for a flat namespace.
//!
//! The kernel addresses files by inode; the filesystem layer by name. A name
//! gets a number the first time the kernel sees it. Each `lookup` reply the
//! kernel keeps counts one reference; the entry is dropped once `forget` has
//! returned them all, or on unlink when the kernel never held any.

use std::collections::HashMap;

pub const ROOT_INODE: u64 = 1;

struct Entry {
    name: String,
    lookups: u64,
}

pub struct InodeTable {
    by_name: HashMap<String, u64>,
    by_ino: HashMap<u64, Entry>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_ino: HashMap::new(),
            next: ROOT_INODE + 1,
        }
    }

    /// Existing inode of `name`, or a newly assigned one. Does not count as
    /// a kernel reference.
    pub fn ino_for(&mut self, name: &str) -> u64 {
        if let Some(&ino) = self.by_name.get(name) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_name.insert(name.to_string(), ino);
        self.by_ino.insert(
            ino,
            Entry {
                name: name.to_string(),
                lookups: 0,
            },
        );
        ino
    }

    /// Like `ino_for`, for a reply that hands the inode to the kernel.
    pub fn lookup(&mut self, name: &str) -> u64 {
        let ino = self.ino_for(name);
        if let Some(entry) = self.by_ino.get_mut(&ino) {
            entry.lookups += 1;
        }
        ino
    }

    /// Returns `nlookup` references; the entry goes away at zero.
    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        let Some(entry) = self.by_ino.get_mut(&ino) else {
            return;
        };
        entry.lookups = entry.lookups.saturating_sub(nlookup);
        if entry.lookups == 0 {
            self.remove(ino);
        }
    }

    /// Drops `name` if the kernel holds no reference to its inode.
    pub fn unlinked(&mut self, name: &str) {
        let Some(&ino) = self.by_name.get(name) else {
            return;
        };
        if self.by_ino.get(&ino).is_some_and(|e| e.lookups == 0) {
            self.remove(ino);
        }
    }

    fn remove(&mut self, ino: u64) {
        if let Some(entry) = self.by_ino.remove(&ino) {
            self.by_name.remove(&entry.name);
        }
    }

    /// The root maps to the empty name.
    pub fn name_of(&self, ino: u64) -> Option<&str> {
        if ino == ROOT_INODE {
            return Some("");
        }
        self.by_ino.get(&ino).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_assignment_is_stable() {
        let mut t = InodeTable::new();
        assert!(t.is_empty());
        let a = t.ino_for("a");
        let b = t.ino_for("b");
        assert_ne!(a, b);
        assert_ne!(a, ROOT_INODE);
        assert_eq!(t.ino_for("a"), a);
        assert_eq!(t.lookup("a"), a);
        assert_eq!(t.len(), 2);

        assert_eq!(t.name_of(a), Some("a"));
        assert_eq!(t.name_of(ROOT_INODE), Some(""));
        assert_eq!(t.name_of(9999), None);
    }

    #[test]
    fn test_forget_drops_entry_at_zero() {
        let mut t = InodeTable::new();
        let a = t.lookup("a");
        t.lookup("a");
        t.forget(a, 1);
        assert_eq!(t.name_of(a), Some("a"));
        t.forget(a, 1);
        assert_eq!(t.name_of(a), None);
        assert!(t.is_empty());

        // a later lookup hands out a fresh number
        assert_ne!(t.lookup("a"), a);
        t.forget(ROOT_INODE, 1);
        t.forget(12345, 1);
        assert_eq!(t.name_of(ROOT_INODE), Some(""));
    }

    #[test]
    fn test_unlinked_keeps_referenced_inodes() {
        let mut t = InodeTable::new();
        let held = t.lookup("held");
        let listed = t.ino_for("listed");

        t.unlinked("held");
        t.unlinked("listed");
        t.unlinked("never-seen");
        assert_eq!(t.name_of(held), Some("held"));
        assert_eq!(t.name_of(listed), None);

        t.forget(held, 1);
        assert!(t.is_empty());
    }
}
