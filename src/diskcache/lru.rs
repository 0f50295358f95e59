//! Recency-ordered index of locally cached object names.
//!
//! Shared between the write cache, the companion read cache, and
//! outstanding upload callbacks. When an uploaded file is removed from
//! disk its name moves to the back of the index, telling the read cache
//! the object is no longer local and a future read must fetch it from
//! object storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct LruInner {
    seq: u64,
    by_seq: BTreeMap<u64, String>,
    by_name: HashMap<String, u64>,
}

impl LruInner {
    fn detach(&mut self, name: &str) -> bool {
        match self.by_name.remove(name) {
            Some(seq) => {
                self.by_seq.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn attach_back(&mut self, name: String) {
        self.seq += 1;
        self.by_name.insert(name.clone(), self.seq);
        self.by_seq.insert(self.seq, name);
    }
}

/// Mutex-guarded LRU set of object names.
#[derive(Default)]
pub struct LruIndex {
    inner: Mutex<LruInner>,
}

impl LruIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `name` to the recency tail, inserting it if absent.
    pub fn move_back(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.detach(name);
        inner.attach_back(name.to_string());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner.lock().unwrap().detach(name)
    }

    /// Pops the least recently touched name.
    pub fn pop_front(&self) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let seq = *inner.by_seq.keys().next()?;
        let name = inner.by_seq.remove(&seq).expect("seq present");
        inner.by_name.remove(&name);
        Some(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().unwrap().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
