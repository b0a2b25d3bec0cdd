use parking_lot::RwLock;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::common::DEFAULT_SKIP_LIST_MAX_HEIGHT;

/// Ordering predicate for skip list keys. Two keys are considered equal
/// when neither is less than the other.
pub trait KeyOrder<K>: Send + Sync {
    fn less(&self, a: &K, b: &K) -> bool;
}

/// Natural ordering through `Ord`.
pub struct OrdComparator;

impl<K: Ord> KeyOrder<K> for OrdComparator {
    fn less(&self, a: &K, b: &K) -> bool {
        a < b
    }
}

/// Arena slot index; the head sentinel lives at index 0.
type NodeId = usize;

const HEAD: NodeId = 0;

struct Node<K> {
    /// `None` only for the head sentinel
    key: Option<K>,
    /// `links[level]` is the next node at that level, `None` at the end of
    /// the level's list
    links: Vec<Option<NodeId>>,
}

/// List state behind the reader/writer lock. Nodes live in an arena and
/// link by index, so teardown and `clear` are flat operations with no
/// recursive drop chains.
struct ListCore<K> {
    arena: Vec<Node<K>>,
    /// Recycled arena slots
    free: Vec<NodeId>,
    len: usize,
    rng: ChaCha8Rng,
}

/// A concurrent ordered set backed by a skip list.
///
/// Node heights simulate a geometric distribution with branching factor 4
/// (see Pugh's paper), capped at `max_height`. The generator is a seeded
/// `ChaCha8Rng`, so a given seed produces the same height sequence on every
/// platform.
///
/// A single reader/writer lock protects the whole list: lookups take the
/// shared side, mutations the exclusive side.
pub struct SkipList<K, C = OrdComparator> {
    core: RwLock<ListCore<K>>,
    compare: C,
    max_height: usize,
}

const BRANCHING_FACTOR: u32 = 4;

impl<K> SkipList<K, OrdComparator>
where
    K: Ord + Send + Sync,
{
    /// Creates a naturally ordered skip list with the default height cap.
    pub fn new(seed: u64) -> Self {
        Self::with_comparator(OrdComparator, DEFAULT_SKIP_LIST_MAX_HEIGHT, seed)
    }
}

impl<K, C> SkipList<K, C>
where
    C: KeyOrder<K>,
{
    pub fn with_comparator(compare: C, max_height: usize, seed: u64) -> Self {
        assert!(max_height >= 1);
        let head = Node {
            key: None,
            links: vec![None; max_height],
        };
        Self {
            core: RwLock::new(ListCore {
                arena: vec![head],
                free: Vec::new(),
                len: 0,
                rng: ChaCha8Rng::seed_from_u64(seed),
            }),
            compare,
            max_height,
        }
    }

    pub fn len(&self) -> usize {
        self.core.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.core.read().len == 0
    }

    /// Simulated geometric distribution: grow with probability 1/4 per
    /// level, capped.
    fn random_height(&self, rng: &mut ChaCha8Rng) -> usize {
        let mut height = 1;
        while height < self.max_height && rng.next_u32() % BRANCHING_FACTOR == 0 {
            height += 1;
        }
        height
    }

    /// Walks down the levels collecting, per level, the last node whose key
    /// is less than `key`.
    fn find_predecessors(&self, core: &ListCore<K>, key: &K) -> Vec<NodeId> {
        let mut update = vec![HEAD; self.max_height];
        let mut current = HEAD;

        for level in (0..self.max_height).rev() {
            while let Some(next) = core.arena[current].links[level] {
                let next_key = core.arena[next]
                    .key
                    .as_ref()
                    .expect("only the head sentinel has no key");
                if self.compare.less(next_key, key) {
                    current = next;
                } else {
                    break;
                }
            }
            update[level] = current;
        }

        update
    }

    /// Whether the level-0 successor of `update[0]` equals `key`.
    fn successor_equals(&self, core: &ListCore<K>, update: &[NodeId], key: &K) -> Option<NodeId> {
        let next = core.arena[update[0]].links[0]?;
        let next_key = core.arena[next].key.as_ref()?;
        if !self.compare.less(next_key, key) && !self.compare.less(key, next_key) {
            Some(next)
        } else {
            None
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        let core = self.core.read();
        let update = self.find_predecessors(&core, key);
        self.successor_equals(&core, &update, key).is_some()
    }

    /// Inserts the key. Returns false (and leaves the list unchanged) if
    /// the key is already present.
    pub fn insert(&self, key: K) -> bool {
        let mut core = self.core.write();

        let update = self.find_predecessors(&core, &key);
        if self.successor_equals(&core, &update, &key).is_some() {
            return false;
        }

        let height = self.random_height(&mut core.rng);
        let node = Node {
            key: Some(key),
            links: vec![None; height],
        };

        let id = match core.free.pop() {
            Some(id) => {
                core.arena[id] = node;
                id
            }
            None => {
                core.arena.push(node);
                core.arena.len() - 1
            }
        };

        for level in 0..height {
            let pred = update[level];
            core.arena[id].links[level] = core.arena[pred].links[level];
            core.arena[pred].links[level] = Some(id);
        }

        core.len += 1;
        true
    }

    /// Erases the key. Returns false if the key is not present.
    pub fn erase(&self, key: &K) -> bool {
        let mut core = self.core.write();

        let update = self.find_predecessors(&core, key);
        let Some(target) = self.successor_equals(&core, &update, key) else {
            return false;
        };

        for level in 0..self.max_height {
            let pred = update[level];
            if core.arena[pred].links[level] == Some(target) {
                core.arena[pred].links[level] = core.arena[target].links[level];
            }
        }

        core.arena[target] = Node {
            key: None,
            links: Vec::new(),
        };
        core.free.push(target);
        core.len -= 1;
        true
    }

    /// Removes every element. The arena is dropped flat, level by level at
    /// once, so no recursion is involved regardless of list size.
    pub fn clear(&self) {
        let mut core = self.core.write();
        core.arena.truncate(1);
        for link in core.arena[HEAD].links.iter_mut() {
            *link = None;
        }
        core.free.clear();
        core.len = 0;
    }

    /// Snapshot of the keys in order (level-0 walk), mainly for tests.
    pub fn collect_keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let core = self.core.read();
        let mut keys = Vec::with_capacity(core.len);
        let mut current = core.arena[HEAD].links[0];
        while let Some(id) = current {
            let node = &core.arena[id];
            keys.push(node.key.clone().expect("only the head sentinel has no key"));
            current = node.links[0];
        }
        keys
    }
}
