use super::storage::{
    FragmentKey,
    GraphStorage,
};

/// Bitset over colors. Used by solvers and traversals to restrict a walk
/// to a subset of peaks. Negative colors (pseudo nodes) always pass.
#[derive(Debug, Clone, Default)]
pub struct ColorSet {
    words: Vec<u64>,
}

impl ColorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, color: usize) {
        let word = color / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (color % 64);
    }

    pub fn remove(&mut self, color: usize) {
        let word = color / 64;
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << (color % 64));
        }
    }

    pub fn contains(&self, color: usize) -> bool {
        self.words
            .get(color / 64)
            .map(|w| w & (1 << (color % 64)) != 0)
            .unwrap_or(false)
    }

    fn allows(&self, color: i32) -> bool {
        color < 0 || self.contains(color as usize)
    }
}

impl FromIterator<usize> for ColorSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

fn allowed(storage: &GraphStorage, allowed: Option<&ColorSet>, key: FragmentKey) -> bool {
    match allowed {
        None => true,
        Some(set) => set.allows(storage.fragment(key).color()),
    }
}

/// Depth-first pre-order walk. Vertices reachable via several paths are
/// yielded once; a color filter prunes whole subtrees under disallowed
/// vertices.
pub struct PreOrderIter<'a> {
    storage: &'a GraphStorage,
    stack: Vec<FragmentKey>,
    visited: Vec<bool>,
    filter: Option<&'a ColorSet>,
}

impl<'a> PreOrderIter<'a> {
    pub(crate) fn new(
        storage: &'a GraphStorage,
        start: FragmentKey,
        filter: Option<&'a ColorSet>,
    ) -> Self {
        let mut visited = vec![false; storage.number_of_vertices()];
        visited[storage.fragment(start).vertex_id()] = true;
        Self {
            storage,
            stack: vec![start],
            visited,
            filter,
        }
    }
}

impl Iterator for PreOrderIter<'_> {
    type Item = FragmentKey;

    fn next(&mut self) -> Option<FragmentKey> {
        let key = self.stack.pop()?;
        // push in reverse so the first child is visited first
        for &l in self.storage.outgoing(key).iter().rev() {
            let target = self.storage.loss(l).target();
            let vid = self.storage.fragment(target).vertex_id();
            if !self.visited[vid] && allowed(self.storage, self.filter, target) {
                self.visited[vid] = true;
                self.stack.push(target);
            }
        }
        Some(key)
    }
}

/// Depth-first post-order walk: every vertex is yielded after all of its
/// reachable descendants.
pub struct PostOrderIter<'a> {
    storage: &'a GraphStorage,
    stack: Vec<(FragmentKey, usize)>,
    visited: Vec<bool>,
    filter: Option<&'a ColorSet>,
}

impl<'a> PostOrderIter<'a> {
    pub(crate) fn new(
        storage: &'a GraphStorage,
        start: FragmentKey,
        filter: Option<&'a ColorSet>,
    ) -> Self {
        let mut visited = vec![false; storage.number_of_vertices()];
        visited[storage.fragment(start).vertex_id()] = true;
        Self {
            storage,
            stack: vec![(start, 0)],
            visited,
            filter,
        }
    }
}

impl Iterator for PostOrderIter<'_> {
    type Item = FragmentKey;

    fn next(&mut self) -> Option<FragmentKey> {
        loop {
            let (key, child) = *self.stack.last()?;
            let out = self.storage.outgoing(key);
            if child < out.len() {
                self.stack.last_mut().map(|f| f.1 += 1);
                let target = self.storage.loss(out[child]).target();
                let vid = self.storage.fragment(target).vertex_id();
                if !self.visited[vid] && allowed(self.storage, self.filter, target) {
                    self.visited[vid] = true;
                    self.stack.push((target, 0));
                }
            } else {
                self.stack.pop();
                return Some(key);
            }
        }
    }
}
