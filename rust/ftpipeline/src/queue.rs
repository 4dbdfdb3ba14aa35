use std::collections::BTreeMap;

/// Total-order key over f64 scores so they can index a BTreeMap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreKey(f64);

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Bounded best-k multimap over scores. Entries at or below the current
/// lower bound are rejected outright. When the queue overflows, the whole
/// lowest-score bucket is evicted, but only if that does not drop the size
/// below capacity; ties at the bottom are kept together instead.
///
/// The lower bound is the smallest kept score while at or above capacity,
/// negative infinity otherwise.
#[derive(Debug)]
pub struct DoubleEndWeightedQueue<T> {
    buckets: BTreeMap<ScoreKey, Vec<T>>,
    capacity: usize,
    size: usize,
    lowerbound: f64,
}

impl<T> DoubleEndWeightedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            buckets: BTreeMap::new(),
            capacity,
            size: 0,
            lowerbound: f64::NEG_INFINITY,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lowerbound(&self) -> f64 {
        self.lowerbound
    }

    /// Inserts unless the score is at or below the lower bound. Evicted
    /// entries are handed to `on_evict` before the method returns.
    pub fn add(&mut self, item: T, score: f64, mut on_evict: impl FnMut(T)) -> bool {
        if score <= self.lowerbound || score.is_nan() {
            return false;
        }
        self.buckets.entry(ScoreKey(score)).or_default().push(item);
        self.size += 1;

        if self.size > self.capacity {
            let lowest_len = self
                .buckets
                .first_key_value()
                .map(|(_, b)| b.len())
                .unwrap_or(0);
            if self.size - lowest_len >= self.capacity {
                if let Some((_, bucket)) = self.buckets.pop_first() {
                    self.size -= bucket.len();
                    for evicted in bucket {
                        on_evict(evicted);
                    }
                }
            }
        }

        self.lowerbound = if self.size >= self.capacity {
            self.buckets
                .first_key_value()
                .map(|(k, _)| k.0)
                .unwrap_or(f64::NEG_INFINITY)
        } else {
            f64::NEG_INFINITY
        };
        true
    }

    /// Entries by descending score.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> + '_ {
        self.buckets
            .iter()
            .rev()
            .flat_map(|(k, bucket)| bucket.iter().map(move |item| (k.0, item)))
    }

    /// Consumes the queue, yielding entries by descending score.
    pub fn into_sorted_vec(self) -> Vec<(f64, T)> {
        self.buckets
            .into_iter()
            .rev()
            .flat_map(|(k, bucket)| bucket.into_iter().map(move |item| (k.0, item)))
            .collect()
    }
}
