//! Combination enumerator: decides whether a universe can be searched
//! exhaustively and, if not, cuts it into shards that can.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::error::SearchError;

/// `C(n, k)`, saturating at `u128::MAX`.
pub fn binomial(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        // C(n, i+1) = C(n, i) * (n - i) / (i + 1), exact at every step
        acc = match acc.checked_mul((n - i) as u128) {
            Some(v) => v / (i as u128 + 1),
            None => return u128::MAX,
        };
    }
    acc
}

/// Split into `parts` contiguous chunks whose sizes differ by at most one;
/// the first `len % parts` chunks get the extra element.
pub fn split_even<T: Clone>(items: &[T], parts: usize) -> Vec<Vec<T>> {
    let parts = parts.max(1);
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(items[start..start + len].to_vec());
        start += len;
    }
    out
}

/// Shard planner bounded by a per-shard work budget.
#[derive(Debug, Clone, Copy)]
pub struct Enumerator {
    /// A shard is tractable when `C(|shard|, k)` is strictly below this.
    pub work_budget: u64,
    pub max_shards: usize,
}

impl Enumerator {
    pub fn new(work_budget: u64, max_shards: usize) -> Self {
        Self {
            work_budget,
            max_shards,
        }
    }

    /// Plan one pass over `universe` for subsets of size `k`.
    ///
    /// Returns the universe unchanged when it is tractable; otherwise a
    /// shuffled partition into the fewest shards (2..=max_shards) whose
    /// largest member is tractable.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        universe: &[String],
        k: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<String>>, SearchError> {
        let n = universe.len();
        let budget = u128::from(self.work_budget);
        let total = binomial(n, k);
        if total < budget {
            debug!(universe = n, k, combinations = %total, "single exhaustive shard");
            return Ok(vec![universe.to_vec()]);
        }

        let mut shuffled = universe.to_vec();
        shuffled.shuffle(rng);

        for parts in 2..=self.max_shards.min(n) {
            let largest = n.div_ceil(parts);
            if binomial(largest, k) < budget {
                debug!(universe = n, k, shards = parts, largest, "sharded plan");
                return Ok(split_even(&shuffled, parts));
            }
        }

        Err(SearchError::ShardingInfeasible {
            universe_size: n,
            share_limit: k,
            work_budget: self.work_budget,
            max_shards: self.max_shards,
        })
    }
}

/// k-subsets of `0..n` as index vectors, in lexicographic order.
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            started: false,
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.indices.clone());
        }

        let k = self.indices.len();
        let pivot = (0..k).rev().find(|&i| self.indices[i] < self.n - k + i);
        match pivot {
            None => {
                self.done = true;
                None
            }
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                Some(self.indices.clone())
            }
        }
    }
}
