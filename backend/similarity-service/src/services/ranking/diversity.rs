use super::scorer::ScoredCandidate;
use std::collections::HashMap;

/// Category diversity cap
///
/// Greedy pass over score-sorted candidates keeping at most `cap` items per
/// category. Over-cap items are deferred and only backfill the result when
/// the rest of the pool cannot fill it. Items without a category are never
/// capped.
pub struct CategoryDiversityLayer {
    cap: usize,
}

impl CategoryDiversityLayer {
    /// `cap == 0` disables the cap
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    pub fn select(&self, ranked: Vec<ScoredCandidate>, n: usize) -> Vec<ScoredCandidate> {
        if self.cap == 0 {
            return ranked.into_iter().take(n).collect();
        }

        let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(n);
        let mut deferred: Vec<ScoredCandidate> = Vec::new();
        let mut per_category: HashMap<String, usize> = HashMap::new();

        for candidate in ranked {
            if selected.len() >= n {
                break;
            }

            match candidate.category().map(str::to_owned) {
                Some(category) => {
                    let count = per_category.entry(category).or_insert(0);
                    if *count >= self.cap {
                        deferred.push(candidate);
                    } else {
                        *count += 1;
                        selected.push(candidate);
                    }
                }
                None => selected.push(candidate),
            }
        }

        if selected.len() < n {
            let missing = n - selected.len();
            selected.extend(deferred.into_iter().take(missing));
        }

        selected
    }
}
