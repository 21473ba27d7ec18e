// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::common::ResizeFactor;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::check_seed_hashes;
use crate::hash::compute_seed_hash;
use crate::theta::CompactThetaSketch;
use crate::theta::ThetaSketchView;
use crate::theta::hash_table::DEFAULT_LG_K;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;

/// Stateful union operator for Theta sketches.
///
/// The operator keeps an internal QuickSelect gadget with its own theta and
/// tracks the minimum theta over all inputs; the result threshold is the
/// smaller of the two.
///
/// # Examples
///
/// ```
/// # use thetasketch::theta::ThetaSketch;
/// # use thetasketch::theta::ThetaUnion;
/// let mut a = ThetaSketch::builder().build().unwrap();
/// let mut b = ThetaSketch::builder().build().unwrap();
/// a.update("x");
/// b.update("y");
///
/// let mut union = ThetaUnion::builder().build().unwrap();
/// union.union(&a).unwrap();
/// union.union(&b).unwrap();
/// assert_eq!(union.result().estimate(), 2.0);
/// ```
#[derive(Debug)]
pub struct ThetaUnion {
    gadget: ThetaHashTable,
    union_theta: u64,
    seed_hash: u16,
}

impl ThetaUnion {
    /// Creates a builder for the union operator.
    pub fn builder() -> ThetaUnionBuilder {
        ThetaUnionBuilder::default()
    }

    /// Folds a sketch into the union.
    ///
    /// Empty inputs contribute nothing and are accepted regardless of seed.
    ///
    /// # Errors
    ///
    /// `SeedMismatch` if a non-empty input was hashed with a different seed.
    pub fn union<S: ThetaSketchView>(&mut self, sketch: &S) -> Result<(), Error> {
        if sketch.is_empty() {
            return Ok(());
        }
        check_seed_hashes(self.seed_hash, sketch.seed_hash())?;

        self.gadget.set_empty(false);
        self.union_theta = self.union_theta.min(sketch.theta64());

        for hash in sketch.iter() {
            if hash < self.union_theta {
                self.gadget.insert_hash(hash);
            } else if sketch.is_ordered() {
                break; // the remaining hashes only get larger
            }
        }
        Ok(())
    }

    /// Returns the union result as an ordered compact sketch.
    pub fn result(&self) -> CompactThetaSketch {
        self.result_with_ordered(true)
    }

    /// Returns the union result as a compact sketch.
    ///
    /// The final theta is the minimum of the gadget's theta and all inputs'
    /// thetas, and the retained set is trimmed back to the nominal k when
    /// the gadget overshot it. The result is empty iff every input was
    /// empty.
    pub fn result_with_ordered(&self, ordered: bool) -> CompactThetaSketch {
        if self.gadget.is_empty() {
            return CompactThetaSketch::from_parts(Vec::new(), MAX_THETA, self.seed_hash, true, true);
        }

        let mut theta = self.union_theta.min(self.gadget.theta());
        let mut entries: Vec<u64> = self.gadget.iter().filter(|&h| h < theta).collect();

        let k = 1usize << self.gadget.lg_nom_size();
        if entries.len() > k {
            entries.select_nth_unstable(k);
            theta = entries[k];
            entries.truncate(k);
        }
        if ordered {
            entries.sort_unstable();
        }

        CompactThetaSketch::from_parts(entries, theta, self.seed_hash, ordered, false)
    }

    /// Clears the operator back to its initial state for reuse.
    pub fn reset(&mut self) {
        self.gadget.reset();
        self.union_theta = MAX_THETA;
    }
}

/// Builder for [`ThetaUnion`].
#[derive(Debug)]
pub struct ThetaUnionBuilder {
    lg_k: u8,
    resize_factor: ResizeFactor,
    seed: u64,
}

impl Default for ThetaUnionBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            resize_factor: ResizeFactor::X8,
            seed: DEFAULT_UPDATE_SEED,
        }
    }
}

impl ThetaUnionBuilder {
    /// Set lg_k of the internal gadget. Must be in `[4, 26]`.
    pub fn lg_k(mut self, lg_k: u8) -> Self {
        self.lg_k = lg_k;
        self
    }

    /// Set resize factor of the internal gadget.
    pub fn resize_factor(mut self, factor: ResizeFactor) -> Self {
        self.resize_factor = factor;
        self
    }

    /// Set hash seed. All inputs must have been hashed with the same seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the union operator.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an out-of-range `lg_k` or a seed whose 16-bit
    /// hash is zero.
    pub fn build(self) -> Result<ThetaUnion, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&self.lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {}",
                self.lg_k
            )));
        }
        let seed_hash = compute_seed_hash(self.seed);
        if seed_hash == 0 {
            return Err(Error::invalid_argument(format!(
                "seed {} hashes to the reserved tag 0; pick another seed",
                self.seed
            )));
        }
        let gadget = ThetaHashTable::new(
            self.lg_k,
            self.resize_factor,
            1.0,
            self.seed,
            crate::common::default_memory_request_server(),
        );
        Ok(ThetaUnion {
            gadget,
            union_theta: MAX_THETA,
            seed_hash,
        })
    }
}

/// Unions two compact sketches directly.
///
/// When both inputs are ordered this merges the sorted hash streams without
/// building a gadget table, trimming to the first `2^lg_k` hashes and
/// lowering theta accordingly. Unordered inputs fall back to a regular
/// [`ThetaUnion`] with identical final semantics.
///
/// # Errors
///
/// `SeedMismatch` if the non-empty inputs carry different seed hashes;
/// `InvalidArgument` for an out-of-range `lg_k`.
pub fn pair_union(
    a: &CompactThetaSketch,
    b: &CompactThetaSketch,
    lg_k: u8,
) -> Result<CompactThetaSketch, Error> {
    if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
        return Err(Error::invalid_argument(format!(
            "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
        )));
    }
    if !a.is_empty() && !b.is_empty() {
        check_seed_hashes(a.seed_hash(), b.seed_hash())?;
    }

    if !(a.is_ordered() || a.is_empty()) || !(b.is_ordered() || b.is_empty()) {
        let seed_hash = if a.is_empty() {
            b.seed_hash()
        } else {
            a.seed_hash()
        };
        let mut union = ThetaUnion {
            gadget: ThetaHashTable::new(
                lg_k,
                ResizeFactor::X8,
                1.0,
                DEFAULT_UPDATE_SEED,
                crate::common::default_memory_request_server(),
            ),
            union_theta: MAX_THETA,
            seed_hash,
        };
        union.union(a)?;
        union.union(b)?;
        return Ok(union.result());
    }

    if a.is_empty() && b.is_empty() {
        return Ok(CompactThetaSketch::from_parts(
            Vec::new(),
            MAX_THETA,
            a.seed_hash(),
            true,
            true,
        ));
    }
    let seed_hash = if a.is_empty() {
        b.seed_hash()
    } else {
        a.seed_hash()
    };

    let mut theta = a.theta64().min(b.theta64());
    let k = 1usize << lg_k;

    // Sorted merge with duplicate suppression, cut off at theta.
    let mut entries = Vec::with_capacity(a.num_retained().min(k) + b.num_retained().min(k));
    let mut left = a.iter().peekable();
    let mut right = b.iter().peekable();
    loop {
        let next = match (left.peek(), right.peek()) {
            (Some(&l), Some(&r)) => {
                if l <= r {
                    if l == r {
                        right.next();
                    }
                    left.next()
                } else {
                    right.next()
                }
            }
            (Some(_), None) => left.next(),
            (None, Some(_)) => right.next(),
            (None, None) => break,
        };
        let Some(hash) = next else { break };
        if hash >= theta {
            break; // both streams are ascending
        }
        entries.push(hash);
        if entries.len() > k {
            // The first k survive; the (k+1)-th becomes the new theta.
            theta = entries[k];
            entries.truncate(k);
            break;
        }
    }

    Ok(CompactThetaSketch::from_parts(
        entries, theta, seed_hash, true, false,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::ThetaSketch;

    fn sketch_with_range(start: u64, count: u64) -> ThetaSketch {
        let mut sketch = ThetaSketch::builder().build().unwrap();
        for i in 0..count {
            sketch.update(start + i);
        }
        sketch
    }

    #[test]
    fn test_union_of_nothing_is_empty() {
        let union = ThetaUnion::builder().build().unwrap();
        let result = union.result();
        assert!(result.is_empty());
        assert_eq!(result.estimate(), 0.0);
        assert!(!result.is_estimation_mode());
    }

    #[test]
    fn test_union_of_empties_is_empty() {
        let a = ThetaSketch::builder().build().unwrap();
        let b = ThetaSketch::builder().build().unwrap();

        let mut union = ThetaUnion::builder().build().unwrap();
        union.union(&a).unwrap();
        union.union(&b).unwrap();
        assert!(union.result().is_empty());
    }

    #[test]
    fn test_union_accepts_mixed_forms() {
        let a = sketch_with_range(0, 100);
        let b = sketch_with_range(50, 100);

        let mut union = ThetaUnion::builder().build().unwrap();
        union.union(&a).unwrap();
        union.union(&b.compact(true)).unwrap();

        let result = union.result();
        assert_eq!(result.estimate(), 150.0);
        assert!(result.is_ordered());
    }

    #[test]
    fn test_union_seed_mismatch() {
        let mut other = ThetaSketch::builder().seed(123).build().unwrap();
        other.update("x");

        let mut union = ThetaUnion::builder().build().unwrap();
        assert!(union.union(&other).is_err());
    }

    #[test]
    fn test_union_trims_result_to_k() {
        let a = sketch_with_range(0, 10_000);
        let b = sketch_with_range(10_000, 10_000);

        let mut union = ThetaUnion::builder().lg_k(6).build().unwrap();
        union.union(&a).unwrap();
        union.union(&b).unwrap();

        let result = union.result();
        assert!(result.num_retained() <= 64);
        assert!(result.is_estimation_mode());
        let expected = 20_000.0;
        assert!((result.estimate() - expected).abs() < expected * 0.5);
    }

    #[test]
    fn test_union_reset() {
        let a = sketch_with_range(0, 10);
        let mut union = ThetaUnion::builder().build().unwrap();
        union.union(&a).unwrap();
        assert!(!union.result().is_empty());

        union.reset();
        assert!(union.result().is_empty());
    }

    #[test]
    fn test_pair_union_ordered_matches_operator() {
        let a = sketch_with_range(0, 3_000).compact(true);
        let b = sketch_with_range(2_000, 3_000).compact(true);

        let fast = pair_union(&a, &b, DEFAULT_LG_K).unwrap();

        let mut union = ThetaUnion::builder().build().unwrap();
        union.union(&a).unwrap();
        union.union(&b).unwrap();
        let slow = union.result();

        assert_eq!(fast.theta64(), slow.theta64());
        assert_eq!(fast.num_retained(), slow.num_retained());
        assert_eq!(
            fast.iter().collect::<Vec<_>>(),
            slow.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_pair_union_trims_to_k() {
        let a = sketch_with_range(0, 5_000).compact(true);
        let b = sketch_with_range(5_000, 5_000).compact(true);

        let result = pair_union(&a, &b, 6).unwrap();
        assert_eq!(result.num_retained(), 64);
        assert!(result.is_estimation_mode());
        assert!(result.iter().all(|h| h < result.theta64()));
    }

    #[test]
    fn test_pair_union_with_empty_side() {
        let a = ThetaSketch::builder().build().unwrap().compact(true);
        let b = sketch_with_range(0, 100).compact(true);

        let result = pair_union(&a, &b, DEFAULT_LG_K).unwrap();
        assert!(!result.is_empty());
        assert_eq!(result.estimate(), 100.0);

        let both_empty = pair_union(&a, &a, DEFAULT_LG_K).unwrap();
        assert!(both_empty.is_empty());
    }

    #[test]
    fn test_pair_union_unordered_fallback() {
        let a = sketch_with_range(0, 100).compact(false);
        let b = sketch_with_range(50, 100).compact(false);

        let result = pair_union(&a, &b, DEFAULT_LG_K).unwrap();
        assert_eq!(result.estimate(), 150.0);
    }
}
