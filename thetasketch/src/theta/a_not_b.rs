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

use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::check_seed_hashes;
use crate::hash::compute_seed_hash;
use crate::theta::CompactThetaSketch;
use crate::theta::ThetaSketchView;
use crate::theta::hash_table::MAX_THETA;

/// Stateful A-not-B (set difference) operator for Theta sketches.
///
/// [`set_a`](Self::set_a) adopts the minuend; every
/// [`not_b`](Self::not_b) subtracts another sketch from it. The running
/// theta is the minimum over all inputs' thetas.
///
/// # Examples
///
/// ```
/// # use thetasketch::theta::ThetaSketch;
/// # use thetasketch::theta::ThetaAnotB;
/// let mut a = ThetaSketch::builder().build().unwrap();
/// let mut b = ThetaSketch::builder().build().unwrap();
/// a.update("x");
/// a.update("y");
/// b.update("y");
///
/// let mut diff = ThetaAnotB::new_with_default_seed();
/// diff.set_a(&a).unwrap();
/// diff.not_b(&b).unwrap();
/// assert_eq!(diff.result(true, false).unwrap().estimate(), 1.0);
/// ```
#[derive(Debug)]
pub struct ThetaAnotB {
    seed_hash: u16,
    has_a: bool,
    theta: u64,
    a_empty: bool,
    entries: Vec<u64>,
}

impl ThetaAnotB {
    /// Creates a new operator for the given `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_seed_hash(compute_seed_hash(seed))
    }

    /// Creates a new operator with the default seed.
    pub fn new_with_default_seed() -> Self {
        Self::new(DEFAULT_UPDATE_SEED)
    }

    fn with_seed_hash(seed_hash: u16) -> Self {
        Self {
            seed_hash,
            has_a: false,
            theta: MAX_THETA,
            a_empty: true,
            entries: Vec::new(),
        }
    }

    /// Adopts the minuend sketch, replacing any previous state.
    ///
    /// # Errors
    ///
    /// `SeedMismatch` if a non-empty `a` was hashed with another seed.
    pub fn set_a<S: ThetaSketchView>(&mut self, a: &S) -> Result<(), Error> {
        if !a.is_empty() {
            check_seed_hashes(self.seed_hash, a.seed_hash())?;
        }
        self.has_a = true;
        self.theta = a.theta64();
        self.a_empty = a.is_empty();
        self.entries = a.iter().collect();
        Ok(())
    }

    /// Subtracts a sketch from the current state.
    ///
    /// # Errors
    ///
    /// - `PreconditionViolated` before any [`set_a`](Self::set_a);
    /// - `SeedMismatch` if a non-empty `b` was hashed with another seed.
    pub fn not_b<S: ThetaSketchView>(&mut self, b: &S) -> Result<(), Error> {
        if !self.has_a {
            return Err(Error::precondition("not_b() called before set_a()"));
        }
        if b.is_empty() {
            return Ok(());
        }
        check_seed_hashes(self.seed_hash, b.seed_hash())?;

        self.theta = self.theta.min(b.theta64());

        let theta = self.theta;
        let mut b_hashes: Vec<u64> = b.iter().take_while(|&h| h < theta || !b.is_ordered()).collect();
        b_hashes.sort_unstable();

        self.entries
            .retain(|&h| h < theta && b_hashes.binary_search(&h).is_err());
        Ok(())
    }

    /// Returns the difference as a compact sketch.
    ///
    /// The result is empty iff the minuend was empty, or nothing survived
    /// while theta stayed at 1 (the difference is then exactly empty). When
    /// `reset` is set, the operator returns to its initial state.
    ///
    /// # Errors
    ///
    /// `PreconditionViolated` before any [`set_a`](Self::set_a).
    pub fn result(&mut self, ordered: bool, reset: bool) -> Result<CompactThetaSketch, Error> {
        if !self.has_a {
            return Err(Error::precondition("result() called before set_a()"));
        }

        let is_empty = self.a_empty || (self.entries.is_empty() && self.theta == MAX_THETA);
        let result = if is_empty {
            CompactThetaSketch::from_parts(Vec::new(), MAX_THETA, self.seed_hash, true, true)
        } else {
            let mut entries = self.entries.clone();
            if ordered {
                entries.sort_unstable();
            }
            CompactThetaSketch::from_parts(entries, self.theta, self.seed_hash, ordered, false)
        };

        if reset {
            self.has_a = false;
            self.theta = MAX_THETA;
            self.a_empty = true;
            self.entries.clear();
        }
        Ok(result)
    }
}

/// Computes the set difference `a \ b` statelessly.
///
/// The operator adopts `a`'s seed hash, so `b` must agree with it.
///
/// # Errors
///
/// `SeedMismatch` when the non-empty inputs disagree on the seed.
pub fn a_not_b<A, B>(a: &A, b: &B) -> Result<CompactThetaSketch, Error>
where
    A: ThetaSketchView,
    B: ThetaSketchView,
{
    let mut op = ThetaAnotB::with_seed_hash(a.seed_hash());
    op.set_a(a)?;
    op.not_b(b)?;
    op.result(true, false)
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
    fn test_result_before_set_a_fails() {
        let mut op = ThetaAnotB::new_with_default_seed();
        let err = op.result(true, false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PreconditionViolated);

        let b = sketch_with_range(0, 10);
        assert!(op.not_b(&b).is_err());
    }

    #[test]
    fn test_exact_difference() {
        let a = sketch_with_range(0, 1000);
        let b = sketch_with_range(500, 1000);

        let result = a_not_b(&a, &b).unwrap();
        assert!(!result.is_empty());
        assert!(!result.is_estimation_mode());
        assert_eq!(result.estimate(), 500.0);
    }

    #[test]
    fn test_self_difference_is_zero_with_same_theta() {
        let a = sketch_with_range(0, 20_000); // estimation mode at default k
        let result = a_not_b(&a, &a).unwrap();
        assert_eq!(result.estimate(), 0.0);
        assert_eq!(result.theta64(), a.theta64());
        assert!(!result.is_empty());
    }

    #[test]
    fn test_empty_minuend() {
        let a = ThetaSketch::builder().build().unwrap();
        let b = sketch_with_range(0, 100);

        let result = a_not_b(&a, &b).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.estimate(), 0.0);
    }

    #[test]
    fn test_empty_subtrahend_keeps_a() {
        let a = sketch_with_range(0, 100);
        let b = ThetaSketch::builder().build().unwrap();

        let result = a_not_b(&a, &b).unwrap();
        assert_eq!(result.estimate(), 100.0);
    }

    #[test]
    fn test_stateful_chain_and_reset() {
        let a = sketch_with_range(0, 300);
        let b = sketch_with_range(0, 100);
        let c = sketch_with_range(100, 100);

        let mut op = ThetaAnotB::new_with_default_seed();
        op.set_a(&a).unwrap();
        op.not_b(&b).unwrap();
        op.not_b(&c).unwrap();

        let result = op.result(true, true).unwrap();
        assert_eq!(result.estimate(), 100.0);

        // reset cleared the state
        assert!(op.result(true, false).is_err());
    }

    #[test]
    fn test_seed_mismatch() {
        let a = sketch_with_range(0, 10);
        let mut other = ThetaSketch::builder().seed(42).build().unwrap();
        other.update("x");

        let err = a_not_b(&a, &other).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SeedMismatch);
    }

    #[test]
    fn test_ordered_and_unordered_results_agree() {
        let a = sketch_with_range(0, 1000);
        let b = sketch_with_range(200, 400);

        let mut op = ThetaAnotB::new_with_default_seed();
        op.set_a(&a).unwrap();
        op.not_b(&b).unwrap();
        let ordered = op.result(true, false).unwrap();
        let unordered = op.result(false, false).unwrap();

        assert!(ordered.is_ordered());
        assert!(!unordered.is_ordered());
        assert_eq!(ordered.estimate(), unordered.estimate());
        let mut u: Vec<u64> = unordered.iter().collect();
        u.sort_unstable();
        assert_eq!(ordered.iter().collect::<Vec<_>>(), u);
    }
}
