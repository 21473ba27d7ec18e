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
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::REBUILD_THRESHOLD;
use crate::theta::hash_table::ThetaHashTable;

/// Stateful intersection operator for Theta sketches.
///
/// The intersection starts from the conceptual universe set; every
/// [`intersect`](Self::intersect) narrows the current state to the
/// overlapping subset. Before the first call the state is undefined and
/// [`result`](Self::result) fails.
#[derive(Debug)]
pub struct ThetaIntersection {
    is_valid: bool,
    seed_hash: u16,
    table: ThetaHashTable,
}

impl ThetaIntersection {
    /// Creates a new intersection operator for the given `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_seed_hash(compute_seed_hash(seed))
    }

    /// Creates a new intersection operator with the default seed.
    pub fn new_with_default_seed() -> Self {
        Self::new(DEFAULT_UPDATE_SEED)
    }

    pub(crate) fn with_seed_hash(seed_hash: u16) -> Self {
        Self {
            is_valid: false,
            seed_hash,
            table: empty_state_table(MAX_THETA, false),
        }
    }

    /// Narrows the intersection with a given sketch.
    ///
    /// # Errors
    ///
    /// - `SeedMismatch` if a non-empty input was hashed with another seed;
    /// - `InvalidFormat` if the input misbehaves while iterating (duplicate
    ///   or miscounted hashes point at a corrupted sketch).
    pub fn intersect<S: ThetaSketchView>(&mut self, sketch: &S) -> Result<(), Error> {
        // An empty state is terminal; nothing can widen it again.
        if self.table.is_empty() {
            self.is_valid = true;
            return Ok(());
        }

        if !sketch.is_empty() {
            check_seed_hashes(self.seed_hash, sketch.seed_hash())?;
        }

        self.table
            .set_empty(self.table.is_empty() || sketch.is_empty());
        let theta = if self.table.is_empty() {
            MAX_THETA
        } else {
            self.table.theta().min(sketch.theta64())
        };
        self.table.set_theta(theta);

        if self.is_valid && self.table.num_retained() == 0 {
            return Ok(());
        }

        if sketch.num_retained() == 0 {
            self.is_valid = true;
            self.table = empty_state_table(self.table.theta(), self.table.is_empty());
            return Ok(());
        }

        if !self.is_valid {
            // First input: adopt its retained set, truncated by theta.
            self.is_valid = true;
            let mut table = sized_state_table(
                sketch.num_retained(),
                self.table.theta(),
                self.table.is_empty(),
            );
            let mut count = 0;
            for hash in sketch.iter() {
                if hash < table.theta() && !table.insert_hash(hash) {
                    return Err(Error::invalid_format(
                        "duplicate hash, possibly corrupted input sketch",
                    ));
                }
                count += 1;
            }
            if count > sketch.num_retained() {
                return Err(Error::invalid_format(
                    "more hashes than expected, possibly corrupted input sketch",
                ));
            }
            table.set_empty(self.table.is_empty());
            self.table = table;
        } else {
            let max_matches = self.table.num_retained().min(sketch.num_retained());
            let mut matched_entries = Vec::with_capacity(max_matches);
            let mut count = 0;
            for hash in sketch.iter() {
                if hash < self.table.theta() {
                    if self.table.contains(hash) {
                        if matched_entries.len() == max_matches {
                            return Err(Error::invalid_format(
                                "max matches exceeded, possibly corrupted input sketch",
                            ));
                        }
                        matched_entries.push(hash);
                    }
                } else if sketch.is_ordered() {
                    break; // early stop for ordered sketches
                }
                count += 1;
            }
            if count > sketch.num_retained() {
                return Err(Error::invalid_format(
                    "more hashes than expected, possibly corrupted input sketch",
                ));
            } else if !sketch.is_ordered() && count < sketch.num_retained() {
                return Err(Error::invalid_format(
                    "fewer hashes than expected, possibly corrupted input sketch",
                ));
            }
            if matched_entries.is_empty() {
                let went_empty = self.table.theta() == MAX_THETA;
                self.table = empty_state_table(self.table.theta(), self.table.is_empty());
                if went_empty {
                    self.table.set_empty(true);
                }
            } else {
                let mut table = sized_state_table(
                    matched_entries.len(),
                    self.table.theta(),
                    self.table.is_empty(),
                );
                for hash in matched_entries {
                    if !table.insert_hash(hash) {
                        return Err(Error::invalid_format(
                            "duplicate hash, possibly corrupted input sketch",
                        ));
                    }
                }
                table.set_empty(self.table.is_empty());
                self.table = table;
            }
        }
        Ok(())
    }

    /// Returns whether this operator has received at least one input.
    pub fn has_result(&self) -> bool {
        self.is_valid
    }

    /// Returns the intersection result as a compact theta sketch (ordered).
    ///
    /// # Errors
    ///
    /// `PreconditionViolated` when called before the first
    /// [`intersect`](Self::intersect).
    pub fn result(&self) -> Result<CompactThetaSketch, Error> {
        self.result_with_ordered(true)
    }

    /// Returns the intersection result as a compact theta sketch.
    ///
    /// # Errors
    ///
    /// `PreconditionViolated` when called before the first
    /// [`intersect`](Self::intersect).
    pub fn result_with_ordered(&self, ordered: bool) -> Result<CompactThetaSketch, Error> {
        if !self.is_valid {
            return Err(Error::precondition(
                "result() called before the first intersect()",
            ));
        }
        let mut hashes: Vec<u64> = self.table.iter().collect();
        if ordered {
            hashes.sort_unstable();
        }
        Ok(CompactThetaSketch::from_parts(
            hashes,
            self.table.theta(),
            self.seed_hash,
            ordered,
            self.table.is_empty(),
        ))
    }
}

/// Intersects one or more sketches statelessly.
///
/// The operator adopts the first sketch's seed hash, so all inputs must
/// agree with it.
///
/// # Errors
///
/// `PreconditionViolated` for an empty input list; `SeedMismatch` when the
/// inputs disagree on the seed.
pub fn intersection_of<'a, S, I>(sketches: I) -> Result<CompactThetaSketch, Error>
where
    S: ThetaSketchView + 'a,
    I: IntoIterator<Item = &'a S>,
{
    let mut iter = sketches.into_iter();
    let Some(first) = iter.next() else {
        return Err(Error::precondition(
            "intersection needs at least one input sketch",
        ));
    };
    let mut intersection = ThetaIntersection::with_seed_hash(first.seed_hash());
    intersection.intersect(first)?;
    for sketch in iter {
        intersection.intersect(sketch)?;
    }
    intersection.result()
}

// Degenerate no-storage table carrying only the intersection state.
fn empty_state_table(theta: u64, is_empty: bool) -> ThetaHashTable {
    ThetaHashTable::from_raw_parts(0, 0, ResizeFactor::X1, 1.0, theta, 0, is_empty)
}

// Fixed-size table just big enough for `count` entries under the rebuild
// threshold. lg_nom is pinned one under the table size so the table never
// tries to grow.
fn sized_state_table(count: usize, theta: u64, is_empty: bool) -> ThetaHashTable {
    let lg_size = ThetaHashTable::lg_size_from_count_for_rebuild(count, REBUILD_THRESHOLD);
    ThetaHashTable::from_raw_parts(
        lg_size,
        lg_size - 1,
        ResizeFactor::X1,
        1.0,
        theta,
        0,
        is_empty,
    )
}
