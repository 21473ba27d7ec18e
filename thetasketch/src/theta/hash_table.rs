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

use std::hash::Hash;

use crate::common::MemoryRequestServerRef;
use crate::common::ResizeFactor;
use crate::common::default_memory_request_server;
use crate::hash::MurmurHash3X64128;
use crate::hash::compute_seed_hash;

/// Maximum theta value (signed max for compatibility with Java)
pub const MAX_THETA: u64 = i64::MAX as u64;

/// Minimum log2 of K
pub const MIN_LG_K: u8 = 4;

/// Maximum log2 of K
pub const MAX_LG_K: u8 = 26;

/// Default log2 of K
pub const DEFAULT_LG_K: u8 = 12;

/// Minimum log2 of the probing table size
pub(crate) const MIN_LG_ARR: u8 = 5;

/// Resize threshold (0.5 = 50% load factor)
const RESIZE_THRESHOLD: f64 = 0.5;

/// Rebuild threshold (15/16 = 93.75% load factor)
pub(crate) const REBUILD_THRESHOLD: f64 = 15.0 / 16.0;

/// Stride hash bits (7 bits for stride calculation)
const STRIDE_HASH_BITS: u8 = 7;

/// Stride mask
const STRIDE_MASK: u64 = (1 << STRIDE_HASH_BITS) - 1;

/// Probing hash table specialised for theta sketches.
///
/// The table holds 64-bit hash values in a power-of-two array with zero
/// marking an empty slot. Before the array reaches its maximum size
/// (`2^(lg_nom + 1)`), exceeding the resize threshold grows it by the resize
/// factor. At maximum size, exceeding the rebuild threshold quickselects the
/// k-th smallest entry, lowers theta to it, and keeps only the strictly
/// smaller entries.
#[derive(Debug)]
pub(crate) struct ThetaHashTable {
    lg_cur_size: u8,
    lg_nom_size: u8,
    lg_max_size: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    hash_seed: u64,

    // Logical emptiness of the source set. This can be false even when
    // `num_retained` is 0 (e.g. all updates screened by theta).
    is_empty: bool,

    theta: u64,

    entries: Vec<u64>,

    // Number of retained non-zero hashes currently stored in `entries`.
    num_retained: usize,

    memory: MemoryRequestServerRef,
}

impl ThetaHashTable {
    /// Create a new hash table.
    pub fn new(
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        hash_seed: u64,
        memory: MemoryRequestServerRef,
    ) -> Self {
        let lg_max_size = lg_nom_size + 1;
        // Small nominal sizes sit below the table floor; cap at max size.
        let lg_cur_size = starting_sub_multiple(lg_max_size, MIN_LG_ARR, resize_factor.lg_value())
            .min(lg_max_size);
        Self::from_raw_parts_with_memory(
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            starting_theta_from_sampling_probability(sampling_probability),
            hash_seed,
            true,
            memory,
        )
    }

    /// Create a table with explicit state and the default allocator.
    ///
    /// Set operators use this with `lg_cur_size = 0` for the degenerate
    /// no-storage table.
    ///
    /// # Panics
    ///
    /// Panics if `lg_cur_size > lg_nom_size + 1`.
    pub fn from_raw_parts(
        lg_cur_size: u8,
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        theta: u64,
        hash_seed: u64,
        is_empty: bool,
    ) -> Self {
        Self::from_raw_parts_with_memory(
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            theta,
            hash_seed,
            is_empty,
            default_memory_request_server(),
        )
    }

    fn from_raw_parts_with_memory(
        lg_cur_size: u8,
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        theta: u64,
        hash_seed: u64,
        is_empty: bool,
        memory: MemoryRequestServerRef,
    ) -> Self {
        let lg_max_size = lg_nom_size + 1;
        assert!(
            lg_cur_size <= lg_max_size,
            "lg_cur_size must be <= lg_nom_size + 1, got lg_cur_size={lg_cur_size}, lg_nom_size={lg_nom_size}"
        );
        let size = if lg_cur_size > 0 { 1 << lg_cur_size } else { 0 };
        let entries = memory.request_long_array(size);
        Self {
            lg_cur_size,
            lg_nom_size,
            lg_max_size,
            resize_factor,
            sampling_probability,
            hash_seed,
            is_empty,
            theta,
            entries,
            num_retained: 0,
            memory,
        }
    }

    /// Hash a value with the table seed, clearing the high bit.
    pub fn hash<T: Hash>(&self, value: T) -> u64 {
        let mut hasher = MurmurHash3X64128::with_seed(self.hash_seed);
        value.hash(&mut hasher);
        let (h1, _) = hasher.finish128();
        h1 >> 1 // hash values live in (0, 2^63)
    }

    /// Hashes and inserts a value into the table.
    ///
    /// Returns true if the value was inserted (new), false otherwise.
    pub fn update<T: Hash>(&mut self, value: T) -> bool {
        let hash = self.hash(value);
        self.insert_hash(hash)
    }

    /// Inserts a pre-hashed value into the table.
    ///
    /// Any update attempt clears the empty flag, even one screened out by
    /// theta. Returns true if the value was inserted (new), false otherwise.
    pub fn insert_hash(&mut self, hash: u64) -> bool {
        self.is_empty = false;

        if hash == 0 || hash >= self.theta {
            return false;
        }

        let Some(index) = self.find_in_curr_entries(hash) else {
            unreachable!(
                "Resize or rebuild should be called to make sure it always can find the entry."
            );
        };

        // Already exists
        if self.entries[index] == hash {
            return false;
        }

        debug_assert_eq!(self.entries[index], 0, "slot must be empty");
        self.entries[index] = hash;
        self.num_retained += 1;

        // Check if we need to resize or rebuild
        if self.num_retained > self.get_capacity() {
            if self.lg_cur_size <= self.lg_nom_size {
                self.resize();
            } else {
                self.rebuild();
            }
        }
        true
    }

    /// Returns whether the table retains the given hash.
    pub fn contains(&self, hash: u64) -> bool {
        match Self::find_in_entries(&self.entries, hash, self.lg_cur_size) {
            Some(index) => self.entries[index] == hash,
            None => false,
        }
    }

    /// Counts the values of `entries` lying in `(0, theta)`.
    pub fn count_below(entries: &[u64], theta: u64) -> usize {
        entries.iter().filter(|&&e| e != 0 && e < theta).count()
    }

    /// Find an entry in the hash table.
    ///
    /// Returns the index of the entry if found, otherwise None. The entry may
    /// have been inserted or empty.
    fn find_in_curr_entries(&self, key: u64) -> Option<usize> {
        Self::find_in_entries(&self.entries, key, self.lg_cur_size)
    }

    /// Find index in a given entries.
    ///
    /// Returns the index of the entry if found, otherwise None. The entry may
    /// have been inserted or empty.
    fn find_in_entries(entries: &[u64], key: u64, lg_size: u8) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }

        let size = entries.len();
        let mask = size - 1;
        let stride = Self::get_stride(key, lg_size);
        let mut index = (key as usize) & mask;
        let loop_index = index;

        loop {
            let probe = entries[index];
            if probe == 0 || probe == key {
                return Some(index);
            }
            index = (index + stride) & mask;
            if index == loop_index {
                return None;
            }
        }
    }

    /// Get capacity threshold
    fn get_capacity(&self) -> usize {
        let fraction = if self.lg_cur_size <= self.lg_nom_size {
            RESIZE_THRESHOLD
        } else {
            REBUILD_THRESHOLD
        };
        (fraction * self.entries.len() as f64) as usize
    }

    /// Grow the table by the resize factor, capped at the max size.
    fn resize(&mut self) {
        let new_lg_size = std::cmp::min(
            self.lg_cur_size + self.resize_factor.lg_value(),
            self.lg_max_size,
        );
        let new_size = 1 << new_lg_size;

        let mut new_entries = self.memory.request_long_array(new_size);
        for &entry in &self.entries {
            if entry != 0 {
                let new_index = Self::find_in_entries(&new_entries, entry, new_lg_size);
                if let Some(idx) = new_index {
                    new_entries[idx] = entry;
                } else {
                    unreachable!(
                        "find_in_entries should always return Some if the entry is not empty."
                    );
                }
            }
        }

        self.entries = new_entries;
        self.lg_cur_size = new_lg_size;
    }

    /// Rebuild the hash table, reducing the retained entries to the nominal
    /// size k.
    ///
    /// Theta becomes the k-th smallest entry and only strictly smaller
    /// entries survive, so distinct hashes leave exactly k behind.
    fn rebuild(&mut self) {
        self.trim_to(1 << self.lg_nom_size);
    }

    /// Trim the table to nominal size k
    pub fn trim(&mut self) {
        self.trim_to(1 << self.lg_nom_size);
    }

    /// Reduce the retained entries to `target`, lowering theta to the
    /// target-th smallest entry. A table already at or under `target` is
    /// left untouched.
    pub fn trim_to(&mut self, target: usize) {
        if self.num_retained <= target {
            return;
        }

        // Select the target-th smallest entry as new theta and keep the
        // lesser entries.
        self.entries.retain(|&e| e != 0);
        let (lesser, nth, _) = self.entries.select_nth_unstable(target);
        self.theta = *nth;

        // Rebuild the table with the lesser entries.
        let size = 1 << self.lg_cur_size;
        let mut new_entries = self.memory.request_long_array(size);
        let mut num_inserted = 0;
        for entry in lesser {
            if let Some(idx) = Self::find_in_entries(&new_entries, *entry, self.lg_cur_size) {
                new_entries[idx] = *entry;
                num_inserted += 1;
            } else {
                unreachable!(
                    "find_in_entries should always return Some if the entry is not empty."
                );
            }
        }

        debug_assert_eq!(num_inserted, target, "trim must retain exactly target entries");
        self.num_retained = num_inserted;
        self.entries = new_entries;
    }

    /// Reset the table to empty state
    pub fn reset(&mut self) {
        let init_theta = starting_theta_from_sampling_probability(self.sampling_probability);
        let init_lg_cur = starting_sub_multiple(
            self.lg_nom_size + 1,
            MIN_LG_ARR,
            self.resize_factor.lg_value(),
        )
        .min(self.lg_max_size);

        // clear entries
        if self.entries.len() != 1 << init_lg_cur {
            self.entries = self.memory.request_long_array(1 << init_lg_cur);
        } else {
            self.entries.fill(0);
        }
        self.num_retained = 0;
        self.theta = init_theta;
        self.is_empty = self.sampling_probability >= 1.0;
        self.lg_cur_size = init_lg_cur;
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.num_retained
    }

    /// Get theta
    pub fn theta(&self) -> u64 {
        self.theta
    }

    /// Overrides theta. Callers keep the `< theta` invariant themselves.
    pub fn set_theta(&mut self, theta: u64) {
        self.theta = theta;
    }

    /// Check the emptiness of the source set
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    /// Overrides the empty flag.
    pub fn set_empty(&mut self, is_empty: bool) {
        self.is_empty = is_empty;
    }

    /// Get iterator over entries
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied().filter(|&e| e != 0)
    }

    /// The raw table slots, zeros included.
    pub fn raw_entries(&self) -> &[u64] {
        &self.entries
    }

    /// Get log2 of nominal size
    pub fn lg_nom_size(&self) -> u8 {
        self.lg_nom_size
    }

    /// Get log2 of the current table size
    pub fn lg_cur_size(&self) -> u8 {
        self.lg_cur_size
    }

    /// The configured resize factor.
    pub fn resize_factor(&self) -> ResizeFactor {
        self.resize_factor
    }

    /// The configured sampling probability.
    pub fn sampling_probability(&self) -> f32 {
        self.sampling_probability
    }

    /// The seed used to hash input values.
    pub fn hash_seed(&self) -> u64 {
        self.hash_seed
    }

    /// Get the hash of the seed that was used to hash the input.
    pub fn seed_hash(&self) -> u16 {
        compute_seed_hash(self.hash_seed)
    }

    /// Smallest lg table size that keeps `count` entries under the rebuild
    /// threshold.
    pub fn lg_size_from_count_for_rebuild(count: usize, threshold: f64) -> u8 {
        let mut lg_size = MIN_LG_ARR;
        while count > (threshold * (1u64 << lg_size) as f64) as usize {
            lg_size += 1;
        }
        lg_size
    }

    /// Get stride for hash table probing
    fn get_stride(key: u64, lg_size: u8) -> usize {
        (2 * ((key >> lg_size) & STRIDE_MASK) + 1) as usize
    }
}

/// Compute initial lg_size for hash table based on target lg_size, minimum
/// lg_size, and resize factor. Make sure `lg_target = lg_init + n *
/// lg_resize_factor`, where `n` is an integer and `lg_init >= lg_min`
pub(crate) fn starting_sub_multiple(lg_target: u8, lg_min: u8, lg_resize_factor: u8) -> u8 {
    if lg_target <= lg_min {
        lg_min
    } else if lg_resize_factor == 0 {
        lg_target
    } else {
        ((lg_target - lg_min) % lg_resize_factor) + lg_min
    }
}

/// Compute initial theta for hash table based on sampling probability.
pub(crate) fn starting_theta_from_sampling_probability(sampling_probability: f32) -> u64 {
    if sampling_probability < 1.0 {
        (MAX_THETA as f64 * sampling_probability as f64) as u64
    } else {
        MAX_THETA
    }
}
