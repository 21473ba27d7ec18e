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

//! Updatable theta sketch (QuickSelect family).

use std::hash::Hash;

use crate::codec::Family;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::MemoryRequestServerRef;
use crate::common::NumStdDev;
use crate::common::ResizeFactor;
use crate::common::binomial_bounds;
use crate::common::canonical_double;
use crate::common::default_memory_request_server;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::theta::CompactThetaSketch;
use crate::theta::ThetaSketchView;
use crate::theta::hash_table::DEFAULT_LG_K;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_ARR;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;
use crate::theta::hash_table::starting_sub_multiple;
use crate::theta::serialization::FLAG_IS_BIG_ENDIAN;
use crate::theta::serialization::FLAG_IS_COMPACT;
use crate::theta::serialization::FLAG_IS_EMPTY;
use crate::theta::serialization::HASH_SIZE_BYTES;
use crate::theta::serialization::LG_RESIZE_FACTOR_SHIFT;
use crate::theta::serialization::PREAMBLE_LONGS_ESTIMATION;
use crate::theta::serialization::PREAMBLE_LONGS_MASK;
use crate::theta::serialization::SERIAL_VERSION;

/// Mutable theta sketch for building from input data.
///
/// # Examples
///
/// ```
/// # use thetasketch::theta::ThetaSketch;
/// let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
/// sketch.update("apple");
/// assert!(sketch.estimate() >= 1.0);
/// ```
#[derive(Debug)]
pub struct ThetaSketch {
    table: ThetaHashTable,
}

impl ThetaSketch {
    /// Create a new builder for ThetaSketch
    ///
    /// # Examples
    ///
    /// ```
    /// # use thetasketch::theta::ThetaSketch;
    /// let sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    /// assert_eq!(sketch.lg_k(), 12);
    /// ```
    pub fn builder() -> ThetaSketchBuilder {
        ThetaSketchBuilder::default()
    }

    /// Update the sketch with a hashable value.
    ///
    /// For `f32`/`f64` values, use `update_f32`/`update_f64` instead.
    pub fn update<T: Hash>(&mut self, value: T) {
        let _ = self.table.update(value);
    }

    /// Update the sketch with a f64 value.
    ///
    /// Canonicalizes the value first so `0.0` and `-0.0` count once.
    pub fn update_f64(&mut self, value: f64) {
        self.update(canonical_double(value));
    }

    /// Update the sketch with a f32 value.
    pub fn update_f32(&mut self, value: f32) {
        self.update_f64(value as f64);
    }

    /// Update the sketch with a pre-computed 64-bit hash value.
    ///
    /// The value must already be uniform in `(0, 2^63)`; feeding anything
    /// else here destroys the estimate. Values at or above the current theta
    /// are silently screened out.
    ///
    /// Returns whether the hash was newly retained.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the hash is zero (reserved for empty slots) or
    /// has the high bit set (negative as a signed 64-bit value).
    pub fn update_hash(&mut self, hash: u64) -> Result<bool, Error> {
        if hash == 0 {
            return Err(Error::invalid_argument(
                "hash value 0 is reserved for empty slots",
            ));
        }
        if hash > MAX_THETA {
            return Err(Error::invalid_argument(format!(
                "hash value {hash} is negative as a signed 64-bit value"
            )));
        }
        Ok(self.table.insert_hash(hash))
    }

    /// Return cardinality estimate
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let num_retained = self.table.num_retained() as f64;
        let theta = self.table.theta() as f64 / MAX_THETA as f64;
        num_retained / theta
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.table.theta() as f64 / MAX_THETA as f64
    }

    /// Return theta as u64
    pub fn theta64(&self) -> u64 {
        self.table.theta()
    }

    /// Check if sketch is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.table.theta() < MAX_THETA
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.table.num_retained()
    }

    /// Return lg_k
    pub fn lg_k(&self) -> u8 {
        self.table.lg_nom_size()
    }

    /// The 16-bit tag of the configured seed.
    pub fn seed_hash(&self) -> u16 {
        self.table.seed_hash()
    }

    /// Reduce the retained entries to at most the nominal size k.
    ///
    /// Quickselects the k-th smallest retained hash, lowers theta to it and
    /// evicts everything at or above. A sketch already at or under k is left
    /// untouched.
    pub fn rebuild(&mut self) {
        self.table.trim();
    }

    /// Reset the sketch to empty state
    pub fn reset(&mut self) {
        self.table.reset();
    }

    /// Return iterator over hash values
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.table.iter()
    }

    /// Returns the approximate lower error bound given the specified number
    /// of Standard Deviations.
    ///
    /// # Examples
    ///
    /// ```
    /// use thetasketch::common::NumStdDev;
    /// use thetasketch::theta::ThetaSketch;
    ///
    /// let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    /// for i in 0..10000 {
    ///     sketch.update(i);
    /// }
    ///
    /// let estimate = sketch.estimate();
    /// assert!(sketch.lower_bound(NumStdDev::Two) <= estimate);
    /// assert!(estimate <= sketch.upper_bound(NumStdDev::Two));
    /// ```
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        // The builder guarantees sampling_probability > 0, so theta is
        // always valid here.
        binomial_bounds::lower_bound(self.num_retained() as u64, self.theta(), num_std_dev)
            .expect("theta should always be valid")
    }

    /// Returns the approximate upper error bound given the specified number
    /// of Standard Deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
        .expect("theta should always be valid")
    }

    /// Snapshot the sketch into its immutable compact form.
    ///
    /// A sketch with nothing retained collapses to the canonical empty form
    /// (theta back to 1), whether it is logically empty or p-sampling
    /// screened every update.
    pub fn compact(&self, ordered: bool) -> CompactThetaSketch {
        if self.num_retained() == 0 {
            return CompactThetaSketch::from_parts(
                Vec::new(),
                MAX_THETA,
                self.table.seed_hash(),
                true,
                true,
            );
        }
        let mut entries: Vec<u64> = self.table.iter().collect();
        if ordered {
            entries.sort_unstable();
        }
        CompactThetaSketch::from_parts(
            entries,
            self.table.theta(),
            self.table.seed_hash(),
            ordered,
            false,
        )
    }

    /// Serialize the compact form of this sketch into a caller buffer.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `dst` is too small for the compact image.
    pub fn compact_into(&self, ordered: bool, dst: &mut [u8]) -> Result<usize, Error> {
        let bytes = self.compact(ordered).serialize();
        if dst.len() < bytes.len() {
            return Err(Error::invalid_argument(format!(
                "destination holds {} bytes, compact image needs {}",
                dst.len(),
                bytes.len()
            )));
        }
        dst[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Serialize the sketch to its updatable (read-write) image.
    ///
    /// The image carries the whole probing table, so it is larger than the
    /// compact form but can be deserialized and updated further. For
    /// storage or transport of a finished sketch prefer
    /// `self.compact(true).serialize()`.
    pub fn serialize(&self) -> Vec<u8> {
        let preamble_bytes = (PREAMBLE_LONGS_ESTIMATION as usize) * 8;
        let table = self.table.raw_entries();
        let total_bytes = preamble_bytes + table.len() * HASH_SIZE_BYTES;

        let mut bytes = SketchBytes::with_capacity(total_bytes);

        let byte0 = PREAMBLE_LONGS_ESTIMATION
            | (self.table.resize_factor().lg_value() << LG_RESIZE_FACTOR_SHIFT);
        bytes.write_u8(byte0);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::QUICKSELECT.id);
        bytes.write_u8(self.table.lg_nom_size());
        bytes.write_u8(self.table.lg_cur_size());

        let mut flags = 0u8;
        if self.is_empty() {
            flags |= FLAG_IS_EMPTY;
        }
        bytes.write_u8(flags);
        bytes.write_u16_le(self.table.seed_hash());

        bytes.write_u32_le(self.num_retained() as u32);
        bytes.write_f32_le(self.table.sampling_probability());
        bytes.write_u64_le(self.table.theta());

        for &slot in table {
            bytes.write_u64_le(slot);
        }

        bytes.into_bytes()
    }

    /// Deserialize an updatable sketch image with the default seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are invalid or corrupted.
    ///
    /// # Examples
    ///
    /// ```
    /// # use thetasketch::theta::ThetaSketch;
    /// let mut sketch = ThetaSketch::builder().build().unwrap();
    /// sketch.update("apple");
    /// let bytes = sketch.serialize();
    /// let restored = ThetaSketch::deserialize(&bytes).unwrap();
    /// assert_eq!(sketch.estimate(), restored.estimate());
    /// ```
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserialize an updatable sketch image with a specific seed.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the image is truncated or the preamble is
    ///   inconsistent;
    /// - `Unsupported` for serial versions 1 and 2 (legacy conversion is a
    ///   separate concern);
    /// - `SeedMismatch` if the stored seed hash differs from `seed`'s.
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        fn make_error(tag: &'static str) -> impl FnOnce(std::io::Error) -> Error {
            move |e| Error::insufficient_data(tag).set_source(e)
        }

        let mut cursor = SketchSlice::new(bytes);

        let byte0 = cursor.read_u8().map_err(make_error("preamble_longs"))?;
        let preamble_longs = byte0 & PREAMBLE_LONGS_MASK;
        let lg_resize_factor = byte0 >> LG_RESIZE_FACTOR_SHIFT;
        let serial_version = cursor.read_u8().map_err(make_error("serial_version"))?;
        let family_id = cursor.read_u8().map_err(make_error("family_id"))?;
        let lg_nom = cursor.read_u8().map_err(make_error("lg_nom"))?;
        let lg_arr = cursor.read_u8().map_err(make_error("lg_arr"))?;
        let flags = cursor.read_u8().map_err(make_error("flags"))?;
        let stored_seed_hash = cursor.read_u16_le().map_err(make_error("seed_hash"))?;

        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        Family::QUICKSELECT.validate_id(family_id)?;
        Family::QUICKSELECT.validate_pre_longs(preamble_longs)?;
        if (flags & FLAG_IS_BIG_ENDIAN) != 0 {
            return Err(Error::invalid_format("big-endian images are not readable"));
        }
        if (flags & FLAG_IS_COMPACT) != 0 {
            return Err(Error::invalid_format(
                "compact flag set on an updatable image",
            ));
        }
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_nom) {
            return Err(Error::invalid_format(format!(
                "lg_nom {lg_nom} is out of range [{MIN_LG_K}, {MAX_LG_K}]"
            )));
        }
        if !(MIN_LG_ARR..=lg_nom + 1).contains(&lg_arr) {
            return Err(Error::invalid_format(format!(
                "lg_arr {lg_arr} is implausible for lg_nom {lg_nom}"
            )));
        }

        let expected_seed_hash = compute_seed_hash(seed);
        if stored_seed_hash != expected_seed_hash {
            return Err(Error::seed_mismatch(expected_seed_hash, stored_seed_hash));
        }

        // from_lg only fails for values outside the two-bit encoding.
        let mut resize_factor =
            ResizeFactor::from_lg(lg_resize_factor).expect("two-bit resize factor");
        let start = starting_sub_multiple(lg_nom + 1, MIN_LG_ARR, resize_factor.lg_value());
        if resize_factor.lg_value() > 0
            && lg_arr >= start
            && (lg_arr - start) % resize_factor.lg_value() != 0
        {
            // The table size cannot have been produced by this factor;
            // fall back to doubling.
            resize_factor = ResizeFactor::X2;
        }

        let num_retained = cursor.read_u32_le().map_err(make_error("num_retained"))? as usize;
        let sampling_probability = cursor.read_f32_le().map_err(make_error("p"))?;
        let theta = cursor.read_u64_le().map_err(make_error("theta"))?;

        if !(sampling_probability > 0.0 && sampling_probability <= 1.0) {
            return Err(Error::invalid_format(format!(
                "sampling probability {sampling_probability} is out of range (0.0, 1.0]"
            )));
        }
        if theta == 0 || theta > MAX_THETA {
            return Err(Error::invalid_format(format!(
                "theta {theta} is out of range (0, 2^63)"
            )));
        }

        let table_slots = 1usize << lg_arr;
        let mut slots = Vec::with_capacity(table_slots);
        for _ in 0..table_slots {
            slots.push(cursor.read_u64_le().map_err(make_error("table"))?);
        }

        let counted = ThetaHashTable::count_below(&slots, theta);
        if counted != num_retained {
            return Err(Error::invalid_format(format!(
                "retained count mismatch: preamble says {num_retained}, table holds {counted}"
            )));
        }

        let is_empty = (flags & FLAG_IS_EMPTY) != 0;
        let mut table = ThetaHashTable::from_raw_parts(
            lg_arr,
            lg_nom,
            resize_factor,
            sampling_probability,
            theta,
            seed,
            is_empty,
        );
        for slot in slots {
            if slot != 0 && slot < theta {
                table.insert_hash(slot);
            }
        }
        table.set_empty(is_empty);

        Ok(ThetaSketch { table })
    }
}

impl ThetaSketchView for ThetaSketch {
    fn theta64(&self) -> u64 {
        self.table.theta()
    }

    fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn num_retained(&self) -> usize {
        self.table.num_retained()
    }

    fn seed_hash(&self) -> u16 {
        self.table.seed_hash()
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.table.iter()
    }
}

/// The updatable sketch family to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SketchFamily {
    /// The QuickSelect sketch implemented by this crate.
    QuickSelect,
    /// The Alpha sketch. Recognised for completeness; building one fails
    /// with `Unsupported`.
    Alpha,
}

/// Builder for ThetaSketch
#[derive(Debug)]
pub struct ThetaSketchBuilder {
    lg_k: u8,
    nominal_entries: Option<u64>,
    family: SketchFamily,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    seed: u64,
    memory: Option<MemoryRequestServerRef>,
}

impl Default for ThetaSketchBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            nominal_entries: None,
            family: SketchFamily::QuickSelect,
            resize_factor: ResizeFactor::X8,
            sampling_probability: 1.0,
            seed: DEFAULT_UPDATE_SEED,
            memory: None,
        }
    }
}

impl ThetaSketchBuilder {
    /// Set lg_k (log2 of nominal size k). Must be in `[4, 26]`.
    pub fn lg_k(mut self, lg_k: u8) -> Self {
        self.lg_k = lg_k;
        self.nominal_entries = None;
        self
    }

    /// Set the nominal size k directly.
    ///
    /// A value that is not a power of two is rounded up to the next one.
    /// Must land in `[16, 2^26]`.
    pub fn nominal_entries(mut self, k: u64) -> Self {
        self.nominal_entries = Some(k);
        self
    }

    /// Set the sketch family to build.
    pub fn family(mut self, family: SketchFamily) -> Self {
        self.family = family;
        self
    }

    /// Set resize factor.
    pub fn resize_factor(mut self, factor: ResizeFactor) -> Self {
        self.resize_factor = factor;
        self
    }

    /// Set sampling probability p, in `(0.0, 1.0]`.
    ///
    /// When `p < 1` the sketch starts with theta at `p`, pre-sampling the
    /// input stream.
    pub fn sampling_probability(mut self, probability: f32) -> Self {
        self.sampling_probability = probability;
        self
    }

    /// Set hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the allocator consulted when the probing table grows.
    pub fn memory_request_server(mut self, memory: MemoryRequestServerRef) -> Self {
        self.memory = Some(memory);
        self
    }

    fn resolved_lg_k(&self) -> Result<u8, Error> {
        match self.nominal_entries {
            None => {
                if !(MIN_LG_K..=MAX_LG_K).contains(&self.lg_k) {
                    return Err(Error::invalid_argument(format!(
                        "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {}",
                        self.lg_k
                    )));
                }
                Ok(self.lg_k)
            }
            Some(k) => {
                if k < (1 << MIN_LG_K) || k > (1 << MAX_LG_K) {
                    return Err(Error::invalid_argument(format!(
                        "nominal entries must be in [{}, {}], got {k}",
                        1u64 << MIN_LG_K,
                        1u64 << MAX_LG_K
                    )));
                }
                Ok(k.next_power_of_two().trailing_zeros() as u8)
            }
        }
    }

    /// Build the ThetaSketch.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an out-of-range `lg_k`/`nominal_entries` or
    ///   `sampling_probability`, or a seed whose 16-bit hash is zero;
    /// - `Unsupported` when the Alpha family is requested.
    ///
    /// # Examples
    ///
    /// ```
    /// # use thetasketch::theta::ThetaSketch;
    /// let sketch = ThetaSketch::builder().nominal_entries(1000).build().unwrap();
    /// assert_eq!(sketch.lg_k(), 10); // rounded up to 1024
    /// ```
    pub fn build(self) -> Result<ThetaSketch, Error> {
        if self.family == SketchFamily::Alpha {
            return Err(Error::unsupported(
                "the Alpha family is not implemented; use QuickSelect",
            ));
        }
        let lg_k = self.resolved_lg_k()?;
        if !(self.sampling_probability > 0.0 && self.sampling_probability <= 1.0) {
            return Err(Error::invalid_argument(format!(
                "sampling_probability must be in (0.0, 1.0], got {}",
                self.sampling_probability
            )));
        }
        if compute_seed_hash(self.seed) == 0 {
            return Err(Error::invalid_argument(format!(
                "seed {} hashes to the reserved tag 0; pick another seed",
                self.seed
            )));
        }

        let memory = self.memory.unwrap_or_else(default_memory_request_server);
        let table = ThetaHashTable::new(
            lg_k,
            self.resize_factor,
            self.sampling_probability,
            self.seed,
            memory,
        );

        Ok(ThetaSketch { table })
    }
}
