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

//! Compact Theta sketch.
//!
//! The compact sketch is the immutable snapshot of a theta sketch: theta,
//! the retained hashes (sorted when ordered), the seed hash and the empty
//! flag. It is what set operators return and what normally travels over the
//! wire.
//!
//! Serialized shapes, smallest wins:
//! - empty: one preamble long;
//! - single item: one preamble long plus one hash (theta = 1 only);
//! - exact: two preamble longs plus hashes;
//! - estimation: three preamble longs (theta) plus hashes.

use crate::codec::Family;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::NumStdDev;
use crate::common::binomial_bounds;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::theta::ThetaSketchView;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::serialization::FLAG_HAS_SINGLE_ITEM;
use crate::theta::serialization::FLAG_IS_BIG_ENDIAN;
use crate::theta::serialization::FLAG_IS_COMPACT;
use crate::theta::serialization::FLAG_IS_EMPTY;
use crate::theta::serialization::FLAG_IS_ORDERED;
use crate::theta::serialization::FLAG_IS_READ_ONLY;
use crate::theta::serialization::HASH_SIZE_BYTES;
use crate::theta::serialization::PREAMBLE_LONGS_EMPTY;
use crate::theta::serialization::PREAMBLE_LONGS_ESTIMATION;
use crate::theta::serialization::PREAMBLE_LONGS_EXACT;
use crate::theta::serialization::PREAMBLE_LONGS_MASK;
use crate::theta::serialization::SERIAL_VERSION;

/// A compact, immutable Theta sketch.
///
/// Unlike [`ThetaSketch`](super::ThetaSketch), this sketch cannot be updated
/// with new values; it supports estimation, bounds, set operations and
/// serialization.
///
/// # Example
///
/// ```
/// use thetasketch::theta::CompactThetaSketch;
/// use thetasketch::theta::ThetaSketch;
///
/// let mut sketch = ThetaSketch::builder().build().unwrap();
/// sketch.update("apple");
/// sketch.update("banana");
///
/// let compact = sketch.compact(true);
/// let bytes = compact.serialize();
///
/// let restored = CompactThetaSketch::deserialize(&bytes).unwrap();
/// assert_eq!(compact.estimate(), restored.estimate());
/// ```
#[derive(Debug, Clone)]
pub struct CompactThetaSketch {
    theta: u64,
    entries: Vec<u64>,
    seed_hash: u16,
    ordered: bool,
    is_empty: bool,
}

impl CompactThetaSketch {
    /// Create a compact sketch from components.
    ///
    /// `entries` must already be sorted when `ordered` is true.
    pub(crate) fn from_parts(
        entries: Vec<u64>,
        theta: u64,
        seed_hash: u16,
        ordered: bool,
        is_empty: bool,
    ) -> Self {
        debug_assert!(!is_empty || entries.is_empty());
        debug_assert!(!ordered || entries.is_sorted());
        Self {
            theta,
            entries,
            seed_hash,
            ordered,
            is_empty,
        }
    }

    /// Check if the sketch is empty (no values have ever been accepted)
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    /// Whether the retained hashes are sorted ascending.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Get the cardinality estimate
    pub fn estimate(&self) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        let num_retained = self.entries.len() as f64;
        let theta_fraction = self.theta as f64 / MAX_THETA as f64;
        num_retained / theta_fraction
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    /// Return theta as u64
    pub fn theta64(&self) -> u64 {
        self.theta
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.entries.len()
    }

    /// Return iterator over hash values
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied()
    }

    /// Get the seed hash
    pub fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    /// Returns the approximate lower error bound given the specified number
    /// of Standard Deviations.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::lower_bound(self.num_retained() as u64, self.theta(), num_std_dev)
            .expect("theta should always be valid")
    }

    /// Returns the approximate upper error bound given the specified number
    /// of Standard Deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty,
        )
        .expect("theta should always be valid")
    }

    /// Serialize the compact sketch to bytes.
    ///
    /// The empty and single-item states use the compressed one-long
    /// preamble. A sketch with `theta < 1` and nothing retained keeps its
    /// three-long preamble so theta survives the round trip.
    pub fn serialize(&self) -> Vec<u8> {
        if self.is_empty || (self.entries.is_empty() && self.theta == MAX_THETA) {
            let mut bytes = SketchBytes::with_capacity(8);
            bytes.write_u8(PREAMBLE_LONGS_EMPTY);
            bytes.write_u8(SERIAL_VERSION);
            bytes.write_u8(Family::COMPACT.id);
            bytes.write_u8(0);
            bytes.write_u8(0);
            bytes.write_u8(FLAG_IS_READ_ONLY | FLAG_IS_COMPACT | FLAG_IS_ORDERED | FLAG_IS_EMPTY);
            bytes.write_u16_le(self.seed_hash);
            return bytes.into_bytes();
        }

        if self.entries.len() == 1 && self.theta == MAX_THETA {
            let mut bytes = SketchBytes::with_capacity(16);
            bytes.write_u8(PREAMBLE_LONGS_EMPTY);
            bytes.write_u8(SERIAL_VERSION);
            bytes.write_u8(Family::COMPACT.id);
            bytes.write_u8(0);
            bytes.write_u8(0);
            bytes.write_u8(
                FLAG_IS_READ_ONLY | FLAG_IS_COMPACT | FLAG_IS_ORDERED | FLAG_HAS_SINGLE_ITEM,
            );
            bytes.write_u16_le(self.seed_hash);
            bytes.write_u64_le(self.entries[0]);
            return bytes.into_bytes();
        }

        let preamble_longs = if self.is_estimation_mode() {
            PREAMBLE_LONGS_ESTIMATION
        } else {
            PREAMBLE_LONGS_EXACT
        };

        let preamble_bytes = (preamble_longs as usize) * 8;
        let total_size = preamble_bytes + self.entries.len() * HASH_SIZE_BYTES;
        let mut bytes = SketchBytes::with_capacity(total_size);

        bytes.write_u8(preamble_longs);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::COMPACT.id);
        bytes.write_u8(0);
        bytes.write_u8(0);

        let mut flags = FLAG_IS_READ_ONLY | FLAG_IS_COMPACT;
        if self.ordered {
            flags |= FLAG_IS_ORDERED;
        }
        bytes.write_u8(flags);
        bytes.write_u16_le(self.seed_hash);

        bytes.write_u32_le(self.entries.len() as u32);
        bytes.write_f32_le(1.0);

        if preamble_longs == PREAMBLE_LONGS_ESTIMATION {
            bytes.write_u64_le(self.theta);
        }

        for hash in &self.entries {
            bytes.write_u64_le(*hash);
        }

        bytes.into_bytes()
    }

    /// Deserialize a compact sketch with the default seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are invalid or corrupted.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserialize a compact sketch with a specific seed.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the image is truncated or inconsistent;
    /// - `Unsupported` for serial versions 1 and 2;
    /// - `SeedMismatch` if the stored seed hash differs from `seed`'s
    ///   (a stored hash of zero marks a legacy image and skips the check).
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        fn make_error(tag: &'static str) -> impl FnOnce(std::io::Error) -> Error {
            move |e| Error::insufficient_data(tag).set_source(e)
        }

        let mut cursor = SketchSlice::new(bytes);

        let byte0 = cursor.read_u8().map_err(make_error("preamble_longs"))?;
        let preamble_longs = byte0 & PREAMBLE_LONGS_MASK;
        let serial_version = cursor.read_u8().map_err(make_error("serial_version"))?;
        let family_id = cursor.read_u8().map_err(make_error("family_id"))?;
        let _lg_nom = cursor.read_u8().map_err(make_error("lg_nom"))?;
        let _lg_arr = cursor.read_u8().map_err(make_error("lg_arr"))?;
        let flags = cursor.read_u8().map_err(make_error("flags"))?;
        let stored_seed_hash = cursor.read_u16_le().map_err(make_error("seed_hash"))?;

        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        Family::COMPACT.validate_id(family_id)?;
        Family::COMPACT.validate_pre_longs(preamble_longs)?;
        if (flags & FLAG_IS_BIG_ENDIAN) != 0 {
            return Err(Error::invalid_format("big-endian images are not readable"));
        }
        if (flags & FLAG_IS_COMPACT) == 0 {
            return Err(Error::invalid_format(
                "compact flag missing from a compact image",
            ));
        }

        // A stored hash of zero marks a legacy image and skips the check.
        let expected_seed_hash = compute_seed_hash(seed);
        if stored_seed_hash != 0 && stored_seed_hash != expected_seed_hash {
            return Err(Error::seed_mismatch(expected_seed_hash, stored_seed_hash));
        }

        let is_empty = (flags & FLAG_IS_EMPTY) != 0;
        let is_ordered = (flags & FLAG_IS_ORDERED) != 0;
        let is_single_item = (flags & FLAG_HAS_SINGLE_ITEM) != 0;

        if is_empty {
            return Ok(Self {
                theta: MAX_THETA,
                entries: Vec::new(),
                seed_hash: expected_seed_hash,
                ordered: true,
                is_empty: true,
            });
        }

        if preamble_longs == PREAMBLE_LONGS_EMPTY {
            if !is_single_item {
                return Err(Error::invalid_format(
                    "one-long preamble without the empty or single-item flag",
                ));
            }
            let hash = cursor.read_u64_le().map_err(make_error("single_item"))?;
            return Ok(Self {
                theta: MAX_THETA,
                entries: vec![hash],
                seed_hash: expected_seed_hash,
                ordered: true,
                is_empty: false,
            });
        }

        let num_entries = cursor.read_u32_le().map_err(make_error("num_entries"))? as usize;
        let _p = cursor.read_u32_le().map_err(make_error("p"))?;

        let theta = if preamble_longs == PREAMBLE_LONGS_ESTIMATION {
            cursor.read_u64_le().map_err(make_error("theta"))?
        } else {
            MAX_THETA
        };
        if theta == 0 || theta > MAX_THETA {
            return Err(Error::invalid_format(format!(
                "theta {theta} is out of range (0, 2^63)"
            )));
        }

        let mut entries = Vec::with_capacity(num_entries);
        for i in 0..num_entries {
            let hash = cursor.read_u64_le().map_err(|e| {
                Error::insufficient_data(format!("expected {num_entries} entries, failed at {i}"))
                    .set_source(e)
            })?;
            entries.push(hash);
        }
        if is_ordered && !entries.is_sorted() {
            return Err(Error::invalid_format(
                "ordered flag set but hashes are not sorted",
            ));
        }

        Ok(Self {
            theta,
            entries,
            seed_hash: expected_seed_hash,
            ordered: is_ordered,
            is_empty: false,
        })
    }
}

impl ThetaSketchView for CompactThetaSketch {
    fn theta64(&self) -> u64 {
        self.theta
    }

    fn is_empty(&self) -> bool {
        self.is_empty
    }

    fn is_ordered(&self) -> bool {
        self.ordered
    }

    fn num_retained(&self) -> usize {
        self.entries.len()
    }

    fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied()
    }
}
