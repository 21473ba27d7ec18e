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

//! Zero-copy read-only views over serialized sketch images.
//!
//! Wrapping validates the preamble eagerly, then reads hashes straight from
//! the borrowed bytes; nothing is allocated beyond the view itself. The
//! views grant [`ThetaSketchView`], so set operators consume them like any
//! heap sketch.

use crate::codec::Family;
use crate::codec::SketchSlice;
use crate::common::NumStdDev;
use crate::common::binomial_bounds;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::theta::ThetaSketchView;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_ARR;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;
use crate::theta::serialization::FLAG_HAS_SINGLE_ITEM;
use crate::theta::serialization::FLAG_IS_BIG_ENDIAN;
use crate::theta::serialization::FLAG_IS_COMPACT;
use crate::theta::serialization::FLAG_IS_EMPTY;
use crate::theta::serialization::FLAG_IS_ORDERED;
use crate::theta::serialization::HASH_SIZE_BYTES;
use crate::theta::serialization::LG_RESIZE_FACTOR_SHIFT;
use crate::theta::serialization::PREAMBLE_LONGS_EMPTY;
use crate::theta::serialization::PREAMBLE_LONGS_ESTIMATION;
use crate::theta::serialization::PREAMBLE_LONGS_MASK;
use crate::theta::serialization::SERIAL_VERSION;

fn read_u64_at(bytes: &[u8], offset: usize) -> u64 {
    // Offsets are validated once at wrap time.
    u64::from_le_bytes(
        bytes[offset..offset + HASH_SIZE_BYTES]
            .try_into()
            .expect("offset validated at wrap time"),
    )
}

/// Read-only view over a serialized compact sketch image.
///
/// # Examples
///
/// ```
/// # use thetasketch::theta::ThetaSketch;
/// # use thetasketch::theta::WrappedCompactThetaSketch;
/// let mut sketch = ThetaSketch::builder().build().unwrap();
/// sketch.update("apple");
/// let bytes = sketch.compact(true).serialize();
///
/// let view = WrappedCompactThetaSketch::wrap(&bytes).unwrap();
/// assert_eq!(view.estimate(), 1.0);
/// ```
#[derive(Debug)]
pub struct WrappedCompactThetaSketch<'a> {
    bytes: &'a [u8],
    theta: u64,
    seed_hash: u16,
    num_entries: usize,
    entries_offset: usize,
    ordered: bool,
    is_empty: bool,
}

impl<'a> WrappedCompactThetaSketch<'a> {
    /// Wraps a compact image, validating against the default seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is invalid or corrupted.
    pub fn wrap(bytes: &'a [u8]) -> Result<Self, Error> {
        Self::wrap_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Wraps a compact image, validating against a specific seed.
    ///
    /// # Errors
    ///
    /// Same taxonomy as
    /// [`CompactThetaSketch::deserialize_with_seed`](super::CompactThetaSketch::deserialize_with_seed).
    pub fn wrap_with_seed(bytes: &'a [u8], seed: u64) -> Result<Self, Error> {
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

        let expected_seed_hash = compute_seed_hash(seed);
        if stored_seed_hash != 0 && stored_seed_hash != expected_seed_hash {
            return Err(Error::seed_mismatch(expected_seed_hash, stored_seed_hash));
        }

        let is_empty = (flags & FLAG_IS_EMPTY) != 0;
        let is_single_item = (flags & FLAG_HAS_SINGLE_ITEM) != 0;
        let ordered = (flags & FLAG_IS_ORDERED) != 0;

        if is_empty {
            return Ok(Self {
                bytes,
                theta: MAX_THETA,
                seed_hash: expected_seed_hash,
                num_entries: 0,
                entries_offset: 8,
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
            if bytes.len() < 16 {
                return Err(Error::insufficient_data("single_item"));
            }
            return Ok(Self {
                bytes,
                theta: MAX_THETA,
                seed_hash: expected_seed_hash,
                num_entries: 1,
                entries_offset: 8,
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

        let entries_offset = (preamble_longs as usize) * 8;
        let needed = entries_offset + num_entries * HASH_SIZE_BYTES;
        if bytes.len() < needed {
            return Err(Error::insufficient_data(format!(
                "image holds {} bytes, {num_entries} entries need {needed}",
                bytes.len()
            )));
        }

        Ok(Self {
            bytes,
            theta,
            seed_hash: expected_seed_hash,
            num_entries,
            entries_offset,
            ordered,
            is_empty: false,
        })
    }

    /// Get the cardinality estimate
    pub fn estimate(&self) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        self.num_entries as f64 / (self.theta as f64 / MAX_THETA as f64)
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Returns the approximate lower error bound at the given sigma.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_entries as f64;
        }
        binomial_bounds::lower_bound(self.num_entries as u64, self.theta(), num_std_dev)
            .expect("theta should always be valid")
    }

    /// Returns the approximate upper error bound at the given sigma.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_entries as f64;
        }
        binomial_bounds::upper_bound(
            self.num_entries as u64,
            self.theta(),
            num_std_dev,
            self.is_empty,
        )
        .expect("theta should always be valid")
    }
}

impl ThetaSketchView for WrappedCompactThetaSketch<'_> {
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
        self.num_entries
    }

    fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_entries)
            .map(move |i| read_u64_at(self.bytes, self.entries_offset + i * HASH_SIZE_BYTES))
    }
}

/// Read-only view over a serialized updatable sketch image.
///
/// The view reads estimate, theta and the retained hashes straight from the
/// borrowed bytes. Mutation is refused: an updatable image wrapped this way
/// belongs to whoever wrote it.
#[derive(Debug)]
pub struct WrappedThetaSketch<'a> {
    bytes: &'a [u8],
    theta: u64,
    seed_hash: u16,
    lg_nom: u8,
    num_retained: usize,
    table_offset: usize,
    table_slots: usize,
    is_empty: bool,
}

impl<'a> WrappedThetaSketch<'a> {
    /// Wraps an updatable image, validating against the default seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is invalid or corrupted.
    pub fn wrap(bytes: &'a [u8]) -> Result<Self, Error> {
        Self::wrap_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Wraps an updatable image, validating against a specific seed.
    ///
    /// # Errors
    ///
    /// Same taxonomy as
    /// [`ThetaSketch::deserialize_with_seed`](super::ThetaSketch::deserialize_with_seed).
    pub fn wrap_with_seed(bytes: &'a [u8], seed: u64) -> Result<Self, Error> {
        fn make_error(tag: &'static str) -> impl FnOnce(std::io::Error) -> Error {
            move |e| Error::insufficient_data(tag).set_source(e)
        }

        let mut cursor = SketchSlice::new(bytes);
        let byte0 = cursor.read_u8().map_err(make_error("preamble_longs"))?;
        let preamble_longs = byte0 & PREAMBLE_LONGS_MASK;
        let _lg_resize_factor = byte0 >> LG_RESIZE_FACTOR_SHIFT;
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

        let num_retained = cursor.read_u32_le().map_err(make_error("num_retained"))? as usize;
        let _p = cursor.read_f32_le().map_err(make_error("p"))?;
        let theta = cursor.read_u64_le().map_err(make_error("theta"))?;
        if theta == 0 || theta > MAX_THETA {
            return Err(Error::invalid_format(format!(
                "theta {theta} is out of range (0, 2^63)"
            )));
        }

        let table_offset = (PREAMBLE_LONGS_ESTIMATION as usize) * 8;
        let table_slots = 1usize << lg_arr;
        let needed = table_offset + table_slots * HASH_SIZE_BYTES;
        if bytes.len() < needed {
            return Err(Error::insufficient_data(format!(
                "image holds {} bytes, a 2^{lg_arr} table needs {needed}",
                bytes.len()
            )));
        }

        let counted =
            ThetaHashTable::count_below(&Self::slots_of(bytes, table_offset, table_slots), theta);
        if counted != num_retained {
            return Err(Error::invalid_format(format!(
                "retained count mismatch: preamble says {num_retained}, table holds {counted}"
            )));
        }

        Ok(Self {
            bytes,
            theta,
            seed_hash: expected_seed_hash,
            lg_nom,
            num_retained,
            table_offset,
            table_slots,
            is_empty: (flags & FLAG_IS_EMPTY) != 0,
        })
    }

    fn slots_of(bytes: &[u8], offset: usize, slots: usize) -> Vec<u64> {
        (0..slots)
            .map(|i| read_u64_at(bytes, offset + i * HASH_SIZE_BYTES))
            .collect()
    }

    /// Get the cardinality estimate
    pub fn estimate(&self) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        self.num_retained as f64 / (self.theta as f64 / MAX_THETA as f64)
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    /// Return lg_k
    pub fn lg_k(&self) -> u8 {
        self.lg_nom
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Refuses to update through the read-only view.
    ///
    /// # Errors
    ///
    /// Always `ReadOnly`; the image belongs to its writer.
    pub fn update_hash(&self, _hash: u64) -> Result<bool, Error> {
        Err(Error::read_only(
            "cannot update a wrapped read-only sketch image",
        ))
    }
}

impl ThetaSketchView for WrappedThetaSketch<'_> {
    fn theta64(&self) -> u64 {
        self.theta
    }

    fn is_empty(&self) -> bool {
        self.is_empty
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn num_retained(&self) -> usize {
        self.num_retained
    }

    fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.table_slots)
            .map(move |i| read_u64_at(self.bytes, self.table_offset + i * HASH_SIZE_BYTES))
            .filter(move |&slot| slot != 0 && slot < self.theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::ThetaSketch;
    use crate::theta::ThetaSketchView as _;

    #[test]
    fn test_wrap_compact_matches_heap() {
        let mut sketch = ThetaSketch::builder().lg_k(6).build().unwrap();
        for i in 0..1000u64 {
            sketch.update(i);
        }
        let compact = sketch.compact(true);
        let bytes = compact.serialize();

        let view = WrappedCompactThetaSketch::wrap(&bytes).unwrap();
        assert_eq!(view.estimate(), compact.estimate());
        assert_eq!(view.theta64(), compact.theta64());
        assert_eq!(view.num_retained(), compact.num_retained());
        assert!(view.is_ordered());
        assert_eq!(
            view.iter().collect::<Vec<_>>(),
            compact.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_wrap_compact_empty_and_single() {
        let sketch = ThetaSketch::builder().build().unwrap();
        let bytes = sketch.compact(true).serialize();
        let view = WrappedCompactThetaSketch::wrap(&bytes).unwrap();
        assert!(view.is_empty());
        assert_eq!(view.estimate(), 0.0);

        let mut sketch = ThetaSketch::builder().build().unwrap();
        sketch.update("one");
        let bytes = sketch.compact(true).serialize();
        let view = WrappedCompactThetaSketch::wrap(&bytes).unwrap();
        assert_eq!(view.num_retained(), 1);
        assert_eq!(view.estimate(), 1.0);
    }

    #[test]
    fn test_wrap_updatable_matches_heap() {
        let mut sketch = ThetaSketch::builder().lg_k(6).build().unwrap();
        for i in 0..1000u64 {
            sketch.update(i);
        }
        let bytes = sketch.serialize();

        let view = WrappedThetaSketch::wrap(&bytes).unwrap();
        assert_eq!(view.estimate(), sketch.estimate());
        assert_eq!(view.lg_k(), sketch.lg_k());
        assert_eq!(view.num_retained(), sketch.num_retained());

        let mut from_view: Vec<u64> = view.iter().collect();
        let mut from_sketch: Vec<u64> = sketch.iter().collect();
        from_view.sort_unstable();
        from_sketch.sort_unstable();
        assert_eq!(from_view, from_sketch);
    }

    #[test]
    fn test_wrapped_updatable_is_read_only() {
        let mut sketch = ThetaSketch::builder().build().unwrap();
        sketch.update("x");
        let bytes = sketch.serialize();

        let view = WrappedThetaSketch::wrap(&bytes).unwrap();
        let err = view.update_hash(123).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ReadOnly);
    }

    #[test]
    fn test_wrap_rejects_corrupt_count() {
        let mut sketch = ThetaSketch::builder().build().unwrap();
        sketch.update("x");
        let mut bytes = sketch.serialize();
        bytes[8] = bytes[8].wrapping_add(1); // retained count

        let err = WrappedThetaSketch::wrap(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidFormat);
    }
}
