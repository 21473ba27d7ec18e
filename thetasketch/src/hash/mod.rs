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

//! Hashing support for theta sketches.
//!
//! Sketch updates hash arbitrary input through MurmurHash3 x64-128 seeded
//! with the sketch seed. Only the first 64 bits of the digest are used, and
//! the high bit is cleared so hash values fit the `(0, 2^63)` domain.

mod murmur;

pub use self::murmur::MurmurHash3X64128;

use crate::error::Error;

/// The seed used by default to hash input values.
///
/// Sketches built with different seeds cannot be combined; the seed hash
/// stored in every serialized image guards against it.
pub const DEFAULT_UPDATE_SEED: u64 = 9001;

/// Computes the 16-bit hash of an update seed.
///
/// The seed itself never leaves the process; only this tag is serialized and
/// compared when sketches interact. A seed whose tag is zero is rejected at
/// build time so that zero can mark "no seed hash" in legacy images.
pub fn compute_seed_hash(seed: u64) -> u16 {
    let (h1, _) = mur3::murmurhash3_x64_128(&seed.to_le_bytes(), 0);
    h1 as u16
}

/// Verifies that two seed hashes match, returning the common value.
pub(crate) fn check_seed_hashes(expected: u16, actual: u16) -> Result<u16, Error> {
    if expected != actual {
        return Err(Error::seed_mismatch(expected, actual));
    }
    Ok(expected)
}
