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

use std::hash::Hasher;

/// Streaming MurmurHash3 x64-128 hasher.
///
/// Wraps the `mur3` implementation behind the std [`Hasher`] interface so
/// any `T: Hash` value can be fed to a sketch. `finish()` returns the first
/// 64 bits of the digest; [`finish128`](Self::finish128) exposes both halves.
pub struct MurmurHash3X64128 {
    inner: mur3::Hasher128,
}

impl MurmurHash3X64128 {
    /// Creates a hasher seeded with the sketch update seed.
    ///
    /// `mur3` takes a 32-bit seed; the update seed is truncated. All sketches
    /// built from the same 64-bit seed truncate identically, and the full
    /// seed still distinguishes sketches through the 16-bit seed hash.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: mur3::Hasher128::with_seed(seed as u32),
        }
    }

    /// Returns both 64-bit halves of the 128-bit digest.
    pub fn finish128(&self) -> (u64, u64) {
        self.inner.finish128()
    }
}

impl Hasher for MurmurHash3X64128 {
    fn finish(&self) -> u64 {
        self.finish128().0
    }

    fn write(&mut self, bytes: &[u8]) {
        self.inner.write(bytes);
    }
}
