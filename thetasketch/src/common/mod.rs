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

//! Shared types used across sketch families.

pub mod binomial_bounds;

use std::fmt;
use std::sync::Arc;

/// Growth multiplier for the updatable sketch's probing table.
///
/// The table starts small and is multiplied by this factor each time it
/// fills past the resize threshold, until it reaches its maximum size. The
/// two-bit lg encoding is what the serialized preamble stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeFactor {
    /// Never grow; the table starts at its final size.
    X1,
    /// Double on each resize.
    X2,
    /// Quadruple on each resize.
    X4,
    /// Grow eightfold on each resize.
    X8,
}

impl ResizeFactor {
    /// Log2 of the multiplier.
    pub fn lg_value(self) -> u8 {
        match self {
            ResizeFactor::X1 => 0,
            ResizeFactor::X2 => 1,
            ResizeFactor::X4 => 2,
            ResizeFactor::X8 => 3,
        }
    }

    /// Decodes the two-bit preamble encoding.
    pub fn from_lg(lg: u8) -> Option<ResizeFactor> {
        match lg {
            0 => Some(ResizeFactor::X1),
            1 => Some(ResizeFactor::X2),
            2 => Some(ResizeFactor::X4),
            3 => Some(ResizeFactor::X8),
            _ => None,
        }
    }
}

/// Number of standard deviations for confidence bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumStdDev {
    /// One standard deviation, roughly 68% confidence.
    One,
    /// Two standard deviations, roughly 95% confidence.
    Two,
    /// Three standard deviations, roughly 99.7% confidence.
    Three,
}

impl NumStdDev {
    /// The numeric sigma value.
    pub fn value(self) -> u8 {
        match self {
            NumStdDev::One => 1,
            NumStdDev::Two => 2,
            NumStdDev::Three => 3,
        }
    }
}

/// Canonicalize a double value so distinct bit patterns of the same number
/// hash identically (Java compatibility).
pub fn canonical_double(value: f64) -> i64 {
    if value.is_nan() {
        // Java's Double.doubleToLongBits() NaN value
        0x7ff8000000000000i64
    } else {
        // -0.0 + 0.0 == +0.0 under IEEE754 roundTiesToEven rounding mode,
        // which Rust guarantees. Thus, by adding a positive zero we
        // canonicalize signed zero without any branches in one instruction.
        (value + 0.0).to_bits() as i64
    }
}

/// Allocator callback consulted whenever an updatable sketch's table grows.
///
/// The sketch owns whatever buffer the server hands back. Implementations
/// can pool or account for allocations; the default simply allocates zeroed
/// heap memory.
pub trait MemoryRequestServer: fmt::Debug + Send + Sync {
    /// Returns a zeroed buffer with room for `num_longs` 8-byte slots.
    fn request_long_array(&self, num_longs: usize) -> Vec<u64>;
}

/// Shared handle to a [`MemoryRequestServer`].
pub type MemoryRequestServerRef = Arc<dyn MemoryRequestServer>;

/// The default allocator: plain zeroed heap buffers.
#[derive(Debug, Default)]
pub struct DefaultMemoryRequestServer;

impl MemoryRequestServer for DefaultMemoryRequestServer {
    fn request_long_array(&self, num_longs: usize) -> Vec<u64> {
        vec![0u64; num_longs]
    }
}

/// Returns the default allocator handle.
pub(crate) fn default_memory_request_server() -> MemoryRequestServerRef {
    Arc::new(DefaultMemoryRequestServer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_factor_round_trip() {
        for rf in [
            ResizeFactor::X1,
            ResizeFactor::X2,
            ResizeFactor::X4,
            ResizeFactor::X8,
        ] {
            assert_eq!(ResizeFactor::from_lg(rf.lg_value()), Some(rf));
        }
        assert_eq!(ResizeFactor::from_lg(4), None);
    }

    #[test]
    fn test_canonical_double_zeroes_and_nan() {
        assert_eq!(canonical_double(0.0), canonical_double(-0.0));
        assert_eq!(canonical_double(f64::NAN), 0x7ff8000000000000i64);
        assert_ne!(canonical_double(1.0), canonical_double(2.0));
    }

    #[test]
    fn test_default_memory_request_server_zeroes() {
        let server = DefaultMemoryRequestServer;
        let buf = server.request_long_array(64);
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|&v| v == 0));
    }
}
