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

//! Theta sketches for distinct counting with set operations.
//!
//! The updatable [`ThetaSketch`] accepts a stream of values, keeps the
//! hashes below an adaptive threshold theta, and estimates the distinct
//! count as `retained / theta`. [`CompactThetaSketch`] is its immutable,
//! serializable snapshot. [`ThetaUnion`], [`ThetaIntersection`] and
//! [`ThetaAnotB`] combine any mix of sketch forms; they consume the
//! [`ThetaSketchView`] capability rather than concrete types.
//!
//! The concurrent variant pairs a shared sketch with per-thread buffers:
//! see [`ConcurrentThetaSketch`].
//!
//! # Usage
//!
//! ```rust
//! # use thetasketch::theta::ThetaSketch;
//! # use thetasketch::theta::ThetaUnion;
//! let mut a = ThetaSketch::builder().build().unwrap();
//! let mut b = ThetaSketch::builder().build().unwrap();
//! a.update("apple");
//! b.update("banana");
//!
//! let mut union = ThetaUnion::builder().build().unwrap();
//! union.union(&a).unwrap();
//! union.union(&b).unwrap();
//! assert_eq!(union.result().estimate(), 2.0);
//! ```

mod a_not_b;
mod compact;
mod concurrent;
mod hash_table;
mod intersection;
mod serialization;
mod sketch;
mod union;
mod wrapped;

pub use self::a_not_b::ThetaAnotB;
pub use self::a_not_b::a_not_b;
pub use self::compact::CompactThetaSketch;
pub use self::concurrent::ConcurrentThetaBuilder;
pub use self::concurrent::ConcurrentThetaLocal;
pub use self::concurrent::ConcurrentThetaSketch;
pub use self::hash_table::DEFAULT_LG_K;
pub use self::hash_table::MAX_LG_K;
pub use self::hash_table::MAX_THETA;
pub use self::hash_table::MIN_LG_K;
pub use self::intersection::ThetaIntersection;
pub use self::intersection::intersection_of;
pub use self::sketch::SketchFamily;
pub use self::sketch::ThetaSketch;
pub use self::sketch::ThetaSketchBuilder;
pub use self::union::ThetaUnion;
pub use self::union::ThetaUnionBuilder;
pub use self::union::pair_union;
pub use self::wrapped::WrappedCompactThetaSketch;
pub use self::wrapped::WrappedThetaSketch;

/// Read capability every sketch form grants to the set operators.
///
/// Operators only need the threshold, the retained hashes and the identity
/// flags; they never care whether the hashes live in a probing table, a
/// sorted array, or a borrowed byte buffer.
pub trait ThetaSketchView {
    /// Current theta threshold as u64.
    fn theta64(&self) -> u64;

    /// Whether the source set is known to be empty.
    fn is_empty(&self) -> bool;

    /// Whether [`iter`](Self::iter) yields hashes in ascending order.
    fn is_ordered(&self) -> bool;

    /// Number of retained hashes.
    fn num_retained(&self) -> usize;

    /// The 16-bit tag of the seed the hashes were computed with.
    fn seed_hash(&self) -> u16;

    /// Iterates the retained hashes.
    fn iter(&self) -> impl Iterator<Item = u64> + '_;
}
