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

//! Theta sketches: probabilistic distinct counting with set operations.
//!
//! A Theta sketch keeps a uniform sample of the hashes it has seen, below an
//! adaptive threshold theta. From the retained hashes and theta it estimates
//! the number of distinct inputs, and because the samples from two sketches
//! are comparable, sketches can be combined with union, intersection and
//! set-difference operators without touching the raw data again.
//!
//! The crate provides:
//! - [`theta::ThetaSketch`] — the updatable QuickSelect sketch;
//! - [`theta::CompactThetaSketch`] — the immutable, serializable form;
//! - [`theta::ThetaUnion`], [`theta::ThetaIntersection`],
//!   [`theta::ThetaAnotB`] — the set operators;
//! - [`theta::ConcurrentThetaSketch`] — a shared sketch fed by per-thread
//!   buffers through a background propagation pool.
//!
//! The binary format is the little-endian serialization version 3 layout,
//! interoperable across implementations that speak it.
//!
//! # Usage
//!
//! ```rust
//! # use thetasketch::theta::ThetaSketch;
//! let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
//! sketch.update("apple");
//! sketch.update("banana");
//! assert_eq!(sketch.estimate(), 2.0);
//! ```

pub mod codec;
pub mod common;
pub mod error;
pub mod hash;
pub mod theta;
