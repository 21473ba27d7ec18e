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

use googletest::assert_that;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use thetasketch::common::NumStdDev;
use thetasketch::theta::MAX_THETA;
use thetasketch::theta::ThetaSketch;

#[test]
fn test_basic_update() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);

    sketch.update("value1");
    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 1.0);

    sketch.update("value2");
    assert_eq!(sketch.estimate(), 2.0);
}

#[test]
fn test_update_various_types() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();

    sketch.update("string");
    sketch.update(42i64);
    sketch.update(42u64);
    sketch.update_f64(3.15);
    sketch.update_f64(3.15);
    sketch.update_f32(3.15);
    sketch.update_f32(3.15);
    sketch.update([1u8, 2, 3]);

    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 5.0);
}

#[test]
fn test_duplicate_updates() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();

    for _ in 0..100 {
        sketch.update("same_value");
    }

    assert_eq!(sketch.estimate(), 1.0);
}

#[test]
fn test_exact_mode_at_nominal_capacity() {
    // k distinct values stay exact: nothing forces theta down yet.
    let mut sketch = ThetaSketch::builder().nominal_entries(512).build().unwrap();
    for i in 0..512u64 {
        sketch.update(i);
    }

    assert_eq!(sketch.estimate(), 512.0);
    assert_eq!(sketch.num_retained(), 512);
    assert_eq!(sketch.theta64(), MAX_THETA);
    assert!(!sketch.is_empty());
}

#[test]
fn test_estimation_mode_past_capacity() {
    let mut sketch = ThetaSketch::builder().nominal_entries(512).build().unwrap();
    for i in 0..1024u64 {
        sketch.update(i);
    }

    assert!(sketch.is_estimation_mode());
    assert!(sketch.theta64() < MAX_THETA);
    assert!(sketch.num_retained() >= 512);
    assert_that!(sketch.estimate(), ge(512.0 * 0.95));
    assert_that!(sketch.estimate(), le(512.0 * 2.0 * 1.05));
}

#[test]
fn test_estimate_is_monotone_over_updates() {
    let mut sketch = ThetaSketch::builder().lg_k(5).build().unwrap();
    let mut last = 0.0;
    for i in 0..5000u64 {
        sketch.update(i);
        let now = sketch.estimate();
        assert!(
            now >= last,
            "estimate dropped from {last} to {now} after update {i}"
        );
        last = now;
    }
}

#[test]
fn test_rebuild_caps_retained_at_k() {
    let mut sketch = ThetaSketch::builder().lg_k(5).build().unwrap();

    for i in 0..1000 {
        sketch.update(format!("value_{i}"));
    }

    let before = sketch.num_retained();
    assert!(before > 32);

    sketch.rebuild();
    assert_eq!(sketch.num_retained(), 32);
    assert!(sketch.iter().all(|h| 0 < h && h < sketch.theta64()));
}

#[test]
fn test_reset() {
    let mut sketch = ThetaSketch::builder().lg_k(5).build().unwrap();

    for i in 0..1000 {
        sketch.update(format!("value_{i}"));
    }
    assert!(!sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert!(sketch.num_retained() > 32);

    sketch.reset();
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.theta(), 1.0);
    assert_eq!(sketch.num_retained(), 0);
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
}

#[test]
fn test_iterator() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();

    sketch.update("value1");
    sketch.update("value2");
    sketch.update("value3");

    let count: usize = sketch.iter().count();
    assert_eq!(count, sketch.num_retained());
}

#[test]
fn test_bounds_empty_sketch() {
    let sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    assert!(sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.theta(), 1.0);
    assert_eq!(sketch.estimate(), 0.0);
    for sigma in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert_eq!(sketch.lower_bound(sigma), 0.0);
        assert_eq!(sketch.upper_bound(sigma), 0.0);
    }
}

#[test]
fn test_bounds_exact_mode() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    for i in 0..2000 {
        sketch.update(i);
    }
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.estimate(), 2000.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 2000.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 2000.0);
}

#[test]
fn test_bounds_estimation_mode() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    let n = 10000;
    for i in 0..n {
        sketch.update(i);
    }
    assert!(sketch.is_estimation_mode());

    let estimate = sketch.estimate();
    let lower_bound_1 = sketch.lower_bound(NumStdDev::One);
    let upper_bound_1 = sketch.upper_bound(NumStdDev::One);
    let lower_bound_2 = sketch.lower_bound(NumStdDev::Two);
    let upper_bound_2 = sketch.upper_bound(NumStdDev::Two);
    let lower_bound_3 = sketch.lower_bound(NumStdDev::Three);
    let upper_bound_3 = sketch.upper_bound(NumStdDev::Three);

    assert_that!(estimate, near(n as f64, n as f64 * 0.02));

    assert!(lower_bound_1 < estimate);
    assert!(estimate < upper_bound_1);
    assert!(lower_bound_2 < estimate);
    assert!(estimate < upper_bound_2);
    assert!(lower_bound_3 < estimate);
    assert!(estimate < upper_bound_3);

    // Wider confidence intervals are indeed wider
    assert!(lower_bound_3 < lower_bound_2);
    assert!(lower_bound_2 < lower_bound_1);
    assert!(upper_bound_1 < upper_bound_2);
    assert!(upper_bound_2 < upper_bound_3);
}

#[test]
fn test_bounds_with_sampling() {
    let mut sketch = ThetaSketch::builder()
        .lg_k(12)
        .sampling_probability(0.5)
        .build()
        .unwrap();

    for i in 0..1000 {
        sketch.update(i);
    }

    assert!(!sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert!(sketch.theta() < 1.0);

    let estimate = sketch.estimate();
    assert_that!(estimate, ge(sketch.lower_bound(NumStdDev::Two)));
    assert_that!(estimate, le(sketch.upper_bound(NumStdDev::Two)));
}

#[test]
fn test_sampling_screens_high_hash() {
    let mut sketch = ThetaSketch::builder()
        .sampling_probability(0.5)
        .build()
        .unwrap();
    assert!(sketch.is_estimation_mode());
    let theta = sketch.theta64();

    // A raw hash just above the p-derived theta is screened, yet the
    // attempt itself makes the sketch non-empty.
    assert!(!sketch.update_hash(theta + 1).unwrap());
    assert_eq!(sketch.num_retained(), 0);
    assert!(!sketch.is_empty());
    assert!(sketch.theta64() < MAX_THETA);

    // The compact snapshot collapses to the canonical 8-byte empty form.
    let compact = sketch.compact(true);
    assert!(compact.is_empty());
    assert_eq!(compact.theta64(), MAX_THETA);
    assert_eq!(compact.serialize().len(), 8);
}

#[test]
fn test_empty_with_sampling_stays_estimation() {
    let sketch = ThetaSketch::builder()
        .lg_k(12)
        .sampling_probability(0.1)
        .build()
        .unwrap();

    // Empty but theta < 1: bounds still report zero.
    assert!(sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
}

#[test]
fn test_update_hash_matches_internal_hashing() {
    // Pre-hashed values behave exactly like hashed input values.
    let mut hashed = ThetaSketch::builder().build().unwrap();
    let mut raw = ThetaSketch::builder().build().unwrap();

    for i in 0..100u64 {
        hashed.update(i);
    }
    let mut hashes: Vec<u64> = hashed.iter().collect();
    hashes.sort_unstable();
    for &h in &hashes {
        raw.update_hash(h).unwrap();
    }

    assert_eq!(raw.estimate(), hashed.estimate());
    assert_eq!(raw.num_retained(), hashed.num_retained());
}
