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

//! Serialization tests for the theta sketch wire format.

use thetasketch::error::ErrorKind;
use thetasketch::theta::CompactThetaSketch;
use thetasketch::theta::ThetaSketch;
use thetasketch::theta::WrappedCompactThetaSketch;
use thetasketch::theta::WrappedThetaSketch;

#[test]
fn test_compact_empty_image_layout() {
    let sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    let bytes = sketch.compact(true).serialize();

    // Empty sketch is one preamble long
    assert_eq!(bytes.len(), 8);
    assert_eq!(bytes[0] & 0x3F, 1, "PreLongs should be 1 for empty");
    assert_eq!(bytes[1], 3, "SerVer should be 3");
    assert_eq!(bytes[2], 3, "FamilyID should be 3 (Compact)");
    assert_ne!(bytes[5] & 0x04, 0, "EMPTY flag should be set");

    let restored = CompactThetaSketch::deserialize(&bytes).unwrap();
    assert!(restored.is_empty());
    assert_eq!(restored.estimate(), 0.0);
}

#[test]
fn test_compact_single_item_image_layout() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    sketch.update("apple");

    let bytes = sketch.compact(true).serialize();

    // One preamble long plus one hash
    assert_eq!(bytes.len(), 16);
    assert_eq!(bytes[0] & 0x3F, 1);
    assert_ne!(bytes[5] & 0x20, 0, "SINGLE_ITEM flag should be set");

    let restored = CompactThetaSketch::deserialize(&bytes).unwrap();
    assert!(!restored.is_empty());
    assert_eq!(restored.estimate(), 1.0);
    assert_eq!(restored.num_retained(), 1);
}

#[test]
fn test_compact_exact_mode_image_layout() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    for i in 0..100 {
        sketch.update(format!("item_{i}"));
    }
    assert!(!sketch.is_estimation_mode());

    let bytes = sketch.compact(true).serialize();
    assert_eq!(bytes.len(), 16 + 100 * 8);
    assert_eq!(bytes[0] & 0x3F, 2, "PreLongs should be 2 for exact mode");

    let restored = CompactThetaSketch::deserialize(&bytes).unwrap();
    assert_eq!(restored.estimate(), sketch.estimate());
    assert_eq!(restored.num_retained(), sketch.num_retained());
    assert!(!restored.is_estimation_mode());
}

#[test]
fn test_compact_estimation_mode_image_layout() {
    let mut sketch = ThetaSketch::builder().lg_k(10).build().unwrap();
    for i in 0..10000 {
        sketch.update(i);
    }
    assert!(sketch.is_estimation_mode());

    let bytes = sketch.compact(true).serialize();
    let num_entries = sketch.num_retained();
    assert_eq!(bytes.len(), 24 + num_entries * 8);
    assert_eq!(bytes[0] & 0x3F, 3, "PreLongs should be 3 for estimation");

    let restored = CompactThetaSketch::deserialize(&bytes).unwrap();
    assert_eq!(restored.num_retained(), num_entries);
    assert_eq!(restored.theta64(), sketch.theta64());
    assert!(restored.is_estimation_mode());
}

#[test]
fn test_compact_entries_are_sorted() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build().unwrap();
    for i in 0..10 {
        sketch.update(i);
    }

    let bytes = sketch.compact(true).serialize();

    // Hash entries start after the 16-byte exact-mode preamble
    let mut entries: Vec<u64> = Vec::new();
    let mut offset = 16;
    while offset + 8 <= bytes.len() {
        entries.push(u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()));
        offset += 8;
    }

    let mut sorted = entries.clone();
    sorted.sort_unstable();
    assert_eq!(entries, sorted, "Serialized entries should be sorted");
}

#[test]
fn test_updatable_image_layout_and_round_trip() {
    let mut sketch = ThetaSketch::builder().lg_k(10).build().unwrap();
    for i in 0..700u64 {
        sketch.update(i);
    }

    let bytes = sketch.serialize();

    assert_eq!(bytes[0] & 0x3F, 3, "updatable preamble is 3 longs");
    assert_eq!(bytes[1], 3, "SerVer should be 3");
    assert_eq!(bytes[2], 2, "FamilyID should be 2 (QuickSelect)");
    assert_eq!(bytes[3], 10, "lg_nom");
    let lg_arr = bytes[4];
    assert_eq!(bytes.len(), 24 + (1 << lg_arr) * 8);

    let restored = ThetaSketch::deserialize(&bytes).unwrap();
    assert_eq!(restored.lg_k(), sketch.lg_k());
    assert_eq!(restored.estimate(), sketch.estimate());
    assert_eq!(restored.num_retained(), sketch.num_retained());
    assert_eq!(restored.theta64(), sketch.theta64());

    let mut a: Vec<u64> = sketch.iter().collect();
    let mut b: Vec<u64> = restored.iter().collect();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
}

#[test]
fn test_updatable_image_stays_updatable() {
    let mut sketch = ThetaSketch::builder().lg_k(10).build().unwrap();
    for i in 0..100u64 {
        sketch.update(i);
    }

    let mut restored = ThetaSketch::deserialize(&sketch.serialize()).unwrap();
    for i in 100..200u64 {
        restored.update(i);
    }
    assert_eq!(restored.estimate(), 200.0);
}

#[test]
fn test_updatable_round_trip_various_lg_k() {
    for lg_k in [4, 5, 8, 10, 12, 14, 16] {
        let mut sketch = ThetaSketch::builder().lg_k(lg_k).build().unwrap();
        for i in 0..500 {
            sketch.update(format!("lg_k_{lg_k}_item_{i}"));
        }

        let restored = ThetaSketch::deserialize(&sketch.serialize()).unwrap();

        assert_eq!(restored.lg_k(), lg_k, "lg_k mismatch for lg_k={lg_k}");
        assert_eq!(
            restored.estimate(),
            sketch.estimate(),
            "estimate mismatch for lg_k={lg_k}"
        );
        assert_eq!(
            restored.num_retained(),
            sketch.num_retained(),
            "retained mismatch for lg_k={lg_k}"
        );
    }
}

#[test]
fn test_updatable_empty_round_trip() {
    let sketch = ThetaSketch::builder().lg_k(9).build().unwrap();
    let restored = ThetaSketch::deserialize(&sketch.serialize()).unwrap();
    assert!(restored.is_empty());
    assert_eq!(restored.lg_k(), 9);
    assert_eq!(restored.estimate(), 0.0);
}

#[test]
fn test_updatable_sampling_round_trip() {
    let mut sketch = ThetaSketch::builder()
        .sampling_probability(0.25)
        .build()
        .unwrap();
    for i in 0..1000u64 {
        sketch.update(i);
    }

    let restored = ThetaSketch::deserialize(&sketch.serialize()).unwrap();
    assert_eq!(restored.theta64(), sketch.theta64());
    assert_eq!(restored.num_retained(), sketch.num_retained());
    assert!(!restored.is_empty());
}

#[test]
fn test_compact_unordered_round_trip() {
    let mut sketch = ThetaSketch::builder().build().unwrap();
    for i in 0..50u64 {
        sketch.update(i);
    }
    let compact = sketch.compact(false);
    assert!(!compact.is_ordered());

    let restored = CompactThetaSketch::deserialize(&compact.serialize()).unwrap();
    assert!(!restored.is_ordered());
    assert_eq!(restored.estimate(), compact.estimate());
    assert_eq!(
        restored.iter().collect::<Vec<_>>(),
        compact.iter().collect::<Vec<_>>()
    );
}

#[test]
fn test_compact_into_writes_same_bytes() {
    let mut sketch = ThetaSketch::builder().build().unwrap();
    for i in 0..100u64 {
        sketch.update(i);
    }

    let expected = sketch.compact(true).serialize();
    let mut dst = vec![0u8; expected.len() + 32];
    let written = sketch.compact_into(true, &mut dst).unwrap();
    assert_eq!(written, expected.len());
    assert_eq!(&dst[..written], &expected[..]);

    let mut too_small = vec![0u8; expected.len() - 1];
    let err = sketch.compact_into(true, &mut too_small).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_deserialize_invalid_data() {
    // Too short
    assert!(ThetaSketch::deserialize(&[1, 2, 3]).is_err());
    assert!(CompactThetaSketch::deserialize(&[1, 2, 3]).is_err());

    // Wrong family for the reader
    let bad_family = vec![3, 3, 99, 12, 11, 0, 0, 0];
    assert!(ThetaSketch::deserialize(&bad_family).is_err());

    // Compact reader refuses updatable images and vice versa
    let mut sketch = ThetaSketch::builder().build().unwrap();
    sketch.update("x");
    assert!(CompactThetaSketch::deserialize(&sketch.serialize()).is_err());
    assert!(ThetaSketch::deserialize(&sketch.compact(true).serialize()).is_err());
}

#[test]
fn test_deserialize_with_custom_seed() {
    let custom_seed = 12345u64;
    let mut sketch = ThetaSketch::builder()
        .lg_k(10)
        .seed(custom_seed)
        .build()
        .unwrap();
    sketch.update("test");

    let bytes = sketch.serialize();

    let err = ThetaSketch::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);

    let restored = ThetaSketch::deserialize_with_seed(&bytes, custom_seed).unwrap();
    assert_eq!(restored.estimate(), sketch.estimate());

    let compact_bytes = sketch.compact(true).serialize();
    let err = CompactThetaSketch::deserialize(&compact_bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeedMismatch);
    let restored =
        CompactThetaSketch::deserialize_with_seed(&compact_bytes, custom_seed).unwrap();
    assert_eq!(restored.estimate(), sketch.estimate());
}

#[test]
fn test_wrapped_views_match_deserialized() {
    let mut sketch = ThetaSketch::builder().lg_k(6).build().unwrap();
    for i in 0..1000u64 {
        sketch.update(i);
    }

    let compact_bytes = sketch.compact(true).serialize();
    let compact = CompactThetaSketch::deserialize(&compact_bytes).unwrap();
    let view = WrappedCompactThetaSketch::wrap(&compact_bytes).unwrap();
    assert_eq!(view.estimate(), compact.estimate());

    let updatable_bytes = sketch.serialize();
    let view = WrappedThetaSketch::wrap(&updatable_bytes).unwrap();
    assert_eq!(view.estimate(), sketch.estimate());
}

#[test]
fn test_legacy_serial_version_is_unsupported() {
    let mut sketch = ThetaSketch::builder().build().unwrap();
    sketch.update("x");
    let mut bytes = sketch.compact(true).serialize();
    bytes[1] = 1; // ser_ver 1

    let err = CompactThetaSketch::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}
