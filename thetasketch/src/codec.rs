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

//! Byte cursors and the family registry for the serialized sketch formats.
//!
//! All multi-byte fields on the wire are little-endian.

use std::io;
use std::io::Cursor;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::Error;

/// Defines the families of sketch and set operation classes.
///
/// A family defines a set of classes that share fundamental algorithms and
/// behaviors. The classes within a family may still differ by how they are
/// stored and accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Family {
    /// The byte ID for this family.
    pub id: u8,
    /// The name for this family.
    pub name: &'static str,
    /// The minimum preamble size for this family in longs (8-byte integers).
    pub min_pre_longs: u8,
    /// The maximum preamble size for this family in longs (8-byte integers).
    pub max_pre_longs: u8,
}

impl Family {
    /// The Alpha updatable sketch family. Recognised by the registry but not
    /// buildable by this library.
    pub const ALPHA: Family = Family {
        id: 1,
        name: "ALPHA",
        min_pre_longs: 3,
        max_pre_longs: 3,
    };

    /// The QuickSelect updatable sketch family.
    pub const QUICKSELECT: Family = Family {
        id: 2,
        name: "QUICKSELECT",
        min_pre_longs: 3,
        max_pre_longs: 3,
    };

    /// The compact read-only sketch family.
    pub const COMPACT: Family = Family {
        id: 3,
        name: "COMPACT",
        min_pre_longs: 1,
        max_pre_longs: 3,
    };

    /// The Union set operation family.
    pub const UNION: Family = Family {
        id: 4,
        name: "UNION",
        min_pre_longs: 3,
        max_pre_longs: 3,
    };

    /// The Intersection set operation family.
    pub const INTERSECTION: Family = Family {
        id: 5,
        name: "INTERSECTION",
        min_pre_longs: 3,
        max_pre_longs: 3,
    };

    /// The A-not-B set operation family.
    pub const A_NOT_B: Family = Family {
        id: 6,
        name: "A_NOT_B",
        min_pre_longs: 3,
        max_pre_longs: 3,
    };
}

impl Family {
    pub fn validate_id(&self, family_id: u8) -> Result<(), Error> {
        if family_id != self.id {
            Err(Error::invalid_family(self.id, family_id, self.name))
        } else {
            Ok(())
        }
    }

    pub fn validate_pre_longs(&self, pre_longs: u8) -> Result<(), Error> {
        if !(self.min_pre_longs..=self.max_pre_longs).contains(&pre_longs) {
            Err(Error::invalid_format(format!(
                "invalid preamble longs for family {}: expected [{}, {}], got {pre_longs}",
                self.name, self.min_pre_longs, self.max_pre_longs
            )))
        } else {
            Ok(())
        }
    }
}

/// Write cursor over a growable byte buffer.
pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    pub fn write_u16_le(&mut self, n: u16) {
        // Writes to Vec<u8> cannot fail.
        self.bytes.write_u16::<LittleEndian>(n).unwrap();
    }

    pub fn write_u32_le(&mut self, n: u32) {
        self.bytes.write_u32::<LittleEndian>(n).unwrap();
    }

    pub fn write_u64_le(&mut self, n: u64) {
        self.bytes.write_u64::<LittleEndian>(n).unwrap();
    }

    pub fn write_f32_le(&mut self, n: f32) {
        self.bytes.write_f32::<LittleEndian>(n).unwrap();
    }
}

/// Read cursor over a borrowed byte slice.
pub(crate) struct SketchSlice<'a> {
    slice: Cursor<&'a [u8]>,
}

impl SketchSlice<'_> {
    pub fn new(slice: &[u8]) -> SketchSlice<'_> {
        SketchSlice {
            slice: Cursor::new(slice),
        }
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        self.slice.read_u8()
    }

    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        self.slice.read_u16::<LittleEndian>()
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        self.slice.read_u32::<LittleEndian>()
    }

    pub fn read_u64_le(&mut self) -> io::Result<u64> {
        self.slice.read_u64::<LittleEndian>()
    }

    pub fn read_f32_le(&mut self) -> io::Result<f32> {
        self.slice.read_f32::<LittleEndian>()
    }
}
