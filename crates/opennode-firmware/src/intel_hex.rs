//! Intel HEX image
//!
//! Records are decoded by [`ihex::Reader`], which also checks their
//! checksums. This module lays the data records out into a sparse
//! address → byte map. Start address records are ignored.

use std::collections::BTreeMap;

use ihex::{Reader, Record};
use thiserror::Error;

/// Errors while reading an Intel HEX file
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("record {record}: {reason}")]
    Record { record: usize, reason: String },

    #[error("record {record}: address 0x{address:08X} written twice")]
    Overlap { record: usize, address: u32 },
}

/// Sparse memory image read from Intel HEX
#[derive(Debug, Clone, Default)]
pub struct IntelHex {
    memory: BTreeMap<u32, u8>,
}

impl IntelHex {
    pub fn parse(text: &str) -> Result<Self, HexError> {
        let mut memory = BTreeMap::new();
        let mut base: u32 = 0;

        for (idx, record) in Reader::new(text).enumerate() {
            let index = idx + 1;
            let record = record.map_err(|e| HexError::Record {
                record: index,
                reason: e.to_string(),
            })?;

            match record {
                Record::Data { offset, value } => {
                    for (i, byte) in value.into_iter().enumerate() {
                        let address = base.wrapping_add(offset as u32 + i as u32);
                        if memory.insert(address, byte).is_some() {
                            return Err(HexError::Overlap {
                                record: index,
                                address,
                            });
                        }
                    }
                }
                Record::EndOfFile => break,
                Record::ExtendedSegmentAddress(segment) => base = (segment as u32) << 4,
                Record::ExtendedLinearAddress(upper) => base = (upper as u32) << 16,
                Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
            }
        }

        Ok(Self { memory })
    }

    /// Contiguous copy of `[start, start + size)`, gaps filled with `pad`
    pub fn to_bin_array(&self, start: u32, size: usize, pad: u8) -> Vec<u8> {
        (0..size as u32)
            .map(|i| {
                self.memory
                    .get(&start.wrapping_add(i))
                    .copied()
                    .unwrap_or(pad)
            })
            .collect()
    }
}
