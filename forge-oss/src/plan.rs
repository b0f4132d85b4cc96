//! Arithmetic for splitting a file into parts and grouping the parts into signed URL batches.
use crate::Result;
use snafu::ensure;
use std::ops::RangeInclusive;

/// The most signed upload URLs the storage gateway will return from one request.
///
/// This is fixed by the service and is not configurable.
pub const MAX_PARTS_PER_REQUEST: u32 = 25;

/// How a file of a particular size is divided into parts and batches.
///
/// Parts are numbered from 1.  Every part is `chunk_size` bytes except the last, which holds
/// whatever is left over.  An empty file is still uploaded as a single (empty) part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_parts: u32,
    total_batches: u32,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self> {
        ensure!(
            chunk_size > 0,
            crate::error::InvalidConfigSnafu {
                message: "the chunk size must be greater than zero".to_string(),
            }
        );

        let total_parts = if file_size == 0 {
            1
        } else {
            file_size.div_ceil(chunk_size)
        };
        let total_parts = u32::try_from(total_parts).map_err(|_| {
            crate::error::TooManyPartsSnafu {
                file_size,
                chunk_size,
            }
            .build()
        })?;
        let total_batches = total_parts.div_ceil(MAX_PARTS_PER_REQUEST);

        Ok(Self {
            file_size,
            chunk_size,
            total_parts,
            total_batches,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    pub fn total_batches(&self) -> u32 {
        self.total_batches
    }

    /// The batch with the given zero-based index, or `None` if it's past the last batch
    pub fn batch(&self, index: u32) -> Option<Batch> {
        if index >= self.total_batches {
            return None;
        }

        let first_part = index * MAX_PARTS_PER_REQUEST + 1;
        let part_count = MAX_PARTS_PER_REQUEST.min(self.total_parts - index * MAX_PARTS_PER_REQUEST);

        Some(Batch {
            index,
            first_part,
            part_count,
        })
    }

    /// All batches in upload order
    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        (0..self.total_batches).filter_map(move |index| self.batch(index))
    }

    /// The number of bytes in the given (1-based) part
    ///
    /// # Panics
    ///
    /// Panics if `part_number` isn't a part of this plan
    pub fn part_len(&self, part_number: u32) -> u64 {
        assert!(
            (1..=self.total_parts).contains(&part_number),
            "BUG: part {part_number} is outside of the plan's {} parts",
            self.total_parts
        );

        let offset = (part_number as u64 - 1) * self.chunk_size;
        (self.file_size - offset).min(self.chunk_size)
    }
}

/// A run of consecutive parts whose signed URLs are requested together
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based index of this batch
    pub index: u32,

    /// The 1-based number of the first part in the batch
    pub first_part: u32,

    /// How many parts are in the batch.  Never more than [`MAX_PARTS_PER_REQUEST`]
    pub part_count: u32,
}

impl Batch {
    pub fn last_part(&self) -> u32 {
        self.first_part + self.part_count - 1
    }

    pub fn parts(&self) -> RangeInclusive<u32> {
        self.first_part..=self.last_part()
    }
}
