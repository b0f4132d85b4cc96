//! Reads the source data as a forward-only sequence of [`Chunk`]s, one per part.
//!
//! Each chunk is filled up to the chunk size before it's yielded, even if the underlying reader
//! returns short reads, so only the final chunk can be smaller than the chunk size.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub(crate) struct Chunk {
    /// The part number of the chunk starting from 1.
    pub part_number: u32,

    /// The contents of this chunk
    pub data: Bytes,
}

pub(crate) struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    next_part_number: u32,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub(crate) fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size,
            next_part_number: 1,
        }
    }

    /// Read the next chunk.
    ///
    /// At EOF this yields an empty chunk rather than an error; it's up to the caller to decide
    /// if that's expected (the single part of an empty file) or not.
    pub(crate) async fn next_chunk(&mut self) -> std::io::Result<Chunk> {
        let mut buffer = BytesMut::with_capacity(self.chunk_size);

        // Read until the buffer is full, or until a 0 byte read indicates that this is the end
        // of the data
        while buffer.len() < self.chunk_size {
            // `read_buf` will happily grow the buffer past `chunk_size`, so limit the read
            let mut limited = (&mut self.reader).take((self.chunk_size - buffer.len()) as u64);
            let bytes_read = limited.read_buf(&mut buffer).await?;

            if bytes_read == 0 {
                // EOF.  Whatever we've read in `buffer` up to this point will be the final
                // chunk
                break;
            }
        }

        let chunk = Chunk {
            part_number: self.next_part_number,
            data: buffer.freeze(),
        };
        self.next_part_number += 1;

        Ok(chunk)
    }

    /// Check that there is nothing left to read.
    ///
    /// Returns the number of bytes found past the point where the data should have ended, or 0
    /// if the reader is at EOF.
    pub(crate) async fn trailing_bytes(&mut self) -> std::io::Result<u64> {
        let mut buffer = [0u8; 1];
        let bytes_read = self.reader.read(&mut buffer).await?;

        Ok(bytes_read as u64)
    }
}
