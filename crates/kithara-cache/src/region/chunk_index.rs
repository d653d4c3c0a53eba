#![forbid(unsafe_code)]

/// One seekable unit of a chunked media resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub byte_offset: u64,
    pub byte_length: u64,
    pub duration_us: u64,
    pub start_time_us: u64,
}

impl Chunk {
    pub fn byte_end(&self) -> u64 {
        self.byte_offset.saturating_add(self.byte_length)
    }
}

/// Time ↔ byte seek table, as produced by a container parser.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkIndex {
    chunks: Vec<Chunk>,
}

impl ChunkIndex {
    /// Chunks are ordered by byte offset.
    pub fn new(mut chunks: Vec<Chunk>) -> Self {
        chunks.sort_by_key(|c| c.byte_offset);
        Self { chunks }
    }

    /// Build from parallel arrays; extra elements of longer arrays are ignored.
    pub fn from_parts(
        sizes: &[u64],
        offsets: &[u64],
        durations_us: &[u64],
        times_us: &[u64],
    ) -> Self {
        let chunks = sizes
            .iter()
            .zip(offsets)
            .zip(durations_us)
            .zip(times_us)
            .map(|(((&byte_length, &byte_offset), &duration_us), &start_time_us)| Chunk {
                byte_offset,
                byte_length,
                duration_us,
                start_time_us,
            })
            .collect();
        Self::new(chunks)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn last(&self) -> Option<&Chunk> {
        self.chunks.last()
    }

    /// Index of the last chunk starting at or before `offset`.
    pub fn chunk_for_byte(&self, offset: u64) -> Option<usize> {
        self.chunks
            .partition_point(|c| c.byte_offset <= offset)
            .checked_sub(1)
    }

    /// Index of the last chunk starting at or before `time_us`.
    pub fn chunk_for_time_us(&self, time_us: u64) -> Option<usize> {
        self.chunks
            .partition_point(|c| c.start_time_us <= time_us)
            .checked_sub(1)
    }

    /// Byte offset matching `time_us`, interpolated inside its chunk.
    pub fn byte_for_time_us(&self, time_us: u64) -> Option<u64> {
        let chunk = self.chunks.get(self.chunk_for_time_us(time_us)?)?;
        let into = (time_us - chunk.start_time_us).min(chunk.duration_us);
        Some(chunk.byte_offset + scale(chunk.byte_length, into, chunk.duration_us))
    }

    /// Time matching byte `offset`, interpolated inside its chunk.
    pub fn time_us_for_byte(&self, offset: u64) -> Option<u64> {
        let chunk = self.chunks.get(self.chunk_for_byte(offset)?)?;
        let into = (offset - chunk.byte_offset).min(chunk.byte_length);
        Some(chunk.start_time_us + scale(chunk.duration_us, into, chunk.byte_length))
    }

    pub fn duration_us(&self) -> u64 {
        self.chunks.iter().map(|c| c.duration_us).sum()
    }
}

/// `value * num / den` without intermediate overflow; `0` when `den == 0`.
fn scale(value: u64, num: u64, den: u64) -> u64 {
    if den == 0 {
        return 0;
    }
    let scaled = u128::from(value) * u128::from(num) / u128::from(den);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}
