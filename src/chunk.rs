use bytes::Bytes;

use crate::s3_client::ObjectMetadata;

/// A planned byte range, `size` bytes starting at `start`. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeSpec {
    start: u64,
    size: u64,
}

impl ByteRangeSpec {
    /// `None` for an empty range, which has no `bytes=` form.
    pub fn new(start: u64, size: u64) -> Option<Self> {
        (size > 0).then_some(Self { start, size })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Inclusive last byte.
    pub fn end(&self) -> u64 {
        self.start + (self.size - 1)
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end())
    }
}

/// Compute the range starting at `cursor`.
///
/// Returns `None` once the cursor has reached a known total. Without a total
/// the range always spans a full part; the store truncates it at the end of
/// the object.
pub fn next_range(cursor: u64, part_size: u64, total: Option<u64>) -> Option<ByteRangeSpec> {
    let size = match total {
        Some(total) if cursor >= total => return None,
        Some(total) => part_size.min(total - cursor),
        None => part_size,
    };

    ByteRangeSpec::new(cursor, size)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkJob {
    /// 1-based position in the output, not in network order.
    pub sequence: u64,
    /// Planned range; `None` when the caller supplied one.
    span: Option<ByteRangeSpec>,
    /// Caller supplied range, sent verbatim.
    range: Option<String>,
}

impl ChunkJob {
    pub fn planned(sequence: u64, span: ByteRangeSpec) -> Self {
        Self {
            sequence,
            span: Some(span),
            range: None,
        }
    }

    pub fn explicit(sequence: u64, range: impl Into<String>) -> Self {
        Self {
            sequence,
            span: None,
            range: Some(range.into()),
        }
    }

    /// First object byte this job asks for. Unknown for explicit ranges.
    pub fn start(&self) -> Option<u64> {
        self.span.map(|span| span.start())
    }

    /// Most bytes this job may return. `None` when the chunk may return any
    /// number of bytes.
    pub fn size(&self) -> Option<u64> {
        self.span.map(|span| span.size())
    }

    pub fn range_header(&self) -> String {
        match (&self.range, &self.span) {
            (Some(range), _) => range.clone(),
            (None, Some(span)) => span.header_value(),
            (None, None) => "bytes=0-".to_string(),
        }
    }
}

/// Hands out chunk jobs in order, advancing the read cursor by one part per
/// job whatever the chunk turns out to contain.
#[derive(Debug)]
pub struct RangePlanner {
    part_size: u64,
    cursor: u64,
    next_sequence: u64,
}

impl RangePlanner {
    pub fn new(part_size: u64) -> Self {
        Self {
            part_size,
            cursor: 0,
            next_sequence: 1,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_exhausted(&self, total: Option<u64>) -> bool {
        next_range(self.cursor, self.part_size, total).is_none()
    }

    /// Jobs left before the cursor reaches `total`.
    pub fn remaining_jobs(&self, total: u64) -> u64 {
        if self.part_size == 0 {
            return 0;
        }
        total.saturating_sub(self.cursor).div_ceil(self.part_size)
    }

    pub fn next_job(&mut self, total: Option<u64>) -> Option<ChunkJob> {
        let spec = next_range(self.cursor, self.part_size, total)?;
        let job = ChunkJob::planned(self.next_sequence, spec);

        self.cursor += self.part_size;
        self.next_sequence += 1;

        Some(job)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    More,
    /// The chunk holds its planned size; stop reading the body.
    Full,
}

/// Collects the body of one chunk until it is that chunk's turn to be
/// written. Bounded chunks never hold more than their planned size.
#[derive(Debug)]
pub struct ChunkWriter {
    sequence: u64,
    limit: Option<u64>,
    len: u64,
    parts: Vec<Bytes>,
}

impl ChunkWriter {
    pub fn new(sequence: u64, limit: Option<u64>) -> Self {
        Self {
            sequence,
            limit,
            len: 0,
            parts: Vec::new(),
        }
    }

    pub fn for_job(job: &ChunkJob) -> Self {
        Self::new(job.sequence, job.size())
    }

    pub fn write(&mut self, mut bytes: Bytes) -> ChunkProgress {
        if let Some(limit) = self.limit {
            let room = limit.saturating_sub(self.len);
            if room == 0 {
                return ChunkProgress::Full;
            }
            if bytes.len() as u64 > room {
                bytes.truncate(room as usize);
            }
        }

        self.len += bytes.len() as u64;
        if !bytes.is_empty() {
            self.parts.push(bytes);
        }

        match self.limit {
            Some(limit) if self.len >= limit => ChunkProgress::Full,
            _ => ChunkProgress::More,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }
}

/// A fully read chunk together with the response it came from.
#[derive(Debug)]
pub struct FetchedChunk {
    pub metadata: ObjectMetadata,
    pub data: ChunkWriter,
    /// The store ignored the range and sent the whole object.
    pub whole_object: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_all(total: u64, part_size: u64) -> Vec<ChunkJob> {
        let mut planner = RangePlanner::new(part_size);
        std::iter::from_fn(|| planner.next_job(Some(total))).collect()
    }

    #[test]
    fn test_plan_empty_object() {
        assert!(plan_all(0, 100).is_empty());
    }

    #[test]
    fn test_plan_exact_multiple() {
        let jobs = plan_all(1000, 100);
        assert_eq!(jobs.len(), 10);
        assert_eq!(jobs[0].range_header(), "bytes=0-99");
        assert_eq!(jobs[9].range_header(), "bytes=900-999");
        assert_eq!(jobs[9].sequence, 10);
    }

    #[test]
    fn test_plan_with_remainder() {
        let jobs = plan_all(1050, 100);
        assert_eq!(jobs.len(), 11);
        assert_eq!(jobs[10].start(), Some(1000));
        assert_eq!(jobs[10].size(), Some(50));
        assert_eq!(jobs[10].range_header(), "bytes=1000-1049");
    }

    #[test]
    fn test_plan_part_larger_than_object() {
        let jobs = plan_all(50, 100);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].range_header(), "bytes=0-49");
    }

    #[test]
    fn test_unknown_total_uses_full_parts() {
        let mut planner = RangePlanner::new(7);
        let first = planner.next_job(None).unwrap();
        let second = planner.next_job(None).unwrap();
        assert_eq!(first.range_header(), "bytes=0-6");
        assert_eq!(second.range_header(), "bytes=7-13");
        assert_eq!(planner.cursor(), 14);
        assert!(!planner.is_exhausted(None));
        assert!(planner.is_exhausted(Some(14)));
    }

    #[test]
    fn test_next_range_is_pure() {
        let a = next_range(300, 128, Some(1000));
        let b = next_range(300, 128, Some(1000));
        assert_eq!(a, b);
        assert_eq!(a, ByteRangeSpec::new(300, 128));
        assert_eq!(next_range(1000, 128, Some(1000)), None);
        assert_eq!(next_range(0, 0, None), None);
    }

    #[test]
    fn test_empty_range_is_unrepresentable() {
        assert_eq!(ByteRangeSpec::new(10, 0), None);

        let one = ByteRangeSpec::new(0, 1).unwrap();
        assert_eq!(one.end(), 0);
        assert_eq!(one.header_value(), "bytes=0-0");
    }

    #[test]
    fn test_remaining_jobs() {
        let mut planner = RangePlanner::new(100);
        assert_eq!(planner.remaining_jobs(1050), 11);
        planner.next_job(Some(1050));
        assert_eq!(planner.remaining_jobs(1050), 10);
        assert_eq!(planner.remaining_jobs(300), 2);
        assert_eq!(planner.remaining_jobs(100), 0);
        assert_eq!(planner.remaining_jobs(50), 0);
        assert_eq!(RangePlanner::new(0).remaining_jobs(1000), 0);
    }

    #[test]
    fn test_explicit_range_is_verbatim() {
        let job = ChunkJob::explicit(1, "bytes=100-199");
        assert_eq!(job.range_header(), "bytes=100-199");
        assert_eq!(job.size(), None);
        assert_eq!(job.start(), None);
    }

    #[test]
    fn test_chunk_writer_stops_at_limit() {
        let mut writer = ChunkWriter::new(3, Some(5));
        assert_eq!(writer.write(Bytes::from_static(b"abc")), ChunkProgress::More);
        assert_eq!(writer.write(Bytes::from_static(b"defgh")), ChunkProgress::Full);
        assert_eq!(writer.write(Bytes::from_static(b"ij")), ChunkProgress::Full);
        assert_eq!(writer.len(), 5);
        assert_eq!(writer.sequence(), 3);
        assert_eq!(writer.into_parts().concat(), b"abcde");
    }

    #[test]
    fn test_unbounded_chunk_writer_never_fills() {
        let mut writer = ChunkWriter::for_job(&ChunkJob::explicit(1, "bytes=0-"));
        for _ in 0..4 {
            assert_eq!(writer.write(Bytes::from(vec![1u8; 1024])), ChunkProgress::More);
        }
        assert_eq!(writer.len(), 4096);
        assert!(!writer.is_empty());
    }
}
