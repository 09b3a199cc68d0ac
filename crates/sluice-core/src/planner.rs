//! Part planning: splits a job of known total size into fixed-size byte spans.
//!
//! Pure and deterministic: the same `(total_size, part_size)` always yields the
//! same plan, which is what lets resume re-derive part boundaries after a
//! restart instead of guessing them from scratch-file inspection.

/// One contiguous byte span of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpan {
    /// Part index, stable across restarts (0, 1, 2...).
    pub index: u64,
    /// Byte offset of the first byte.
    pub offset: u64,
    /// Span length in bytes.
    pub length: u64,
}

impl PartSpan {
    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Builds the part plan for a file of `total_size` bytes with parts of
/// `part_size` bytes each; the last part takes the remainder.
///
/// Returns `ceil(total_size / part_size)` spans, or an empty vec when
/// `total_size` is 0 (an empty job has nothing to fetch) or `part_size` is 0.
pub fn plan_parts(total_size: u64, part_size: u64) -> Vec<PartSpan> {
    if total_size == 0 || part_size == 0 {
        return Vec::new();
    }

    let count = total_size.div_ceil(part_size);
    let mut out = Vec::with_capacity(count as usize);
    for index in 0..count {
        let offset = index * part_size;
        let length = part_size.min(total_size - offset);
        out.push(PartSpan {
            index,
            offset,
            length,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parts_even_split() {
        let parts = plan_parts(1000, 250);
        assert_eq!(parts.len(), 4);
        for (i, p) in parts.iter().enumerate() {
            assert_eq!(p.index, i as u64);
            assert_eq!(p.offset, i as u64 * 250);
            assert_eq!(p.length, 250);
        }
    }

    #[test]
    fn plan_parts_short_tail() {
        // 100 / 30 -> 30, 30, 30, 10
        let parts = plan_parts(100, 30);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].length, 30);
        assert_eq!(parts[1].length, 30);
        assert_eq!(parts[2].length, 30);
        assert_eq!(parts[3].length, 10);
        assert_eq!(parts[3].offset, 90);
    }

    #[test]
    fn plan_parts_contiguous_and_complete() {
        let total = 12_345_678u64;
        let parts = plan_parts(total, 1_000_000);
        assert_eq!(parts.len(), 13);
        let mut expected_offset = 0u64;
        for p in &parts {
            assert_eq!(p.offset, expected_offset);
            expected_offset = p.end();
        }
        assert_eq!(expected_offset, total);
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), total);
    }

    #[test]
    fn plan_parts_single() {
        let parts = plan_parts(100, 1000);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].offset, 0);
        assert_eq!(parts[0].length, 100);
    }

    #[test]
    fn plan_parts_empty() {
        assert!(plan_parts(0, 1000).is_empty());
        assert!(plan_parts(1000, 0).is_empty());
    }

    #[test]
    fn plan_parts_deterministic() {
        assert_eq!(plan_parts(7_777, 512), plan_parts(7_777, 512));
    }
}
