//! Stream splicer
//!
//! Places a [`SynthesizedBlock`] into one block of the stream. The splice
//! point is resolved from the block's precomputed offsets, so a synthesized
//! block always lands after the layer sentinel and before the trailing
//! metadata lines, and the number of blocks never changes.

use std::ops::Range;

use crate::error::StreamError;
use crate::stream::LayerStream;

/// An immutable run of generated lines forming one feature insertion
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SynthesizedBlock {
    lines: Vec<String>,
}

impl SynthesizedBlock {
    /// Freeze a sequence of generated lines
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// The generated lines
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when nothing was generated
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Block text, one line per row
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl From<SynthesizedBlock> for Vec<String> {
    fn from(block: SynthesizedBlock) -> Self {
        block.lines
    }
}

/// Where in a target block the synthesized lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplicePoint {
    /// Just before the trailing `;TIME_ELAPSED:` / `;Filament used` lines
    BeforeMetadata,
    /// Right after the block's `;LAYER:` sentinel
    AfterSentinel,
    /// In place of the given line
    ReplaceLine(usize),
}

/// Insert `block` into stream block `index` at `point`
///
/// Returns the line range the synthesized lines now occupy.
pub fn splice(
    stream: &mut LayerStream,
    index: usize,
    point: SplicePoint,
    block: SynthesizedBlock,
) -> Result<Range<usize>, StreamError> {
    let target = stream.try_block_mut(index)?;
    let lines: Vec<String> = block.into();
    let count = lines.len();

    let range = match point {
        SplicePoint::BeforeMetadata => {
            let at = target.tail_offset();
            target.insert_lines(at, lines)
        }
        SplicePoint::AfterSentinel => {
            let sentinel = target
                .sentinel_index()
                .ok_or(StreamError::MissingSentinel { block: index })?;
            target.insert_lines(sentinel + 1, lines)
        }
        SplicePoint::ReplaceLine(line) => {
            let len = target.len();
            target
                .replace_line(line, lines)
                .ok_or(StreamError::LineOutOfRange {
                    block: index,
                    line,
                    len,
                })?;
            line..line + count
        }
    };

    tracing::debug!(
        "Spliced {} lines into block {} at {:?} (lines {:?})",
        count,
        index,
        point,
        range
    );
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> LayerStream {
        LayerStream::from_blocks([
            ";TIME:10\n",
            "G28\n",
            ";LAYER:0\nG1 X1 Y1 E1\n;TIME_ELAPSED:5\n",
            ";LAYER:1\nG1 X2 Y2 E2\n;TIME_ELAPSED:9\n",
            ";End\n",
        ])
    }

    fn block(lines: &[&str]) -> SynthesizedBlock {
        SynthesizedBlock::new(lines.iter().map(|l| l.to_string()).collect())
    }

    #[test]
    fn test_before_metadata() {
        let mut s = stream();
        let range = splice(&mut s, 2, SplicePoint::BeforeMetadata, block(&["M0", "M400"])).unwrap();
        assert_eq!(range, 2..4);
        let b = s.block(2).unwrap();
        assert_eq!(b.lines().last().map(String::as_str), Some(";TIME_ELAPSED:5"));
        assert_eq!(b.line(2), Some("M0"));
    }

    #[test]
    fn test_after_sentinel() {
        let mut s = stream();
        splice(&mut s, 3, SplicePoint::AfterSentinel, block(&["M600"])).unwrap();
        assert_eq!(s.block(3).unwrap().line(1), Some("M600"));
        assert_eq!(s.block(3).unwrap().line(0), Some(";LAYER:1"));
    }

    #[test]
    fn test_after_sentinel_without_sentinel() {
        let mut s = stream();
        let err = splice(&mut s, 1, SplicePoint::AfterSentinel, block(&["M600"])).unwrap_err();
        assert_eq!(err, StreamError::MissingSentinel { block: 1 });
    }

    #[test]
    fn test_replace_line() {
        let mut s = stream();
        splice(&mut s, 2, SplicePoint::ReplaceLine(1), block(&["; a", "; b"])).unwrap();
        let b = s.block(2).unwrap();
        assert_eq!(b.len(), 4);
        assert_eq!(b.line(1), Some("; a"));
        assert_eq!(b.tail_offset(), 3);
    }

    #[test]
    fn test_block_count_is_stable() {
        let mut s = stream();
        let before = s.len();
        splice(&mut s, 2, SplicePoint::BeforeMetadata, block(&["M0"])).unwrap();
        splice(&mut s, 3, SplicePoint::AfterSentinel, block(&["M0"])).unwrap();
        assert_eq!(s.len(), before);
        assert!(splice(&mut s, 99, SplicePoint::BeforeMetadata, block(&["M0"])).is_err());
    }
}
