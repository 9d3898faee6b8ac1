//! Layer stream model
//!
//! A sliced file is held as an ordered sequence of [`LayerBlock`]s:
//! block 0 is the file header, block 1 the start G-code, then one block per
//! sliced layer (raft layers first, with negative numbers), and finally the
//! footer. Each block keeps its own line list together with two structural
//! offsets computed from its content: the position of its `;LAYER:` sentinel
//! and the position where its trailing metadata (`;TIME_ELAPSED:`,
//! `;Filament used`) begins. Insertions never change the number of blocks.

use crate::error::StreamError;

/// Prefix of the layer sentinel comment.
pub const LAYER_PREFIX: &str = ";LAYER:";

/// Prefix of the elapsed-time marker closing every layer block.
pub const TIME_ELAPSED_PREFIX: &str = ";TIME_ELAPSED:";

/// Prefix of the filament-usage marker.
pub const FILAMENT_USED_PREFIX: &str = ";Filament used";

/// Prefix of the total print time in the header block.
pub const HEADER_TIME_PREFIX: &str = ";TIME:";

/// Last line of the slicer's header comment run.
const GENERATED_WITH_PREFIX: &str = ";Generated with";

/// Minimum number of blocks: header, start G-code and footer.
pub const MIN_BLOCKS: usize = 3;

/// Returns true if the line is a trailing metadata marker.
pub fn is_metadata_line(line: &str) -> bool {
    line.starts_with(TIME_ELAPSED_PREFIX) || line.starts_with(FILAMENT_USED_PREFIX)
}

/// Parse a layer sentinel, returning its signed layer number.
///
/// Only integral numbers are sentinels; `;LAYER:12.5` (a redo copy) is not.
pub fn parse_sentinel(line: &str) -> Option<i64> {
    line.strip_prefix(LAYER_PREFIX)
        .and_then(|rest| rest.trim().parse::<i64>().ok())
}

/// One block of the layer stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerBlock {
    lines: Vec<String>,
    sentinel: Option<(usize, i64)>,
    tail: usize,
}

impl LayerBlock {
    /// Create a block from its lines
    pub fn new(lines: Vec<String>) -> Self {
        let mut block = Self {
            lines,
            sentinel: None,
            tail: 0,
        };
        block.recompute();
        block
    }

    /// Create a block from text, dropping a single trailing newline
    pub fn from_text(text: &str) -> Self {
        Self::new(split_lines(text))
    }

    /// All lines of the block
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// A single line
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when the block holds no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Layer number carried by this block's sentinel
    pub fn layer_number(&self) -> Option<i64> {
        self.sentinel.map(|(_, layer)| layer)
    }

    /// Line index of the sentinel
    pub fn sentinel_index(&self) -> Option<usize> {
        self.sentinel.map(|(index, _)| index)
    }

    /// Line index where the trailing metadata run starts
    ///
    /// Equal to `len()` when the block has no trailing metadata. Never
    /// points at or before the sentinel.
    pub fn tail_offset(&self) -> usize {
        self.tail
    }

    /// Lines before the trailing metadata
    pub fn body(&self) -> &[String] {
        &self.lines[..self.tail]
    }

    /// Insert lines at `at`; an index past the end appends
    pub fn insert_lines<I>(&mut self, at: usize, lines: I) -> std::ops::Range<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let at = at.min(self.lines.len());
        let before = self.lines.len();
        self.lines.splice(at..at, lines);
        let inserted = self.lines.len() - before;
        self.recompute();
        at..at + inserted
    }

    /// Replace one line with any number of lines
    ///
    /// Returns the replaced line, or `None` if the index is out of range.
    pub fn replace_line<I>(&mut self, index: usize, lines: I) -> Option<String>
    where
        I: IntoIterator<Item = String>,
    {
        if index >= self.lines.len() {
            return None;
        }
        let old: Vec<String> = self.lines.splice(index..=index, lines).collect();
        self.recompute();
        old.into_iter().next()
    }

    /// Append lines at the very end of the block
    pub fn push_lines<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.lines.extend(lines);
        self.recompute();
    }

    /// Rewrite lines in place; offsets are recomputed afterwards
    pub fn edit_lines<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Vec<String>),
    {
        f(&mut self.lines);
        self.recompute();
    }

    /// Block text with a trailing newline per line
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn recompute(&mut self) {
        self.sentinel = self
            .lines
            .iter()
            .enumerate()
            .find_map(|(i, line)| parse_sentinel(line).map(|layer| (i, layer)));

        let mut end = self.lines.len();
        while end > 0 && self.lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        // without a metadata run the tail sits after the last non-blank line
        let mut tail = end;
        while tail > 0 && is_metadata_line(&self.lines[tail - 1]) {
            tail -= 1;
        }
        if let Some((sentinel, _)) = self.sentinel {
            tail = tail.max(sentinel + 1);
        }
        self.tail = tail;
    }
}

/// The ordered block sequence of one sliced file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerStream {
    blocks: Vec<LayerBlock>,
}

impl LayerStream {
    /// Split a complete file into header, start, layer and footer blocks
    pub fn parse(text: &str) -> Self {
        let lines = split_lines(text);
        let mut blocks = Vec::new();

        // header: through ";Generated with", else the leading comment run
        let header_end = lines
            .iter()
            .position(|l| l.starts_with(GENERATED_WITH_PREFIX))
            .map(|i| i + 1)
            .unwrap_or_else(|| {
                lines
                    .iter()
                    .position(|l| !l.starts_with(';') || parse_sentinel(l).is_some())
                    .unwrap_or(lines.len())
            });
        blocks.push(LayerBlock::new(lines[..header_end].to_vec()));
        let mut pos = header_end;

        let first_layer = lines[pos..]
            .iter()
            .position(|l| parse_sentinel(l).is_some())
            .map(|i| pos + i);
        let start_end = first_layer.unwrap_or(lines.len());
        blocks.push(LayerBlock::new(lines[pos..start_end].to_vec()));
        pos = start_end;

        let mut pending: Vec<String> = Vec::new();
        while pos < lines.len() {
            if parse_sentinel(&lines[pos]).is_none() {
                pending.push(lines[pos].clone());
                pos += 1;
                continue;
            }
            let mut block_lines = std::mem::take(&mut pending);
            block_lines.push(lines[pos].clone());
            pos += 1;
            while pos < lines.len() {
                let line = &lines[pos];
                if parse_sentinel(line).is_some() {
                    break;
                }
                block_lines.push(line.clone());
                pos += 1;
                if line.starts_with(TIME_ELAPSED_PREFIX) {
                    break;
                }
            }
            blocks.push(LayerBlock::new(block_lines));
        }
        blocks.push(LayerBlock::new(pending));

        tracing::debug!("Parsed layer stream into {} blocks", blocks.len());
        Self { blocks }
    }

    /// Wrap blocks already split by the host, one text per block
    pub fn from_blocks<I, S>(blocks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocks: blocks
                .into_iter()
                .map(|b| LayerBlock::from_text(b.as_ref()))
                .collect(),
        }
    }

    /// Render each block back to text, one string per block
    pub fn to_blocks(&self) -> Vec<String> {
        self.blocks.iter().map(LayerBlock::text).collect()
    }

    /// Render the whole stream
    pub fn render(&self) -> String {
        self.blocks.iter().map(LayerBlock::text).collect()
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when the stream holds no blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Fail unless the stream has header, start and footer blocks
    pub fn ensure_structure(&self) -> Result<(), StreamError> {
        if self.blocks.len() < MIN_BLOCKS {
            return Err(StreamError::TooShort {
                blocks: self.blocks.len(),
                required: MIN_BLOCKS,
            });
        }
        Ok(())
    }

    /// Block by index
    pub fn block(&self, index: usize) -> Option<&LayerBlock> {
        self.blocks.get(index)
    }

    /// Mutable block by index
    pub fn block_mut(&mut self, index: usize) -> Option<&mut LayerBlock> {
        self.blocks.get_mut(index)
    }

    /// Block by index, or an out-of-range error
    pub fn try_block_mut(&mut self, index: usize) -> Result<&mut LayerBlock, StreamError> {
        let len = self.blocks.len();
        self.blocks
            .get_mut(index)
            .ok_or(StreamError::BlockOutOfRange { index, len })
    }

    /// Iterate over all blocks
    pub fn blocks(&self) -> impl Iterator<Item = &LayerBlock> {
        self.blocks.iter()
    }

    /// Range of block indices that may hold layers (between start and footer)
    pub fn layer_range(&self) -> std::ops::Range<usize> {
        if self.blocks.len() < MIN_BLOCKS {
            return 0..0;
        }
        2..self.blocks.len() - 1
    }

    /// First block whose sentinel carries `layer`
    pub fn find_layer(&self, layer: i64) -> Option<usize> {
        self.find_layer_from(0, layer)
    }

    /// First block at or after `start` whose sentinel carries `layer`
    pub fn find_layer_from(&self, start: usize, layer: i64) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, b)| b.layer_number() == Some(layer))
            .map(|(i, _)| i)
    }

    /// Every (block index, layer number) pair in stream order
    pub fn layer_indices(&self) -> Vec<(usize, i64)> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.layer_number().map(|layer| (i, layer)))
            .collect()
    }

    /// Total print time from the header, in seconds
    pub fn header_time(&self) -> Option<f64> {
        self.blocks.first().and_then(|header| {
            header.lines().iter().find_map(|l| {
                l.strip_prefix(HEADER_TIME_PREFIX)
                    .and_then(|v| v.trim().parse::<f64>().ok())
            })
        })
    }

    /// Rewrite the header's total print time
    ///
    /// Returns false when the header carries no `;TIME:` line.
    pub fn set_header_time(&mut self, seconds: u64) -> bool {
        let Some(header) = self.blocks.first_mut() else {
            return false;
        };
        let Some(index) = header
            .lines()
            .iter()
            .position(|l| l.starts_with(HEADER_TIME_PREFIX))
        else {
            return false;
        };
        header
            .replace_line(index, [format!("{HEADER_TIME_PREFIX}{seconds}")])
            .is_some()
    }

    /// Append a comment line to the header block
    pub fn push_header_comment(&mut self, comment: impl Into<String>) {
        if self.blocks.is_empty() {
            self.blocks.push(LayerBlock::default());
        }
        if let Some(header) = self.blocks.first_mut() {
            header.push_lines([comment.into()]);
        }
    }
}

fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').map(str::to_string).collect()
}
