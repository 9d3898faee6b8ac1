//! Block synthesis helpers
//!
//! [`BlockBuilder`] collects generated lines and is the only way a script
//! obtains a [`SynthesizedBlock`] to splice. The free functions here cover
//! the arithmetic several scripts share.

use layerpost_core::SynthesizedBlock;
use layerpost_parser::GcodeLine;
use serde::{Deserialize, Serialize};

/// Longest single extruder move the firmware accepts by default (mm).
pub const MAX_EXTRUDE_CHUNK: f64 = 150.0;

/// Collects generated G-code lines for one insertion
#[derive(Debug, Clone, Default)]
pub struct BlockBuilder {
    lines: Vec<String>,
    aligned: bool,
}

impl BlockBuilder {
    /// Builder rendering comments right after the command
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder rendering comments at the comment column
    pub fn aligned() -> Self {
        Self {
            lines: Vec::new(),
            aligned: true,
        }
    }

    /// Append a generated line
    pub fn line(&mut self, line: GcodeLine) -> &mut Self {
        let text = if self.aligned {
            line.render_aligned()
        } else {
            line.render()
        };
        self.lines.push(text);
        self
    }

    /// Append a line verbatim
    pub fn raw(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(text.into());
        self
    }

    /// Append a `;comment` line
    pub fn comment(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.lines.push(format!(";{}", text.as_ref()));
        self
    }

    /// Append several verbatim lines
    pub fn extend<I, S>(&mut self, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Finish the block
    pub fn finish(self) -> SynthesizedBlock {
        SynthesizedBlock::new(self.lines)
    }
}

/// Split `total` into moves no longer than `ceiling`
///
/// `chunk_distance(430.0, 150.0)` is `[150, 150, 130]`. A non-positive
/// total yields no moves.
pub fn chunk_distance(total: f64, ceiling: f64) -> Vec<f64> {
    if total <= 0.0 {
        return Vec::new();
    }
    if ceiling <= 0.0 {
        return vec![total];
    }
    let mut chunks = Vec::new();
    let mut remaining = total;
    while remaining > ceiling {
        chunks.push(ceiling);
        remaining -= ceiling;
    }
    if remaining > 1e-9 {
        chunks.push(remaining);
    }
    chunks
}

/// Split a reload into fast chunks (90%) and one slow final length (10%)
pub fn reload_chunks(total: f64, ceiling: f64) -> (Vec<f64>, f64) {
    if total <= 0.0 {
        return (Vec::new(), 0.0);
    }
    let fast = total * 0.9;
    (chunk_distance(fast, ceiling), total - fast)
}

/// Split a user command string into lines
///
/// Accepts real newlines, the two-character sequence `\n`, and, when
/// `commas` is set, commas as separators. Blank entries are dropped.
pub fn split_commands(text: &str, commas: bool) -> Vec<String> {
    let normalized = text.replace("\\n", "\n");
    let normalized = if commas {
        normalized.replace(',', "\n")
    } else {
        normalized
    };
    normalized
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Firmware dialect of the pause command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseMethod {
    /// `M0` with an LCD message
    #[default]
    Marlin,
    /// Bare `M0`
    Marlin2,
    /// Bare `M0`, minimal surrounding code
    Griffin,
    /// `M25`
    Bq,
    /// `M226`
    Reprap,
    /// `@pause` host command
    Repetier,
    /// `M125`
    AltOcto,
    /// `M2000`
    #[serde(rename = "raise_3d")]
    Raise3d,
    /// `PAUSE` macro
    Klipper,
    /// Timed dwell instead of a pause
    G4,
    /// User-supplied command
    Custom,
}

impl PauseMethod {
    /// The pause line
    ///
    /// `message` is shown on Marlin displays; `None` gives a bare `M0`.
    /// `dwell_minutes` only applies to [`PauseMethod::G4`], `custom` only
    /// to [`PauseMethod::Custom`].
    pub fn command(self, message: Option<&str>, dwell_minutes: f64, custom: &str) -> String {
        match self {
            PauseMethod::Marlin => match message.map(str::trim) {
                Some(text) if !text.is_empty() => format!("M0 {} Click to resume", text),
                Some(_) => "M0 Click to resume".to_string(),
                None => "M0".to_string(),
            },
            PauseMethod::Marlin2 | PauseMethod::Griffin => "M0".to_string(),
            PauseMethod::Bq => "M25".to_string(),
            PauseMethod::Reprap => "M226".to_string(),
            PauseMethod::Repetier => "@pause now change filament and press continue printing"
                .to_string(),
            PauseMethod::AltOcto => "M125".to_string(),
            PauseMethod::Raise3d => "M2000".to_string(),
            PauseMethod::Klipper => "PAUSE".to_string(),
            PauseMethod::G4 => GcodeLine::g(4)
                .param('S', (dwell_minutes * 60.0).round())
                .render(),
            PauseMethod::Custom => custom.trim().to_string(),
        }
    }

    /// True for dialects that get only the bare pause command
    pub fn is_minimal(self) -> bool {
        matches!(self, PauseMethod::Griffin)
    }
}

/// Round to a fixed number of decimals
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_distance() {
        assert_eq!(chunk_distance(430.0, 150.0), vec![150.0, 150.0, 130.0]);
        assert_eq!(chunk_distance(150.0, 150.0), vec![150.0]);
        assert_eq!(chunk_distance(0.0, 150.0), Vec::<f64>::new());
        assert_eq!(chunk_distance(20.0, 0.0), vec![20.0]);
    }

    #[test]
    fn test_reload_chunks() {
        let (fast, slow) = reload_chunks(430.0, 150.0);
        assert_eq!(fast, vec![150.0, 150.0, 87.0]);
        assert!((slow - 43.0).abs() < 1e-9);
        assert_eq!(reload_chunks(0.0, 150.0), (Vec::new(), 0.0));
    }

    #[test]
    fn test_split_commands() {
        assert_eq!(split_commands("m117 a,G4 S1", true), vec!["m117 a", "G4 S1"]);
        assert_eq!(split_commands("M300 S1\\nM117 x", false), vec!["M300 S1", "M117 x"]);
        assert_eq!(split_commands("M117 a,b", false), vec!["M117 a,b"]);
        assert!(split_commands("  \n ", true).is_empty());
    }

    #[test]
    fn test_pause_commands() {
        assert_eq!(
            PauseMethod::Marlin.command(Some("Change"), 0.0, ""),
            "M0 Change Click to resume"
        );
        assert_eq!(PauseMethod::Marlin.command(None, 0.0, ""), "M0");
        assert_eq!(PauseMethod::Bq.command(None, 0.0, ""), "M25");
        assert_eq!(PauseMethod::Klipper.command(None, 0.0, ""), "PAUSE");
        assert_eq!(PauseMethod::G4.command(None, 5.0, ""), "G4 S300");
        assert_eq!(PauseMethod::Custom.command(None, 0.0, " M601 "), "M601");
        assert!(PauseMethod::Griffin.is_minimal());
    }

    #[test]
    fn test_builder() {
        let mut builder = BlockBuilder::aligned();
        builder
            .comment("TYPE:CUSTOM")
            .line(GcodeLine::m(83).comment("Relative E"))
            .raw("G91");
        assert_eq!(builder.len(), 3);
        let block = builder.finish();
        assert_eq!(block.lines()[0], ";TYPE:CUSTOM");
        assert!(block.lines()[1].starts_with("M83 "));
        assert_eq!(block.lines()[1].find(';'), Some(26));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(2.0, 2), 2.0);
    }
}
