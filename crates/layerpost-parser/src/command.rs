//! G-code line parsing and building
//!
//! Value extraction is anchored to whitespace-delimited words of the command
//! part of a line (everything before the first `;`), so a key letter inside a
//! comment or inside another word never matches. Parsing never fails; an
//! absent or malformed value is `None` and callers choose the fallback.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Column at which aligned comments start.
pub const COMMENT_COLUMN: usize = 27;

/// Axis letters in canonical output order.
const AXIS_ORDER: [char; 4] = ['X', 'Y', 'Z', 'E'];

fn word_regex() -> &'static Regex {
    static WORD_REGEX: OnceLock<Regex> = OnceLock::new();
    WORD_REGEX.get_or_init(|| {
        Regex::new(r"^([A-Za-z])([-+]?(?:\d+\.?\d*|\.\d+))$").expect("invalid regex pattern")
    })
}

/// The command part of a line, without its `;` comment
pub fn code_part(line: &str) -> &str {
    match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    }
    .trim()
}

/// Numeric value following `key` on the line, if present
///
/// ```
/// use layerpost_parser::get_value;
/// assert_eq!(get_value("G1 X10.5 Y-2 ; X99", 'X'), Some(10.5));
/// assert_eq!(get_value("G1 X10.5 Y-2 ; X99", 'Z'), None);
/// ```
pub fn get_value(line: &str, key: char) -> Option<f64> {
    code_part(line).split_whitespace().find_map(|word| {
        let caps = word_regex().captures(word)?;
        let letter = caps.get(1)?.as_str().chars().next()?;
        if !letter.eq_ignore_ascii_case(&key) {
            return None;
        }
        caps.get(2)?.as_str().parse::<f64>().ok()
    })
}

/// Numeric value following `key`, or `default`
pub fn get_value_or(line: &str, key: char, default: f64) -> f64 {
    get_value(line, key).unwrap_or(default)
}

/// True if `key` carries a value on the line
pub fn has_key(line: &str, key: char) -> bool {
    get_value(line, key).is_some()
}

/// Leading command word of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// G-code (motion, positioning, dwell)
    G(u32),
    /// M-code (machine functions)
    M(u32),
    /// Tool select
    T(u32),
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCode::G(n) => write!(f, "G{}", n),
            CommandCode::M(n) => write!(f, "M{}", n),
            CommandCode::T(n) => write!(f, "T{}", n),
        }
    }
}

/// Parse the leading command word (`G1`, `M104`, `T0`)
pub fn command_code(line: &str) -> Option<CommandCode> {
    let word = code_part(line).split_whitespace().next()?;
    let mut chars = word.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let number = chars.as_str().parse::<u32>().ok()?;
    match letter {
        'G' => Some(CommandCode::G(number)),
        'M' => Some(CommandCode::M(number)),
        'T' => Some(CommandCode::T(number)),
        _ => None,
    }
}

/// True for linear and arc moves (G0..G3)
pub fn is_motion(line: &str) -> bool {
    matches!(command_code(line), Some(CommandCode::G(0..=3)))
}

/// Format a number the way generated lines carry it
///
/// Whole numbers print without a fraction, everything else with at most
/// five decimals.
pub fn format_number(value: f64) -> String {
    let rounded = value.round();
    let text = if (value - rounded).abs() < 1e-9 {
        format!("{}", rounded as i64)
    } else {
        let fixed = format!("{:.5}", value);
        fixed.trim_end_matches('0').trim_end_matches('.').to_string()
    };
    if text == "-0" {
        "0".to_string()
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Param {
    key: char,
    value: f64,
    decimals: Option<usize>,
}

impl Param {
    fn render(&self) -> String {
        match self.decimals {
            Some(d) => format!("{}{:.*}", self.key, d, self.value),
            None => format!("{}{}", self.key, format_number(self.value)),
        }
    }
}

/// Builder for one generated G-code line
///
/// Renders the command first, then X Y Z E in that order, then the other
/// parameters in the order they were set, then free text and the comment.
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeLine {
    command: String,
    params: Vec<Param>,
    text: Option<String>,
    comment: Option<String>,
}

impl GcodeLine {
    /// A `G<n>` line
    pub fn g(code: u32) -> Self {
        Self::raw(format!("G{}", code))
    }

    /// An `M<n>` line
    pub fn m(code: u32) -> Self {
        Self::raw(format!("M{}", code))
    }

    /// A line starting with arbitrary command text (`PAUSE`, `@pause`)
    pub fn raw(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Vec::new(),
            text: None,
            comment: None,
        }
    }

    /// A comment-only line
    pub fn comment_only(comment: impl Into<String>) -> Self {
        Self::raw("").comment(comment)
    }

    /// Set a parameter; setting the same key again replaces it
    pub fn param(self, key: char, value: f64) -> Self {
        self.push_param(key, value, None)
    }

    /// Set a parameter rendered with a fixed number of decimals
    pub fn param_fixed(self, key: char, value: f64, decimals: usize) -> Self {
        self.push_param(key, value, Some(decimals))
    }

    /// Set a parameter only when a value is present
    pub fn param_opt(self, key: char, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    /// Free text after the parameters (LCD messages)
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Trailing comment
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn push_param(mut self, key: char, value: f64, decimals: Option<usize>) -> Self {
        let key = key.to_ascii_uppercase();
        let param = Param {
            key,
            value,
            decimals,
        };
        match self.params.iter_mut().find(|p| p.key == key) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
        self
    }

    fn command_text(&self) -> String {
        let mut words: Vec<String> = Vec::new();
        if !self.command.is_empty() {
            words.push(self.command.clone());
        }
        for axis in AXIS_ORDER {
            if let Some(p) = self.params.iter().find(|p| p.key == axis) {
                words.push(p.render());
            }
        }
        for p in self.params.iter().filter(|p| !AXIS_ORDER.contains(&p.key)) {
            words.push(p.render());
        }
        if let Some(text) = &self.text {
            words.push(text.clone());
        }
        words.join(" ")
    }

    /// Render with the comment right after the command
    pub fn render(&self) -> String {
        let code = self.command_text();
        match (&self.comment, code.is_empty()) {
            (Some(comment), true) => format!(";{}", comment),
            (Some(comment), false) => format!("{} ;{}", code, comment),
            (None, _) => code,
        }
    }

    /// Render with the comment starting at [`COMMENT_COLUMN`]
    pub fn render_aligned(&self) -> String {
        let code = self.command_text();
        match (&self.comment, code.is_empty()) {
            (Some(comment), true) => format!(";{}", comment),
            (Some(comment), false) => {
                format!("{:<width$}; {}", code, comment, width = COMMENT_COLUMN - 1)
            }
            (None, _) => code,
        }
    }
}

impl fmt::Display for GcodeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<GcodeLine> for String {
    fn from(line: GcodeLine) -> Self {
        line.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_value_token_anchored() {
        assert_eq!(get_value("G1 X10 Y20.5 E-1.25", 'E'), Some(-1.25));
        assert_eq!(get_value("G1 F1500 E.5", 'E'), Some(0.5));
        // key inside a comment
        assert_eq!(get_value("G1 X10 ;Z5", 'Z'), None);
        // key inside another word
        assert_eq!(get_value("M117 EXTRUDER", 'E'), None);
        assert_eq!(get_value("G1 X", 'X'), None);
        assert_eq!(get_value("g1 x3", 'X'), Some(3.0));
    }

    #[test]
    fn test_get_value_or() {
        assert_eq!(get_value_or("G0 X1", 'Y', 7.0), 7.0);
        assert!(has_key("G0 X1", 'X'));
        assert!(!has_key("G0 X1", 'Y'));
    }

    #[test]
    fn test_command_code() {
        assert_eq!(command_code("G1 X1"), Some(CommandCode::G(1)));
        assert_eq!(command_code("  M104 S200 ; heat"), Some(CommandCode::M(104)));
        assert_eq!(command_code("T1"), Some(CommandCode::T(1)));
        assert_eq!(command_code(";LAYER:3"), None);
        assert_eq!(command_code("@pause"), None);
        assert!(is_motion("G0 F3000 X1"));
        assert!(!is_motion("G92 E0"));
        assert_eq!(CommandCode::M(600).to_string(), "M600");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-3.25), "-3.25");
    }

    #[test]
    fn test_canonical_order() {
        let line = GcodeLine::g(1).param('F', 2700.0).param('E', -6.5).param('X', 10.0);
        assert_eq!(line.render(), "G1 X10 E-6.5 F2700");
    }

    #[test]
    fn test_param_replaces() {
        let line = GcodeLine::g(0).param('X', 1.0).param('X', 2.0);
        assert_eq!(line.render(), "G0 X2");
    }

    #[test]
    fn test_fixed_decimals_and_text() {
        let line = GcodeLine::m(600).param_fixed('E', 2.0, 2).param_fixed('X', 0.0, 2);
        assert_eq!(line.render(), "M600 X0.00 E2.00");
        let msg = GcodeLine::m(117).text("Paused");
        assert_eq!(msg.render(), "M117 Paused");
    }

    #[test]
    fn test_comments() {
        let line = GcodeLine::m(83).comment("Switch to relative E values");
        assert_eq!(line.render(), "M83 ;Switch to relative E values");
        let aligned = line.render_aligned();
        assert_eq!(aligned.find(';'), Some(COMMENT_COLUMN - 1));
        assert_eq!(GcodeLine::comment_only("hi").render(), ";hi");
    }
}
