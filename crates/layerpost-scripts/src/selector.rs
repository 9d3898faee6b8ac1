//! Layer selection
//!
//! Translates user-facing layer numbers and frequency rules into concrete
//! stream indices. Two numbering conventions are in use:
//!
//! - [`LayerNumbering::Preview`]: raft layers are shown as 1..R, so user
//!   layer `n` is sentinel `n - R - 1`.
//! - [`LayerNumbering::Sliced`]: user layer 1 is `;LAYER:0` whatever the
//!   raft, and raft layers are reached with zero or negative numbers.
//!
//! Lookups are exact sentinel matches. A requested layer that is not in
//! the stream is skipped and counted as a miss.

use layerpost_core::{LayerStream, Notifier, PrintSequence, PrinterProfile};
use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

/// User-facing layer numbering convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerNumbering {
    /// Raft layers count as the first user layers
    Preview,
    /// User layer 1 is always `;LAYER:0`
    Sliced,
}

/// How often an insertion repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InsertFrequency {
    #[serde(rename = "once_only")]
    OnceOnly,
    #[default]
    #[serde(rename = "every_layer")]
    EveryLayer,
    #[serde(rename = "every_2nd")]
    Every2nd,
    #[serde(rename = "every_3rd")]
    Every3rd,
    #[serde(rename = "every_5th")]
    Every5th,
    #[serde(rename = "every_10th")]
    Every10th,
    #[serde(rename = "every_25th")]
    Every25th,
    #[serde(rename = "every_50th")]
    Every50th,
    #[serde(rename = "every_100th")]
    Every100th,
    /// Any other step; 0 is rejected at selection time
    #[serde(rename = "every_nth")]
    EveryNth(u32),
}

impl InsertFrequency {
    /// Layer step, or `None` for a single insertion
    pub fn step(&self) -> Option<u32> {
        match self {
            InsertFrequency::OnceOnly => None,
            InsertFrequency::EveryLayer => Some(1),
            InsertFrequency::Every2nd => Some(2),
            InsertFrequency::Every3rd => Some(3),
            InsertFrequency::Every5th => Some(5),
            InsertFrequency::Every10th => Some(10),
            InsertFrequency::Every25th => Some(25),
            InsertFrequency::Every50th => Some(50),
            InsertFrequency::Every100th => Some(100),
            InsertFrequency::EveryNth(n) => Some(*n),
        }
    }
}

/// What the user asked for, in user-facing numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerRequest {
    /// Each listed layer once (once per object in one-at-a-time order)
    Once(Vec<i64>),
    /// Every `step` layers from `start` through `end` (inclusive)
    Every {
        start: i64,
        end: Option<i64>,
        step: u32,
    },
}

impl LayerRequest {
    /// Build a request from a frequency rule
    pub fn from_frequency(frequency: InsertFrequency, start: i64, end: Option<i64>) -> Self {
        match frequency.step() {
            None => LayerRequest::Once(vec![start]),
            Some(step) => LayerRequest::Every { start, end, step },
        }
    }
}

/// One selected block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Stream block index
    pub index: usize,
    /// Sentinel number of the block
    pub layer: i64,
}

/// Result of a selection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    /// Selected blocks, strictly increasing by index
    pub targets: Vec<Target>,
    /// Number of requested layers
    pub requested: usize,
    /// Number of requested layers not found
    pub missed: usize,
    /// Configuration problems that were degraded
    pub warnings: Vec<ParameterError>,
}

impl Selection {
    /// Selected block indices
    pub fn indices(&self) -> Vec<usize> {
        self.targets.iter().map(|t| t.index).collect()
    }

    /// True when nothing was selected
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Report misses and degraded settings through the sink
    pub fn report(&self, title: &str, notifier: &dyn Notifier) {
        for warning in &self.warnings {
            tracing::warn!("{}: {}", title, warning);
            notifier.show_message(title, &warning.to_string());
        }
        if self.missed > 0 {
            let found = self.requested.saturating_sub(self.missed);
            tracing::warn!(
                "{}: {} of {} requested layers were found",
                title,
                found,
                self.requested
            );
            notifier.show_message(
                title,
                &format!(
                    "{} of {} requested layers were found. Please double check the layer numbers.",
                    found, self.requested
                ),
            );
        }
    }
}

/// Number of raft layers (negative sentinels before `;LAYER:0`)
///
/// Always 0 unless the profile's adhesion type is raft.
pub fn raft_layer_count(stream: &LayerStream, profile: &PrinterProfile) -> usize {
    if !profile.has_raft() {
        return 0;
    }
    stream
        .layer_indices()
        .into_iter()
        .map(|(_, layer)| layer)
        .take_while(|layer| *layer != 0)
        .filter(|layer| *layer < 0)
        .count()
}

/// Convert a user-facing layer number to its sentinel number
pub fn to_internal(user_layer: i64, numbering: LayerNumbering, raft_layers: usize) -> i64 {
    match numbering {
        LayerNumbering::Preview => user_layer - raft_layers as i64 - 1,
        LayerNumbering::Sliced => user_layer - 1,
    }
}

/// Parse a comma-separated layer list ("15, 20,25")
///
/// Entries that are not integers are skipped and returned as warnings.
pub fn parse_layer_list(text: &str) -> (Vec<i64>, Vec<ParameterError>) {
    let mut layers = Vec::new();
    let mut warnings = Vec::new();
    for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<i64>() {
            Ok(layer) => layers.push(layer),
            Err(_) => warnings.push(ParameterError::InvalidLayerEntry {
                entry: entry.to_string(),
            }),
        }
    }
    (layers, warnings)
}

/// Resolve a request against the stream
pub fn select(
    stream: &LayerStream,
    request: &LayerRequest,
    numbering: LayerNumbering,
    raft_layers: usize,
    sequence: PrintSequence,
) -> Selection {
    let layers: Vec<(usize, i64)> = stream
        .layer_indices()
        .into_iter()
        .filter(|(index, _)| stream.layer_range().contains(index))
        .collect();

    let mut selection = match request {
        LayerRequest::Once(users) => select_once(&layers, users, numbering, raft_layers, sequence),
        LayerRequest::Every { start, step: 0, .. } => {
            let mut selection =
                select_once(&layers, &[*start], numbering, raft_layers, sequence);
            selection.warnings.push(ParameterError::InvalidValue {
                name: "insert_frequency".to_string(),
                reason: "a step of 0 is not allowed; inserting once at the start layer"
                    .to_string(),
            });
            selection
        }
        LayerRequest::Every { start, end, step } => {
            let start = to_internal(*start, numbering, raft_layers);
            let end = end.map(|e| to_internal(e, numbering, raft_layers));
            select_every(&layers, start, end, i64::from(*step), sequence)
        }
    };

    selection.targets.sort_by_key(|t| t.index);
    selection.targets.dedup_by_key(|t| t.index);
    tracing::debug!(
        "Selected {} blocks ({} requested, {} missed)",
        selection.targets.len(),
        selection.requested,
        selection.missed
    );
    selection
}

fn select_once(
    layers: &[(usize, i64)],
    users: &[i64],
    numbering: LayerNumbering,
    raft_layers: usize,
    sequence: PrintSequence,
) -> Selection {
    let mut selection = Selection {
        requested: users.len(),
        ..Selection::default()
    };
    for user in users {
        let wanted = to_internal(*user, numbering, raft_layers);
        let mut found = false;
        let mut matched_in_object = false;
        for &(index, layer) in layers {
            if layer == 0 && sequence == PrintSequence::OneAtATime {
                matched_in_object = false;
            }
            if layer == wanted && !matched_in_object {
                selection.targets.push(Target { index, layer });
                found = true;
                matched_in_object = true;
                if sequence == PrintSequence::AllAtOnce {
                    break;
                }
            }
        }
        if !found {
            selection.missed += 1;
        }
    }
    selection
}

fn select_every(
    layers: &[(usize, i64)],
    start: i64,
    end: Option<i64>,
    step: i64,
    sequence: PrintSequence,
) -> Selection {
    let mut selection = Selection::default();
    let in_range = |n: i64| end.is_none_or(|e| n <= e);
    let mut next = start;
    let mut seen_layers = false;

    for &(index, layer) in layers {
        if layer == 0 && seen_layers && sequence == PrintSequence::OneAtATime {
            // next object: restart the count, skipping raft-only numbers
            next = start;
            while next < 0 {
                next += step;
            }
        }
        seen_layers = true;

        while next < layer && in_range(next) {
            selection.requested += 1;
            selection.missed += 1;
            next += step;
        }
        if layer == next && in_range(next) {
            selection.requested += 1;
            selection.targets.push(Target { index, layer });
            next += step;
        }
    }

    // requested layers beyond the last one in the file
    if let Some(end) = end {
        while next <= end {
            selection.requested += 1;
            selection.missed += 1;
            next += step;
        }
    }
    selection
}
