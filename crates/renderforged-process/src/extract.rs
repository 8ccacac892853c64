//! Recognition of structured blocks embedded in free-text tool output.
//!
//! Tools such as HandBrakeCLI interleave ordinary log lines with JSON
//! documents introduced by a marker (`JSON Title Set: {`, `Progress: {`).
//! [`BlockExtractor`] is fed one line at a time and reports whether the line
//! was plain text, completed a block, matched a single-line record, or was
//! absorbed into a block still in progress.

use regex::Regex;

use crate::{Error, Result};

/// Decides whether a line closes the block currently being read.
pub trait BlockEnd: Send + Sync {
    fn is_end(&self, line: &str) -> bool;
}

/// Closing brace at column zero. Nested lines of a pretty-printed JSON
/// document are always indented, so only the outermost `}` matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnZeroBrace;

impl BlockEnd for ColumnZeroBrace {
    fn is_end(&self, line: &str) -> bool {
        line.starts_with('}')
    }
}

/// Any line with no leading indentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unindented;

impl BlockEnd for Unindented {
    fn is_end(&self, line: &str) -> bool {
        line.chars().next().is_some_and(|c| !c.is_whitespace())
    }
}

impl<F> BlockEnd for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_end(&self, line: &str) -> bool {
        self(line)
    }
}

/// What to do when a marker matches a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerAction {
    /// Start collecting a block, seeded with the given opening text.
    Capture { seed: String },
    /// Drop every line up to and including the end of the block.
    Discard,
    /// Report the capture groups of the matching line.
    Record,
}

/// A pattern that introduces a block or a record.
#[derive(Debug, Clone)]
pub struct Marker {
    label: String,
    pattern: Regex,
    action: MarkerAction,
}

impl Marker {
    /// A marker opening a JSON object that should be parsed.
    pub fn capture(label: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            label: label.into(),
            pattern: Regex::new(pattern)?,
            action: MarkerAction::Capture { seed: "{".into() },
        })
    }

    /// A marker opening a block that should be skipped entirely.
    pub fn discard(label: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            label: label.into(),
            pattern: Regex::new(pattern)?,
            action: MarkerAction::Discard,
        })
    }

    /// A single-line marker whose capture groups are reported.
    pub fn record(label: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            label: label.into(),
            pattern: Regex::new(pattern)?,
            action: MarkerAction::Record,
        })
    }

    /// Replace the text a captured block starts with.
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        if let MarkerAction::Capture { .. } = self.action {
            self.action = MarkerAction::Capture { seed: seed.into() };
        }
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn action(&self) -> &MarkerAction {
        &self.action
    }
}

/// Result of feeding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// The line matched nothing; hand it to the plain-line handler.
    Line(String),
    /// The line closed a captured block.
    Block {
        marker: String,
        value: serde_json::Value,
    },
    /// The line matched a record marker.
    Record { marker: String, groups: Vec<String> },
    /// The line was consumed by an open or discarded block.
    Absorbed,
}

#[derive(Debug)]
enum State {
    Normal,
    Capturing { marker: String, buffer: Vec<String> },
    Discarding,
}

/// Line-by-line block recognizer.
pub struct BlockExtractor {
    markers: Vec<Marker>,
    end: Box<dyn BlockEnd>,
    state: State,
}

impl BlockExtractor {
    /// Create an extractor with the given markers, tried in order, and the
    /// default [`ColumnZeroBrace`] end test.
    pub fn new(markers: Vec<Marker>) -> Self {
        Self::with_block_end(markers, ColumnZeroBrace)
    }

    pub fn with_block_end(markers: Vec<Marker>, end: impl BlockEnd + 'static) -> Self {
        Self {
            markers,
            end: Box::new(end),
            state: State::Normal,
        }
    }

    /// True while a capture or discard block is open.
    pub fn in_block(&self) -> bool {
        !matches!(self.state, State::Normal)
    }

    /// Feed one line of output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockParse`] if a captured block closes but is not
    /// valid JSON. The extractor is back in its normal state afterwards.
    pub fn feed(&mut self, line: &str) -> Result<Extracted> {
        match &mut self.state {
            State::Normal => Ok(self.match_markers(line)),
            State::Discarding => {
                if self.end.is_end(line) {
                    self.state = State::Normal;
                }
                Ok(Extracted::Absorbed)
            }
            State::Capturing { marker, buffer } => {
                buffer.push(line.trim_end().to_string());
                if !self.end.is_end(line) {
                    return Ok(Extracted::Absorbed);
                }
                let marker = std::mem::take(marker);
                let text = buffer.join("\n");
                self.state = State::Normal;

                let value = serde_json::from_str(&text).map_err(|source| Error::BlockParse {
                    marker: marker.clone(),
                    source,
                })?;
                Ok(Extracted::Block { marker, value })
            }
        }
    }

    fn match_markers(&mut self, line: &str) -> Extracted {
        for marker in &self.markers {
            match &marker.action {
                MarkerAction::Capture { seed } => {
                    if marker.pattern.is_match(line) {
                        self.state = State::Capturing {
                            marker: marker.label.clone(),
                            buffer: vec![seed.clone()],
                        };
                        return Extracted::Absorbed;
                    }
                }
                MarkerAction::Discard => {
                    if marker.pattern.is_match(line) {
                        self.state = State::Discarding;
                        return Extracted::Absorbed;
                    }
                }
                MarkerAction::Record => {
                    if let Some(caps) = marker.pattern.captures(line) {
                        let groups = caps
                            .iter()
                            .skip(1)
                            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                            .collect();
                        return Extracted::Record {
                            marker: marker.label.clone(),
                            groups,
                        };
                    }
                }
            }
        }
        Extracted::Line(line.to_string())
    }
}

impl std::fmt::Debug for BlockExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockExtractor")
            .field("markers", &self.markers)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan_extractor() -> BlockExtractor {
        BlockExtractor::new(vec![
            Marker::capture("title_set", r"JSON Title Set: \{").unwrap(),
            Marker::discard("progress", r"Progress: \{").unwrap(),
        ])
    }

    fn feed_all(extractor: &mut BlockExtractor, text: &str) -> Vec<Extracted> {
        text.lines().map(|l| extractor.feed(l).unwrap()).collect()
    }

    #[test]
    fn captured_block_matches_source_json() {
        let source = json!({
            "MainFeature": 0,
            "TitleList": [{"Duration": {"Hours": 0, "Minutes": 3}, "AudioList": []}]
        });
        let pretty = serde_json::to_string_pretty(&source).unwrap();
        // The marker line carries the opening brace.
        let body = pretty.strip_prefix("{\n").unwrap();
        let text = format!("[12:00:01] scan done\nJSON Title Set: {{\n{body}\nHandBrake has exited.");

        let mut extractor = scan_extractor();
        let out = feed_all(&mut extractor, &text);

        let blocks: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                Extracted::Block { marker, value } => Some((marker.as_str(), value)),
                _ => None,
            })
            .collect();
        assert_eq!(blocks, vec![("title_set", &source)]);
        assert_eq!(out.first(), Some(&Extracted::Line("[12:00:01] scan done".into())));
        assert_eq!(out.last(), Some(&Extracted::Line("HandBrake has exited.".into())));
        assert!(!extractor.in_block());
    }

    #[test]
    fn discarded_blocks_never_leak() {
        let text = "\
before
Progress: {
    \"State\": \"SCANNING\",
    \"Scanning\": {
        \"Progress\": 0.5
    }
}
after";
        let mut extractor = scan_extractor();
        let out = feed_all(&mut extractor, text);
        assert_eq!(
            out,
            vec![
                Extracted::Line("before".into()),
                Extracted::Absorbed,
                Extracted::Absorbed,
                Extracted::Absorbed,
                Extracted::Absorbed,
                Extracted::Absorbed,
                Extracted::Absorbed,
                Extracted::Line("after".into()),
            ]
        );
    }

    #[test]
    fn record_marker_reports_groups_and_stays_normal() {
        let mut extractor = BlockExtractor::new(vec![Marker::record(
            "frame",
            r"PROGRESS:\s+([0-9:.]+)\s+\((\d+)\)",
        )
        .unwrap()]);

        let out = extractor.feed("PROGRESS:  0:00:00:12 (13): 2 Seconds").unwrap();
        assert_eq!(
            out,
            Extracted::Record {
                marker: "frame".into(),
                groups: vec!["0:00:00:12".into(), "13".into()],
            }
        );
        assert!(!extractor.in_block());
        assert_eq!(
            extractor.feed("PROGRESS:  Total Time Elapsed").unwrap(),
            Extracted::Line("PROGRESS:  Total Time Elapsed".into())
        );
    }

    #[test]
    fn invalid_block_is_an_error_and_resets() {
        let mut extractor = scan_extractor();
        extractor.feed("JSON Title Set: {").unwrap();
        extractor.feed("    \"broken\": ").unwrap();
        let err = extractor.feed("}").unwrap_err();
        assert!(matches!(err, Error::BlockParse { ref marker, .. } if marker == "title_set"));
        assert!(!extractor.in_block());
        assert_eq!(extractor.feed("x").unwrap(), Extracted::Line("x".into()));
    }

    #[test]
    fn pluggable_block_end() {
        let markers = vec![Marker::capture("enc", r"Progress: \{").unwrap()];
        let mut extractor =
            BlockExtractor::with_block_end(markers, |line: &str| line.trim() == "}");
        extractor.feed("Progress: {").unwrap();
        extractor.feed("\"State\": \"WORKING\"").unwrap();
        let out = extractor.feed("  }").unwrap();
        assert_eq!(
            out,
            Extracted::Block {
                marker: "enc".into(),
                value: json!({"State": "WORKING"}),
            }
        );
    }

    #[test]
    fn unindented_end() {
        assert!(Unindented.is_end("}"));
        assert!(Unindented.is_end("Encode done"));
        assert!(!Unindented.is_end("    }"));
        assert!(!Unindented.is_end(""));
        assert!(ColumnZeroBrace.is_end("},"));
        assert!(!ColumnZeroBrace.is_end(" }"));
    }

    #[test]
    fn markers_tried_in_order() {
        let mut extractor = BlockExtractor::new(vec![
            Marker::discard("first", r"Progress").unwrap(),
            Marker::capture("second", r"Progress: \{").unwrap(),
        ]);
        assert_eq!(extractor.feed("Progress: {").unwrap(), Extracted::Absorbed);
        assert_eq!(extractor.feed("\"a\": 1").unwrap(), Extracted::Absorbed);
        assert_eq!(extractor.feed("}").unwrap(), Extracted::Absorbed);
        assert!(!extractor.in_block());
    }
}
