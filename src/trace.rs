// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hierarchical record of every syntax element read from a bitstream.
//!
//! A [`SyntaxTrace`] is a flat, bounded log of scopes and fields. Each entry
//! carries its nesting depth and the absolute bit range it covers, so the
//! nested structure can be rebuilt with [`SyntaxTrace::to_tree`] or printed
//! as indented text through its `Display` implementation.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Range;

/// Default number of entries kept by a trace before the oldest ones are
/// dropped.
pub const DEFAULT_TRACE_CAPACITY: usize = 16384;

const INDENT: &str = "  ";
const ROOT_SCOPE: &str = "bitstream";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceOptions {
    /// Whether fields and scopes are recorded at all. The scope stack is
    /// maintained either way so errors can still name where they happened.
    pub enabled: bool,
    /// Maximum number of entries kept. When exceeded, the oldest entries are
    /// discarded first.
    pub capacity: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            enabled: !cfg!(fuzzing),
            capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

/// The value of a single syntax element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Flag(bool),
    Unsigned(u64),
    Signed(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Flag(flag) => write!(f, "{}", u8::from(*flag)),
            FieldValue::Unsigned(value) => write!(f, "{}", value),
            FieldValue::Signed(value) => write!(f, "{}", value),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

impl From<u8> for FieldValue {
    fn from(value: u8) -> Self {
        FieldValue::Unsigned(value.into())
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::Unsigned(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Unsigned(value.into())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Unsigned(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Signed(value.into())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Signed(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceEntry {
    /// A syntax structure, e.g. `superres_params()`. `bits` covers everything
    /// read while the scope was open.
    Scope {
        name: String,
        depth: usize,
        bits: Range<u64>,
    },
    /// A syntax element or derived value. Derived values have an empty bit
    /// range.
    Field {
        name: String,
        depth: usize,
        value: FieldValue,
        meaning: Option<String>,
        bits: Range<u64>,
    },
}

impl TraceEntry {
    pub fn name(&self) -> &str {
        match self {
            TraceEntry::Scope { name, .. } | TraceEntry::Field { name, .. } => name,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TraceEntry::Scope { depth, .. } | TraceEntry::Field { depth, .. } => *depth,
        }
    }

    pub fn bits(&self) -> &Range<u64> {
        match self {
            TraceEntry::Scope { bits, .. } | TraceEntry::Field { bits, .. } => bits,
        }
    }

    /// The field value, or `None` for scopes.
    pub fn value(&self) -> Option<FieldValue> {
        match self {
            TraceEntry::Scope { .. } => None,
            TraceEntry::Field { value, .. } => Some(*value),
        }
    }
}

/// A node of the rebuilt trace tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceNode {
    pub name: String,
    pub value: Option<FieldValue>,
    pub meaning: Option<String>,
    pub bits: Range<u64>,
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    /// Finds the first descendant (depth first) called `name`.
    pub fn find(&self, name: &str) -> Option<&TraceNode> {
        self.children
            .iter()
            .find_map(|child| if child.name == name { Some(child) } else { child.find(name) })
    }
}

impl From<&TraceEntry> for TraceNode {
    fn from(entry: &TraceEntry) -> Self {
        let meaning = match entry {
            TraceEntry::Field { meaning, .. } => meaning.clone(),
            TraceEntry::Scope { .. } => None,
        };

        Self {
            name: entry.name().to_string(),
            value: entry.value(),
            meaning,
            bits: entry.bits().clone(),
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct OpenScope {
    name: String,
    /// Sequence number of the matching `TraceEntry::Scope`, if recorded.
    entry: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct SyntaxTrace {
    entries: VecDeque<TraceEntry>,
    open: Vec<OpenScope>,
    enabled: bool,
    capacity: usize,
    /// Number of entries evicted from the front of `entries`.
    dropped: u64,
    /// Added to every bit position handed to the trace.
    origin: u64,
}

impl Default for SyntaxTrace {
    fn default() -> Self {
        Self::new(&TraceOptions::default())
    }
}

impl SyntaxTrace {
    pub fn new(options: &TraceOptions) -> Self {
        Self {
            entries: VecDeque::new(),
            open: Vec::new(),
            enabled: options.enabled && options.capacity > 0,
            capacity: options.capacity,
            dropped: 0,
            origin: 0,
        }
    }

    /// A trace that only keeps track of the scope stack.
    pub fn disabled() -> Self {
        Self::new(&TraceOptions {
            enabled: false,
            capacity: 0,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets the absolute bit offset of position 0 of the next reader using
    /// this trace.
    pub fn set_origin(&mut self, origin: u64) {
        self.origin = origin;
    }

    pub(crate) fn open_scope(&mut self, name: &str, position: u64) {
        let entry = if self.enabled {
            let start = self.origin + position;
            let seq = self.push(TraceEntry::Scope {
                name: name.to_string(),
                depth: self.open.len(),
                bits: start..start,
            });
            Some(seq)
        } else {
            None
        };

        self.open.push(OpenScope {
            name: name.to_string(),
            entry,
        });
    }

    pub(crate) fn close_scope(&mut self, position: u64) {
        let Some(scope) = self.open.pop() else {
            return;
        };

        let end = self.origin + position;
        if let Some(index) = scope.entry.and_then(|seq| self.index_of(seq)) {
            if let Some(TraceEntry::Scope { bits, .. }) = self.entries.get_mut(index) {
                bits.end = end;
            }
        }
    }

    pub(crate) fn record(&mut self, name: &str, value: FieldValue, bits: Range<u64>) {
        let bits = self.origin + bits.start..self.origin + bits.end;
        log::trace!(
            "{}{} = {} [{}..{}]",
            INDENT.repeat(self.open.len()),
            name,
            value,
            bits.start,
            bits.end
        );

        if !self.enabled {
            return;
        }

        self.push(TraceEntry::Field {
            name: name.to_string(),
            depth: self.open.len(),
            value,
            meaning: None,
            bits,
        });
    }

    /// Attaches a human readable meaning to the most recent field.
    pub(crate) fn annotate_last(&mut self, text: String) {
        if let Some(TraceEntry::Field { meaning, .. }) = self.entries.back_mut() {
            *meaning = Some(text);
        }
    }

    /// The names of the currently open scopes joined by `/`.
    pub fn scope_path(&self) -> String {
        if self.open.is_empty() {
            return ROOT_SCOPE.to_string();
        }

        self.open
            .iter()
            .map(|scope| scope.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that were discarded because the capacity was
    /// exceeded.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Looks up the most recent field called `name`.
    pub fn field(&self, name: &str) -> Option<&TraceEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| matches!(entry, TraceEntry::Field { .. }) && entry.name() == name)
    }

    /// Rebuilds the nested structure of the recorded entries. Entries whose
    /// enclosing scope was evicted become roots.
    pub fn to_tree(&self) -> Vec<TraceNode> {
        fn attach(stack: &mut [(usize, TraceNode)], roots: &mut Vec<TraceNode>, node: TraceNode) {
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(node),
                None => roots.push(node),
            }
        }

        let mut roots = Vec::new();
        let mut stack: Vec<(usize, TraceNode)> = Vec::new();

        for entry in &self.entries {
            let depth = entry.depth();
            while stack.last().map_or(false, |(d, _)| *d >= depth) {
                if let Some((_, node)) = stack.pop() {
                    attach(&mut stack, &mut roots, node);
                }
            }

            let node = TraceNode::from(entry);
            match entry {
                TraceEntry::Scope { .. } => stack.push((depth, node)),
                TraceEntry::Field { .. } => attach(&mut stack, &mut roots, node),
            }
        }

        while let Some((_, node)) = stack.pop() {
            attach(&mut stack, &mut roots, node);
        }

        roots
    }

    /// Moves all entries of `other` after ours.
    pub fn append(&mut self, other: SyntaxTrace) {
        self.dropped += other.dropped;
        for entry in other.entries {
            if self.enabled {
                self.push(entry);
            }
        }
    }

    fn push(&mut self, entry: TraceEntry) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }

        self.entries.push_back(entry);
        self.dropped + self.entries.len() as u64 - 1
    }

    fn index_of(&self, seq: u64) -> Option<usize> {
        seq.checked_sub(self.dropped).map(|index| index as usize)
    }
}

impl fmt::Display for SyntaxTrace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.dropped > 0 {
            writeln!(f, "... {} earlier entries dropped", self.dropped)?;
        }

        for entry in &self.entries {
            let indent = INDENT.repeat(entry.depth());
            match entry {
                TraceEntry::Scope { name, bits, .. } => {
                    writeln!(f, "{}{} [bits {}..{}]", indent, name, bits.start, bits.end)?
                }
                TraceEntry::Field {
                    name,
                    value,
                    meaning,
                    bits,
                    ..
                } => {
                    write!(f, "{}{} = {}", indent, name, value)?;
                    if let Some(meaning) = meaning {
                        write!(f, " ({})", meaning)?;
                    }
                    writeln!(f, " [bits {}..{}]", bits.start, bits.end)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace(options: &TraceOptions) -> SyntaxTrace {
        let mut trace = SyntaxTrace::new(options);
        trace.open_scope("frame_size()", 0);
        trace.record("frame_width_minus_1", FieldValue::Unsigned(639), 0..10);
        trace.open_scope("superres_params()", 10);
        trace.record("use_superres", FieldValue::Flag(true), 10..11);
        trace.record("coded_denom", FieldValue::Unsigned(3), 11..14);
        trace.annotate_last("SuperresDenom 12".into());
        trace.close_scope(14);
        trace.record("FrameWidth", FieldValue::Unsigned(427), 14..14);
        trace.close_scope(14);
        trace
    }

    #[test]
    fn scopes_nest_and_close() {
        let trace = sample_trace(&Default::default());
        assert_eq!(trace.depth(), 0);
        assert_eq!(trace.len(), 6);

        let entries: Vec<_> = trace.entries().collect();
        assert_eq!(entries[0].bits(), &(0..14));
        assert_eq!(entries[2].name(), "superres_params()");
        assert_eq!(entries[2].depth(), 1);
        assert_eq!(entries[2].bits(), &(10..14));
        assert_eq!(entries[3].depth(), 2);

        let coded_denom = trace.field("coded_denom").unwrap();
        assert_eq!(coded_denom.value(), Some(FieldValue::Unsigned(3)));
    }

    #[test]
    fn rebuild_tree() {
        let trace = sample_trace(&Default::default());
        let roots = trace.to_tree();
        assert_eq!(roots.len(), 1);

        let frame_size = &roots[0];
        assert_eq!(frame_size.name, "frame_size()");
        assert_eq!(frame_size.children.len(), 3);

        let superres = frame_size.find("superres_params()").unwrap();
        assert_eq!(superres.children.len(), 2);
        assert_eq!(superres.children[1].meaning.as_deref(), Some("SuperresDenom 12"));
        assert_eq!(
            frame_size.find("FrameWidth").unwrap().value,
            Some(FieldValue::Unsigned(427))
        );
    }

    #[test]
    fn render_text() {
        let trace = sample_trace(&Default::default());
        let text = trace.to_string();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "frame_size() [bits 0..14]");
        assert_eq!(lines[1], "  frame_width_minus_1 = 639 [bits 0..10]");
        assert_eq!(lines[3], "    use_superres = 1 [bits 10..11]");
        assert_eq!(lines[4], "    coded_denom = 3 (SuperresDenom 12) [bits 11..14]");
    }

    #[test]
    fn capacity_keeps_most_recent() {
        let trace = sample_trace(&TraceOptions {
            enabled: true,
            capacity: 3,
        });

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.dropped(), 3);

        let names: Vec<_> = trace.entries().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["use_superres", "coded_denom", "FrameWidth"]);

        // The evicted scopes do not prevent rebuilding what is left.
        let roots = trace.to_tree();
        assert_eq!(roots.len(), 3);
        assert!(trace.to_string().starts_with("... 3 earlier entries dropped"));
    }

    #[test]
    fn disabled_trace_keeps_scope_path() {
        let mut trace = SyntaxTrace::disabled();
        trace.open_scope("frame_header_obu()", 0);
        trace.open_scope("tile_info()", 5);
        trace.record("uniform_tile_spacing_flag", FieldValue::Flag(true), 5..6);

        assert!(trace.is_empty());
        assert_eq!(trace.scope_path(), "frame_header_obu()/tile_info()");

        trace.close_scope(6);
        trace.close_scope(6);
        assert_eq!(trace.scope_path(), "bitstream");
    }

    #[test]
    fn origin_offsets_positions() {
        let mut trace = SyntaxTrace::default();
        trace.set_origin(16);
        trace.record("obu_size", FieldValue::Unsigned(2), 0..8);

        assert_eq!(trace.field("obu_size").unwrap().bits(), &(16..24));
    }

    #[test]
    fn append_traces() {
        let mut first = SyntaxTrace::default();
        first.record("a", FieldValue::Signed(-1), 0..2);
        let mut second = SyntaxTrace::default();
        second.record("b", FieldValue::Unsigned(1), 2..3);

        first.append(second);
        let names: Vec<_> = first.entries().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
