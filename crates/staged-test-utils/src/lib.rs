//! Testing utilities for the staged render workspace
//!
//! Shared fixtures: chunk builders, an ordering log, and segment trees.

#![allow(missing_docs)]

use bytes::Bytes;
use staged_core::StageClock;
use staged_sched::Callback;
use staged_stream::StageChunks;
use staged_validate::{FlightRow, RscNode, SegmentPath, SegmentTree};
use std::cell::RefCell;
use std::rc::Rc;

pub fn chunk(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

pub fn bucket(texts: &[&str]) -> StageChunks {
    texts.iter().map(|text| chunk(text)).collect::<Vec<_>>().into()
}

pub fn bucket_text(chunks: &StageChunks) -> String {
    String::from_utf8_lossy(&chunks.concat()).into_owned()
}

/// Ordered record of events on a single-threaded loop
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// Callback that records `entry` when run
    pub fn callback(&self, entry: impl Into<String>) -> Callback {
        let log = self.clone();
        let entry = entry.into();
        Box::new(move || log.push(entry))
    }

    /// Callback that records `entry` with the clock's stage when run
    pub fn stage_callback(&self, clock: &StageClock, entry: impl Into<String>) -> Callback {
        let (log, clock) = (self.clone(), clock.clone());
        let entry = entry.into();
        Box::new(move || log.push(format!("{entry}@{}", clock.current_stage())))
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// `/` with `/profile` (flagged) holding `/profile/settings` (flagged),
/// next to an unflagged `/news`
pub fn profile_tree() -> SegmentTree {
    SegmentTree::leaf("")
        .with_child(
            SegmentTree::leaf("profile")
                .with_runtime_prefetch(true)
                .with_child(SegmentTree::leaf("settings").with_runtime_prefetch(true)),
        )
        .with_child(SegmentTree::leaf("news"))
}

pub fn segment_path(segments: &[&str]) -> SegmentPath {
    segments
        .iter()
        .fold(SegmentPath::root(), |path, segment| path.child(segment))
}

pub fn segment_row(segments: &[&str], text: &str) -> Bytes {
    FlightRow::Segment {
        path: segment_path(segments),
        node: RscNode::text(text),
    }
    .encode()
    .unwrap()
}

pub fn tree_row(tree: &SegmentTree) -> Bytes {
    FlightRow::Tree { tree: tree.clone() }.encode().unwrap()
}
