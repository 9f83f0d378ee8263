//! Ephemeral page annotations: sticky notes and freehand drawings.
//!
//! LIFECYCLE
//! =========
//! Both kinds share one lifecycle: create locally, render immediately,
//! persist fire-and-forget, broadcast, then self-destruct on a countdown
//! that starts from the local render. Peers each run their own countdown
//! from the moment they receive the entity, so expiry is per-peer, not
//! synchronized to the author's clock.
//!
//! Deadlines live in a lazy min-heap: explicit removal leaves the heap entry
//! behind and the pop simply skips ids that no longer exist.

pub mod drawings;
pub mod notes;

pub use drawings::{DRAWING_LIFETIME, Drawing, DrawingBoard, StrokeSnapshot};
pub use notes::{NOTE_LIFETIME, NoteBoard, StickyNote};

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use serde::Serialize;

// =============================================================================
// MODES
// =============================================================================

/// Which annotation input mode is armed.
///
/// The exclusion is asymmetric: arming draw mode force-disables notes mode,
/// but arming notes mode leaves draw mode alone. Observed behavior, kept
/// as-is rather than symmetrized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationModes {
    pub notes: bool,
    pub draw: bool,
}

impl AnnotationModes {
    pub fn set_notes(&mut self, on: bool) {
        self.notes = on;
    }

    pub fn set_draw(&mut self, on: bool) {
        self.draw = on;
        if on {
            self.notes = false;
        }
    }
}

// =============================================================================
// CLICK CLASSIFICATION
// =============================================================================

/// Widget chrome a click can land on. Clicks here never place notes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChromeElement {
    Drawer,
    Dock,
    Toolbar,
    Note,
    DrawingOverlay,
}

/// Where a page click landed, as classified by the host shell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClickTarget {
    /// Bare page surface, in page coordinates.
    Page { x: f64, y: f64 },
    Chrome(ChromeElement),
}

// =============================================================================
// EXPIRY QUEUE
// =============================================================================

/// Min-heap of (deadline, entity id).
pub(crate) struct ExpiryQueue {
    heap: BinaryHeap<Reverse<(Instant, String)>>,
}

impl ExpiryQueue {
    pub(crate) fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub(crate) fn schedule(&mut self, id: String, at: Instant) {
        self.heap.push(Reverse((at, id)));
    }

    /// Pop every id whose deadline has passed. Stale entries for entities
    /// removed out-of-band are dropped silently via the `alive` check.
    pub(crate) fn pop_due(&mut self, now: Instant, alive: impl Fn(&str) -> bool) -> Vec<String> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, id))) = self.heap.pop() else {
                break;
            };
            if alive(&id) {
                due.push(id);
            }
        }
        due
    }

    /// Earliest live deadline, discarding stale entries along the way.
    pub(crate) fn next_deadline(&mut self, alive: impl Fn(&str) -> bool) -> Option<Instant> {
        while let Some(Reverse((at, id))) = self.heap.peek() {
            if alive(id) {
                return Some(*at);
            }
            self.heap.pop();
        }
        None
    }
}
