//! Freehand drawings.
//!
//! DESIGN
//! ======
//! While the pointer is down the stroke is only a point list; the live
//! overlay is the host's concern. Pointer-up rasterizes the path once into
//! a self-contained SVG snapshot, and that single image is what gets
//! broadcast; peers never see the point stream. One stroke, one
//! `drawing-created` event.
//!
//! Drawings live for five seconds from local render, per peer, same
//! countdown rules as notes. There is no user-facing delete for drawings.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use events::{PeerRef, WireDrawing};

use crate::identity::LocalUser;

use super::ExpiryQueue;

pub const DRAWING_LIFETIME: Duration = Duration::from_secs(5);

const STROKE_WIDTH: f64 = 3.0;

// =============================================================================
// STROKE CAPTURE
// =============================================================================

/// Accumulates pointer positions for the stroke in progress.
pub struct StrokeBuilder {
    color: String,
    points: Vec<(f64, f64)>,
}

impl StrokeBuilder {
    #[must_use]
    pub fn start(color: impl Into<String>, x: f64, y: f64) -> Self {
        Self { color: color.into(), points: vec![(x, y)] }
    }

    pub fn push(&mut self, x: f64, y: f64) {
        self.points.push((x, y));
    }

    #[must_use]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Rasterize the path into a static snapshot. A stroke with fewer than
    /// two points drew nothing and yields `None`.
    #[must_use]
    pub fn rasterize(self) -> Option<StrokeSnapshot> {
        if self.points.len() < 2 {
            return None;
        }

        let (mut min_x, mut min_y) = self.points[0];
        let (mut max_x, mut max_y) = self.points[0];
        for &(x, y) in &self.points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let margin = STROKE_WIDTH;
        let width = (max_x - min_x) + margin * 2.0;
        let height = (max_y - min_y) + margin * 2.0;

        let mut path = String::new();
        for (i, &(x, y)) in self.points.iter().enumerate() {
            let px = x - min_x + margin;
            let py = y - min_y + margin;
            let op = if i == 0 { 'M' } else { 'L' };
            let _ = write!(path, "{}{op}{px:.1} {py:.1}", if i == 0 { "" } else { " " });
        }

        let image = format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w:.1}" height="{h:.1}" "#,
                r#"viewBox="0 0 {w:.1} {h:.1}"><path d="{d}" fill="none" stroke="{color}" "#,
                r#"stroke-width="{sw}" stroke-linecap="round" stroke-linejoin="round"/></svg>"#
            ),
            w = width,
            h = height,
            d = path,
            color = self.color,
            sw = STROKE_WIDTH,
        );

        Some(StrokeSnapshot { image, width, height })
    }
}

/// One rasterized stroke.
pub struct StrokeSnapshot {
    pub image: String,
    pub width: f64,
    pub height: f64,
}

// =============================================================================
// DRAWING ENTITY
// =============================================================================

#[derive(Clone, Debug, Serialize)]
pub struct Drawing {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    /// Self-contained SVG document.
    pub image: String,
    pub width: f64,
    pub height: f64,
    #[serde(skip)]
    pub expires_at: Instant,
}

// =============================================================================
// BOARD
// =============================================================================

pub struct DrawingBoard {
    drawings: HashMap<String, Drawing>,
    expiry: ExpiryQueue,
    active: Option<StrokeBuilder>,
}

impl DrawingBoard {
    #[must_use]
    pub fn new() -> Self {
        Self { drawings: HashMap::new(), expiry: ExpiryQueue::new(), active: None }
    }

    /// Pointer-down: begin a stroke. An unfinished previous stroke is
    /// abandoned.
    pub fn stroke_start(&mut self, color: &str, x: f64, y: f64) {
        self.active = Some(StrokeBuilder::start(color, x, y));
    }

    /// Pointer-move: extend the stroke. Ignored when no stroke is active.
    pub fn stroke_point(&mut self, x: f64, y: f64) {
        if let Some(stroke) = &mut self.active {
            stroke.push(x, y);
        }
    }

    /// Pointer-up: rasterize once, render locally, start the countdown, and
    /// return the wire form to persist and broadcast. `None` when no stroke
    /// was active or nothing was drawn.
    pub fn stroke_end(&mut self, local: &LocalUser, now: Instant) -> Option<WireDrawing> {
        let snapshot = self.active.take()?.rasterize()?;
        let id = Uuid::new_v4().to_string();
        let expires_at = now + DRAWING_LIFETIME;
        self.drawings.insert(
            id.clone(),
            Drawing {
                id: id.clone(),
                author_id: local.id.clone(),
                author_name: local.name.clone(),
                image: snapshot.image.clone(),
                width: snapshot.width,
                height: snapshot.height,
                expires_at,
            },
        );
        self.expiry.schedule(id.clone(), expires_at);
        Some(WireDrawing {
            id,
            image: snapshot.image,
            width: snapshot.width,
            height: snapshot.height,
        })
    }

    /// Render a peer's drawing; its countdown starts now on this peer.
    pub fn receive(&mut self, sender: &PeerRef, drawing: &WireDrawing, now: Instant) {
        let expires_at = now + DRAWING_LIFETIME;
        self.drawings.insert(
            drawing.id.clone(),
            Drawing {
                id: drawing.id.clone(),
                author_id: sender.id.clone(),
                author_name: sender.name.clone(),
                image: drawing.image.clone(),
                width: drawing.width,
                height: drawing.height,
                expires_at,
            },
        );
        self.expiry.schedule(drawing.id.clone(), expires_at);
    }

    /// Remove immediately, bypassing the countdown (inbound
    /// `drawing-deleted`).
    pub fn remove(&mut self, drawing_id: &str) -> bool {
        self.drawings.remove(drawing_id).is_some()
    }

    /// Destroy every drawing whose countdown has elapsed. Returns the
    /// removed ids.
    pub fn expire_due(&mut self, now: Instant) -> Vec<String> {
        let due = self.expiry.pop_due(now, |id| self.drawings.contains_key(id));
        for id in &due {
            self.drawings.remove(id);
        }
        due
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.expiry.next_deadline(|id| self.drawings.contains_key(id))
    }

    #[must_use]
    pub fn get(&self, drawing_id: &str) -> Option<&Drawing> {
        self.drawings.get(drawing_id)
    }

    pub fn drawings(&self) -> impl Iterator<Item = &Drawing> {
        self.drawings.values()
    }

    #[must_use]
    pub fn stroke_in_progress(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.drawings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drawings.is_empty()
    }
}

impl Default for DrawingBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "drawings_test.rs"]
mod tests;
