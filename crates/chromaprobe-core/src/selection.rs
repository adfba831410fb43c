//! Selection rectangle and its shared, copy-on-read handle.
//!
//! Coordinates are normalised to `[0, 1]` in both axes. A pixel is selected
//! when its centre lies in the closed rectangle. While the user drags a
//! handle the state is marked `editable`; the reduction keeps using the last
//! committed rectangle until the edit ends.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::uniforms::SelectionUniform;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionState {
    pub x1: f32,
    pub x2: f32,
    pub y1: f32,
    pub y2: f32,
    #[serde(default)]
    pub editable: bool,
}

/// Pixel-space rectangle, inclusive origin, exclusive extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Normalised coordinate of the centre of pixel `index` along an axis of
/// `extent` pixels.
pub fn pixel_center(index: u32, extent: u32) -> f32 {
    (index as f32 + 0.5) / extent as f32
}

impl SelectionState {
    pub const FULL_FRAME: Self = Self {
        x1: 0.0,
        x2: 1.0,
        y1: 0.0,
        y2: 1.0,
        editable: false,
    };

    pub fn new(x1: f32, x2: f32, y1: f32, y2: f32) -> Self {
        Self {
            x1,
            x2,
            y1,
            y2,
            editable: false,
        }
    }

    /// Order each axis and clamp to the unit square. Non-finite coordinates
    /// collapse to 0.
    pub fn normalized(self) -> Self {
        let fix = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let (x1, x2) = (fix(self.x1), fix(self.x2));
        let (y1, y2) = (fix(self.y1), fix(self.y2));
        Self {
            x1: x1.min(x2),
            x2: x1.max(x2),
            y1: y1.min(y2),
            y2: y1.max(y2),
            editable: self.editable,
        }
    }

    /// Zero-area rectangles select nothing, even if a pixel centre happens to
    /// sit exactly on the line.
    pub fn is_empty(&self) -> bool {
        let n = self.normalized();
        n.x1 >= n.x2 || n.y1 >= n.y2
    }

    /// Closed-interval containment test on an already normalised state.
    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= self.x1 && u <= self.x2 && v >= self.y1 && v <= self.y2
    }

    /// Conservative pixel bounding box for a `width × height` frame.
    ///
    /// The box may include one extra pixel on each side; [`contains`] stays
    /// authoritative per pixel. `None` when the selection is empty.
    ///
    /// [`contains`]: Self::contains
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<PixelRect> {
        if self.is_empty() || width == 0 || height == 0 {
            return None;
        }
        let n = self.normalized();
        let span = |lo: f32, hi: f32, extent: u32| {
            let first = ((lo * extent as f32 - 0.5).floor() - 1.0).max(0.0) as u32;
            let last = ((hi * extent as f32 - 0.5).ceil() + 1.0).max(0.0) as u32;
            let last = last.min(extent - 1);
            (first.min(last), last)
        };
        let (x0, x1) = span(n.x1, n.x2, width);
        let (y0, y1) = span(n.y1, n.y2, height);
        Some(PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        })
    }

    pub fn to_uniform(&self) -> SelectionUniform {
        SelectionUniform {
            x1: self.x1,
            x2: self.x2,
            y1: self.y1,
            y2: self.y2,
            editable: u32::from(self.editable),
            _pad: [0; 3],
        }
    }
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::FULL_FRAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SelectionSlots {
    current: SelectionState,
    committed: SelectionState,
}

/// Consistent copy of both selection states taken under one lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionSnapshot {
    /// What the overlay draws, possibly mid-drag and unordered.
    pub current: SelectionState,
    /// Normalised rectangle the reduction uses.
    pub committed: SelectionState,
}

/// Selection state shared between the interaction thread and frame
/// processing.
///
/// Readers take a [`snapshot`](Self::snapshot) per frame and never hold the
/// lock while processing.
#[derive(Debug, Clone)]
pub struct SharedSelection {
    inner: Arc<Mutex<SelectionSlots>>,
}

impl SharedSelection {
    pub fn new(initial: SelectionState) -> Self {
        let committed = SelectionState {
            editable: false,
            ..initial.normalized()
        };
        Self {
            inner: Arc::new(Mutex::new(SelectionSlots {
                current: initial,
                committed,
            })),
        }
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        let slots = *self.inner.lock();
        SelectionSnapshot {
            current: slots.current,
            committed: slots.committed,
        }
    }

    pub fn current(&self) -> SelectionState {
        self.inner.lock().current
    }

    /// Replace the rectangle. Non-editable updates commit immediately.
    pub fn set(&self, selection: SelectionState) {
        let mut slots = self.inner.lock();
        slots.current = selection;
        if !selection.editable {
            slots.committed = selection.normalized();
        }
    }

    /// Start a drag; the committed rectangle is frozen until [`commit`].
    ///
    /// [`commit`]: Self::commit
    pub fn begin_edit(&self) {
        self.inner.lock().current.editable = true;
    }

    /// Move the in-progress rectangle.
    pub fn update(&self, x1: f32, x2: f32, y1: f32, y2: f32) {
        let mut slots = self.inner.lock();
        let editable = slots.current.editable;
        slots.current = SelectionState {
            editable,
            ..SelectionState::new(x1, x2, y1, y2)
        };
        if !editable {
            slots.committed = slots.current.normalized();
        }
    }

    /// End a drag: normalise the rectangle and hand it to the reduction.
    pub fn commit(&self) -> SelectionState {
        let mut slots = self.inner.lock();
        let committed = SelectionState {
            editable: false,
            ..slots.current.normalized()
        };
        slots.current = committed;
        slots.committed = committed;
        committed
    }
}

impl Default for SharedSelection {
    fn default() -> Self {
        Self::new(SelectionState::FULL_FRAME)
    }
}
