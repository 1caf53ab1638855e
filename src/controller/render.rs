//! Renderer seam. The controller never draws; it hands display state, row
//! operations and alerts to a [`Renderer`].

#![allow(missing_docs)]

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::controller::display::DisplayState;
use crate::status::actions::ActionAlert;
use crate::status::reconcile::RowOp;

pub trait Renderer: Send {
    /// Called once per completed pass, after any row operations.
    fn render(&mut self, state: &DisplayState);
    /// One batch per layout change, HUD operations first.
    fn apply_row_ops(&mut self, ops: &[RowOp]);
    fn present_error(&mut self, alert: &ActionAlert);
}

/// Renderer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _state: &DisplayState) {}
    fn apply_row_ops(&mut self, _ops: &[RowOp]) {}
    fn present_error(&mut self, _alert: &ActionAlert) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderRecord {
    Frame { state: Box<DisplayState> },
    RowOps { ops: Vec<RowOp> },
    Alert { alert: ActionAlert },
}

/// Keeps every call in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    log: Arc<Mutex<Vec<RenderRecord>>>,
}

impl RecordingRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<RenderRecord> {
        self.log.lock().clone()
    }

    #[must_use]
    pub fn last_frame(&self) -> Option<DisplayState> {
        self.log.lock().iter().rev().find_map(|record| match record {
            RenderRecord::Frame { state } => Some((**state).clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|record| matches!(record, RenderRecord::Frame { .. }))
            .count()
    }

    /// Every row-operation batch, in order.
    #[must_use]
    pub fn row_op_batches(&self) -> Vec<Vec<RowOp>> {
        self.log
            .lock()
            .iter()
            .filter_map(|record| match record {
                RenderRecord::RowOps { ops } => Some(ops.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<ActionAlert> {
        self.log
            .lock()
            .iter()
            .filter_map(|record| match record {
                RenderRecord::Alert { alert } => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, state: &DisplayState) {
        self.log.lock().push(RenderRecord::Frame {
            state: Box::new(state.clone()),
        });
    }

    fn apply_row_ops(&mut self, ops: &[RowOp]) {
        self.log.lock().push(RenderRecord::RowOps { ops: ops.to_vec() });
    }

    fn present_error(&mut self, alert: &ActionAlert) {
        self.log.lock().push(RenderRecord::Alert {
            alert: alert.clone(),
        });
    }
}

/// Writes each call as one JSON line.
pub struct JsonLinesRenderer<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesRenderer<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, record: &RenderRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                let _ = writeln!(self.out, "{line}");
                let _ = self.out.flush();
            }
            Err(e) => eprintln!("[LSC-RENDER] serialize error: {e}"),
        }
    }
}

impl<W: Write + Send> Renderer for JsonLinesRenderer<W> {
    fn render(&mut self, state: &DisplayState) {
        self.emit(&RenderRecord::Frame {
            state: Box::new(state.clone()),
        });
    }

    fn apply_row_ops(&mut self, ops: &[RowOp]) {
        self.emit(&RenderRecord::RowOps { ops: ops.to_vec() });
    }

    fn present_error(&mut self, alert: &ActionAlert) {
        self.emit(&RenderRecord::Alert {
            alert: alert.clone(),
        });
    }
}
