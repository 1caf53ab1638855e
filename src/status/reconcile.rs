//! Minimal row operations for the optional HUD and status rows.

#![allow(missing_docs)]

use serde::Serialize;

use super::mode::StatusRowMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Row {
    Hud,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowOp {
    Insert { row: Row },
    Delete { row: Row },
    Reload { row: Row },
    /// Toggle the busy indicator without reloading the row.
    SetBusy { row: Row, busy: bool },
}

/// Everything row visibility depends on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayLayout {
    pub landscape: bool,
    pub mode: StatusRowMode,
}

impl DisplayLayout {
    #[must_use]
    pub const fn hud_visible(&self) -> bool {
        !self.landscape
    }

    #[must_use]
    pub const fn status_visible(&self) -> bool {
        !self.landscape && self.mode.has_row()
    }
}

/// Row operations turning `old` into `new`, HUD first.
#[must_use]
pub fn reconcile(old: &DisplayLayout, new: &DisplayLayout) -> Vec<RowOp> {
    let mut ops = Vec::with_capacity(2);

    if let Some(op) = visibility_op(Row::Hud, old.hud_visible(), new.hud_visible()) {
        ops.push(op);
    }

    match (old.status_visible(), new.status_visible()) {
        (true, true) => ops.extend(status_update(&old.mode, &new.mode)),
        (was, is) => ops.extend(visibility_op(Row::Status, was, is)),
    }

    ops
}

const fn visibility_op(row: Row, was: bool, is: bool) -> Option<RowOp> {
    match (was, is) {
        (false, true) => Some(RowOp::Insert { row }),
        (true, false) => Some(RowOp::Delete { row }),
        _ => None,
    }
}

/// Update for a status row that stays visible.
#[must_use]
pub fn status_update(old: &StatusRowMode, new: &StatusRowMode) -> Option<RowOp> {
    let reload = Some(RowOp::Reload { row: Row::Status });
    match (old, new) {
        (
            StatusRowMode::RecommendedTempBasal {
                recommendation: old_rec,
                at: old_at,
                enacting: was_enacting,
            },
            StatusRowMode::RecommendedTempBasal {
                recommendation: new_rec,
                at: new_at,
                enacting: is_enacting,
            },
        ) => {
            if old_rec != new_rec || old_at != new_at {
                reload
            } else if was_enacting != is_enacting {
                Some(RowOp::SetBusy {
                    row: Row::Status,
                    busy: *is_enacting,
                })
            } else {
                None
            }
        }
        (StatusRowMode::EnactingBolus, StatusRowMode::EnactingBolus)
        | (StatusRowMode::CancelingBolus, StatusRowMode::CancelingBolus)
        | (StatusRowMode::Hidden, StatusRowMode::Hidden) => None,
        (StatusRowMode::Bolusing { dose: old_dose }, StatusRowMode::Bolusing { dose: new_dose }) => {
            (old_dose != new_dose).then_some(RowOp::Reload { row: Row::Status })
        }
        (
            StatusRowMode::PumpSuspended { resuming: was },
            StatusRowMode::PumpSuspended { resuming: is },
        ) => (was != is).then_some(RowOp::Reload { row: Row::Status }),
        _ => reload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::model::{DoseEntry, DoseKind, DoseUnit, TempBasalRecommendation};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn rec_mode(rate: f64, enacting: bool) -> StatusRowMode {
        StatusRowMode::RecommendedTempBasal {
            recommendation: TempBasalRecommendation {
                units_per_hour: rate,
                duration_minutes: 30.0,
            },
            at: now(),
            enacting,
        }
    }

    fn bolusing(units: f64) -> StatusRowMode {
        StatusRowMode::Bolusing {
            dose: DoseEntry {
                kind: DoseKind::Bolus,
                start: now(),
                end: now() + Duration::minutes(2),
                value: units,
                unit: DoseUnit::Units,
            },
        }
    }

    fn portrait(mode: StatusRowMode) -> DisplayLayout {
        DisplayLayout {
            landscape: false,
            mode,
        }
    }

    #[test]
    fn enacting_flag_only_toggles_busy() {
        let ops = reconcile(&portrait(rec_mode(1.0, false)), &portrait(rec_mode(1.0, true)));
        assert_eq!(
            ops,
            vec![RowOp::SetBusy {
                row: Row::Status,
                busy: true
            }]
        );
    }

    #[test]
    fn rate_change_reloads_even_if_enacting_changes() {
        let ops = reconcile(&portrait(rec_mode(1.0, true)), &portrait(rec_mode(2.0, false)));
        assert_eq!(ops, vec![RowOp::Reload { row: Row::Status }]);
    }

    #[test]
    fn different_variants_reload() {
        let ops = reconcile(
            &portrait(bolusing(1.0)),
            &portrait(StatusRowMode::PumpSuspended { resuming: false }),
        );
        assert_eq!(ops, vec![RowOp::Reload { row: Row::Status }]);
    }

    #[test]
    fn identical_modes_emit_nothing() {
        for mode in [
            rec_mode(1.0, false),
            StatusRowMode::EnactingBolus,
            StatusRowMode::CancelingBolus,
            bolusing(1.0),
            StatusRowMode::PumpSuspended { resuming: true },
        ] {
            assert!(reconcile(&portrait(mode.clone()), &portrait(mode)).is_empty());
        }
    }

    #[test]
    fn payload_changes_within_variant_reload() {
        assert_eq!(
            status_update(&bolusing(1.0), &bolusing(2.0)),
            Some(RowOp::Reload { row: Row::Status })
        );
        assert_eq!(
            status_update(
                &StatusRowMode::PumpSuspended { resuming: false },
                &StatusRowMode::PumpSuspended { resuming: true }
            ),
            Some(RowOp::Reload { row: Row::Status })
        );
    }

    #[test]
    fn appearing_and_disappearing_status_row() {
        let ops = reconcile(&portrait(StatusRowMode::Hidden), &portrait(bolusing(1.0)));
        assert_eq!(ops, vec![RowOp::Insert { row: Row::Status }]);
        let ops = reconcile(&portrait(bolusing(1.0)), &portrait(StatusRowMode::Hidden));
        assert_eq!(ops, vec![RowOp::Delete { row: Row::Status }]);
        assert!(
            reconcile(&portrait(StatusRowMode::Hidden), &portrait(StatusRowMode::Hidden))
                .is_empty()
        );
    }

    #[test]
    fn rotating_to_landscape_removes_both_rows_hud_first() {
        let old = portrait(bolusing(1.0));
        let new = DisplayLayout {
            landscape: true,
            mode: bolusing(1.0),
        };
        assert_eq!(
            reconcile(&old, &new),
            vec![RowOp::Delete { row: Row::Hud }, RowOp::Delete { row: Row::Status }]
        );
        assert_eq!(
            reconcile(&new, &old),
            vec![RowOp::Insert { row: Row::Hud }, RowOp::Insert { row: Row::Status }]
        );
    }
}
