//! User actions started from the status row.
//!
//! Selecting the row applies an optimistic mode immediately; the action's
//! outcome is settled later by [`settle`], which is pure so every transition
//! can be checked without a device.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{LscError, Result};

use super::mode::{BasalDeliveryState, BolusState, StatusRowMode};

/// Device-side operations behind the status row.
pub trait DeviceActions: Send + Sync {
    fn enact_recommended_temp_basal(&self) -> Result<()>;
    fn resume_delivery(&self) -> Result<()>;
    fn cancel_bolus(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusAction {
    EnactTempBasal,
    ResumeDelivery,
    CancelBolus,
}

impl StatusAction {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::EnactTempBasal => "enact_temp_basal",
            Self::ResumeDelivery => "resume_delivery",
            Self::CancelBolus => "cancel_bolus",
        }
    }

    /// Run the action against the device. Blocking.
    pub fn perform(self, device: &dyn DeviceActions) -> Result<()> {
        match self {
            Self::EnactTempBasal => device.enact_recommended_temp_basal(),
            Self::ResumeDelivery => device.resume_delivery(),
            Self::CancelBolus => device.cancel_bolus(),
        }
    }

    const fn alert_title(self) -> &'static str {
        match self {
            Self::EnactTempBasal => "Error Enacting Temp Basal",
            Self::ResumeDelivery => "Error Resuming",
            Self::CancelBolus => "Error Canceling Bolus",
        }
    }
}

impl fmt::Display for StatusAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What selecting the row in its current mode does.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub action: StatusAction,
    /// Shown until the action settles.
    pub optimistic: StatusRowMode,
}

/// `None` for modes where selecting the row does nothing.
#[must_use]
pub fn action_for_selection(mode: &StatusRowMode) -> Option<ActionPlan> {
    match mode {
        StatusRowMode::RecommendedTempBasal {
            recommendation,
            at,
            enacting: false,
        } => Some(ActionPlan {
            action: StatusAction::EnactTempBasal,
            optimistic: StatusRowMode::RecommendedTempBasal {
                recommendation: *recommendation,
                at: *at,
                enacting: true,
            },
        }),
        StatusRowMode::PumpSuspended { resuming: false } => Some(ActionPlan {
            action: StatusAction::ResumeDelivery,
            optimistic: StatusRowMode::PumpSuspended { resuming: true },
        }),
        StatusRowMode::Bolusing { .. } => Some(ActionPlan {
            action: StatusAction::CancelBolus,
            optimistic: StatusRowMode::CancelingBolus,
        }),
        _ => None,
    }
}

/// An error to put in front of the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionAlert {
    pub title: &'static str,
    pub message: String,
}

/// How an action outcome changes the screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settlement {
    /// New row mode; `None` leaves the current mode in place.
    pub mode: Option<StatusRowMode>,
    /// Mark `Status` dirty and reload.
    pub refresh_status: bool,
    /// Error source name for the error sink.
    pub report_as: Option<&'static str>,
    pub alert: Option<ActionAlert>,
}

#[must_use]
pub fn settle(
    action: StatusAction,
    outcome: &Result<()>,
    bolus: &BolusState,
    basal: BasalDeliveryState,
) -> Settlement {
    let alert = |error: &LscError| {
        Some(ActionAlert {
            title: action.alert_title(),
            message: error.to_string(),
        })
    };

    match (action, outcome) {
        (StatusAction::EnactTempBasal, Ok(())) => Settlement {
            mode: Some(StatusRowMode::Hidden),
            refresh_status: true,
            ..Settlement::default()
        },
        (StatusAction::EnactTempBasal, Err(error)) => Settlement {
            mode: Some(StatusRowMode::Hidden),
            report_as: Some("TempBasal"),
            alert: alert(error),
            ..Settlement::default()
        },
        (StatusAction::ResumeDelivery, Ok(())) => Settlement {
            mode: Some(StatusRowMode::Hidden),
            ..Settlement::default()
        },
        (StatusAction::ResumeDelivery, Err(error)) => Settlement {
            mode: (basal == BasalDeliveryState::Suspended)
                .then_some(StatusRowMode::PumpSuspended { resuming: false }),
            alert: alert(error),
            ..Settlement::default()
        },
        (StatusAction::CancelBolus, Ok(())) => Settlement::default(),
        (StatusAction::CancelBolus, Err(error)) => Settlement {
            mode: Some(match bolus {
                BolusState::InProgress(dose) => StatusRowMode::Bolusing { dose: dose.clone() },
                _ => StatusRowMode::Hidden,
            }),
            alert: alert(error),
            ..Settlement::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::model::{DoseEntry, DoseKind, DoseUnit, TempBasalRecommendation};
    use chrono::{Duration, TimeZone, Utc};

    fn failure(action: &'static str) -> Result<()> {
        Err(LscError::ActionFailed {
            action,
            details: "pump unreachable".to_string(),
        })
    }

    fn dose() -> DoseEntry {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        DoseEntry {
            kind: DoseKind::Bolus,
            start,
            end: start + Duration::minutes(3),
            value: 3.0,
            unit: DoseUnit::Units,
        }
    }

    #[test]
    fn selection_plans() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let recommendation = TempBasalRecommendation {
            units_per_hour: 0.5,
            duration_minutes: 30.0,
        };
        let plan = action_for_selection(&StatusRowMode::RecommendedTempBasal {
            recommendation,
            at,
            enacting: false,
        })
        .unwrap();
        assert_eq!(plan.action, StatusAction::EnactTempBasal);
        assert_eq!(
            plan.optimistic,
            StatusRowMode::RecommendedTempBasal {
                recommendation,
                at,
                enacting: true
            }
        );

        let plan =
            action_for_selection(&StatusRowMode::PumpSuspended { resuming: false }).unwrap();
        assert_eq!(plan.optimistic, StatusRowMode::PumpSuspended { resuming: true });

        let plan = action_for_selection(&StatusRowMode::Bolusing { dose: dose() }).unwrap();
        assert_eq!(plan.action, StatusAction::CancelBolus);
        assert_eq!(plan.optimistic, StatusRowMode::CancelingBolus);
    }

    #[test]
    fn busy_or_passive_modes_do_nothing() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        for mode in [
            StatusRowMode::Hidden,
            StatusRowMode::EnactingBolus,
            StatusRowMode::CancelingBolus,
            StatusRowMode::PumpSuspended { resuming: true },
            StatusRowMode::RecommendedTempBasal {
                recommendation: TempBasalRecommendation {
                    units_per_hour: 0.5,
                    duration_minutes: 30.0,
                },
                at,
                enacting: true,
            },
        ] {
            assert!(action_for_selection(&mode).is_none(), "{mode} should be inert");
        }
    }

    #[test]
    fn enact_success_hides_and_refreshes() {
        let settled = settle(
            StatusAction::EnactTempBasal,
            &Ok(()),
            &BolusState::None,
            BasalDeliveryState::Active,
        );
        assert_eq!(settled.mode, Some(StatusRowMode::Hidden));
        assert!(settled.refresh_status);
        assert!(settled.alert.is_none());
    }

    #[test]
    fn enact_failure_hides_reports_and_alerts() {
        let settled = settle(
            StatusAction::EnactTempBasal,
            &failure("enact temp basal"),
            &BolusState::None,
            BasalDeliveryState::Active,
        );
        assert_eq!(settled.mode, Some(StatusRowMode::Hidden));
        assert!(!settled.refresh_status);
        assert_eq!(settled.report_as, Some("TempBasal"));
        assert!(settled.alert.unwrap().message.contains("pump unreachable"));
    }

    #[test]
    fn resume_failure_rolls_back_only_while_suspended() {
        let err = failure("resume delivery");
        let settled = settle(
            StatusAction::ResumeDelivery,
            &err,
            &BolusState::None,
            BasalDeliveryState::Suspended,
        );
        assert_eq!(
            settled.mode,
            Some(StatusRowMode::PumpSuspended { resuming: false })
        );
        assert_eq!(settled.alert.unwrap().title, "Error Resuming");

        let settled = settle(
            StatusAction::ResumeDelivery,
            &err,
            &BolusState::None,
            BasalDeliveryState::Active,
        );
        assert_eq!(settled.mode, None);
    }

    #[test]
    fn cancel_outcomes() {
        let settled = settle(
            StatusAction::CancelBolus,
            &Ok(()),
            &BolusState::InProgress(dose()),
            BasalDeliveryState::Active,
        );
        assert_eq!(settled, Settlement::default());

        let err = failure("cancel bolus");
        let settled = settle(
            StatusAction::CancelBolus,
            &err,
            &BolusState::InProgress(dose()),
            BasalDeliveryState::Active,
        );
        assert_eq!(settled.mode, Some(StatusRowMode::Bolusing { dose: dose() }));

        let settled = settle(
            StatusAction::CancelBolus,
            &err,
            &BolusState::None,
            BasalDeliveryState::Active,
        );
        assert_eq!(settled.mode, Some(StatusRowMode::Hidden));
        assert_eq!(settled.alert.unwrap().title, "Error Canceling Bolus");
    }
}
