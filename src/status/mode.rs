//! Status-row mode derivation.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::model::{DoseEntry, RecommendedTempBasal, TempBasalRecommendation};

/// Pump bolus state, as last reported by the device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "dose", rename_all = "snake_case")]
pub enum BolusState {
    #[default]
    None,
    Initiating,
    InProgress(DoseEntry),
    Canceling,
}

/// Pump basal delivery state, as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasalDeliveryState {
    #[default]
    Active,
    Suspended,
    Resuming,
}

/// What the single status row shows.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StatusRowMode {
    #[default]
    Hidden,
    RecommendedTempBasal {
        recommendation: TempBasalRecommendation,
        at: DateTime<Utc>,
        /// User asked to enact it and the request is outstanding.
        enacting: bool,
    },
    EnactingBolus,
    Bolusing {
        dose: DoseEntry,
    },
    CancelingBolus,
    PumpSuspended {
        resuming: bool,
    },
}

impl StatusRowMode {
    #[must_use]
    pub const fn has_row(&self) -> bool {
        !matches!(self, Self::Hidden)
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::RecommendedTempBasal { .. } => "recommended_temp_basal",
            Self::EnactingBolus => "enacting_bolus",
            Self::Bolusing { .. } => "bolusing",
            Self::CancelingBolus => "canceling_bolus",
            Self::PumpSuspended { .. } => "pump_suspended",
        }
    }
}

impl fmt::Display for StatusRowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecommendedTempBasal {
                recommendation,
                enacting,
                ..
            } => write!(
                f,
                "recommended_temp_basal({:.2} U/hr for {} min{})",
                recommendation.units_per_hour,
                recommendation.duration_minutes,
                if *enacting { ", enacting" } else { "" }
            ),
            Self::PumpSuspended { resuming: true } => f.write_str("pump_suspended(resuming)"),
            other => f.write_str(other.label()),
        }
    }
}

/// Pick the one status-row mode for the given device signals.
///
/// First match wins: bolus initiating, bolus canceling, pump suspended, pump
/// resuming, bolus still running, recommendation, hidden. `recommendation`
/// must already have passed [`recommendation_eligible`].
#[must_use]
pub fn derive(
    bolus: &BolusState,
    basal: BasalDeliveryState,
    recommendation: Option<&RecommendedTempBasal>,
    now: DateTime<Utc>,
) -> StatusRowMode {
    match (bolus, basal) {
        (BolusState::Initiating, _) => StatusRowMode::EnactingBolus,
        (BolusState::Canceling, _) => StatusRowMode::CancelingBolus,
        (_, BasalDeliveryState::Suspended) => StatusRowMode::PumpSuspended { resuming: false },
        (_, BasalDeliveryState::Resuming) => StatusRowMode::PumpSuspended { resuming: true },
        (BolusState::InProgress(dose), _) if dose.end > now => StatusRowMode::Bolusing {
            dose: dose.clone(),
        },
        _ => recommendation.map_or(StatusRowMode::Hidden, |rec| {
            StatusRowMode::RecommendedTempBasal {
                recommendation: rec.recommendation,
                at: rec.date,
                enacting: false,
            }
        }),
    }
}

/// A recommendation is shown only when the loop has not completed recently
/// or automatic dosing is off.
#[must_use]
pub fn recommendation_eligible(
    last_completed: Option<DateTime<Utc>>,
    dosing_enabled: bool,
    now: DateTime<Utc>,
    freshness: Duration,
) -> bool {
    !dosing_enabled
        || last_completed.is_none_or(|completed| {
            now.checked_sub_signed(freshness)
                .is_some_and(|cutoff| completed < cutoff)
        })
}
