//! Controller scenarios: partial fetch failure, mid-flight marking, status
//! priority, optimistic actions, and fetch timeouts, all against simulated
//! stores and a manual clock.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Duration;

use loop_status_core::controller::events::ControllerEvent;
use loop_status_core::core::config::Config;
use loop_status_core::fetch::coordinator::FetchKind;
use loop_status_core::fetch::model::{
    BasalRateSchedule, BasalScheduleItem, DoseEntry, DoseKind, DoseUnit,
};
use loop_status_core::refresh::context::{ContextKind, RefreshContext, RefreshContextSet};
use loop_status_core::status::actions::StatusAction;
use loop_status_core::status::mode::{BasalDeliveryState, BolusState, StatusRowMode};
use loop_status_core::status::reconcile::{Row, RowOp};

use common::{Fixture, fixture_with, recommendation, settled_fixture, t0};

fn contexts(items: &[RefreshContext]) -> RefreshContextSet {
    items.iter().copied().collect()
}

fn bolus_ending_in(minutes: i64) -> DoseEntry {
    DoseEntry {
        kind: DoseKind::Bolus,
        start: t0() - Duration::minutes(1),
        end: t0() + Duration::minutes(minutes),
        value: 3.0,
        unit: DoseUnit::Units,
    }
}

/// Wait for the outstanding action and settle it.
fn settle_action(fx: &mut Fixture) {
    loop {
        let event = fx
            .controller
            .next_event(StdDuration::from_secs(2))
            .unwrap()
            .expect("action did not complete");
        let done = matches!(event, ControllerEvent::ActionCompleted { .. });
        fx.controller.handle_event(event);
        if done {
            return;
        }
    }
}

fn with_stale_recommendation(fx: &Fixture, units_per_hour: f64) {
    fx.stores.update(|data| {
        data.loop_state.recommended_temp_basal = Some(recommendation(t0(), units_per_hour));
        data.loop_state.last_completed = Some(t0() - Duration::minutes(12));
    });
}

// ──────────────────── partial failure ────────────────────

#[test]
fn insulin_failure_keeps_glucose_and_retries_insulin() {
    let mut fx = settled_fixture();
    fx.stores.fail_next(FetchKind::InsulinOnBoard, 1);

    let handle = fx.controller.handle();
    handle.mark_dirty(RefreshContext::Glucose);
    handle.mark_dirty(RefreshContext::Insulin);
    let reports = fx.controller.reload_until_idle();

    assert_eq!(reports.len(), 2, "failed signal reruns once");
    let first = &reports[0];
    assert_eq!(
        first.context,
        contexts(&[RefreshContext::Glucose, RefreshContext::Insulin])
    );
    assert_eq!(first.failures, vec![(FetchKind::InsulinOnBoard, "LSC-2001")]);
    assert_eq!(first.retry, contexts(&[RefreshContext::Insulin]));
    assert!(first.completion.rerun);

    let second = &reports[1];
    assert_eq!(second.context, contexts(&[RefreshContext::Insulin]));
    assert!(second.failures.is_empty());
    assert!(!second.issued.contains(&FetchKind::Glucose));

    let display = fx.controller.display();
    assert!(!display.charts.glucose.is_empty());
    assert!(!display.charts.insulin_on_board.is_empty());
    assert!(display.hud.current_iob.is_some());
    assert!(fx.controller.pending().is_empty());
}

#[test]
fn repeated_failures_rerun_until_the_store_recovers() {
    let mut fx = settled_fixture();
    fx.stores.fail_next(FetchKind::Glucose, 10);
    fx.controller.handle().mark_dirty(RefreshContext::Glucose);

    // One pass runs now; the rerun waits behind events already queued.
    let first = fx.controller.reload().unwrap();
    assert!(first.completion.rerun);
    assert_eq!(fx.controller.queued_events(), 1);
    assert!(fx.controller.pending().contains(ContextKind::Glucose));

    fx.controller.handle_event(ControllerEvent::LoopRunning);
    assert!(fx.controller.display().hud.loop_in_progress);

    let rest = fx.controller.reload_until_idle();
    assert_eq!(rest.len(), 10);
    assert!(rest[..9].iter().all(|report| report.completion.rerun));
    assert!(!rest[9].completion.rerun);
    assert!(rest[9].failures.is_empty());
    assert!(fx.controller.pending().is_empty());
    assert_eq!(fx.controller.stats().reruns, 10);
    assert_eq!(fx.controller.queued_events(), 0);
}

// ──────────────────── mid-flight marking ────────────────────

#[test]
fn carbs_marked_mid_flight_runs_in_the_next_pass() {
    let mut fx = settled_fixture();
    let handle = fx.controller.handle();
    let fired = Arc::new(AtomicBool::new(false));
    let hook_fired = Arc::clone(&fired);
    fx.stores.set_fetch_hook(Some(Arc::new(move |kind| {
        if kind == FetchKind::Glucose && !hook_fired.swap(true, Ordering::SeqCst) {
            handle.mark_dirty(RefreshContext::Carbs);
        }
    })));

    fx.controller.handle().mark_dirty(RefreshContext::Glucose);
    let reports = fx.controller.reload_until_idle();

    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].context, contexts(&[RefreshContext::Glucose]));
    assert!(!reports[0].issued.contains(&FetchKind::Carbs));
    assert!(reports[0].completion.mid_flight.contains(ContextKind::Carbs));
    assert_eq!(reports[1].context, contexts(&[RefreshContext::Carbs]));
    assert!(reports[1].issued.contains(&FetchKind::Carbs));
    assert!(fx.controller.pending().is_empty());
}

// ──────────────────── status priority ────────────────────

#[test]
fn bolusing_beats_recommendation_until_the_dose_ends() {
    let mut fx = settled_fixture();
    with_stale_recommendation(&fx, 1.6);
    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Active,
        bolus: BolusState::InProgress(bolus_ending_in(5)),
    });
    assert!(matches!(
        fx.controller.status_mode(),
        StatusRowMode::Bolusing { .. }
    ));
    assert_eq!(
        fx.renderer.row_op_batches().last(),
        Some(&vec![RowOp::Insert { row: Row::Status }])
    );

    fx.clock.advance(Duration::minutes(6));
    fx.controller.handle().mark_dirty(RefreshContext::Status);
    fx.controller.reload();
    assert!(matches!(
        fx.controller.status_mode(),
        StatusRowMode::RecommendedTempBasal { enacting: false, .. }
    ));
    assert_eq!(
        fx.renderer.row_op_batches().last(),
        Some(&vec![RowOp::Reload { row: Row::Status }])
    );
}

#[test]
fn suspension_beats_everything_but_initiating_and_canceling() {
    let mut fx = settled_fixture();
    with_stale_recommendation(&fx, 1.6);
    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Suspended,
        bolus: BolusState::InProgress(bolus_ending_in(5)),
    });
    assert_eq!(
        fx.controller.status_mode(),
        &StatusRowMode::PumpSuspended { resuming: false }
    );

    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Suspended,
        bolus: BolusState::Canceling,
    });
    assert_eq!(fx.controller.status_mode(), &StatusRowMode::CancelingBolus);
}

#[test]
fn bolus_completion_waits_for_device_status() {
    let mut fx = settled_fixture();
    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Active,
        bolus: BolusState::InProgress(bolus_ending_in(5)),
    });
    fx.controller.handle_event(ControllerEvent::BolusProgress {
        delivered_units: 1.5,
        complete: false,
    });
    assert_eq!(fx.controller.display().hud.bolus_delivered_units, Some(1.5));

    let passes = fx.controller.stats().passes;
    fx.controller.handle_event(ControllerEvent::BolusProgress {
        delivered_units: 3.0,
        complete: true,
    });
    assert_eq!(fx.controller.stats().passes, passes + 1);
    assert_eq!(
        fx.controller.last_pass().unwrap().context,
        contexts(&[RefreshContext::Status])
    );
    assert!(matches!(
        fx.controller.status_mode(),
        StatusRowMode::Bolusing { .. }
    ));
    assert_eq!(fx.controller.display().hud.bolus_delivered_units, None);

    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Active,
        bolus: BolusState::None,
    });
    assert_eq!(fx.controller.status_mode(), &StatusRowMode::Hidden);
    assert_eq!(
        fx.renderer.row_op_batches().last(),
        Some(&vec![RowOp::Delete { row: Row::Status }])
    );
}

// ──────────────────── optimistic actions ────────────────────

#[test]
fn enact_shows_busy_then_hides_on_success() {
    let mut fx = settled_fixture();
    with_stale_recommendation(&fx, 0.4);
    fx.controller.handle_event(ControllerEvent::LoopDataUpdated(None));
    fx.renderer.clear();

    fx.controller.handle_event(ControllerEvent::StatusRowSelected);
    assert!(matches!(
        fx.controller.status_mode(),
        StatusRowMode::RecommendedTempBasal { enacting: true, .. }
    ));
    assert_eq!(
        fx.renderer.row_op_batches(),
        vec![vec![RowOp::SetBusy {
            row: Row::Status,
            busy: true
        }]]
    );

    settle_action(&mut fx);
    assert_eq!(fx.controller.status_mode(), &StatusRowMode::Hidden);
    assert!(fx.renderer.alerts().is_empty());
    assert_eq!(fx.stores.action_log(), vec![StatusAction::EnactTempBasal]);
    // Success marks Status and reloads.
    assert!(fx.controller.last_pass().unwrap().context.contains(ContextKind::Status));
}

#[test]
fn enact_failure_hides_and_alerts() {
    let mut fx = settled_fixture();
    with_stale_recommendation(&fx, 0.4);
    fx.controller.handle_event(ControllerEvent::LoopDataUpdated(None));
    fx.stores.fail_action(StatusAction::EnactTempBasal, 1);
    let passes = fx.controller.stats().passes;

    fx.controller.handle_event(ControllerEvent::StatusRowSelected);
    settle_action(&mut fx);

    assert_eq!(fx.controller.status_mode(), &StatusRowMode::Hidden);
    let alerts = fx.renderer.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].title, "Error Enacting Temp Basal");
    assert!(alerts[0].message.contains("LSC-2003"));
    assert_eq!(fx.controller.stats().passes, passes);
}

#[test]
fn cancel_failure_restores_bolusing() {
    let mut fx = settled_fixture();
    let dose = bolus_ending_in(5);
    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Active,
        bolus: BolusState::InProgress(dose.clone()),
    });
    fx.stores.fail_action(StatusAction::CancelBolus, 1);

    fx.controller.handle_event(ControllerEvent::StatusRowSelected);
    assert_eq!(fx.controller.status_mode(), &StatusRowMode::CancelingBolus);
    settle_action(&mut fx);

    assert_eq!(
        fx.controller.status_mode(),
        &StatusRowMode::Bolusing { dose }
    );
    assert_eq!(fx.renderer.alerts()[0].title, "Error Canceling Bolus");
}

#[test]
fn resume_success_hides_the_row() {
    let mut fx = settled_fixture();
    fx.controller.handle_event(ControllerEvent::DeviceStatusChanged {
        basal: BasalDeliveryState::Suspended,
        bolus: BolusState::None,
    });
    fx.controller.handle_event(ControllerEvent::Refresh);
    assert_eq!(
        fx.controller.status_mode(),
        &StatusRowMode::PumpSuspended { resuming: false }
    );

    fx.controller.handle_event(ControllerEvent::StatusRowSelected);
    assert_eq!(
        fx.controller.status_mode(),
        &StatusRowMode::PumpSuspended { resuming: true }
    );
    settle_action(&mut fx);
    assert_eq!(fx.controller.status_mode(), &StatusRowMode::Hidden);
}

#[test]
fn passive_modes_ignore_selection() {
    let mut fx = settled_fixture();
    fx.controller.handle_event(ControllerEvent::StatusRowSelected);
    assert_eq!(fx.controller.status_mode(), &StatusRowMode::Hidden);
    assert!(fx.stores.action_log().is_empty());
}

// ──────────────────── timeout ────────────────────

#[test]
fn slow_store_times_out_and_is_retried() {
    let mut config = Config::default();
    config.refresh.fetch_timeout_ms = 50;
    let mut fx = fixture_with(config);
    fx.controller.reload();

    let stalled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stalled);
    fx.stores.set_fetch_hook(Some(Arc::new(move |kind| {
        if kind == FetchKind::Doses && !flag.swap(true, Ordering::SeqCst) {
            std::thread::sleep(StdDuration::from_millis(400));
        }
    })));

    fx.controller.handle().mark_dirty(RefreshContext::Insulin);
    let reports = fx.controller.reload_until_idle();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].failures, vec![(FetchKind::Doses, "LSC-2002")]);
    assert_eq!(reports[0].retry, contexts(&[RefreshContext::Insulin]));
    assert!(reports[0].duration < StdDuration::from_millis(400));
    assert!(reports[1].failures.is_empty());
}

// ──────────────────── HUD ────────────────────

#[test]
fn net_basal_reflects_running_temp_basal() {
    let mut fx = settled_fixture();
    fx.stores.update(|data| {
        let state = &mut data.loop_state;
        state.basal_schedule = Some(BasalRateSchedule {
            items: vec![BasalScheduleItem {
                start_minute: 0,
                units_per_hour: 1.0,
            }],
        });
        state.max_basal_rate = Some(3.0);
        state.last_temp_basal = Some(DoseEntry {
            kind: DoseKind::TempBasal,
            start: t0() - Duration::minutes(10),
            end: t0() + Duration::minutes(20),
            value: 2.0,
            unit: DoseUnit::UnitsPerHour,
        });
    });
    fx.controller.handle_event(ControllerEvent::LoopDataUpdated(None));

    let net = fx.controller.display().hud.net_basal.unwrap();
    assert!((net.rate - 1.0).abs() < 1e-9);
    assert!((net.percent - 0.5).abs() < 1e-9);
    assert_eq!(net.end, Some(t0() + Duration::minutes(20)));
}

#[test]
fn missing_prediction_retries_status() {
    let mut fx = settled_fixture();
    fx.stores.update(|data| data.loop_state.predicted_glucose = None);

    fx.controller.handle().mark_dirty(RefreshContext::Status);
    let report = fx.controller.reload().unwrap();
    assert_eq!(report.retry, contexts(&[RefreshContext::Status]));
    assert!(report.completion.rerun);
    assert!(fx.controller.display().charts.predicted_glucose.is_empty());
    assert!(fx.controller.pending().contains(ContextKind::Status));
    assert_eq!(fx.controller.queued_events(), 1);
}
