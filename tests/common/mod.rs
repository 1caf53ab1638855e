#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, TimeZone, Utc};

use loop_status_core::controller::render::RecordingRenderer;
use loop_status_core::controller::status_controller::StatusController;
use loop_status_core::core::clock::ManualClock;
use loop_status_core::core::config::Config;
use loop_status_core::fetch::model::{GlucoseValue, LoopState, RecommendedTempBasal, TempBasalRecommendation};
use loop_status_core::fetch::stores::StoreSet;
use loop_status_core::sim::stores::SimulatedStores;

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_lsc") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "lsc.exe" } else { "lsc" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve lsc binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("lsc-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("LSC_OUTPUT_FORMAT")
        .output()
        .expect("execute lsc command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── controller fixtures ────────────────────

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 20, 0).unwrap()
}

/// Loop state with a prediction and a fresh completion.
pub fn ready_loop_state(now: DateTime<Utc>) -> LoopState {
    LoopState {
        predicted_glucose: Some(vec![
            GlucoseValue {
                start: now,
                mg_dl: 120.0,
            },
            GlucoseValue {
                start: now + Duration::minutes(30),
                mg_dl: 104.0,
            },
        ]),
        last_completed: Some(now - Duration::minutes(1)),
        dosing_enabled: true,
        ..LoopState::default()
    }
}

pub fn recommendation(now: DateTime<Utc>, units_per_hour: f64) -> RecommendedTempBasal {
    RecommendedTempBasal {
        recommendation: TempBasalRecommendation {
            units_per_hour,
            duration_minutes: 30.0,
        },
        date: now,
    }
}

pub struct Fixture {
    pub stores: SimulatedStores,
    pub clock: ManualClock,
    pub renderer: RecordingRenderer,
    pub controller: StatusController,
}

pub fn fixture_with(config: Config) -> Fixture {
    let stores = SimulatedStores::new(t0());
    stores.set_loop_state(ready_loop_state(t0()));
    let clock = ManualClock::new(t0());
    let renderer = RecordingRenderer::new();
    let controller = StatusController::new(
        config,
        StoreSet::uniform(Arc::new(stores.clone())),
        Arc::new(stores.clone()),
        Box::new(renderer.clone()),
        Arc::new(clock.clone()),
    );
    Fixture {
        stores,
        clock,
        renderer,
        controller,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(Config::default())
}

/// Fixture that has already completed its first full pass.
pub fn settled_fixture() -> Fixture {
    let mut fx = fixture();
    fx.controller.reload_until_idle();
    fx.stores.clear_logs();
    fx.renderer.clear();
    fx
}
