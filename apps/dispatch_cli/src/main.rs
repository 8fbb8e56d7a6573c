use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use collaborators::fixtures::{en_route_unit, FixtureDispatchFeed};
use dispatch_core::{load_settings, Collaborators, DispatchSession, WorkflowController};
use shared::{
    domain::{PositionUpdate, Stage},
    protocol::CaseSnapshot,
};
use tokio::{sync::watch, time::sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs one emergency case end to end against fixture collaborators.
#[derive(Parser, Debug)]
#[command(name = "dispatch-cli")]
struct Args {
    /// Free-text symptom description submitted at intake.
    #[arg(long)]
    symptoms: String,
    /// Settings file; defaults to ./dispatch.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds after submission to request a video consult.
    #[arg(long)]
    consult_after_secs: Option<u64>,
    #[arg(long, default_value_t = 15)]
    call_secs: u64,
    /// Total seconds to keep the case open before shutting down.
    #[arg(long, default_value_t = 60)]
    watch_secs: u64,
    /// Print snapshots as JSON lines instead of text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let settings = load_settings(args.config.as_deref()).context("loading dispatch settings")?;
    info!(
        "cli: settings loaded triage_delay_ms={} match_delay_ms={} eta_tick_ms={}",
        settings.triage_delay_ms, settings.hospital_match_delay_ms, settings.eta_tick_ms
    );

    let feed = FixtureDispatchFeed::with_positions(en_route_unit(), demo_route());
    let collaborators = Collaborators::fixtures().with_dispatch(Arc::new(feed));
    let session = DispatchSession::spawn(WorkflowController::new(settings, collaborators));
    let printer = tokio::spawn(print_snapshots(session.watch(), args.json));

    let case_id = session
        .submit(args.symptoms.as_str())
        .await
        .context("submitting symptoms")?;
    println!("Submitted case {case_id}");

    let mut elapsed = 0;
    if let Some(consult_after) = args.consult_after_secs {
        sleep(Duration::from_secs(consult_after)).await;
        elapsed += consult_after;
        match session.request_video_consult().await {
            Ok(()) => {
                sleep(Duration::from_secs(args.call_secs)).await;
                elapsed += args.call_secs;
                session.end_call().await.context("ending consult")?;
            }
            Err(err) => warn!("cli: consult unavailable err={err}"),
        }
    }
    sleep(Duration::from_secs(args.watch_secs.saturating_sub(elapsed))).await;

    session.shutdown().await.context("shutting down session")?;
    printer.await.context("snapshot printer")??;
    Ok(())
}

async fn print_snapshots(mut snapshots: watch::Receiver<CaseSnapshot>, json: bool) -> Result<()> {
    loop {
        {
            let snapshot = snapshots.borrow_and_update();
            if json {
                println!("{}", serde_json::to_string(&*snapshot)?);
            } else {
                println!("{}", describe(&snapshot));
            }
        }
        if snapshots.changed().await.is_err() {
            return Ok(());
        }
    }
}

fn describe(snapshot: &CaseSnapshot) -> String {
    if snapshot.is_idle() {
        return "[idle] no active case".to_string();
    }
    let mut line = format!(
        "[t+{:>5.1}s] {}/{} {}",
        snapshot.elapsed_ms as f64 / 1000.0,
        snapshot.stage.ordinal() + 1,
        Stage::ALL.len(),
        snapshot.stage.label()
    );
    if snapshot.processing {
        line.push_str(" (processing)");
    }
    if let Some(triage) = &snapshot.triage {
        line.push_str(&format!(
            " | {} {:?} {}%",
            triage.category, triage.severity, triage.confidence_percent
        ));
        if triage.requires_immediate_dispatch() {
            line.push_str(" IMMEDIATE");
        }
    }
    if let Some(assignment) = &snapshot.hospital_match {
        line.push_str(&format!(" | {}", assignment.facility));
    }
    if let Some(unit) = &snapshot.ambulance {
        line.push_str(&format!(
            " | {} {:?} eta={}m at {}",
            unit.ambulance_id, unit.status, unit.eta_minutes, unit.location
        ));
    }
    if let Some(call) = &snapshot.call_session {
        line.push_str(&format!(
            " | call with {} {}",
            call.clinician.name,
            call.formatted_duration()
        ));
    }
    if let Some(fault) = &snapshot.fault {
        line.push_str(&format!(" | fault at {:?}: {}", fault.step, fault.error));
    }
    line
}

fn demo_route() -> Vec<PositionUpdate> {
    [
        ("Worli Sea Link exit", 1.8),
        ("Dadar TT circle", 1.2),
        ("Parel flyover", 0.6),
    ]
    .into_iter()
    .map(|(location, distance_km)| PositionUpdate {
        location: Some(location.into()),
        distance_km: Some(distance_km),
        ..Default::default()
    })
    .collect()
}
