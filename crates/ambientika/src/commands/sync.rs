//! Run-triggering commands: sync, set-master, watch.

use std::fmt::Write as _;
use std::time::Duration;

use ambientika_core::{RunRecord, RunRequest, RunState, RunStep, StepStatus, ZoneId};

use crate::cli::{GlobalOpts, SetMasterArgs, SyncArgs, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::host::Host;
use crate::output;

use super::util;

/// Used by `watch` when the profile disables periodic sync.
const DEFAULT_WATCH_MINUTES: u64 = 15;

// ── Rendering ───────────────────────────────────────────────────────

pub fn run_detail(record: &RunRecord, color: bool) -> String {
    let mut out = String::new();
    let c = &record.counts;
    let _ = writeln!(
        out,
        "Run {} ({}) {}",
        record.id,
        record.trigger,
        output::status_label(record.status, color)
    );
    let _ = writeln!(out, "  Started:     {}", record.started_at.to_rfc3339());
    if let Some(finished) = record.finished_at {
        let millis = (finished - record.started_at).num_milliseconds();
        let _ = writeln!(out, "  Finished:    {} ({millis} ms)", finished.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "  Counts:      created {}, updated {}, skipped {}, conflicts {}, devices {}, retired {}",
        c.created, c.updated, c.skipped, c.conflicts, c.devices_assigned, c.retired
    );

    let steps: Vec<String> = record
        .steps
        .iter()
        .map(|s| format!("{} {}", s.step, s.status))
        .collect();
    let _ = writeln!(out, "  Steps:       {}", steps.join(", "));
    for step in record.steps.iter().filter(|s| s.status == StepStatus::Failed) {
        if let Some(ref e) = step.error {
            let _ = writeln!(out, "    {}: {e}", step.step);
        }
    }

    for collision in &record.collisions {
        let _ = writeln!(
            out,
            "  Name taken:  {} {} wanted \"{}\", got \"{}\"",
            collision.kind, collision.remote_id, collision.requested, collision.assigned
        );
    }
    if !record.ambiguous_zones.is_empty() {
        let zones: Vec<String> = record.ambiguous_zones.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "  Ambiguous:   zones {}", zones.join(", "));
    }
    if let Some(ref e) = record.error {
        let _ = writeln!(out, "  Error:       {e}");
    }
    out.trim_end().to_owned()
}

fn print_record(record: &RunRecord, global: &GlobalOpts) {
    let color = output::should_color(&global.color);
    let rendered = output::render_single(
        &global.output,
        record,
        |r| run_detail(r, color),
        |r| r.status.to_string(),
    );
    output::print_output(&rendered, global.quiet);
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle_sync(args: SyncArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let defaults = resolved.engine.options;
    let host = Host::open(resolved).await?;

    let bar = util::spinner("Syncing zones...", global.quiet);
    let result = host
        .engine
        .sync_zones(
            args.force,
            defaults.create_missing_floors && !args.no_create_floors,
            defaults.create_missing_areas && !args.no_create_areas,
        )
        .await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let record = result?;
    host.persist().await?;
    print_record(&record, global);
    util::check_record(&record, &host.profile_name)
}

pub async fn handle_set_master(args: SetMasterArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let zone_id = ZoneId(args.zone);

    let prompt = format!("Make {} the master of zone {zone_id}?", args.serial);
    if !util::confirm("set-master", &prompt, global.yes)? {
        return Ok(());
    }

    let host = Host::open(resolved).await?;
    let record = host.engine.set_zone_master(zone_id, args.serial).await?;
    host.persist().await?;
    print_record(&record, global);

    if let Some(step) = record
        .step(RunStep::Roles)
        .filter(|s| s.status == StepStatus::Failed)
    {
        return Err(CliError::RoleRejected {
            message: step.error.clone().unwrap_or_else(|| "roles step failed".into()),
        });
    }
    util::check_record(&record, &host.profile_name)
}

/// Minutes between watch runs: the flag, else the profile's interval, else
/// the default when the profile disables periodic sync.
fn watch_minutes(flag: Option<u64>, configured: Duration) -> Result<u64, CliError> {
    match flag {
        Some(0) => Err(CliError::Validation {
            field: "interval".into(),
            reason: "must be at least one minute".into(),
        }),
        Some(m) => Ok(m),
        None if configured.is_zero() => Ok(DEFAULT_WATCH_MINUTES),
        None => Ok((configured.as_secs() / 60).max(1)),
    }
}

pub async fn handle_watch(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut resolved = config::resolve(global)?;
    let minutes = watch_minutes(args.interval, resolved.engine.interval)?;
    resolved.engine.interval = Duration::from_secs(minutes.saturating_mul(60));

    let host = Host::open(resolved).await?;
    let mut state = host.engine.subscribe_run_state();

    // The periodic task waits a full interval before its first run
    host.engine.start().await;
    host.engine
        .try_trigger_run(RunRequest::periodic(host.engine.config().options))
        .await;
    tracing::info!(minutes, "watching; press Ctrl-C to stop");

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => break,

            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() != RunState::Idle {
                    continue;
                }
                host.persist().await?;
                if let Some(record) = host.engine.last_run().await {
                    print_record(&record, global);
                    if let Err(e) = util::check_record(&record, &host.profile_name) {
                        tracing::warn!(error = %e, "run did not complete cleanly");
                    }
                }
            }
        }
    }

    host.engine.shutdown().await;
    host.persist().await
}
