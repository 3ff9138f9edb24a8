//! Read-side commands: status, display, local, houses.
//!
//! Everything but `houses` reads the state files the last run left behind
//! and never contacts the service.

use std::collections::BTreeMap;

use serde::Serialize;
use tabled::Tabled;

use ambientika_api::HouseDto;
use ambientika_core::{
    DisplaySource, DisplayValues, HouseId, JsonFileMappingStore, LocalId, MappingStore,
    MappingTable, RemoteKind, RunRecord, ZoneStatus,
};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::host::{self, StateFiles};
use crate::output;

use super::sync::run_detail;

fn dash() -> String {
    "-".into()
}

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ZoneRow {
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Master")]
    master: String,
    #[tabled(rename = "Ambiguous")]
    ambiguous: String,
    #[tabled(rename = "Last Synced")]
    synced: String,
}

impl From<&ZoneStatus> for ZoneRow {
    fn from(z: &ZoneStatus) -> Self {
        Self {
            zone: z.zone_id.to_string(),
            name: z.name.clone(),
            master: z.master_serial.clone().unwrap_or_else(dash),
            ambiguous: if z.ambiguous_master { "yes" } else { "" }.into(),
            synced: z
                .last_synced_at
                .map_or_else(dash, |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

#[derive(Tabled)]
struct DisplayRow {
    #[tabled(rename = "Device")]
    serial: String,
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Fan")]
    fan: String,
    #[tabled(rename = "Humidity")]
    humidity: String,
    #[tabled(rename = "Light")]
    light: String,
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map_or_else(dash, |v| v.to_string())
}

impl From<&DisplayValues> for DisplayRow {
    fn from(d: &DisplayValues) -> Self {
        let s = d.settings.as_ref();
        Self {
            serial: d.serial.clone(),
            zone: d.zone_id.to_string(),
            source: match &d.source {
                DisplaySource::Own => "own".into(),
                DisplaySource::ZoneMaster { master_serial } => format!("master {master_serial}"),
                DisplaySource::LastKnown => "last known".into(),
            },
            mode: opt(s.and_then(|s| s.operating_mode.clone())),
            fan: opt(s.and_then(|s| s.fan_speed)),
            humidity: opt(s.and_then(|s| s.humidity_level)),
            light: opt(s.and_then(|s| s.light_sensor_level)),
        }
    }
}

/// A floor or area in the local registry, with the remote object it
/// stands for when this tool owns it.
#[derive(Debug, Clone, Serialize, Tabled)]
struct LocalRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Floor")]
    floor: String,
    #[tabled(rename = "Mirrors")]
    mirrors: String,
}

#[derive(Tabled)]
struct HouseRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Rooms")]
    rooms: usize,
    #[tabled(rename = "Devices")]
    devices: usize,
}

impl From<&HouseDto> for HouseRow {
    fn from(h: &HouseDto) -> Self {
        Self {
            id: h.id,
            name: h.name.clone(),
            rooms: h.rooms.len(),
            devices: h.rooms.iter().map(|r| r.devices.len()).sum(),
        }
    }
}

// ── status ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusView {
    zones: Vec<ZoneStatus>,
    last_run: Option<RunRecord>,
}

pub async fn handle_status(global: &GlobalOpts) -> Result<(), CliError> {
    let local = config::resolve_state(global)?;
    let files = StateFiles::new(local.state_dir);
    let view = StatusView {
        zones: files
            .zone_status()
            .await?
            .unwrap_or_default()
            .into_values()
            .collect(),
        last_run: files.runs().await?.pop(),
    };

    let color = output::should_color(&global.color);
    let out = match global.output {
        OutputFormat::Table => {
            let mut text = if view.zones.is_empty() {
                "No zones synced yet. Run: ambientika sync".to_owned()
            } else {
                output::render_list(
                    &OutputFormat::Table,
                    &view.zones,
                    |z| ZoneRow::from(z),
                    |z| z.zone_id.to_string(),
                )
            };
            if let Some(ref run) = view.last_run {
                text.push_str("\n\n");
                text.push_str(&run_detail(run, color));
            }
            text
        }
        OutputFormat::Plain => view
            .zones
            .iter()
            .map(|z| format!("{}\t{}", z.zone_id, opt(z.master_serial.clone())))
            .collect::<Vec<_>>()
            .join("\n"),
        ref format => output::render_single(format, &view, |_| String::new(), |_| String::new()),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── display ─────────────────────────────────────────────────────────

pub async fn handle_display(global: &GlobalOpts) -> Result<(), CliError> {
    let local = config::resolve_state(global)?;
    let propagation = StateFiles::new(local.state_dir)
        .display()
        .await?
        .unwrap_or_default();
    let values: Vec<DisplayValues> = propagation.values.into_values().collect();

    let mut out = output::render_list(&global.output, &values, |d| DisplayRow::from(d), |d| {
        d.serial.clone()
    });
    if matches!(global.output, OutputFormat::Table) && !propagation.ambiguous_zones.is_empty() {
        let zones: Vec<String> = propagation
            .ambiguous_zones
            .iter()
            .map(ToString::to_string)
            .collect();
        out.push_str(&format!(
            "\nZones without a single master: {}",
            zones.join(", ")
        ));
    }
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── local ───────────────────────────────────────────────────────────

fn mirrors(table: Option<&MappingTable>, kind: RemoteKind, id: &LocalId) -> String {
    table
        .and_then(|t| t.entries().find(|e| e.kind == kind && &e.local_id == id))
        .map_or_else(String::new, |e| format!("{} {}", e.kind, e.remote_id))
}

pub async fn handle_local(global: &GlobalOpts) -> Result<(), CliError> {
    let local = config::resolve_state(global)?;
    let files = StateFiles::new(&local.state_dir);
    let registry = files.registry().await?;

    let table = match local.house_id {
        Some(id) => Some(
            JsonFileMappingStore::new(&local.state_dir)
                .load(HouseId(id))
                .await?,
        ),
        None => None,
    };
    let table = table.as_ref();

    let floor_names: BTreeMap<_, _> = registry
        .floors
        .iter()
        .map(|f| (f.id.clone(), f.name.clone()))
        .collect();

    let rows: Vec<LocalRow> = registry
        .floors
        .iter()
        .map(|f| LocalRow {
            kind: "floor",
            id: f.id.to_string(),
            name: f.name.clone(),
            floor: String::new(),
            mirrors: mirrors(table, RemoteKind::Zone, &f.id),
        })
        .chain(registry.areas.iter().map(|a| LocalRow {
            kind: "area",
            id: a.id.to_string(),
            name: a.name.clone(),
            floor: a
                .floor_id
                .as_ref()
                .and_then(|f| floor_names.get(f).cloned())
                .unwrap_or_default(),
            mirrors: mirrors(table, RemoteKind::Room, &a.id),
        }))
        .collect();

    let out = output::render_list(&global.output, &rows, LocalRow::clone, |r| r.id.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── houses ──────────────────────────────────────────────────────────

pub async fn handle_houses(global: &GlobalOpts) -> Result<(), CliError> {
    let account = config::resolve_account(global)?;
    let houses = host::cloud_service(&account)?.list_houses().await?;
    let out = output::render_list(&global.output, &houses, |h| HouseRow::from(h), |h| {
        h.id.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
