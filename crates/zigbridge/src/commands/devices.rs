//! `zigbridge devices`: one-shot poll and listing.

use serde::Serialize;
use tabled::Tabled;

use zigbridge_config::Settings;
use zigbridge_core::{DeviceRegistry, Endpoint, poll_once};

use crate::cli::DevicesArgs;
use crate::error::CliError;
use crate::output;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Endpoints")]
    endpoints: usize,
    #[tabled(rename = "Types")]
    types: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

#[derive(Tabled)]
struct EndpointRow {
    #[tabled(rename = "Endpoint")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "State")]
    state: String,
}

/// A node with its endpoints inlined, for JSON output.
#[derive(Serialize)]
struct DeviceView {
    stable_id: String,
    endpoints: Vec<Endpoint>,
}

impl From<&DeviceView> for NodeRow {
    fn from(d: &DeviceView) -> Self {
        let mut types: Vec<&str> = d.endpoints.iter().filter_map(Endpoint::kind).collect();
        types.sort_unstable();
        types.dedup();
        Self {
            name: d.stable_id.clone(),
            endpoints: d.endpoints.len(),
            types: types.join(", "),
            model: d
                .endpoints
                .iter()
                .find_map(Endpoint::model_id)
                .unwrap_or("-")
                .to_owned(),
            last_seen: d
                .endpoints
                .iter()
                .filter_map(Endpoint::last_seen)
                .max()
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl From<&Endpoint> for EndpointRow {
    fn from(e: &Endpoint) -> Self {
        Self {
            key: e.key.to_string(),
            name: e.stable_id.clone(),
            kind: e.kind().unwrap_or("-").to_owned(),
            state: serde_json::Value::Object(e.rest_state.clone()).to_string(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(settings: &Settings, args: &DevicesArgs) -> Result<(), CliError> {
    let config = settings.to_bridge_config()?;
    let client = config.gateway.client()?;
    let registry = DeviceRegistry::new();

    let summary = poll_once(&client, &registry, &config.gateway.resource_classes).await?;
    tracing::debug!(endpoints = summary.total(), nodes = registry.node_count(), "polled gateway");

    let rendered = if args.endpoints {
        let mut endpoints = registry.endpoints_snapshot();
        endpoints.sort_by(|a, b| a.key.cmp(&b.key));
        output::render_list(args.output, &endpoints, |e| EndpointRow::from(e))?
    } else {
        let devices = device_views(&registry);
        output::render_list(args.output, &devices, |d| NodeRow::from(d))?
    };
    output::print_output(&rendered);
    Ok(())
}

fn device_views(registry: &DeviceRegistry) -> Vec<DeviceView> {
    let mut nodes = registry.nodes_snapshot();
    nodes.sort_by(|a, b| a.stable_id.cmp(&b.stable_id));
    nodes
        .into_iter()
        .map(|node| DeviceView {
            endpoints: registry.endpoints_of(&node.stable_id),
            stable_id: node.stable_id,
        })
        .collect()
}
