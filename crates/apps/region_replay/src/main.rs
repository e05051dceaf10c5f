mod replay;
mod trace;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::headless::HeadlessEngine;
use engine::loader::MapEngineLoader;
use foundation::geo::LatLng;
use layers::cluster::PointIndex;
use selection::selector::SelectorConfig;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::replay::{load_listings, replay, ClusterSummary};
use crate::trace::parse_trace;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replays map region selections against listing data")]
struct Args {
    /// Map API key (default: $MAP_API_KEY, then "headless")
    #[arg(long)]
    api_key: Option<String>,

    /// JSON file with a full selector configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster cell size in screen pixels (default: $CLUSTER_GRID_PX)
    #[arg(long)]
    grid_px: Option<u32>,

    /// Cluster style preset (default: $CLUSTER_PRESET)
    #[arg(long)]
    preset: Option<String>,

    /// Containment work units per frame
    #[arg(long)]
    frame_budget: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay an interaction trace and print the resulting selection
    Replay {
        /// Listings JSON array
        #[arg(long)]
        listings: PathBuf,

        /// Trace JSON array of steps
        #[arg(long)]
        trace: PathBuf,
    },

    /// Print the cluster partition for one viewport
    Clusters {
        /// Listings JSON array
        #[arg(long)]
        listings: PathBuf,

        #[arg(long, default_value_t = 10.0)]
        zoom: f64,

        /// Viewport center latitude (default: map default center)
        #[arg(long)]
        lat: Option<f64>,

        /// Viewport center longitude (default: map default center)
        #[arg(long)]
        lng: Option<f64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    let api_key = args
        .api_key
        .clone()
        .unwrap_or_else(|| env::var("MAP_API_KEY").unwrap_or_else(|_| "headless".to_string()));

    let out = match &args.command {
        Command::Replay { listings, trace } => {
            let (points, extracted) = load_listings(&read_json(listings)?)?;
            let steps = parse_trace(&read_text(trace)?)
                .with_context(|| format!("parsing trace {}", trace.display()))?;

            let headless = HeadlessEngine::new();
            let loader = MapEngineLoader::install_global(headless.clone());
            let mut report = replay(loader, &headless, &api_key, config, points, &steps).await?;
            report.ingest.missing_ids += extracted.missing_ids;
            serde_json::to_value(&report)?
        }
        Command::Clusters {
            listings,
            zoom,
            lat,
            lng,
        } => {
            let (points, extracted) = load_listings(&read_json(listings)?)?;
            let center = LatLng::new(
                lat.unwrap_or(config.map.center.lat),
                lng.unwrap_or(config.map.center.lng),
            );
            let mut index = PointIndex::new(config.clusters.clone());
            let mut ingest = index.set_points(points);
            ingest.missing_ids += extracted.missing_ids;
            let snapshot = index.clusters_for_viewport(center, config.map.clamp_zoom(*zoom));

            let cells: Vec<Value> = snapshot
                .cells
                .iter()
                .map(|c| {
                    json!({
                        "lat": c.center.lat,
                        "lng": c.center.lng,
                        "count": c.count(),
                        "cluster": snapshot.is_cluster(c),
                    })
                })
                .collect();
            json!({
                "ingest": ingest,
                "summary": ClusterSummary::from(snapshot.as_ref()),
                "cells": cells,
            })
        }
    };

    info!("done");
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Config file first, then flags, then environment.
fn resolve_config(args: &Args) -> anyhow::Result<SelectorConfig> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&read_text(path)?)
            .with_context(|| format!("parsing config {}", path.display()))?,
        None => SelectorConfig::default(),
    };

    if let Some(px) = args.grid_px {
        config.clusters.grid_size_px = px;
    } else if let Ok(raw) = env::var("CLUSTER_GRID_PX") {
        config.clusters.grid_size_px = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid CLUSTER_GRID_PX {raw:?}"))?;
    }
    if let Some(preset) = args.preset.clone().or_else(|| env::var("CLUSTER_PRESET").ok()) {
        config.clusters.preset = preset;
    }
    if let Some(units) = args.frame_budget {
        config.frame_budget_units = units;
    }
    Ok(config)
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    serde_json::from_str(&read_text(path)?).with_context(|| format!("parsing {}", path.display()))
}
