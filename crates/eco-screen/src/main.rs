//! eco-screen - screen one location, or a batch, against every domain.
//!
//! Usage:
//!   eco-screen --lon -81.3792 --lat 28.5383
//!   eco-screen --lon -81.3792 --lat 28.5383 --export site.pdf
//!   eco-screen --batch sites.json

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use eco_screen::{
    ArtifactRequest, BatchCoordinator, BatchOptions, Config, Location, Screener,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Environmental constraint screening")]
struct Args {
    /// Longitude in decimal degrees (WGS84)
    #[arg(long, allow_negative_numbers = true, requires = "lat")]
    lon: Option<f64>,

    /// Latitude in decimal degrees (WGS84)
    #[arg(long, allow_negative_numbers = true, requires = "lon")]
    lat: Option<f64>,

    /// Write the generated map artifact to this path
    #[arg(long)]
    export: Option<PathBuf>,

    /// JSON file with an array of {"longitude", "latitude"} objects
    #[arg(long, conflicts_with_all = ["lon", "lat"])]
    batch: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("eco_screen=debug".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let config = Config::from_env();
    let registry = config.registry()?;
    let screener = Screener::from_registry(&registry, config.query_timeout(), config.map)?;

    if let Some(path) = args.batch {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let locations: Vec<Location> =
            serde_json::from_str(&raw).context("Failed to parse batch locations")?;

        let options = BatchOptions {
            export: args.export.is_some(),
            ..BatchOptions::from_config(&config)
        };
        let coordinator = BatchCoordinator::new(Arc::new(screener), options);
        let (outcomes, summary) = coordinator.run(&locations).await;

        if let Some(dir) = args.export {
            tokio::fs::create_dir_all(&dir).await?;
            for outcome in &outcomes {
                if let Some(bytes) = &outcome.artifact {
                    tokio::fs::write(dir.join(format!("{}.pdf", outcome.id)), bytes).await?;
                }
            }
        }

        let output = serde_json::json!({ "summary": summary, "items": outcomes });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let (Some(lon), Some(lat)) = (args.lon, args.lat) else {
        bail!("either --lon/--lat or --batch is required");
    };

    let report = screener.screen(lon, lat).await?;
    let params = screener.report_map_parameters(&report);

    if let Some(path) = args.export {
        let bytes = screener
            .generate_artifact(report.coordinate, ArtifactRequest::Adaptive(params.clone()))
            .await?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "artifact written");
    }

    let output = serde_json::json!({ "report": report, "map_parameters": params });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
