use anyhow::{bail, Context};
use clap::Parser;
use mapsnap::{LatLng, LatLngBounds, SessionConfig, Snapshotter};
use std::path::PathBuf;

/// Render one map snapshot to a PNG file.
#[derive(Debug, Parser)]
#[command(name = "mapsnap", version, about)]
struct Args {
    /// Style locator (path, URL, data: URL or inline JSON)
    #[arg(short, long)]
    style: Option<String>,

    /// JSON session config; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    #[arg(short, long)]
    zoom: Option<f64>,

    #[arg(short, long, allow_negative_numbers = true)]
    bearing: Option<f64>,

    #[arg(short, long)]
    pitch: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    pixel_ratio: Option<f32>,

    /// Region to frame: sw_lat,sw_lon,ne_lat,ne_lon
    #[arg(long, allow_hyphen_values = true)]
    region: Option<String>,

    /// Directory for cached draw programs
    #[arg(long)]
    program_cache: Option<PathBuf>,

    #[arg(short, long, default_value = "snapshot.png")]
    output: PathBuf,
}

fn parse_region(s: &str) -> anyhow::Result<LatLngBounds> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid region '{}'", s))?;
    if parts.len() != 4 {
        bail!("region needs 4 numbers: sw_lat,sw_lon,ne_lat,ne_lon");
    }
    Ok(LatLngBounds::new(
        LatLng::new(parts[0], parts[1]),
        LatLng::new(parts[2], parts[3]),
    ))
}

fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(style) = args.style.clone().or_else(|| std::env::var("MAPSNAP_STYLE_URL").ok()) {
        config.style = style;
    }

    if let Some(w) = args.width {
        config.size.width = w;
    }
    if let Some(h) = args.height {
        config.size.height = h;
    }
    if let Some(ratio) = args.pixel_ratio {
        config.pixel_ratio = ratio;
    }

    let camera = &mut config.camera;
    match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => camera.center = Some(LatLng::new(lat, lon)),
        (None, None) => {}
        _ => bail!("--lat and --lon must be given together"),
    }
    camera.zoom = args.zoom.or(camera.zoom);
    camera.bearing = args.bearing.or(camera.bearing);
    camera.pitch = args.pitch.or(camera.pitch);

    if let Some(region) = &args.region {
        config.region = Some(parse_region(region)?);
    }
    if let Some(dir) = &args.program_cache {
        config.program_cache_dir = Some(dir.clone());
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    log::info!(
        "rendering {}x{} @{}x, camera {:?}",
        config.size.width,
        config.size.height,
        config.pixel_ratio,
        config.camera
    );

    let snapshotter = Snapshotter::new(config)?;
    let snapshot = snapshotter
        .snapshot_blocking()
        .context("snapshot failed")?;
    snapshotter.close();

    let png = snapshot.image.to_png()?;
    std::fs::write(&args.output, png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    let c = snapshot.camera;
    log::info!(
        r#"wrote {} (--lat="{}" --lon="{}" --zoom="{}" --bearing="{}")"#,
        args.output.display(),
        c.center.latitude,
        c.center.longitude,
        c.zoom,
        c.bearing
    );
    Ok(())
}
