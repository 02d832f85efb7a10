//! `ccdlink` operator tool: list, inspect, expose and control cameras.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ccdlink::calibration::HotPixelMap;
use ccdlink::camera::{
    find_usb_cameras, resolve_usb, tcp_identity, usb_identity_by_serial, AnyTransport, Camera,
    ExposureSettings,
};
use ccdlink::{CameraSettings, SettingsManager};

/// Extra time allowed for readout after the exposure itself.
const READOUT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(flatten)]
    target: Target,

    /// Camera settings JSON file
    #[clap(long, global = true)]
    settings: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// USB camera serial number
    #[clap(long, global = true, conflicts_with = "tcp")]
    serial: Option<String>,

    /// Network camera IPv4 address
    #[clap(long, global = true)]
    tcp: Option<Ipv4Addr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists attached USB cameras
    List,
    /// Shows camera details, sensor specs and cooler status
    Info,
    /// Takes one exposure and writes raw little-endian pixels
    Expose(ExposeConf),
    /// Sets the cooler set point or turns it off
    Cooler(CoolerConf),
    /// Moves the filter wheel by slot number or configured name
    Filter {
        /// Slot index (0-based) or filter name
        slot: String,
    },
}

#[derive(Args)]
struct ExposeConf {
    /// Exposure time in seconds
    seconds: f64,
    /// Output file for raw 16-bit little-endian pixels
    #[clap(short, long)]
    output: PathBuf,
    /// Horizontal binning
    #[clap(long, default_value_t = 1)]
    bin_x: u8,
    /// Vertical binning
    #[clap(long, default_value_t = 1)]
    bin_y: u8,
    /// Sub-frame as COL,ROW,WIDTH,HEIGHT in binned pixels
    #[clap(long, value_parser = parse_subframe)]
    subframe: Option<(u16, u16, u16, u16)>,
    /// Keep the shutter closed
    #[clap(long)]
    dark: bool,
    /// Hot-pixel map JSON to apply
    #[clap(long)]
    hot_pixels: Option<PathBuf>,
}

#[derive(Args)]
struct CoolerConf {
    /// Set point in degrees Celsius
    #[clap(allow_negative_numbers = true, required_unless_present = "off")]
    setpoint: Option<f64>,
    /// Turn regulation off
    #[clap(long)]
    off: bool,
}

fn parse_subframe(s: &str) -> Result<(u16, u16, u16, u16), String> {
    let parts: Vec<u16> = s
        .split(',')
        .map(|p| p.trim().parse::<u16>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [col, row, width, height] => Ok((*col, *row, *width, *height)),
        _ => Err("expected COL,ROW,WIDTH,HEIGHT".to_string()),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::List = cli.command {
        return list_cameras();
    }

    let settings = load_settings(cli.settings.as_deref())?;
    let camera = open_camera(&cli.target, settings)?;

    let result = match &cli.command {
        Commands::List => Ok(()),
        Commands::Info => show_info(&camera),
        Commands::Expose(conf) => expose(&camera, conf),
        Commands::Cooler(conf) => set_cooler(&camera, conf),
        Commands::Filter { slot } => move_filter(&camera, slot),
    };
    camera.disconnect();
    result
}

fn list_cameras() -> Result<()> {
    let cameras = find_usb_cameras();
    if cameras.is_empty() {
        println!("No USB cameras found");
    }
    for camera in cameras {
        println!(
            "{}\t{}\t{}",
            camera.kind,
            camera.serial_number.as_deref().unwrap_or("-"),
            camera.port.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<CameraSettings> {
    match path {
        Some(path) => SettingsManager::with_file(path)
            .load()
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(CameraSettings::default()),
    }
}

fn open_camera(target: &Target, settings: CameraSettings) -> Result<Camera<AnyTransport>> {
    if let Some(address) = target.tcp {
        return Camera::open(&tcp_identity(address), settings)
            .with_context(|| format!("connecting to {}", address));
    }
    if let Some(serial) = &target.serial {
        let identity = resolve_usb(&usb_identity_by_serial(serial))
            .with_context(|| format!("looking for camera {}", serial))?;
        return Camera::open(&identity, settings)
            .with_context(|| format!("connecting to {}", identity));
    }
    let candidates = find_usb_cameras();
    if candidates.is_empty() {
        bail!("no USB cameras found; pass --serial or --tcp");
    }
    Camera::open_any(&candidates, settings).context("connecting to USB camera")
}

fn show_info(camera: &Camera<AnyTransport>) -> Result<()> {
    let details = camera.device_details()?;
    let (px_w, px_h) = details.pixel_size_um();
    println!("Model:        {}", details.model);
    println!("Serial:       {}", details.serial);
    println!("Array:        {} x {}", details.columns, details.rows);
    println!("Pixel size:   {:.2} x {:.2} um", px_w, px_h);
    println!("Max binning:  {} x {}", details.max_hbin, details.max_vbin);
    println!("Filters:      {}", details.num_filters);
    println!("Features:     {:?}", details.features);

    let specs = camera.ccd_specs()?;
    println!(
        "Exposure:     {:?} .. {:?}",
        specs.min_exposure, specs.max_exposure
    );
    println!("Full well:    {} e-", specs.full_well);

    if details.has_temp_regulation {
        let cooler = camera.cooler_status()?;
        println!(
            "Cooler:       {:?}, CCD {:.2} C, ambient {:.2} C, power {:.0}%",
            cooler.state, cooler.ccd_celsius, cooler.ambient_celsius, cooler.power_percent
        );
    }
    Ok(())
}

fn expose(camera: &Camera<AnyTransport>, conf: &ExposeConf) -> Result<()> {
    let duration = Duration::try_from_secs_f64(conf.seconds)
        .with_context(|| format!("invalid exposure time {}", conf.seconds))?;
    let details = camera.device_details()?;

    let mut exposure = ExposureSettings::full_frame(&details, conf.bin_x, conf.bin_y, duration);
    if let Some((col, row, width, height)) = conf.subframe {
        exposure.column_offset = col;
        exposure.row_offset = row;
        exposure.columns = width;
        exposure.rows = height;
    }
    exposure.open_shutter = !conf.dark;

    if let Some(path) = &conf.hot_pixels {
        let map = HotPixelMap::load_from_file(path)
            .with_context(|| format!("loading hot-pixel map {}", path.display()))?;
        info!(pixels = map.len(), "hot-pixel map loaded");
        camera.set_hot_pixel_map(Some(map));
    }

    let image = camera.capture::<u16>(exposure, READOUT_TIMEOUT)?;
    image
        .write_raw_le(&conf.output)
        .with_context(|| format!("writing {}", conf.output.display()))?;

    let metadata = conf.output.with_extension("json");
    std::fs::write(&metadata, serde_json::to_string_pretty(&image)?)
        .with_context(|| format!("writing {}", metadata.display()))?;

    if let Some((min, max, mean)) = image.summary() {
        println!(
            "{} x {} frame written to {} (min {}, max {}, mean {:.1})",
            image.columns,
            image.rows,
            conf.output.display(),
            min,
            max,
            mean
        );
    }
    Ok(())
}

fn set_cooler(camera: &Camera<AnyTransport>, conf: &CoolerConf) -> Result<()> {
    match (conf.off, conf.setpoint) {
        (true, _) => camera.set_temperature(false, 0.0)?,
        (false, Some(setpoint)) => camera.set_temperature(true, setpoint)?,
        (false, None) => bail!("give a set point or --off"),
    }
    let status = camera.cooler_status()?;
    println!(
        "Cooler {:?}: CCD {:.2} C, power {:.0}%",
        status.state, status.ccd_celsius, status.power_percent
    );
    Ok(())
}

fn move_filter(camera: &Camera<AnyTransport>, slot: &str) -> Result<()> {
    let index = match slot.parse::<u8>() {
        Ok(index) => {
            camera.set_filter(index)?;
            index
        }
        Err(_) => camera.set_filter_by_name(slot)?,
    };
    println!("Filter wheel moving to slot {}", index);
    Ok(())
}
