//! GT-5x Fingerprint Capture
//!
//! Pulls a raw fingerprint image from a GT-5x sensor through an Arduino
//! running the image bridge sketch and saves it as an 8-bit grayscale bitmap.
//!
//! # Features
//!
//! - **Capture**: wait for the bridge's payload marker, receive the 160x120
//!   plane, upscale it to 320x240 and write a `.bmp` (requires `serial`)
//! - **Port listing**: show serial ports and flag likely bridge boards
//! - **Sensor query**: talk to a directly wired sensor with its packet
//!   protocol and show device info (requires `serial`)
//! - **Bitmap inspection**: dump and sanity-check a bitmap header
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! gt5x-capture ports
//!
//! # Capture one image into myprints.bmp
//! gt5x-capture capture -p /dev/ttyACM0 -b 57600 -o myprints
//!
//! # Query a sensor wired straight to a USB-serial adapter
//! gt5x-capture sensor -p /dev/ttyUSB0 -b 9600
//!
//! # Check a saved image
//! gt5x-capture inspect myprints.bmp
//!
//! # Show the effective settings
//! gt5x-capture --config gt5x.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use gt5x_capture::image::bitmap::read_bitmap;
use gt5x_capture::image::BitmapInfo;
use gt5x_capture::settings::Settings;

#[cfg(feature = "serial")]
use gt5x_capture::capture::{self, AcquisitionController, AcquisitionError, FailureKind};
#[cfg(feature = "serial")]
use gt5x_capture::image::ImageGeometry;
#[cfg(feature = "serial")]
use gt5x_capture::protocol::SensorLink;
#[cfg(feature = "serial")]
use gt5x_capture::serial::{self, PortConfig, SerialConnection};
#[cfg(feature = "serial")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "serial")]
use std::sync::Arc;

/// GT-5x Fingerprint Capture
///
/// Grab raw fingerprint images over serial and save them as bitmaps
#[derive(Parser)]
#[command(name = "gt5x-capture")]
#[command(version = "0.1.0")]
#[command(about = "Capture raw fingerprint images from a GT-5x sensor bridge")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one fingerprint image (requires --features serial)
    #[cfg(feature = "serial")]
    Capture {
        /// Output file name; `.bmp` is appended
        #[arg(short, long)]
        output: String,

        /// Serial port path (e.g., /dev/ttyACM0, COM13)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// List available serial ports (requires --features serial)
    #[cfg(feature = "serial")]
    Ports,

    /// Query a directly connected sensor (requires --features serial)
    #[cfg(feature = "serial")]
    Sensor {
        /// Serial port path
        #[arg(short, long)]
        port: String,

        /// Baud rate of the sensor UART
        #[arg(short, long, default_value_t = 9600)]
        baud: u32,
    },

    /// Show bitmap header fields and check them for consistency
    Inspect {
        /// Path to a .bmp file
        path: PathBuf,
    },

    /// Print the effective settings as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        #[cfg(feature = "serial")]
        Commands::Capture { output, port, baud } => {
            handle_capture(settings.with_overrides(port, baud), &output)
        }
        #[cfg(feature = "serial")]
        Commands::Ports => serial::port::print_ports(),
        #[cfg(feature = "serial")]
        Commands::Sensor { port, baud } => handle_sensor(&settings, &port, baud),
        Commands::Inspect { path } => handle_inspect(&path),
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

#[cfg(feature = "serial")]
fn handle_capture(settings: Settings, output: &str) -> Result<()> {
    let port_path = match settings.serial.port.clone() {
        Some(p) => p,
        None => {
            let detected = serial::port::detect_bridge_ports()?;
            let Some(first) = detected.into_iter().next() else {
                eprintln!("{} No serial bridge detected", "[ERROR]".red().bold());
                eprintln!("Use -p to specify port manually");
                std::process::exit(1);
            };
            println!("{} Auto-detected: {}", "[OK]".green().bold(), first.path.white());
            first.path
        }
    };

    let port_config = PortConfig::new(&port_path)
        .with_baud_rate(settings.serial.baud_rate)
        .with_timeout(settings.read_timeout());
    let output = capture::output_path(output);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mut controller = AcquisitionController::new(ImageGeometry::GT5X)
        .with_background(settings.capture.background)
        .with_drain_limit(settings.capture.drain_limit)
        .with_drain_window(settings.drain_window())
        .with_running_flag(running);

    println!(
        "{} Listening on {} at {} baud, saving to {}",
        "[*]".cyan().bold(),
        port_path.white(),
        settings.serial.baud_rate,
        output.display()
    );
    println!("{}", "Follow the instructions from the sensor. Press Ctrl+C to abort.\n".yellow());

    let mut stdout = std::io::stdout().lock();
    let result = controller.run(|| SerialConnection::open(port_config), &output, &mut stdout);
    drop(stdout);

    match result {
        Ok(report) => {
            println!();
            println!(
                "{} Image saved as {} ({} bytes, {} bytes of device text before the image)",
                "[OK]".green().bold(),
                report.path.display().to_string().white().bold(),
                report.file_len,
                report.debug_bytes
            );
            if !report.trailer.is_empty() {
                println!("{}", report.trailer);
            }
            Ok(())
        }
        Err(e) => {
            println!();
            report_failure(&e);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "serial")]
fn handle_sensor(settings: &Settings, port: &str, baud: u32) -> Result<()> {
    let config = PortConfig::new(port)
        .with_baud_rate(baud)
        .with_timeout(settings.read_timeout());
    let mut connection = SerialConnection::open(config)?;
    let mut link = SensorLink::new(&mut connection);

    let device = link.open().context("Sensor did not answer the open command")?;
    println!("{}", "=".repeat(60));
    println!("{}", format!("GT-5x sensor on {}", port).cyan().bold());
    println!("{}", "=".repeat(60));
    println!("  Firmware: {:#010x}", device.firmware_version);
    println!("  ISO template max size: {}", device.iso_max_size);
    println!("  Serial number: {}", device.serial_hex());
    println!("  Enrolled templates: {}", link.enrolled_count()?);

    // Press detection only works with the LED lit
    link.set_led(true)?;
    let pressed = link.is_finger_pressed();
    link.set_led(false)?;
    println!("  Finger on sensor: {}", if pressed? { "yes" } else { "no" });

    link.close()?;
    println!("{}", "=".repeat(60));
    Ok(())
}

#[cfg(feature = "serial")]
fn report_failure(err: &AcquisitionError) {
    eprintln!("{} {} ({})", "[ERROR]".red().bold(), err, err.kind());
    match err.kind() {
        FailureKind::Timeout => eprintln!("{}", "Timeout!".red()),
        FailureKind::InvalidPortSettings => eprintln!("{}", "Invalid port settings!".red()),
        FailureKind::GenericFault => {
            if matches!(err, AcquisitionError::Interrupted) {
                eprintln!("Closing port.");
            }
        }
    }
    eprintln!("{}", "Image extraction failed!".red().bold());
}

#[cfg(feature = "serial")]
fn install_ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")
}

fn handle_inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read bitmap: {}", path.display()))?;
    let info = BitmapInfo::parse(&bytes)
        .with_context(|| format!("Failed to parse bitmap header: {}", path.display()))?;

    println!("{}", "=".repeat(60));
    println!("{}", format!("Bitmap: {}", path.display()).cyan().bold());
    println!("{}", "=".repeat(60));
    println!("  File size field: {} (actual {})", info.file_size, bytes.len());
    println!("  Pixel data offset: {}", info.pixel_offset);
    println!("  Info header size: {}", info.header_size);
    println!(
        "  Dimensions: {}x{} ({})",
        info.pixel_width(),
        info.pixel_height(),
        if info.is_top_down() { "top-down" } else { "bottom-up" }
    );
    println!("  Planes: {}", info.planes);
    println!("  Bit depth: {}", info.depth);
    match info.stride() {
        Ok(stride) => println!("  Image size: {} (stride {})", info.image_size, stride),
        Err(e) => println!("  Image size: {} ({})", info.image_size, e.to_string().red()),
    }
    println!("  Resolution: {} x {}", info.x_resolution, info.y_resolution);
    println!("  Palette entries: {}", info.palette_entries());

    if info.depth == 8 {
        match read_bitmap(&bytes) {
            Ok(decoded) => {
                let min = decoded.pixels.iter().copied().min().unwrap_or(0);
                let max = decoded.pixels.iter().copied().max().unwrap_or(0);
                println!("  Pixel range: {}..={}", min, max);
            }
            Err(e) => println!("  {} {}", "Pixel data:".red(), e),
        }
    }

    let issues = info.issues(bytes.len());
    if issues.is_empty() {
        println!("\n{} Header is consistent", "[OK]".green().bold());
    } else {
        println!("\n{}", "Issues:".yellow().bold());
        for issue in &issues {
            println!("  {} {}", "[WARNING]".yellow(), issue);
        }
    }

    println!("{}", "=".repeat(60));
    Ok(())
}
