//! vdlink-detector - the vehicle-detector daemon.

use clap::Parser;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vdlink_detector::{Detector, DetectorConfig};
use vdlink_protocol::{DeviceId, DeviceType, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "vdlink-detector")]
#[command(about = "GB/T 43229 vehicle detector endpoint")]
#[command(version)]
struct Cli {
    /// Controller host
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Controller port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Administrative division code (24-bit)
    #[arg(short, long, default_value_t = 0x01AD24)]
    admin_code: u32,

    /// Device type bit (1=signal, 2=loop, 4=magnetic, 8=ultrasonic,
    /// 16=video, 32=microwave, 64=radar, 128=RFID)
    #[arg(short = 't', long, default_value_t = 2)]
    device_type: u8,

    /// Device number
    #[arg(short = 'i', long, default_value_t = 100)]
    device_id: u16,

    /// Log level: 0=debug, 1=info, 2=warn, 3=error
    #[arg(short, long, default_value_t = 1)]
    log_level: u8,

    /// Log file (stderr if omitted)
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.admin_code > 0xFF_FFFF {
        eprintln!("admin code {:#x} exceeds 24 bits", cli.admin_code);
        std::process::exit(1);
    }
    vdlink::logging::init(cli.log_level, cli.log_file.as_deref())?;

    let server_addr = (cli.server.as_str(), cli.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("could not resolve {}:{}", cli.server, cli.port))?;

    let device = DeviceId::new(
        cli.admin_code,
        DeviceType::from_bits(cli.device_type as u16),
        cli.device_id,
    );
    let config =
        DetectorConfig::new(server_addr, device).with_status_interval(Duration::from_secs(30));

    tracing::info!("starting vehicle detector");
    tracing::info!("  device: {} ({})", device, device.device_type.describe());
    tracing::info!("  server: {}", server_addr);

    let detector = Arc::new(Detector::new(config));

    let shutdown_detector = detector.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal, stopping detector");
        shutdown_detector.shutdown();
    });

    detector.run().await?;
    Ok(())
}
