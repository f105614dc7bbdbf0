//! vdlink-controller - the signal-controller daemon.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use vdlink_controller::{ControllerConfig, Server};
use vdlink_protocol::{DeviceId, DeviceType, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "vdlink-controller")]
#[command(about = "GB/T 43229 traffic signal controller endpoint")]
#[command(version)]
struct Cli {
    /// Listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Administrative division code (24-bit)
    #[arg(short, long, default_value_t = 0x01AD24)]
    admin_code: u32,

    /// Device number
    #[arg(short = 'i', long, default_value_t = 1)]
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

    let device = DeviceId::new(cli.admin_code, DeviceType::SIGNAL, cli.device_id);
    let bind_addr = format!("0.0.0.0:{}", cli.port).parse()?;
    let config = ControllerConfig::new(bind_addr, device);

    tracing::info!("starting signal controller");
    tracing::info!("  device: {}", device);
    tracing::info!("  listen: {}", bind_addr);

    let server = Arc::new(Server::new(config));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal, stopping controller");
        shutdown_server.shutdown();
    });

    server.run().await?;

    tracing::info!("controller stopped");
    Ok(())
}
