#![allow(clippy::print_stdout)]

mod console;
mod image;
mod ota;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bindicator-cli")]
#[command(about = "Console and OTA update client for bindicator devices", long_about = None)]
struct Cli {
    /// Console password
    #[arg(short, long, env = "BINDICATOR_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a firmware image (enables the OTA window first)
    OtaPush {
        /// Device address
        host: String,

        /// Raw application image (.bin)
        image: PathBuf,
    },
    /// Show the device's OTA status
    OtaInfo {
        /// Device address
        host: String,
    },
    /// Open the OTA window
    OtaEnable {
        /// Device address
        host: String,

        /// Window length: 90, 30s, 5m or 1h (device default if omitted)
        duration: Option<String>,
    },
    /// Inspect an image file, no device needed
    ImageInfo {
        /// Raw application image (.bin)
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let password = cli.password.unwrap_or_default();

    match cli.command {
        Commands::OtaPush { host, image } => ota::push(&host, &image, &password),
        Commands::OtaInfo { host } => {
            println!("Querying device OTA status...");
            let mut console = console::Console::connect(&host, &password)?;
            println!("{}", console.command("ota")?);
            Ok(())
        }
        Commands::OtaEnable { host, duration } => {
            let output = ota::enable(&host, duration.as_deref(), &password)?;
            println!("{output}");
            Ok(())
        }
        Commands::ImageInfo { image } => {
            let summary = image::ImageSummary::load(&image)?;
            println!("Image: {}", image.display());
            print!("{summary}");
            Ok(())
        }
    }
}
