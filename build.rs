use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=partitions.csv");
    println!("cargo:rerun-if-env-changed=BUILD_VERSION");

    // WIFI_SSID, WIFI_PASSWORD, CONSOLE_PASSWORD, BROKER_HOST and the
    // optional DEVICE_HOSTNAME / TELEMETRY_HOST may come from a `.env` file.
    dotenv_build::output(dotenv_build::Config::default())?;

    let version = match std::env::var("BUILD_VERSION") {
        Ok(version) if !version.is_empty() => version,
        _ => chrono::Utc::now().format("%Y.%m.%d-%H%M").to_string(),
    };
    println!("cargo:rustc-env=BUILD_VERSION={version}");
    Ok(())
}
