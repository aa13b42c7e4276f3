use anyhow::{Context, Result};
use skycast_core::Config;
use skycast_weather::{ForecastResolver, Resolution};
use std::process::ExitCode;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize core
    skycast_core::init()?;

    let addresses: Vec<String> = std::env::args().skip(1).collect();
    if addresses.is_empty() {
        eprintln!("usage: skycast <address> [<address> ...]");
        return Ok(ExitCode::from(2));
    }

    let (config, _validation) = Config::load_validated()?;
    let resolver =
        ForecastResolver::from_config(&config).context("Failed to start forecast resolver")?;
    let deadline = Duration::from_secs(config.http.timeout_secs.saturating_mul(2));

    tracing::info!("SkyCast started with {} address(es)", addresses.len());

    let mut failed = false;
    for address in &addresses {
        match resolver.resolve_with_timeout(address, deadline).await {
            Ok(Some(resolution)) => println!("{}", render(address, &resolution)),
            Ok(None) => {
                failed = true;
                println!("{}: no matching location found", address);
            }
            Err(e) => {
                failed = true;
                tracing::error!(kind = %e.kind(), "Failed to resolve {:?}: {}", address, e);
                println!(
                    "{}: {} (status {})",
                    address,
                    e.user_message(),
                    e.suggested_status()
                );
                if e.is_fatal() {
                    break;
                }
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn render(address: &str, resolution: &Resolution) -> String {
    let record = &resolution.record;
    let mut line = format!(
        "{}: {}°C, {} (high {}°C / low {}°C) [{:?}]",
        address,
        record.current_temp_c,
        record.conditions,
        record.high_temp_c,
        record.low_temp_c,
        resolution.freshness
    );
    for day in &record.extended_forecast {
        line.push_str(&format!(
            "\n  {}  {:>3}°C / {:>3}°C  {}",
            day.date, day.high_celsius, day.low_celsius, day.condition_text
        ));
    }
    line
}
