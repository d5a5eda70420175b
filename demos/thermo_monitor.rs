//! Real-time micro:bit temperature monitoring example
//!
//! Run with: cargo run --example thermo_monitor
//!
//! To only show the last N minutes of history:
//!   cargo run --example thermo_monitor -- --minutes 10

use chrono::Utc;
use microbit_thermo::{
    celsius_to_fahrenheit, AlertEvent, Config, Result, TemperatureMonitor,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,microbit_thermo=info")
        .init();

    println!("micro:bit Temperature Monitor");
    println!("=============================\n");

    let args: Vec<String> = std::env::args().collect();
    let minutes = args
        .iter()
        .position(|arg| arg == "--minutes")
        .and_then(|i| args.get(i + 1))
        .and_then(|m| m.parse::<i64>().ok());

    let config = Config::load()?;
    println!("History stored in {}", config.storage_dir().display());

    let monitor = TemperatureMonitor::open(&config).await?;
    println!("Loaded {} samples\n", monitor.all_samples().len());

    if let Some(minutes) = minutes {
        let since = Utc::now().timestamp_millis() - minutes * 60_000;
        monitor.set_time_window(Some(since), None)?;
        println!("Showing the last {} minutes\n", minutes);
    }

    let mut alerts = monitor.subscribe_alerts();

    let _handle = monitor.on_visible_samples_changed(|samples| {
        if let Some(latest) = samples.last() {
            println!(
                "{:>5} visible | {:3}°C ({:5.1}°F) at {}",
                samples.len(),
                latest.temperature,
                celsius_to_fahrenheit(f64::from(latest.temperature)),
                latest
                    .recorded_at()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default()
            );
        }
    });

    println!("Press Ctrl+C to exit.\n");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    'session: loop {
        println!("Looking for a micro:bit...");
        let attempt = monitor.connect();
        tokio::pin!(attempt);

        let connected = tokio::select! {
            _ = &mut ctrl_c => {
                if let Err(e) = monitor.cancel_connect().await {
                    println!("Could not cancel: {}", e);
                }
                let _ = attempt.await;
                break 'session;
            }
            result = &mut attempt => report(&monitor, result),
        };

        if connected {
            loop {
                tokio::select! {
                    _ = &mut ctrl_c => break 'session,
                    event = alerts.recv() => {
                        if let Ok(AlertEvent::Raised(alert)) = event {
                            println!("{}: {}", alert.title, alert.body);
                            break;
                        }
                    }
                }
            }
        }

        println!("Retrying in 5 seconds");
        tokio::select! {
            _ = &mut ctrl_c => break 'session,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    }

    println!("\nExiting...");
    monitor.shutdown().await?;

    Ok(())
}

fn report(monitor: &TemperatureMonitor, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            let status = monitor.status();
            println!(
                "Connected to {}",
                status.identifier.as_deref().unwrap_or("unknown")
            );
            true
        }
        Err(e) => {
            println!("Could not connect: {}", e);
            false
        }
    }
}
