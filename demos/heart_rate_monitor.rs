//! Live heart rate and variability monitor
//!
//! Run with: cargo run --example heart_rate_monitor [name-filter]

use biolink_ble::{
    mg_per_dl_to_mmol_per_l, Error, Result, ScanConfig, ScanningChooser, Supervisor,
    SupervisorConfig, SupervisorObservers,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("Heart Rate Monitor");
    println!("==================\n");

    let mut scan = ScanConfig::default().with_scan_timeout(Duration::from_secs(15));
    if let Some(filter) = std::env::args().nth(1) {
        println!("Only accepting devices matching \"{}\"", filter);
        scan = scan.with_name_filter(filter);
    }

    println!("Looking for monitors...\n");
    let chooser = ScanningChooser::new(scan).await;

    let observers = SupervisorObservers::new()
        .on_heart_rate(|bpm| println!("  Heart rate:  {:3} bpm", bpm))
        .on_variability(|rmssd| println!("  RMSSD:       {:3} ms", rmssd))
        .on_glucose(|mg| {
            println!(
                "  Glucose:     {:3} mg/dL ({:.1} mmol/L)",
                mg,
                mg_per_dl_to_mmol_per_l(mg as f64)
            )
        })
        .on_disconnect(|reason| println!("\nLost connection: {}", reason));

    let supervisor = Supervisor::new(Arc::new(chooser), observers, SupervisorConfig::default())?;

    let name = match supervisor.connect().await {
        Ok(name) => name,
        Err(Error::NoDeviceSelected) => {
            println!("No monitor found. Is it awake and not paired elsewhere?");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("Connected to {}", name);
    if let Some(level) = supervisor.battery_level() {
        println!("Battery: {}%", level);
    }
    if let Some(report) = supervisor.subscription_report() {
        println!("Subscriptions: {:?}", report);
    }
    println!("Press Ctrl+C to exit.\n");

    let mut states = supervisor.subscribe_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nExiting...");
                break;
            }
            event = states.recv() => {
                match event {
                    Ok(event) if !event.state.is_connected() => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    supervisor.disconnect().await?;

    Ok(())
}
