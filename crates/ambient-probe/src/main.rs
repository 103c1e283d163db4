//! AmbientBrightness backend probe
//!
//! One-shot diagnostics: binds each brightness backend once, takes a single
//! reading from everything that is available, prints a report and releases
//! all handles again.
//!
//! Probe sequence:
//! 1. Load configuration
//! 2. Bind backends (ambient light, keyboard backlight, display)
//! 3. Sample each available backend
//! 4. Shut everything down

use ambient_config::AmbientConfig;
use ambient_hal::{
    BackendError, Capabilities, DisplayServices, NormalizedValue, SensorBackend, SystemPlatform,
};
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Probe stages for timing
#[derive(Debug, Clone, Copy)]
enum ProbeStage {
    Configuration,
    Binding,
    Sampling,
    Shutdown,
}

impl ProbeStage {
    fn name(&self) -> &'static str {
        match self {
            ProbeStage::Configuration => "configuration",
            ProbeStage::Binding => "binding",
            ProbeStage::Sampling => "sampling",
            ProbeStage::Shutdown => "shutdown",
        }
    }
}

/// What one probe run found
#[derive(Debug, Default)]
struct ProbeReport {
    ambient_source: Option<&'static str>,
    ambient: Option<Result<NormalizedValue, BackendError>>,
    ambient_error: Option<BackendError>,
    keyboard_source: Option<&'static str>,
    keyboard: Option<NormalizedValue>,
    keyboard_error: Option<BackendError>,
    displays: Vec<(String, Result<NormalizedValue, BackendError>)>,
    display_error: Option<BackendError>,
}

fn main() -> Result<()> {
    let probe_start = Instant::now();

    // Configuration comes first so its log filter can apply
    let stage_start = Instant::now();
    let config = AmbientConfig::load_default().context("Failed to load configuration")?;
    setup_logging(&config.logging.filter);
    log_stage_complete(ProbeStage::Configuration, stage_start);

    info!("AmbientBrightness probe starting...");

    let stage_start = Instant::now();
    let mut caps = Capabilities::probe(
        SystemPlatform,
        config.ambient.clone(),
        config.keyboard.clone(),
    );
    log_stage_complete(ProbeStage::Binding, stage_start);

    let stage_start = Instant::now();
    let report = sample(&caps);
    log_stage_complete(ProbeStage::Sampling, stage_start);

    let stage_start = Instant::now();
    caps.shutdown();
    log_stage_complete(ProbeStage::Shutdown, stage_start);

    print_report(&report);
    info!("Probe complete in {:?}", probe_start.elapsed());
    Ok(())
}

/// Setup logging to console
fn setup_logging(default_filter: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn log_stage_complete(stage: ProbeStage, start: Instant) {
    debug!("Stage '{}' complete in {:?}", stage.name(), start.elapsed());
}

/// Take one reading from every available backend
fn sample(caps: &Capabilities) -> ProbeReport {
    let mut report = ProbeReport::default();

    match &caps.ambient {
        SensorBackend::Available(sensor) => {
            report.ambient_source = Some(sensor.source());
            report.ambient = Some(sensor.read());
        }
        SensorBackend::Unavailable(e) => report.ambient_error = Some(e.clone()),
    }

    match &caps.keyboard {
        SensorBackend::Available(keyboard) => {
            report.keyboard_source = Some(keyboard.source());
            match keyboard.get() {
                Ok(value) => report.keyboard = Some(value),
                Err(e) => report.keyboard_error = Some(e),
            }
        }
        SensorBackend::Unavailable(e) => report.keyboard_error = Some(e.clone()),
    }

    match DisplayServices::matching(caps.display.platform()) {
        Ok(services) => {
            for service in services.iter() {
                report
                    .displays
                    .push((service.to_string(), caps.display.get(service)));
            }
        }
        Err(e) => {
            warn!("Failed to enumerate displays: {}", e);
            report.display_error = Some(e);
        }
    }

    report
}

fn print_report(report: &ProbeReport) {
    println!("Ambient light sensor");
    if let Some(source) = report.ambient_source {
        println!("  via {}", source);
    }
    match (&report.ambient, &report.ambient_error) {
        (Some(Ok(level)), _) => println!("  available, level {}", level),
        (Some(Err(e)), _) => println!("  available, no sample: {}", e),
        (None, Some(e)) => println!("  unavailable: {}", e),
        (None, None) => println!("  unavailable"),
    }

    println!("Keyboard backlight");
    if let Some(source) = report.keyboard_source {
        println!("  via {}", source);
    }
    match (&report.keyboard, &report.keyboard_error) {
        (Some(level), _) => println!("  available, brightness {}", level),
        (None, Some(e)) if e.is_unavailable() => println!("  unavailable: {}", e),
        (None, Some(e)) => println!("  available, no reading: {}", e),
        (None, None) => println!("  unavailable"),
    }

    println!("Displays");
    if let Some(e) = &report.display_error {
        println!("  enumeration failed: {}", e);
    } else if report.displays.is_empty() {
        println!("  no adjustable displays found");
    }
    for (name, result) in &report.displays {
        match result {
            Ok(level) => println!("  {}: brightness {}", name, level),
            Err(e) => println!("  {}: {}", name, e),
        }
    }
}
