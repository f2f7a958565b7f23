//! `laser-level` command line front end.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::info;

use laser_level::acquisition::{SessionMode, SessionState};
use laser_level::actor::{self, LevelHandle};
use laser_level::calibration::display_to_physical;
use laser_level::camera::{CameraRegistry, MockCamera, MockLaser};
use laser_level::config::Settings;
use laser_level::messages::LevelEvent;
use laser_level::samples::Sample;
use laser_level::scheduler::{CyclePlan, CyclicScheduler};
use laser_level::units::DisplayUnit;
use laser_level::{export, logging, remote};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const MOCK_WIDTH: u32 = 640;
const MOCK_HEIGHT: u32 = 480;

/// Laser line height and flatness measurement.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// TOML settings file; `LASERLEVEL_*` variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Zero, take samples along a simulated surface and print the flatness table.
    Run {
        /// Samples to take after zeroing.
        #[arg(long, default_value_t = 5)]
        samples: usize,
        /// Peak height of the simulated bow, in the display unit.
        #[arg(long, default_value_t = 0.0)]
        bow: f64,
        /// Write the table to this CSV file.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Run the cyclic scheduler against the mock camera.
    Cycle {
        /// Seconds between triggers (overrides `cycle.interval_s`).
        #[arg(long)]
        interval: Option<u64>,
        /// Total seconds (overrides `cycle.duration_s`).
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Serve the remote line protocol until interrupted.
    Serve {
        /// Address to bind (overrides `remote.bind`).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the effective settings as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    logging::init(&settings.application, cli.json_logs);
    info!("{} starting", settings.application.name);

    match cli.command {
        Command::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Command::Run {
            samples,
            bow,
            export,
        } => run(&settings, samples, bow, export).await,
        Command::Cycle { interval, duration } => {
            let plan = CyclePlan::new(
                interval.unwrap_or(settings.cycle.interval_s),
                duration.unwrap_or(settings.cycle.duration_s),
            )?;
            cycle(&settings, plan).await
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.remote.bind.clone());
            serve(&settings, &bind).await
        }
    }
}

fn mock_registry() -> (CameraRegistry, MockLaser) {
    let laser = MockCamera::new(MOCK_WIDTH, MOCK_HEIGHT).laser();
    let mut registry = CameraRegistry::new();
    let shared = laser.clone();
    registry.register("mock-0", move || {
        Box::new(
            MockCamera::new(MOCK_WIDTH, MOCK_HEIGHT)
                .with_noise(3.0)
                .with_laser(shared.clone()),
        )
    });
    (registry, laser)
}

async fn start_engine(settings: &Settings) -> Result<(LevelHandle, JoinHandle<()>, MockLaser)> {
    let (registry, laser) = mock_registry();
    let (level, task) = actor::spawn(settings, registry);
    level
        .set_camera_index(0)
        .await
        .context("Failed to open camera")?;
    Ok((level, task, laser))
}

async fn stop_engine(level: LevelHandle, task: JoinHandle<()>) -> Result<()> {
    level.shutdown().await?;
    task.await.context("Level actor panicked")?;
    Ok(())
}

async fn run(
    settings: &Settings,
    samples: usize,
    bow: f64,
    export_path: Option<PathBuf>,
) -> Result<()> {
    let (level, task, laser) = start_engine(settings).await?;
    let unit = settings.sampler.display_unit;
    let rest = f64::from(MOCK_HEIGHT) / 2.0;
    // A gently bowed surface, 3 px high unless a bow was given.
    let pitch_mm = settings.sampler.sensor_width_mm / f64::from(MOCK_WIDTH);
    let peak_px = if bow == 0.0 {
        3.0
    } else {
        display_to_physical(bow, unit) / pitch_mm
    };

    let zero = level.acquire(SessionMode::Zeroing).await?;
    println!("Zero reference: {}", unit.format(zero.value));

    for i in 0..samples {
        let phase = i as f64 * std::f64::consts::PI / samples.max(1) as f64;
        let offset = phase.sin() * peak_px;
        laser.set_position(rest + offset).await;
        let done = level.acquire(SessionMode::SAMPLE).await?;
        if let Some(sample) = done.latest_sample {
            println!("Sample {}: {}", i + 1, unit.format(sample.y));
        }
    }

    let snapshot = level.snapshot();
    print_table(&snapshot.samples, unit);
    if let Some(stats) = snapshot.stats {
        println!(
            "Flatness: measured range {}, max shim {}, max scrape {}",
            unit.format(stats.measured.range()),
            unit.format(stats.shim.max),
            unit.format(stats.scrape.max)
        );
    }
    if let Some(path) = export_path {
        export::export_csv(&path, &snapshot.samples, unit)
            .with_context(|| format!("Failed to export to {}", path.display()))?;
        println!("Exported to {}", path.display());
    }

    stop_engine(level, task).await
}

fn print_table(samples: &[Sample], unit: DisplayUnit) {
    let headers = export::headers(unit);
    println!(
        "{:>4}  {:>16}{:>16}{:>16}{:>16}",
        "#", headers[0], headers[1], headers[2], headers[3]
    );
    for (i, row) in export::export_rows(samples, unit).iter().enumerate() {
        let cells = row.cells(unit);
        println!(
            "{:>4}  {:>16}{:>16}{:>16}{:>16}",
            i + 1,
            cells[0],
            cells[1],
            cells[2],
            cells[3]
        );
    }
}

async fn cycle(settings: &Settings, plan: CyclePlan) -> Result<()> {
    let (level, task, _laser) = start_engine(settings).await?;
    let printer = tokio::spawn(print_completions(
        level.subscribe(),
        settings.sampler.display_unit,
    ));
    println!(
        "Cycling every {:?} for {} cycles (Ctrl-C to stop)",
        plan.interval, plan.max_cycles
    );

    let mut scheduler = CyclicScheduler::start(plan, level.clone());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => scheduler.stop(),
        _ = scheduler.wait() => {}
    }
    let fired = scheduler.wait().await;
    info!(fired, "Scheduler finished");

    // Let the last triggered session finish.
    let mut snapshots = level.watch_snapshot();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = snapshots.wait_for(|s| s.session == SessionState::Idle) => {}
    }

    stop_engine(level, task).await?;
    printer.abort();
    Ok(())
}

async fn print_completions(mut events: broadcast::Receiver<LevelEvent>, unit: DisplayUnit) {
    loop {
        match events.recv().await {
            Ok(LevelEvent::Completed(done)) => match done.latest_sample {
                Some(sample) => println!("{} sample {}", done.at, unit.format(sample.y)),
                None => println!("{} zero {}", done.at, unit.format(done.value)),
            },
            Ok(LevelEvent::Aborted { reason, .. }) => println!("aborted: {}", reason),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

async fn serve(settings: &Settings, bind: &str) -> Result<()> {
    let (level, task, _laser) = start_engine(settings).await?;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    tokio::select! {
        result = remote::serve(listener, level.clone()) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    stop_engine(level, task).await
}
