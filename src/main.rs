//! Marker Camera Board CLI
//!
//! Discovers marker camera boards and exercises them from the command line.

use clap::{Parser, Subcommand};
use marker_board::{
    backends::{HardwareBackend, HardwareContext, SingleHardwareBackend},
    framework::{Backend, Board, BoardGroup, FrameworkError},
    vision::{CameraDriver, MockDriver},
    BackendConfig, MarkerCameraBoard, MarkerCameraInterface,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "marker-board")]
#[command(about = "Fiducial marker camera board")]
#[command(version)]
struct Cli {
    /// Backend configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only drive camera 0, ignoring any other cameras
    #[arg(long)]
    single: bool,

    /// Use N simulated cameras instead of real devices
    #[arg(long, value_name = "N")]
    mock: Option<u32>,

    /// Serial number of the board to use when several are attached
    #[arg(short, long)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered boards
    List,

    /// Print the markers the camera can see
    See {
        /// Skip pose estimation until a pose is read
        #[arg(long)]
        lazy: bool,

        /// Number of frames to process (0 runs until interrupted)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
    },

    /// Print the ids of visible markers
    Ids {
        /// Number of frames to process (0 runs until interrupted)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
    },

    /// Save a raw frame
    Capture {
        /// Output file path (default: frame_TIMESTAMP.png)
        output: Option<PathBuf>,
    },

    /// Save a frame with detected markers outlined
    Save {
        /// Output file path (default: markers_TIMESTAMP.png)
        output: Option<PathBuf>,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Marker Camera Board v{}", marker_board::VERSION);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => BackendConfig::from_file(path)?,
        None => BackendConfig::default(),
    };

    match cli.mock {
        Some(cameras) => {
            info!("Using {} simulated camera(s)", cameras);
            with_driver(cli, config, MockDriver::new(0..cameras))
        }
        None => native(cli, config),
    }
}

#[cfg(feature = "camera")]
fn native(cli: Cli, config: BackendConfig) -> Result<(), Box<dyn Error>> {
    with_driver(cli, config, marker_board::vision::NokhwaDriver)
}

#[cfg(not(feature = "camera"))]
fn native(_cli: Cli, _config: BackendConfig) -> Result<(), Box<dyn Error>> {
    Err("built without camera support; rebuild with --features camera or pass --mock N".into())
}

fn with_driver<D: CameraDriver>(
    cli: Cli,
    config: BackendConfig,
    driver: D,
) -> Result<(), Box<dyn Error>> {
    let context = HardwareContext::new(config, driver);
    if cli.single {
        drive::<SingleHardwareBackend<D>>(&context, cli.serial, cli.command)
    } else {
        drive::<HardwareBackend<D>>(&context, cli.serial, cli.command)
    }
}

fn drive<Be>(
    context: &Be::Context,
    serial: Option<String>,
    command: Command,
) -> Result<(), Box<dyn Error>>
where
    Be: Backend<Board = MarkerCameraBoard<Be>> + MarkerCameraInterface,
    Be::Error: 'static,
{
    let mut group = BoardGroup::<MarkerCameraBoard<Be>>::discover::<Be>(context)?;

    match command {
        Command::List => {
            for board in group.iter() {
                println!(
                    "{}\t{}\t{}",
                    board.serial_number(),
                    board.name(),
                    board.firmware_version().unwrap_or_default()
                );
            }
        }
        Command::See { lazy, count } => {
            let board = select(&mut group, serial.as_deref())?;
            let running = interrupt_flag();
            let mut processed = 0;
            while keep_going(&running, processed, count) {
                let markers = board.see(!lazy, None)?;
                println!("{} marker(s)", markers.len());
                for marker in &markers {
                    println!("  {}", marker);
                }
                processed += 1;
            }
        }
        Command::Ids { count } => {
            let board = select(&mut group, serial.as_deref())?;
            let running = interrupt_flag();
            let mut processed = 0;
            while keep_going(&running, processed, count) {
                println!("{:?}", board.see_ids(None)?);
                processed += 1;
            }
        }
        Command::Capture { output } => {
            let board = select(&mut group, serial.as_deref())?;
            let path = output.unwrap_or_else(|| timestamped("frame"));
            let frame = board.capture()?;
            let image = frame.to_image().ok_or("camera returned a malformed frame")?;
            image.save(&path)?;
            println!("{}", path.display());
        }
        Command::Save { output } => {
            let board = select(&mut group, serial.as_deref())?;
            let path = output.unwrap_or_else(|| timestamped("markers"));
            board.save(&path, None)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

/// Picks the board with `serial`, or the only board when none is given.
fn select<'a, B: Board>(
    group: &'a mut BoardGroup<B>,
    serial: Option<&str>,
) -> Result<&'a mut B, FrameworkError> {
    let board = match serial {
        Some(serial) => group.get_mut(serial)?,
        None => group.singular()?,
    };
    info!(serial = board.serial_number(), "Using board");
    Ok(board)
}

/// Cleared when the user presses Ctrl-C.
fn interrupt_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst)) {
        warn!("Failed to install interrupt handler: {}", e);
    }
    running
}

fn keep_going(running: &AtomicBool, processed: u64, count: u64) -> bool {
    running.load(Ordering::SeqCst) && (count == 0 || processed < count)
}

fn timestamped(prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("{}_{}.png", prefix, stamp))
}
