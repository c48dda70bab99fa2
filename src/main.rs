//! Scopeshot - Oscilloscope screen capture
//!
//! Grabs a screenshot from a bench oscilloscope over LAN or USB, picking
//! the right SCPI dialect for the detected vendor.

use clap::{Parser, Subcommand, ValueEnum};
use scopeshot_core::{
    persist, timestamped_path, CaptureEngine, CaptureRequest, CliResult, ColorMode, ExitCodes,
    NetConnector, SessionBackend, Settings, Target, DISCOVERY_PATTERNS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Scopeshot CLI
#[derive(Parser, Debug)]
#[command(
    name = "scopeshot",
    version,
    about = "Oscilloscope screen capture over SCPI (LAN or USB)",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Background color of the capture: WHITE or BLACK
    #[arg(long)]
    color: Option<String>,

    /// Seconds to wait for connects and reads
    #[arg(long)]
    timeout: Option<u64>,

    /// Output path template; a timestamp is inserted before the extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture from a scope on the network
    Net {
        /// Host name or IP address
        #[arg(short = 'H', long)]
        host: String,

        /// Explicit port (0 = auto; 1861 = VICP, 5025 = raw SCPI)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Capture from a USB instrument
    Usb {
        /// Exact resource string, e.g. USB0::0x05FF::0x1023::SN::INSTR;
        /// omit to auto-detect the first USB instrument
        #[arg(short, long)]
        resource: Option<String>,
    },

    /// List instrument resources visible to the session library
    List,

    /// Print the exit code table
    ExitCodes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = init_tracing(&cli);

    let result = run(&cli);
    match &result {
        CliResult::Success(Some(msg)) => println!("{msg}"),
        CliResult::Success(None) => {}
        CliResult::Error(_, msg) => eprintln!("error: {msg}"),
    }
    result.to_exit_code()
}

fn init_tracing(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Some(path) = &cli.log_file {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let file = path.file_name().map(PathBuf::from).unwrap_or_else(|| "scopeshot.log".into());
        let appender = tracing_appender::rolling::never(
            dir.unwrap_or_else(|| std::path::Path::new(".")),
            file,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

fn run(cli: &Cli) -> CliResult {
    match &cli.command {
        Commands::ExitCodes => {
            scopeshot_core::cli::print_exit_codes();
            CliResult::success()
        }
        Commands::List => list_resources(),
        Commands::Net { host, port } => capture(
            cli,
            Target::Network {
                host: host.clone(),
                port: *port,
            },
        ),
        Commands::Usb { resource } => capture(
            cli,
            Target::Device {
                resource: resource.clone(),
            },
        ),
    }
}

#[cfg(feature = "visa")]
fn default_backend() -> Option<Arc<dyn SessionBackend>> {
    match scopeshot_core::VisaBackend::new() {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            warn!(error = %e, "VISA resource manager unavailable");
            None
        }
    }
}

#[cfg(not(feature = "visa"))]
fn default_backend() -> Option<Arc<dyn SessionBackend>> {
    None
}

fn list_resources() -> CliResult {
    let Some(backend) = default_backend() else {
        return CliResult::error(
            ExitCodes::CONFIG_ERROR,
            "no instrument-session backend; rebuild with the `visa` feature",
        );
    };

    for pattern in DISCOVERY_PATTERNS {
        match backend.list_resources(pattern) {
            Ok(resources) if !resources.is_empty() => {
                println!("{pattern}:");
                for resource in resources {
                    println!("  {resource}");
                }
                return CliResult::success();
            }
            Ok(_) => {}
            Err(e) => warn!(pattern, error = %e, "enumeration failed"),
        }
    }

    CliResult::error(ExitCodes::DEVICE_NOT_FOUND, "no instruments found")
}

fn capture(cli: &Cli, target: Target) -> CliResult {
    let settings = Settings::load().unwrap_or_else(|e| {
        warn!(error = %e, "cannot load config, using defaults");
        Settings::default()
    });

    let color = ColorMode::parse_lossy(cli.color.as_deref().unwrap_or(&settings.color));
    let request = CaptureRequest {
        target,
        color,
        timeout: Duration::from_secs(cli.timeout.unwrap_or(settings.timeout_secs)),
        output: cli.output.clone().unwrap_or_else(|| settings.output.clone()),
    };

    let backend = default_backend();
    let engine = CaptureEngine::new(Arc::new(NetConnector::new(backend.clone())))
        .with_backend(backend)
        .with_min_image_bytes(settings.min_image_bytes)
        .with_pacing(settings.pacing());

    let cancel = engine.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("cancelling after the current step...");
        cancel.cancel();
    }) {
        warn!(error = %e, "cannot install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => return CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string()),
    };

    match runtime.block_on(engine.capture(&request)) {
        Ok(report) => {
            let path = timestamped_path(&request.output, chrono::Local::now());
            match persist(&report.image, &path) {
                Ok(saved) => match cli.format {
                    OutputFormat::Json => {
                        let summary = serde_json::json!({
                            "path": saved.path,
                            "bytes": saved.bytes_written,
                            "dimensions": saved.dimensions,
                            "vendor": report.vendor.label(),
                            "identity": report.identity,
                            "endpoint": report.endpoint,
                            "plan": report.plan,
                            "attempts": report.attempts,
                        });
                        CliResult::success_with_message(summary.to_string())
                    }
                    OutputFormat::Text => {
                        let dims = saved
                            .dimensions
                            .map(|(w, h)| format!(" ({w} x {h} px)"))
                            .unwrap_or_default();
                        CliResult::success_with_message(format!(
                            "Screenshot saved to {}{dims}: {} bytes from {} [{}]",
                            saved.path.display(),
                            saved.bytes_written,
                            report.endpoint,
                            report.vendor.label(),
                        ))
                    }
                },
                Err(e) => CliResult::error(ExitCodes::ERROR, e.to_string()),
            }
        }
        Err(e) => {
            if !cli.quiet {
                print_hints(&request.target);
            }
            CliResult::from(&e)
        }
    }
}

fn print_hints(target: &Target) {
    match target {
        Target::Network { host, .. } => {
            eprintln!("Troubleshooting:");
            eprintln!("  - Ping {host} from this machine to verify connectivity.");
            eprintln!("  - On the scope, enable remote/network control.");
            eprintln!("  - Check that ports 1861 and 5025 are not firewalled.");
        }
        Target::Device { .. } => {
            eprintln!("Troubleshooting:");
            eprintln!("  - Check the USB cable and the scope's USB-B device port.");
            eprintln!("  - Pass --resource with the exact resource string.");
            eprintln!("  - `scopeshot list` shows what the session library sees.");
        }
    }
}
