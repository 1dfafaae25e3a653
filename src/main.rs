//! StableCam CLI - Persistent stable IDs for USB cameras.
//!
//! Provides both human-friendly and machine-friendly (JSON mode) interfaces.
#![forbid(unsafe_code)]

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use serde::Serialize;

use stablecam::cli::{self, Cli, Commands};
use stablecam::logging::init_logging;
use stablecam::{CamError, CameraDescriptor, EventKind, RegisteredCamera, Result, StableCam};

fn main() {
    let cli = Cli::parse();

    init_logging(cli.use_json(), cli.verbose, cli.quiet);

    // Handle no-color flag or non-TTY
    if cli.no_color || !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&cli) {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        None => print_quick_start(cli),
        Some(Commands::Detect(args)) => cmd_detect(cli, args),
        Some(Commands::Register(args)) => cmd_register(cli, args),
        Some(Commands::List(args)) => cmd_list(cli, args),
        Some(Commands::Show(args)) => cmd_show(cli, args),
        Some(Commands::Monitor(args)) => cmd_monitor(cli, args),
        Some(Commands::Completions(args)) => cmd_completions(cli, args),
    }
}

/// Build the orchestrator honoring `--registry`.
fn orchestrator(cli: &Cli) -> Result<StableCam> {
    match &cli.registry {
        Some(path) => StableCam::with_registry_path(path),
        None => StableCam::new(),
    }
}

// === Quick Start ===

/// Prints quick-start help for humans and a command map for scripts.
#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn print_quick_start(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "tool": "stablecam",
                "version": env!("CARGO_PKG_VERSION"),
                "description": "Persistent stable IDs for USB cameras across re-enumeration",
                "discovery": {
                    "detect_cameras": "stablecam detect --json",
                    "list_registered": "stablecam list --json",
                    "show_device": "stablecam show <STABLE_ID> --json",
                },
                "registration": {
                    "register_sole_camera": "stablecam register",
                    "register_by_index": "stablecam register --index <N>",
                    "register_everything": "stablecam register --all",
                },
                "monitoring": "stablecam monitor --json",
                "registry_override": "Use --registry <PATH> or STABLECAM_REGISTRY",
            }),
        );
        return Ok(());
    }

    println!(
        "{} {} - USB camera stable IDs\n",
        "stablecam".bold().cyan(),
        env!("CARGO_PKG_VERSION")
    );

    println!("{}", "QUICK START".bold().underline());
    println!();
    println!("  {}  Detect connected cameras", "stablecam detect".green());
    println!("  {}  Register the sole camera", "stablecam register".green());
    println!("  {}  List registered cameras", "stablecam list".green());
    println!(
        "  {}  Show one camera",
        "stablecam show stable-cam-001".green()
    );
    println!("  {}  Watch connect/disconnect", "stablecam monitor".green());
    println!();
    println!("Run {} for full help", "stablecam --help".yellow());
    Ok(())
}

// === Command Implementations ===

fn cmd_detect(cli: &Cli, _args: &cli::DetectArgs) -> Result<()> {
    let cam = orchestrator(cli)?;
    let detected = cam.detect()?;

    if cli.use_json() {
        output_json(cli, &detected);
    } else if detected.is_empty() {
        println!("{}", "No USB cameras detected".yellow());
    } else {
        for descriptor in &detected {
            print_descriptor(descriptor);
        }
    }
    Ok(())
}

fn print_descriptor(descriptor: &CameraDescriptor) {
    println!(
        "[{}] {} ({}:{}){}",
        descriptor.system_index.to_string().green(),
        descriptor.label,
        descriptor.vendor_id,
        descriptor.product_id,
        descriptor
            .serial_number
            .as_deref()
            .map(|s| format!(" serial={s}"))
            .unwrap_or_default()
    );
}

fn cmd_register(cli: &Cli, args: &cli::RegisterArgs) -> Result<()> {
    let cam = orchestrator(cli)?;
    let detected = cam.detect()?;

    if detected.is_empty() {
        return Err(CamError::Other("no USB cameras detected".to_string()));
    }

    let targets: Vec<&CameraDescriptor> = if args.all {
        detected.iter().collect()
    } else if let Some(index) = args.index {
        let Some(descriptor) = detected.iter().find(|d| d.system_index == index) else {
            return Err(CamError::Other(format!(
                "no detected camera has system index {index}"
            )));
        };
        vec![descriptor]
    } else if detected.len() == 1 {
        vec![&detected[0]]
    } else {
        return Err(CamError::Other(format!(
            "{} cameras detected; pass --index <N> or --all",
            detected.len()
        )));
    };

    let mut registered: Vec<RegistrationOutcome> = Vec::new();
    for descriptor in targets {
        let stable_id = cam.register(descriptor)?;
        registered.push(RegistrationOutcome {
            stable_id,
            label: descriptor.label.clone(),
            system_index: descriptor.system_index,
        });
    }

    if cli.use_json() {
        output_json(cli, &registered);
    } else {
        for outcome in &registered {
            println!(
                "{} -> {}",
                outcome.label,
                outcome.stable_id.green().bold()
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RegistrationOutcome {
    stable_id: String,
    label: String,
    system_index: u32,
}

fn cmd_list(cli: &Cli, args: &cli::ListArgs) -> Result<()> {
    let cam = orchestrator(cli)?;
    let devices = cam.list();

    if cli.use_json() {
        output_json(cli, &devices);
    } else if devices.is_empty() {
        println!("{}", "No cameras registered".yellow());
        println!("Run `stablecam register` with a camera connected");
    } else {
        for device in &devices {
            if args.long {
                println!(
                    "{}: {} ({}:{}) {} registered={}",
                    device.stable_id.green(),
                    device.device_info.label,
                    device.device_info.vendor_id,
                    device.device_info.product_id,
                    format_status(device),
                    device.registered_at.format("%Y-%m-%d")
                );
            } else {
                println!("{}  {}", device.stable_id, format_status(device));
            }
        }
    }
    Ok(())
}

fn format_status(device: &RegisteredCamera) -> String {
    let status = device.status.to_string();
    if device.is_connected() {
        status.green().to_string()
    } else {
        status.yellow().to_string()
    }
}

fn cmd_show(cli: &Cli, args: &cli::ShowArgs) -> Result<()> {
    let cam = orchestrator(cli)?;
    let Some(device) = cam.get_by_id(&args.stable_id)? else {
        return Err(CamError::DeviceNotFound {
            stable_id: args.stable_id.clone(),
        });
    };

    if cli.use_json() {
        output_json(cli, &device);
    } else {
        println!("{}: {}", "Stable ID".bold(), device.stable_id);
        println!("{}: {}", "Label".bold(), device.device_info.label);
        println!(
            "{}: {}:{}",
            "Hardware".bold(),
            device.device_info.vendor_id,
            device.device_info.product_id
        );
        if let Some(serial) = &device.device_info.serial_number {
            println!("{}: {serial}", "Serial".bold());
        }
        if let Some(port) = &device.device_info.port_path {
            println!("{}: {port}", "Port".bold());
        }
        println!("{}: {}", "Status".bold(), format_status(&device));
        println!("{}: {}", "Registered".bold(), device.registered_at);
        if let Some(last_seen) = device.last_seen {
            println!("{}: {last_seen}", "Last seen".bold());
        }
    }
    Ok(())
}

fn cmd_monitor(cli: &Cli, args: &cli::MonitorArgs) -> Result<()> {
    let mut cam = orchestrator(cli)?;
    cam.set_poll_interval(Duration::from_secs(args.interval.max(1)));

    if args.register_all {
        for descriptor in cam.detect()? {
            cam.register(&descriptor)?;
        }
    }

    let json = cli.use_json();
    for kind in EventKind::ALL {
        cam.subscribe(
            kind,
            Arc::new(move |device: &RegisteredCamera| {
                print_event(json, kind, device);
            }),
        );
    }

    if !cli.quiet && !json {
        println!("Monitoring cameras (Ctrl+C to stop)...");
    }
    cam.start()?;

    // Runs until interrupted or the requested duration elapses, or until the
    // loop stops itself on a persistently failing backend.
    let deadline = args
        .duration
        .map(|secs| std::time::Instant::now() + Duration::from_secs(secs));
    while cam.is_running() {
        if let Some(deadline) = deadline
            && std::time::Instant::now() >= deadline
        {
            cam.stop();
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    Err(CamError::Other(
        "monitoring stopped after repeated detection failures".to_string(),
    ))
}

fn print_event(json: bool, kind: EventKind, device: &RegisteredCamera) {
    if json {
        let line = serde_json::json!({
            "event": kind.to_string(),
            "stable_id": device.stable_id,
            "label": device.device_info.label,
            "status": device.status,
        });
        println!("{line}");
    } else {
        let tag = match kind {
            EventKind::Connect => "connected".green(),
            EventKind::Disconnect => "disconnected".yellow(),
            EventKind::StatusChange => "status".cyan(),
        };
        println!("{} {} ({})", tag, device.stable_id, device.device_info.label);
    }
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_completions(_cli: &Cli, args: &cli::CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    clap_complete::generate(args.shell, &mut Cli::command(), "stablecam", &mut io::stdout());
    Ok(())
}

// === Utility Functions ===

fn output_json<T: Serialize>(cli: &Cli, data: &T) {
    let json = if cli.use_compact_json() {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    match json {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

fn output_error(cli: &Cli, error: &CamError) {
    if cli.use_json() {
        let json = serde_json::json!({
            "error": true,
            "message": error.to_string(),
            "suggestion": error.suggestion(),
            "transient": error.is_transient(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => eprintln!("failed to serialize error: {e}"),
        }
    } else {
        eprintln!("{}: {}", "Error".red().bold(), error);
        if let Some(suggestion) = error.suggestion() {
            eprintln!("{}: {}", "Hint".yellow(), suggestion);
        }
    }
}
