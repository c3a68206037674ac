// keyflux CLI: wiring for the engine, devices and signal handling

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use keyflux_core::{
    Config, ContextProvider, Engine, Flow, NullProvider, ProviderKind, RuleSet, Source, UinputSink,
};

/// Low-level keyboard remapper for Linux
#[derive(Parser, Debug)]
#[command(name = "keyflux")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Devices to remap, by path or name (repeatable; default: autodetect)
    #[arg(short, long, value_name = "DEVICE")]
    devices: Vec<String>,

    /// Watch for hot-plugged devices
    #[arg(short, long)]
    watch: bool,

    /// List available keyboard devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

const EXIT_IO: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if args.list_devices {
        return match Source::list_devices() {
            Ok(devices) => {
                println!("Found {} keyboard device(s):", devices.len());
                for device in devices {
                    match device.path {
                        Some(path) => println!("  {}: {} ({})", device.index, device.name, path),
                        None => println!("  {}: {}", device.index, device.name),
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("{e}");
                ExitCode::from(EXIT_IO)
            }
        };
    }

    let Some(config_path) = args.config.clone() else {
        tracing::error!("--config is required unless --list-devices is given");
        return ExitCode::from(EXIT_CONFIG);
    };

    let config = match Config::from_path(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load {}: {e}", config_path.display());
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let rules = match config.to_rule_set() {
        Ok(rules) => rules,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if args.check {
        println!("Configuration is valid");
        return ExitCode::SUCCESS;
    }

    match run(&args, &config, rules) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(EXIT_IO)
        }
    }
}

/// Pick the window-context backend from the session environment. The
/// compositor clients plug in behind `ContextProvider`; without one the
/// engine runs with an empty context and window predicates never match.
fn select_provider() -> Box<dyn ContextProvider> {
    let session_type = std::env::var("XDG_SESSION_TYPE").unwrap_or_default();
    let desktop = std::env::var("XDG_CURRENT_DESKTOP")
        .unwrap_or_default()
        .to_lowercase();

    match ProviderKind::select(&session_type, &desktop) {
        Some(kind) => {
            tracing::info!("window context backend: {kind}");
            // Compositor-specific clients are external; they feed a shared
            // provider. Until one is wired in, predicates see no window.
            Box::new(NullProvider)
        }
        None => {
            tracing::warn!(
                "no window context backend for session '{}' desktop '{}'; \
                 window predicates will not match",
                session_type,
                desktop
            );
            Box::new(NullProvider)
        }
    }
}

fn run(args: &Args, config: &Config, rules: RuleSet) -> Result<(), Box<dyn std::error::Error>> {
    // CLI --devices wins over the config's [devices].only list.
    let filter = if args.devices.is_empty() {
        config.device_filter()
    } else {
        args.devices.clone()
    };

    let mut source = Source::open(&filter, args.watch)?;
    tracing::info!(
        "grabbed {} device(s): {:?}",
        source.device_count(),
        source.device_names()
    );

    let sink = UinputSink::new()?;
    let mut engine = Engine::new(rules, select_provider(), sink);

    let running = Arc::new(AtomicBool::new(true));
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;
        let running = running.clone();
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    tracing::info!("keyflux is running");

    let result = event_loop(&mut source, &mut engine, &running);

    // Orderly exit: every output press gets its release, devices are
    // returned to the kernel.
    engine.shutdown()?;
    source.ungrab_all();
    result
}

fn event_loop(
    source: &mut Source,
    engine: &mut Engine<UinputSink>,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    while running.load(Ordering::SeqCst) {
        // Sleep until input arrives or the next engine timer is due.
        let timeout_ms = match engine.next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    0
                } else {
                    deadline
                        .duration_since(now)
                        .as_millis()
                        .min(i32::MAX as u128) as i32
                }
            }
            None => 500,
        };

        let events = match source.poll(timeout_ms) {
            Ok(events) => events,
            Err(e) => return Err(Box::new(e)),
        };

        for event in &events {
            tracing::debug!("in {} ({})", event.key, event.action);
            if engine.on_event(event)? == Flow::Eject {
                return Ok(());
            }
        }

        engine.on_timer(Instant::now())?;
    }
    Ok(())
}
