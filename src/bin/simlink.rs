use std::{
    error::Error,
    io,
    ops::RangeInclusive,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use clap::Parser;
use log::info;
use simlink::{
    Link, LinkConfig,
    cli::{Input, prompt, repl},
    config::LaunchOptions,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Station host
    #[arg(long, default_value = simlink::config::DEFAULT_HOST)]
    host: String,
    /// Connect to this port only, skipping the scan
    #[arg(long)]
    port: Option<u16>,
    /// Ports to scan, as START-END
    #[arg(long, value_parser = parse_range)]
    port_range: Option<RangeInclusive<u16>>,
    /// Steady-state receive timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
    /// Station executable to start when none is running locally
    #[arg(long)]
    launch: Option<PathBuf>,
    /// Start the launched station without a window
    #[arg(long, requires = "launch")]
    hidden: bool,
}

fn parse_range(s: &str) -> Result<RangeInclusive<u16>, String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("'{s}' is not a range, expected START-END"))?;
    let start = start.trim().parse::<u16>().map_err(|e| e.to_string())?;
    let end = end.trim().parse::<u16>().map_err(|e| e.to_string())?;
    if start > end {
        return Err(format!("range start {start} is after end {end}"));
    }
    Ok(start..=end)
}

impl From<Cli> for LinkConfig {
    fn from(cli: Cli) -> Self {
        let mut config = LinkConfig::default()
            .with_host(cli.host)
            .with_timeout(Duration::from_secs(cli.timeout));
        if let Some(range) = cli.port_range {
            config = config.with_ports(range);
        }
        if let Some(port) = cli.port {
            config = config.with_forced_port(port);
        }
        if let Some(executable) = cli.launch {
            let mut launch = LaunchOptions::new(executable);
            launch.hidden = cli.hidden;
            config = config.with_launch(launch);
        }
        config
    }
}

/// Reads commands on its own thread so an interrupt is handled while the
/// prompt is still blocked on stdin.
fn spawn_reader(tx: mpsc::Sender<Input>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        loop {
            let input = match prompt(stdin.lock(), stdout.lock()) {
                Ok(Some(cmd)) => Input::Command(cmd),
                Ok(None) => Input::EndOfInput,
                Err(e) => {
                    eprintln!("{e}");
                    continue;
                }
            };
            let last = !matches!(input, Input::Command(_));
            if tx.send(input).is_err() || last {
                return;
            }
        }
    });
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let link = Link::connect(cli.into())?;
    info!("station version {}", link.version()?);

    // First ctrl-c disconnects through the REPL loop, a second one exits.
    let (tx, rx) = mpsc::channel();
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    let on_interrupt = tx.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        let _ = on_interrupt.send(Input::Interrupted);
    })?;
    spawn_reader(tx);

    repl(&link, &rx, io::stdout())?;
    Ok(())
}
