//! Runs the traffic-light controller on the tokio timer backend, printing each colour as it
//! lights up.
//!
//! ```text
//! traffic_lights --run-for 30 --warning-after 12 --reset-after 20
//! traffic_lights --print-config --dot traffic.dot
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use state_machine::graph_printer::StateGraphPrinter;
use state_machine::{Runner, StateMachineDescriptor};
use traffic_lights::traffic_light::{LightEvent, Timings, TrafficLight};

#[derive(Parser, Debug)]
#[clap(name = "traffic_lights")]
struct Opts {
    /// Print the configuration and exit.
    #[clap(long)]
    print_config: bool,

    /// Print the configuration as JSON and exit.
    #[clap(long)]
    json: bool,

    /// Write the transition graph in dot format.
    #[clap(long)]
    dot: Option<PathBuf>,

    /// JSON file overriding the default phase durations.
    #[clap(long)]
    timings: Option<PathBuf>,

    /// Switch to blinking after this many seconds.
    #[clap(long)]
    warning_after: Option<u64>,

    /// Send a reset after this many seconds.
    #[clap(long)]
    reset_after: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[clap(long)]
    run_for: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();
    println!("traffic_lights: {}", state_machine::build_options());

    let timings = match &opts.timings {
        Some(path) => Timings::load(path)?,
        None => Timings::default(),
    };
    let descriptor = TrafficLight::new(timings, |value| println!("cb, value={value}"));
    let machine = descriptor.build()?;
    println!("fsm: nb states={} nb_events={}", machine.nb_states(), machine.nb_events());
    for warning in machine.validate() {
        warn!("{warning}");
    }

    if let Some(path) = &opts.dot {
        StateGraphPrinter::write_dot_file(&machine, path)?;
        info!("Wrote {}", path.display());
    }
    if opts.print_config {
        print!("{}", StateGraphPrinter::config_string(&machine));
        return Ok(());
    }
    if opts.json {
        println!("{}", StateGraphPrinter::snapshot(&machine).to_json()?);
        return Ok(());
    }

    let runner = Runner::start(machine);
    let dispatcher = runner.dispatcher();
    if let Some(secs) = opts.warning_after {
        dispatcher.dispatch_delay(LightEvent::WarningOn, Duration::from_secs(secs));
    }
    if let Some(secs) = opts.reset_after {
        dispatcher.dispatch_delay(LightEvent::Reset, Duration::from_secs(secs));
    }

    match opts.run_for {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    let machine = runner.shutdown().await?;
    info!("Stopped in {:?}", machine.current_state());
    Ok(())
}
