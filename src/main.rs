use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use synchrotron::sim::config::MachineConfig;
use synchrotron::sim::stats::{print_plain, PhaseStats};
use synchrotron::sim::top::{Environment, PhaseInfo};
use synchrotron::sim::trace::{FileTraceReader, TraceFormat, TraceSource};

#[derive(Parser)]
#[command(version, about = "A microarchitecture simulator for research and education")]
struct SynchrotronArgs {
    /// Paths to the instruction traces, one per simulated core
    #[arg(required = true)]
    traces: Vec<PathBuf>,

    /// Read all traces using the cloudsuite format
    #[arg(short = 'c', long)]
    cloudsuite: bool,

    /// Hide the heartbeat output
    #[arg(long)]
    hide_heartbeat: bool,

    /// The number of instructions in the warmup phase
    #[arg(short = 'w', long)]
    warmup_instructions: Option<u64>,

    /// The number of instructions in the detailed phase. If not specified,
    /// run to the end of the trace
    #[arg(short = 'i', long)]
    simulation_instructions: Option<u64>,

    /// The file to receive JSON output. If no file is specified, stdout is
    /// used
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    json: Option<String>,

    /// Machine description in TOML
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let argv = SynchrotronArgs::parse();

    let mut cfg = match &argv.config {
        Some(path) => match fs::read_to_string(path) {
            Ok(text) => MachineConfig::from_toml(&text),
            Err(err) => {
                eprintln!("cannot read configuration {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => MachineConfig::default(),
    };
    cfg.sim.num_cpus = argv.traces.len();
    if let Some(warmup) = argv.warmup_instructions {
        cfg.sim.warmup_instructions = warmup;
    }
    if let Some(simulation) = argv.simulation_instructions {
        cfg.sim.simulation_instructions = simulation;
    }

    let format = if argv.cloudsuite {
        TraceFormat::Cloudsuite
    } else {
        TraceFormat::Standard
    };
    let repeat = argv.simulation_instructions.is_some();
    let mut traces: Vec<Box<dyn TraceSource>> = Vec::new();
    for (index, path) in argv.traces.iter().enumerate() {
        match FileTraceReader::new(path, format, index as u16, repeat) {
            Ok(reader) => traces.push(Box::new(reader)),
            Err(err) => {
                eprintln!("cannot open trace {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("*** Synchrotron Multicore Out-of-Order Simulator ***");
    println!();
    println!("Warmup Instructions: {}", cfg.sim.warmup_instructions);
    println!("Simulation Instructions: {}", cfg.sim.simulation_instructions);
    println!("Number of CPUs: {}", cfg.sim.num_cpus);
    println!();

    let mut env = Environment::new(&cfg);
    let mut phases = Vec::new();
    if cfg.sim.warmup_instructions > 0 {
        phases.push(PhaseInfo {
            name: "Warmup".to_string(),
            is_warmup: true,
            length: cfg.sim.warmup_instructions,
        });
    }
    phases.push(PhaseInfo {
        name: "Simulation".to_string(),
        is_warmup: false,
        length: cfg.sim.simulation_instructions,
    });

    let mut phase_stats: Vec<PhaseStats> = Vec::new();
    for phase in &phases {
        let stats = env.run_phase(phase, &mut traces, argv.hide_heartbeat, cfg.sim.heartbeat);
        if !phase.is_warmup {
            phase_stats.push(stats);
        }
    }

    println!();
    println!("Synchrotron completed all CPUs");

    print_plain(&phase_stats);
    env.final_stats();

    if let Some(json_target) = &argv.json {
        let rendered =
            serde_json::to_string_pretty(&phase_stats).expect("statistics serialize cleanly");
        if json_target.is_empty() {
            println!("{rendered}");
        } else if let Err(err) = fs::write(json_target, rendered) {
            eprintln!("cannot write JSON output {json_target}: {err}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
