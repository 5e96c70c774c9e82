//! Headless GA144 runner.
//!
//! Loads a compiled program (JSON), boots it through the async serial
//! protocol, runs a step budget, and reports ring output and node
//! state.

use std::path::PathBuf;
use std::process;

use ga144::{Chip, Program};

struct CliArgs {
    program_path: Option<PathBuf>,
    steps: u64,
    snapshot: Vec<u16>,
    ring: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs { program_path: None, steps: 2_000_000, snapshot: Vec::new(), ring: false };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--steps" => {
                i += 1;
                cli.steps = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| usage("--steps needs a number"));
            }
            "--snapshot" => {
                i += 1;
                let coord = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| usage("--snapshot needs a coordinate"));
                cli.snapshot.push(coord);
            }
            "--ring" => cli.ring = true,
            "--help" | "-h" => usage(""),
            arg if !arg.starts_with('-') => cli.program_path = Some(PathBuf::from(arg)),
            arg => usage(&format!("unknown option {arg}")),
        }
        i += 1;
    }
    cli
}

fn usage(problem: &str) -> ! {
    if !problem.is_empty() {
        eprintln!("error: {problem}");
    }
    eprintln!("usage: ga144 <program.json> [--steps N] [--snapshot COORD]... [--ring]");
    process::exit(if problem.is_empty() { 0 } else { 2 });
}

fn main() {
    env_logger::init();
    let cli = parse_args();

    let Some(path) = cli.program_path else {
        usage("a program file is required");
    };
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };
    let program = match Program::from_json(&text) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let mut chip = Chip::new();
    let issues = match chip.load_program(&program) {
        Ok(issues) => issues,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    for issue in &issues {
        eprintln!("warning: {}", issue.message);
    }

    let idle = chip.step_until_done(cli.steps);
    println!(
        "ran {} events over {:.1} us simulated; {}",
        chip.events_processed(),
        chip.now_ns() / 1000.0,
        if idle { "machine idle" } else { "budget exhausted" }
    );

    if cli.ring {
        let delta = chip.io_delta(0);
        println!("ring: {} records (start seq {})", delta.records.len(), delta.start_seq);
        for rec in &delta.records {
            println!("  {:>10.1} ns  node {:03}  {:05X}", rec.time_ns, rec.coord(), rec.value());
        }
    }

    for coord in &cli.snapshot {
        match chip.snapshot_node(*coord) {
            Some(snap) => match serde_json::to_string_pretty(&snap) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("error: snapshot serialization failed: {e}"),
            },
            None => eprintln!("warning: no node {coord}"),
        }
    }
}
