use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agent_run_core::CliIntervention;
use agent_run_core::RunnerConfig;
use agent_run_core::RunnerError;
use agent_run_core::SignalHandler;
use agent_run_core::Supervisor;

mod commands;

use commands::Cli;

fn main() {
    init_tracing("info");

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code_for(&e));
    }
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    let working_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| RunnerError::Setup {
            operation: "current_dir".to_string(),
            reason: e.to_string(),
        })?,
    };

    let config = RunnerConfig::from_env();
    let service = Arc::new(CliIntervention::new(cli.agent_cli));

    let supervisor = Supervisor::new(
        cli.cmd,
        working_dir,
        cli.name,
        cli.payload,
        config,
        service,
    );

    // Keep the handler thread alive for the whole session.
    let _signals = SignalHandler::setup(supervisor.state())?;

    supervisor.run()
}

/// sysexits-style codes: OS-level startup failures are distinguishable
/// from everything else.
fn exit_code_for(error: &RunnerError) -> i32 {
    match error {
        RunnerError::Pty(_) => 71,      // EX_OSERR
        RunnerError::Setup { .. } => 73, // EX_CANTCREAT
        RunnerError::SignalSetup(_) => 71,
        _ => 1,
    }
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Diagnostics go to stderr; stdout is reserved for the mirrored
    // child output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}
