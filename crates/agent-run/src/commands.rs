use std::path::PathBuf;

use clap::Parser;

const LONG_ABOUT: &str = r#"agent-run supervises a command inside a pseudo-terminal and hands
control to an AI agent when the command stalls or sits on an
unanswered prompt.

WORKFLOW:
    1. agent-run spawns the command under a PTY and mirrors its output
       to the console and to .agent-run/output.log
    2. A short mid-line silence (IO_WAIT) or a long silence (STALL)
       pauses the session: .agent-run/status.json flips to
       WAITING_FOR_AI and the registered intervention job is triggered
    3. The agent inspects the log, optionally injects input through
       .agent-run/input.pipe, then writes {"state": "AI_DONE"} to
       status.json to resume supervision

EXAMPLES:
    # Supervise a long build
    agent-run --cmd "make -j8" --name build-watch --payload "Fix build breaks"

    # Supervise an interactive installer
    agent-run --cmd "./install.sh" --name installer --payload "Answer prompts sensibly"

    # Inject input from another terminal
    echo "y" > .agent-run/input.pipe"#;

#[derive(Parser)]
#[command(name = "agent-run")]
#[command(author, version)]
#[command(about = "Supervise a command under a PTY with AI intervention")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    /// Command to run under supervision (passed to /bin/sh -c)
    #[arg(long)]
    pub cmd: String,

    /// Name of the intervention job (deduplicated on registration)
    #[arg(long)]
    pub name: String,

    /// Task context handed to the intervention agent
    #[arg(long)]
    pub payload: String,

    /// Working directory for the child (default: current directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Intervention agent CLI used to register and trigger jobs
    #[arg(long, default_value = "openclaw", env = "AGENT_RUN_AGENT_CLI")]
    pub agent_cli: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_required_args() {
        let cli = Cli::parse_from([
            "agent-run",
            "--cmd",
            "make",
            "--name",
            "build-watch",
            "--payload",
            "fix breaks",
        ]);
        assert_eq!(cli.cmd, "make");
        assert_eq!(cli.name, "build-watch");
        assert_eq!(cli.payload, "fix breaks");
        assert_eq!(cli.dir, None);
        assert_eq!(cli.agent_cli, PathBuf::from("openclaw"));
    }

    #[test]
    fn test_missing_cmd_is_an_error() {
        let result = Cli::try_parse_from(["agent-run", "--name", "x", "--payload", "y"]);
        assert!(result.is_err());
    }
}
