use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "detrun")]
#[command(about = "Run a command under a deterministic-execution supervisor")]
#[command(version)]
pub struct Cli {
    /// Command to execute under supervision
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,

    /// JSONL event log file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Base value in seconds for synthesized clock readings
    #[arg(long, value_name = "SECONDS", default_value = "744847200")]
    pub epoch: u64,

    /// Increase verbosity (-v, -vv, -vvv; -vvv also forces post-hooks so
    /// return values of every intercepted call are logged)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.is_empty() {
            anyhow::bail!("command is required");
        }

        if let Some(parent) = self.output.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                anyhow::bail!("output directory does not exist: {}", parent.display());
            }
        }

        Ok(())
    }
}
