use anyhow::Context;
use clap::Parser;

use detrun::cli::Cli;
use detrun::output::OutputManager;
use detrun::tracer::{self, KernelBackend, Settings, Supervisor};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    if !cfg!(target_os = "linux") {
        eprintln!("Error: detrun is only supported on Linux");
        std::process::exit(1);
    }

    cli.validate().context("invalid arguments")?;

    let output = OutputManager::new(cli.output.as_deref(), cli.verbose, cli.no_color)
        .context("failed to set up output")?;

    let settings = Settings {
        legacy_kernel: tracer::legacy_seccomp_ordering(),
        force_post_hook: cli.verbose >= 3,
        clock_epoch: cli.epoch,
    };

    let child = tracer::spawn_traced(&cli.command).context("failed to launch command")?;

    let mut supervisor = Supervisor::new(KernelBackend, child, settings, output)
        .context("failed to attach supervisor")?;

    let exit_code = supervisor.run().context("supervision failed")?;

    std::process::exit(exit_code);
}
