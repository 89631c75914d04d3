use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{FileSpec, Logger};
use log::info;
use std::path::PathBuf;
use xepl_rt::Toggle;
use xepl_shell::{Outcome, Shell};

#[derive(Parser)]
#[command(version, about)]
struct Params {
    /// enable logging and put the log in the specified directory. You
    /// should also set the RUST_LOG environment variable, e.g. RUST_LOG=debug
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// name of the host lobe
    #[arg(long, default_value = "brain")]
    name: String,
    /// turn dispatch tracing on from the start
    #[arg(short, long)]
    trace: bool,
    /// run the program in the specified file instead of starting the REPL
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let params = Params::parse();
    let _logger = match &params.log_dir {
        Some(dir) => Logger::try_with_env()
            .context("initializing log")?
            .log_to_file(
                FileSpec::default()
                    .directory(dir)
                    .basename("xepl")
                    .use_timestamp(false),
            )
            .start()
            .context("starting log")?,
        None => Logger::try_with_env_or_str("warn")
            .context("initializing log")?
            .start()
            .context("starting log")?,
    };
    info!("xepl shell starting");

    loop {
        let mut shell = Shell::new(&params.name)?;
        if params.trace {
            shell.brain().cortex().set_toggle(Toggle::Trace, true);
        }
        if let Some(file) = &params.file {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            shell.brain().execute_xml(&text)?;
            shell.brain().dispatch_pending();
            return Ok(());
        }
        match shell.run()? {
            Outcome::Quit => return Ok(()),
            Outcome::Reboot => {
                info!("rebooting");
                continue;
            }
        }
    }
}
