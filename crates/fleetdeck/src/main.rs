use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use fleetdeck::remote::{RemoteExec, SshClient, SshTarget};
use fleetdeck::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about = "Interactive session manager for remotely deployed apps")]
struct Args {
    /// Remote target, user@host:port (user and port optional)
    host: String,
    /// Project directory holding config/deploy.yml and overlays
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,
    /// Write tracing diagnostics to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    let target = SshTarget::parse(&args.host)?;
    let label = target.display();
    let client = SshClient::new(target);

    // Fail fast while stdout is still a plain terminal.
    if let Err(e) = client.check() {
        return Err(Error::msg(format!(
            "cannot reach {label}: {e}\nhint: try `ssh {label}` to diagnose the connection"
        )));
    }

    let exec: Arc<dyn RemoteExec> = Arc::new(client);
    let project_dir = args.project_dir.is_dir().then_some(args.project_dir);
    fleetdeck::ui::run_tui(exec, label, project_dir)
}

fn init_tracing(log_file: Option<&std::path::Path>) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    // The terminal belongs to the TUI; diagnostics only go somewhere when
    // asked for.
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::msg(format!("cannot open log file {}: {e}", path.display())))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetdeck=debug")),
        )
        .with_writer(file)
        .with_ansi(false)
        .init();
    Ok(())
}
