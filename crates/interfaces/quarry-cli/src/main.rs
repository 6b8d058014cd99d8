use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use quarry_app_core::{
    app_events, claim_data_dir, default_data_dir, forward_to_primary, prepare_data_dir,
    InstanceList, PeerClaim, QuarryApplication,
};
use quarry_cli::{logging, Cli, ConsoleHost};
use tokio_util::sync::CancellationToken;

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("quarry: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;
    let requested_dir = cli.dir.clone().unwrap_or_else(default_data_dir);

    // Usage errors are reported before anything touches the disk.
    cli.startup_options(requested_dir.clone(), &cwd).validate()?;

    let data_dir = prepare_data_dir(&requested_dir)?;
    let options = cli.startup_options(data_dir.clone(), &cwd);

    let server = match claim_data_dir(&data_dir).await? {
        PeerClaim::Primary(server) => server,
        PeerClaim::Secondary(client) => {
            let command = options.peer_command();
            if let Err(e) = forward_to_primary(&client, &command).await {
                eprintln!("quarry: could not reach the running instance: {e}");
            }
            return Ok(0);
        }
    };

    let log_file = logging::init(&data_dir, cli.verbose)?;
    tracing::info!(
        version = quarry_config::LAUNCHER_VERSION,
        data_dir = %data_dir.display(),
        log = %log_file.display(),
        "quarry starting"
    );

    let (events_tx, events_rx) = app_events();
    let host = Arc::new(ConsoleHost::new(events_tx.clone()));
    let app = QuarryApplication::new(
        options,
        InstanceList::new(&data_dir),
        host,
        (events_tx, events_rx),
        Some(server),
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let code = app.run(shutdown).await;
    if code != 0 {
        eprintln!("quarry: the requested launch failed, see {}", log_file.display());
    }
    Ok(code)
}
