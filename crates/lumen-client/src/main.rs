//! The `lumen` binary: join a world server and keep the world in sync.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use lumen_client::{ClientError, WorldClient};
use lumen_config::{CliArgs, Config, default_config_dir};
use lumen_net::{ConnectionState, unix_time_ms};
use tokio::time::MissedTickBehavior;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "lumen exited with error");
            eprintln!("lumen: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<(), ClientError> {
    let config_dir = match &args.config {
        Some(dir) => dir.clone(),
        None => default_config_dir()?,
    };
    let mut config = Config::load_or_create(&config_dir)?;
    config.apply_cli_overrides(&args);

    lumen_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.network.endpoint(),
        config_dir = %config_dir.display(),
        "lumen starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(session(&config, &args))
}

async fn session(config: &Config, args: &CliArgs) -> Result<(), ClientError> {
    let mut client = WorldClient::new(config);
    client.connect(args.token.clone()).await?;

    let period = Duration::from_secs_f64(1.0 / f64::from(args.frame_rate.max(1)));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut frames: u64 = 0;
    let mut bootstrap = client.world().bootstrap.state();
    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("interrupted");
                break Ok(());
            }
        }

        client.frame(unix_time_ms());
        frames += 1;

        let current = client.world().bootstrap.state();
        if current != bootstrap {
            tracing::info!(
                state = ?current,
                entities = client.world().movement.len(),
                chunks = client.world().loaded_chunks,
                "world bootstrap"
            );
            bootstrap = current;
        }

        if matches!(
            client.state(),
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            break match client.connection().last_fault() {
                Some(fault) => Err(ClientError::Session(fault.clone())),
                None => Ok(()),
            };
        }

        if args.frames.is_some_and(|limit| frames >= limit) {
            tracing::info!(frames, "frame limit reached");
            break Ok(());
        }
    };

    let diagnostics = client.connection().diagnostics();
    let movement = client.world().movement.metrics();
    let clock = client.world().time_sync.metrics();
    tracing::info!(
        frames,
        avg_rtt_ms = ?diagnostics.average_rtt_ms,
        rtt_stddev_ms = ?diagnostics.rtt_stddev_ms,
        median_rtt_ms = ?clock.median_rtt_ms,
        clock_jitter_ms = clock.jitter_ms,
        loss_rate = diagnostics.loss_rate,
        frames_received = diagnostics.frames_received,
        malformed_frames = diagnostics.malformed_frames,
        unknown_messages = client.dispatcher().unknown_message_count(),
        snaps = movement.total_snaps,
        "session summary"
    );
    client.disconnect();
    outcome
}
