use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod config;
mod media;

use media::recorder::Recorder;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("mjpeg_bus", log::LevelFilter::Debug)
        .filter_module("transcoder", log::LevelFilter::Warn)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {:#}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    let recorder = Arc::new(Recorder::new(config.clone()));

    let running = Arc::clone(&recorder);
    let done = cancel.clone();
    tokio::spawn(async move {
        match running.start().await {
            Ok(Some(summary)) => {
                log::info!(
                    "recording finished: {} frames shown, {} snapshots, exit {:?}",
                    summary.consumer.frames,
                    summary.consumer.snapshots,
                    summary.session.exit_status
                );
                if summary.session.timed_out {
                    log::warn!("transcoder had to be abandoned");
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("recording failed: {:#}", e),
        }
        done.cancel();
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                recorder.cancel();
            },
        }
    }

    std::process::exit(0);
}
