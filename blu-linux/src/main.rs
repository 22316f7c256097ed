// Bluchat Linux: LAN discovery, transport and a terminal chat session.

mod config;
mod discovery;
mod host;
mod store;
mod transport;
mod ui;

use std::time::Duration;

use tokio::sync::{mpsc, watch};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let (mut cfg, problem) = config::load();
    init_logging(&cfg.log_level);
    if let Some(e) = problem {
        tracing::warn!(error = %format!("{:#}", e), "config file ignored");
    }

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("blu-linux {}", VERSION);
                return Ok(());
            }
            "--room" => {
                cfg.room = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--room needs a value"))?;
            }
            other => anyhow::bail!("unknown argument {:?}", other),
        }
    }

    let store = store::FileStore::new(cfg.handle_file.clone());
    let session = blu_core::MeshSession::new(Box::new(store), cfg.session_config());
    let local = session.local_identity().clone();
    tracing::info!(handle = %local.handle, peer = %local.peer_id, "identity loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (advert_tx, advert_rx) = watch::channel(discovery::Advert {
            peer_id: local.peer_id,
            handle: local.handle.to_string(),
            advertising: false,
        });
        let peers = discovery::new_peer_table();
        let transport = transport::Transport::new(
            advert_rx.clone(),
            peers.clone(),
            events_tx.clone(),
            Duration::from_secs(cfg.invitation_timeout_secs),
        );

        let listener = transport.clone();
        let transport_port = cfg.transport_port;
        tokio::spawn(async move {
            if let Err(e) = listener.listen(transport_port).await {
                tracing::warn!(error = %e, "transport stopped");
            }
        });
        let disc_events = events_tx.clone();
        let disc_port = cfg.discovery_port;
        tokio::spawn(async move {
            if let Err(e) =
                discovery::run_discovery(advert_rx, peers, disc_port, transport_port, disc_events)
                    .await
            {
                tracing::warn!(error = %e, "discovery stopped");
            }
        });
        tokio::spawn(ui::read_stdin(events_tx.clone()));
        let signal_events = events_tx;
        tokio::spawn(async move {
            if shutdown_signal().await.is_ok() {
                let _ = signal_events.send(host::HostEvent::Shutdown);
            }
        });

        let host = host::Host::new(advert_tx, transport);
        host::run_session(session, host, events_rx).await;
        // Let writer tasks flush Leave frames before the runtime goes away.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });
    Ok(())
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
