// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use agentserver_daemon::{bootstrap, oob_handler, spawn_pump_loop};
use agentserver_transport::{main_bus_router, oob_router, MainBusState};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agentserver-daemon", version, about = "Multi-agent message-plane organism")]
struct Args {
    /// Path to the organism's YAML bootstrap config.
    #[arg(long, default_value = "organism.yaml")]
    config: PathBuf,

    /// Widen logging to debug level for the pump as well as the rest of
    /// the organism.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("organism=debug,organism.pump=debug")
    } else {
        EnvFilter::new("organism=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(target: "organism.daemon", error = ?e, "bootstrap failed");
            eprintln!("error: {e:?}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let organism = bootstrap(&args.config).await?;
    tracing::info!(
        target: "organism.daemon",
        organism = %organism.config.organism.name,
        listeners = organism.registry.read().await.len(),
        "organism bootstrapped"
    );

    let cert = tokio::fs::read(&organism.config.organism.tls.cert_path)
        .await
        .with_context(|| format!("read {}", organism.config.organism.tls.cert_path))?;
    let key = tokio::fs::read(&organism.config.organism.tls.key_path)
        .await
        .with_context(|| format!("read {}", organism.config.organism.tls.key_path))?;
    let tls_config =
        agentserver_transport::server_config(&cert, &key).context("build TLS server config")?;

    let main_bus_state = Arc::new(MainBusState {
        pump: Arc::clone(&organism.pump),
        registry: Arc::clone(&organism.registry),
        schemas: Arc::clone(&organism.schemas),
        paths: Arc::clone(&organism.paths),
        router: Arc::clone(&organism.router),
        totp: Arc::clone(&organism.totp),
    });
    let bind = format!("0.0.0.0:{}", organism.config.organism.port);
    let bind_addr = bind.parse().with_context(|| format!("parse bind address {bind}"))?;

    let pump_task = spawn_pump_loop(&organism);

    let mut shutdown_rx = match oob_handler(&organism) {
        Some((oob_state, shutdown_rx)) => {
            spawn_oob_listener(&organism, oob_state);
            Some(shutdown_rx)
        }
        None => None,
    };

    let main_bus = main_bus_router(main_bus_state);
    tracing::info!(target: "organism.daemon", %bind, "main bus listening");

    let serve = axum_server::bind_rustls(bind_addr, axum_server::tls_rustls::RustlsConfig::from_config(tls_config))
        .serve(main_bus.into_make_service());

    let exit_code = tokio::select! {
        result = serve => {
            result.context("main bus server exited")?;
            ExitCode::from(2)
        }
        () = wait_for_shutdown(&mut shutdown_rx) => {
            tracing::info!(target: "organism.daemon", "oob shutdown accepted, exiting cleanly");
            ExitCode::from(0)
        }
    };

    pump_task.abort();
    Ok(exit_code)
}

async fn wait_for_shutdown(shutdown_rx: &mut Option<tokio::sync::watch::Receiver<bool>>) {
    match shutdown_rx {
        Some(rx) => {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
        None => std::future::pending::<()>().await,
    }
}

fn spawn_oob_listener(organism: &agentserver_daemon::Organism, state: Arc<agentserver_transport::OobState>) {
    let bind = organism.config.oob.bind.clone();
    let port = organism.config.oob.port;
    tokio::spawn(async move {
        let Some(port) = port else {
            tracing::warn!(target: "organism.oob", "oob.enabled with a unix socket target is not yet wired, skipping listener");
            return;
        };
        let addr = format!("{bind}:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!(target: "organism.oob", %addr, "oob channel listening");
                let router = oob_router(state);
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!(target: "organism.oob", error = ?e, "oob listener exited");
                }
            }
            Err(e) => {
                tracing::error!(target: "organism.oob", %addr, error = ?e, "failed to bind oob listener");
            }
        }
    });
}
