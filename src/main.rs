// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dstore_core::api::router;
use dstore_core::config::{
    env_or_default, CoreConfig, DATA_DIR_ENV, DEFAULT_DATA_DIR, HOST_ENV, LEDGER_PATH_ENV,
    LOG_FORMAT_ENV, NODE_ADDRESS_ENV, NODE_NAME_ENV, NODE_PRIVATE_KEY_ENV, OWNER_PRIVATE_KEY_ENV,
    PORT_ENV, TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV,
};
use dstore_core::context::CoreContext;
use dstore_core::crypto::Identity;
use dstore_core::ledger::{Ledger, RedbKv};
use dstore_core::migration::MigrationMonitor;
use dstore_core::node::{NodeMaintainer, NodeProver, NodeService, SliceClearer};
use dstore_core::pdp::scheduler::ChallengeScheduler;
use dstore_core::state::AppState;
use dstore_core::storage::{FsBlobStore, StoragePaths};
use dstore_core::transport::http::HttpTransport;
use dstore_core::transport::SliceTransport;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    if env_or_default(LOG_FORMAT_ENV, "pretty") == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    // Must happen before any TLS operation.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    let ctx = CoreContext::new(CoreConfig::from_env());

    let data_dir = PathBuf::from(env_or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR));
    let ledger_path = env::var(LEDGER_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("ledger.redb"));
    std::fs::create_dir_all(&data_dir)?;
    let ledger = Ledger::new(Arc::new(RedbKv::open(&ledger_path)?), ctx.clone());

    let mut store = FsBlobStore::new(StoragePaths::new(&data_dir));
    store.initialize()?;

    let secret = env::var(NODE_PRIVATE_KEY_ENV).map_err(|_| format!("{NODE_PRIVATE_KEY_ENV} is required"))?;
    let identity = Arc::new(Identity::from_hex(secret.trim())?);
    let node_id = identity.node_id();

    let host = env_or_default(HOST_ENV, "0.0.0.0");
    let port: u16 = env_or_default(PORT_ENV, "8080").parse().unwrap_or(8080);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let maintainer = NodeMaintainer::new(
        identity.clone(),
        env_or_default(NODE_NAME_ENV, "dstore-node"),
        env_or_default(NODE_ADDRESS_ENV, &format!("http://127.0.0.1:{port}")),
        ledger.clone(),
        ctx.clone(),
    );
    let node = maintainer.register()?;
    info!(node_id = %node.id, address = %node.address, "Node registered");

    let service = NodeService::new(node_id, ledger.clone(), Arc::new(store), ctx.clone());
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if let Ok(owner_secret) = env::var(OWNER_PRIVATE_KEY_ENV) {
        let owner = Arc::new(Identity::from_hex(owner_secret.trim())?);
        let transport: Arc<dyn SliceTransport> = Arc::new(HttpTransport::new(ctx.config.pull_timeout)?);
        let scheduler = ChallengeScheduler::new(owner.clone(), ledger.clone(), transport.clone(), ctx.clone())?;
        let monitor = MigrationMonitor::new(owner.clone(), ledger.clone(), transport, ctx.clone())?;
        info!(owner = %owner.public_key().to_hex(), "Owner loops enabled");
        tasks.push(tokio::spawn(scheduler.run(shutdown.clone())));
        tasks.push(tokio::spawn(monitor.run(shutdown.clone())));
    }
    tasks.push(tokio::spawn(maintainer.run(shutdown.clone())));
    tasks.push(tokio::spawn(
        NodeProver::new(identity, service.clone(), ctx.clone()).run(shutdown.clone()),
    ));
    tasks.push(tokio::spawn(
        SliceClearer::new(service.clone(), ctx).run(shutdown.clone()),
    ));

    let app = router(AppState::new(service));
    let handle = Handle::new();
    {
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
            handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
        });
    }

    match (env::var(TLS_CERT_PATH_ENV), env::var(TLS_KEY_PATH_ENV)) {
        (Ok(cert), Ok(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            info!(%addr, "dstore-node listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            info!(%addr, "dstore-node listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("dstore-node stopped");
    Ok(())
}
