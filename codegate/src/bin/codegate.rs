// The gateway binary: three listeners (provider proxy, TLS interception,
// management/dashboard) over one shared application state.

use std::net::SocketAddr;

use anyhow::Result;
use codegate::application::application::Application;
use codegate::application::config::configuration::Configuration;
use codegate::proxy::intercept;
use codegate::webserver;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// How long in-flight requests get to drain on shutdown.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let configuration = match Configuration::parse() {
        Ok(configuration) => configuration,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            std::process::exit(2);
        }
    };

    Application::install_logging(&configuration);
    info!("CodeGate 🚀");

    let application = match Application::initialize(configuration).await {
        Ok(application) => application,
        Err(err) => {
            error!(error = %err, "startup failed");
            std::process::exit(3);
        }
    };
    debug!("initialized application");

    // Signal listener for ctrl-c
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("failed to listen for event");
        let _ = tx.send(());
    });

    tokio::select! {
        result = run(application) => {
            if let Err(err) = result {
                error!(error = %err, "gateway failed");
                std::process::exit(3);
            }
        }
        _ = rx => {
            debug!("signal received, draining in-flight requests");
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    }
}

async fn run(application: Application) -> Result<()> {
    let mut joins = tokio::task::JoinSet::new();

    joins.spawn(serve_gateway(application.clone()));
    joins.spawn(serve_proxy(application.clone()));
    joins.spawn(serve_management(application));

    while let Some(result) = joins.join_next().await {
        if let Ok(Err(err)) = result {
            error!(?err, "codegate listener failed");
            return Err(err);
        }
    }

    Ok(())
}

async fn serve_gateway(application: Application) -> Result<()> {
    let bind: SocketAddr = application
        .config
        .bind_addr(application.config.port)
        .parse()?;
    let router = webserver::gateway_router(application);
    info!(%bind, "provider proxy listening");
    axum::Server::bind(&bind)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

async fn serve_proxy(application: Application) -> Result<()> {
    let bind: SocketAddr = application
        .config
        .bind_addr(application.config.proxy_port)
        .parse()?;
    intercept::run_proxy(application, bind).await
}

async fn serve_management(application: Application) -> Result<()> {
    let bind: SocketAddr = application
        .config
        .bind_addr(application.config.dashboard_port)
        .parse()?;
    let router = webserver::management_router(application);
    info!(%bind, "management api listening");
    axum::Server::bind(&bind)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
