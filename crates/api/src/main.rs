use std::sync::Arc;

use mercato_infra::{signal, Config};

fn app_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "mercato-api".to_string())
}

#[tokio::main]
async fn main() {
    let app_name = app_name();
    let config = match Config::load(&app_name) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("loading config: {err}");
            std::process::exit(1);
        }
    };

    mercato_observability::init(&config.log_level);

    if config.jwt_config.secret.is_empty() {
        tracing::error!("jwt secret is not configured");
        std::process::exit(1);
    }

    let runtime = match mercato_api::app::services::build_persistent(&config).await {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(%err, "initialization failed");
            std::process::exit(1);
        }
    };

    let app = mercato_api::app::build_app(
        Arc::clone(&runtime.services),
        config.jwt_config.secret.as_bytes(),
    );

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, port = config.listen_port, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(port = config.listen_port, "listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(signal::wait_for_termination());
    if let Err(err) = serve.await {
        tracing::error!(%err, "server error");
        std::process::exit(1);
    }

    // HTTP is down; drain the processors and exit clean.
    runtime.stop().await;
}
