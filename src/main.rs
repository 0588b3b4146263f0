use palisade::{config::GatewayConfig, observability};

#[tokio::main]
async fn main() {
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    observability::init_tracing(&config.log);

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(
            %endpoint,
            "OTLP endpoint configured; span export is not wired in this build"
        );
    }

    if let Err(e) = palisade::serve(config).await {
        tracing::error!(error = %e, "gateway exited with error");
        std::process::exit(1);
    }
}
