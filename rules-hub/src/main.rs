use anyhow::Context;
use clap::Parser;
use rules_hub::api;
use rules_hub::config::{Cli, Commands};
use rules_hub_core::auth::{Hs256Verifier, TokenVerifier};
use rules_hub_core::{HubConfig, RulesHub, WalkRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            hub,
            addr,
            jwt_secret,
        } => serve(hub.into_config(), addr, jwt_secret).await,
        Commands::Walk {
            hub,
            root,
            depth,
            rule_folder,
            prefixes,
            lookahead,
            user,
        } => {
            let hub = RulesHub::new(hub.into_config());
            let request = WalkRequest {
                max_depth: depth,
                rule_folder_name: rule_folder,
                rule_name_prefixes: prefixes,
                lookahead_names: lookahead,
            };
            let node = hub.walk(&root, &request, user.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&node)?);
            Ok(())
        }
    }
}

async fn serve(
    config: HubConfig,
    addr: SocketAddr,
    jwt_secret: Option<String>,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        config.data_root.is_dir(),
        "data root {} is not a directory",
        config.data_root.display()
    );
    let verifier: Option<Arc<dyn TokenVerifier>> = match jwt_secret {
        Some(secret) => Some(Arc::new(Hs256Verifier::new(secret))),
        None => {
            tracing::warn!("no JWT secret configured, trusting X-User-Id");
            None
        }
    };
    tracing::info!(
        data_root = %config.data_root.display(),
        control_file = %config.control_file,
        "starting rules hub"
    );
    let app = api::router(Arc::new(RulesHub::new(config)), verifier);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
