//! dmpolicy client binary.
//!
//! - Loads `dmpolicy.yaml` (or the path given as first argument)
//! - Serves the ops endpoints
//! - Runs the policy provider on a `LocalSet` (its owning context)
//! - Ctrl-C: mark draining, shut the provider down, exit

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use tokio::task::LocalSet;
use tracing_subscriber::{fmt, EnvFilter};

use dmpolicy_core::handle::OwnerLoop;

use dmpolicy_client::app_state::AppState;
use dmpolicy_client::backend::StaticBackend;
use dmpolicy_client::cache::FileCache;
use dmpolicy_client::config::{self, ClientConfig};
use dmpolicy_client::obs::ClientMetrics;
use dmpolicy_client::token::TokenService;
use dmpolicy_client::{router, Collaborators, PolicyProvider};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "dmpolicy.yaml".to_string());
    let cfg = config::load_from_file(&path).expect("config load failed");
    let listen: SocketAddr = cfg
        .ops
        .listen
        .parse()
        .expect("ops.listen must be a valid SocketAddr");

    let metrics = Arc::new(ClientMetrics::default());
    let state = AppState::new(&cfg, Arc::clone(&metrics));
    let app = router::build_router(state.clone());

    tracing::info!(%listen, "dmpolicy-client ops listening");
    let listener = tokio::net::TcpListener::bind(listen).await.expect("failed to bind");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "ops server failed");
        }
    });

    LocalSet::new().run_until(run_client(cfg, state, metrics)).await;
}

async fn run_client(cfg: ClientConfig, state: AppState, metrics: Arc<ClientMetrics>) {
    let mut owner = OwnerLoop::new();
    let definitions = cfg.definition_list().expect("definitions validated at load");
    let cache = Arc::new(FileCache::new(&cfg.client.storage_dir));
    let token = Rc::new(TokenService::new());

    let provider = PolicyProvider::new(
        cfg.refresh.clone(),
        definitions,
        Collaborators {
            backend: Arc::new(StaticBackend::new(
                cfg.dev_backend.device_token.clone(),
                cfg.dev_backend.policies.clone(),
            )),
            cache: cache.clone(),
            token_source: token.clone(),
            metrics,
        },
        &owner.proxy(),
    )
    .expect("policy provider init failed");

    // cached policy is served before any network activity
    let mut published = state.policy();
    provider.provide(&mut published);
    let sink = state.policy();
    provider.add_observer(move |ev| sink.publish(&ev.snapshot));

    if let Some(t) = &cfg.client.auth_token {
        token.issue_token(t.clone());
    }

    tokio::select! {
        _ = owner.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received; draining");
        }
    }

    state.set_draining();
    provider.shutdown();
    owner.run_pending();
    cache.flush().await;
    tracing::info!(phase = provider.phase().as_str(), "dmpolicy-client stopped");
}
