use anyhow::{anyhow, Result};
use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tidekv::{
    codec::StringCodec,
    local::LocalLog,
    store::Store,
    topic::TopicHandle,
    types::TopicName,
};
use tokio::task::spawn_blocking;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tidekv-rest")]
#[command(about = "HTTP front-end over a TideKV store", long_about = None)]
struct Cli {
    /// HTTP listen address (e.g., 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Topics to create on startup (comma-separated)
    #[arg(short, long, default_value = "inventory")]
    topics: String,
}

struct AppState {
    store: Store<String, String>,
    topics: HashMap<String, TopicHandle<String, String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let store: Store<String, String> = Store::open(LocalLog::new())?;
    let mut topics = HashMap::new();
    for name in cli.topics.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let handle = store
            .define_topic(
                &TopicName::new(name),
                &[],
                Arc::new(StringCodec),
                Arc::new(StringCodec),
            )?
            .ok_or_else(|| anyhow!("topic {name} already exists"))?;
        info!(topic = name, "created topic");
        topics.insert(name.to_string(), handle);
    }

    let state = Arc::new(AppState { store, topics });

    let app = Router::new()
        .route(
            "/kv/{topic}/{key}",
            get(handle_get).put(handle_put).delete(handle_delete),
        )
        .route("/doc/{key}", get(handle_document))
        .with_state(state);

    let socket_addr: SocketAddr = cli.addr.parse()?;
    info!("HTTP server listening on {}", socket_addr);
    axum::serve(tokio::net::TcpListener::bind(socket_addr).await?, app).await?;

    Ok(())
}

async fn handle_get(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((topic, key)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(handle) = state.topics.get(&topic).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown topic".to_string());
    };
    match spawn_blocking(move || handle.get(&key)).await {
        Ok(Ok(Some(value))) => (StatusCode::OK, value),
        Ok(Ok(None)) => (StatusCode::NOT_FOUND, "key not found".to_string()),
        Ok(Err(err)) => {
            error!("get failed: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
        Err(join_err) => {
            error!("get task panicked: {join_err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

async fn handle_put(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((topic, key)): Path<(String, String)>,
    body: String,
) -> impl IntoResponse {
    let Some(handle) = state.topics.get(&topic).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown topic".to_string());
    };
    match spawn_blocking(move || handle.put(&key, &body)).await {
        Ok(Ok(true)) => (StatusCode::OK, "stored".to_string()),
        Ok(Ok(false)) => (StatusCode::CONFLICT, "rejected by log".to_string()),
        Ok(Err(err)) => {
            error!("put failed: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
        Err(join_err) => {
            error!("put task panicked: {join_err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

async fn handle_delete(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((topic, key)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(handle) = state.topics.get(&topic).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown topic".to_string());
    };
    match spawn_blocking(move || handle.delete(&key)).await {
        Ok(Ok(true)) => (StatusCode::OK, "deleted".to_string()),
        Ok(Ok(false)) => (StatusCode::CONFLICT, "rejected by log".to_string()),
        Ok(Err(err)) => {
            error!("delete failed: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
        Err(join_err) => {
            error!("delete task panicked: {join_err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

async fn handle_document(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<HashMap<String, String>>, (StatusCode, String)> {
    let result = spawn_blocking(move || state.store.read_document(&key)).await;
    match result {
        Ok(Ok(document)) => Ok(Json(
            document
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )),
        Ok(Err(err)) => {
            error!("document read failed: {err:#}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))
        }
        Err(join_err) => {
            error!("document task panicked: {join_err}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()))
        }
    }
}
