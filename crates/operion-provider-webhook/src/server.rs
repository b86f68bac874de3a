//! The process-wide shared HTTP listener (§5 "the webhook server manager
//! is a process-wide singleton keyed by listen port").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Mutex as StdMutex};

use axum::extract::{ConnectInfo, OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::Router;
use operion_provider::EventCallback;
use operion_types::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const PROVIDER_ID: &str = "webhook";

static SERVERS: LazyLock<StdMutex<HashMap<u16, Arc<WebhookServer>>>> =
  LazyLock::new(|| StdMutex::new(HashMap::new()));

/// Registration/unregistration of paths is serialized behind this handle;
/// one instance exists per listen port for the life of the process.
pub struct WebhookServer {
  port: u16,
  routes: RwLock<HashMap<String, String>>,
  callback: RwLock<Option<EventCallback>>,
  listening: RwLock<bool>,
}

/// Fetch (or lazily create) the singleton server for `port`.
pub fn shared(port: u16) -> Arc<WebhookServer> {
  let mut servers = SERVERS.lock().expect("webhook server registry poisoned");
  servers
    .entry(port)
    .or_insert_with(|| {
      Arc::new(WebhookServer {
        port,
        routes: RwLock::new(HashMap::new()),
        callback: RwLock::new(None),
        listening: RwLock::new(false),
      })
    })
    .clone()
}

impl WebhookServer {
  pub fn port(&self) -> u16 {
    self.port
  }

  pub async fn register_path(&self, path: &str, source_id: &str) {
    self
      .routes
      .write()
      .await
      .insert(path.to_string(), source_id.to_string());
  }

  pub async fn remove_by_source_id(&self, source_id: &str) {
    self.routes.write().await.retain(|_, v| v != source_id);
  }

  pub async fn set_callback(&self, callback: EventCallback) {
    *self.callback.write().await = Some(callback);
  }

  /// Start listening if this is the first caller for this port; idempotent
  /// for subsequent callers (the listener is truly shared).
  pub async fn ensure_listening(self: &Arc<Self>, shutdown: CancellationToken) -> Result<(), Error> {
    {
      let mut listening = self.listening.write().await;
      if *listening {
        return Ok(());
      }
      *listening = true;
    }

    let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
    let listener = tokio::net::TcpListener::bind(addr)
      .await
      .map_err(|e| Error::TransientTransport(format!("binding webhook listener: {e}")))?;

    let router = Router::new()
      .fallback(handle_request)
      .with_state(self.clone());

    let server = self.clone();
    tokio::spawn(async move {
      tracing::info!(port = server.port, "webhook listener started");
      let result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
      )
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await;
      if let Err(error) = result {
        tracing::error!(%error, "webhook listener exited with error");
      }
    });

    Ok(())
  }
}

/// Minimal `a=1&b=2` splitter; values are not percent-decoded.
fn parse_query(query: &str) -> HashMap<String, String> {
  query
    .split('&')
    .filter(|pair| !pair.is_empty())
    .map(|pair| match pair.split_once('=') {
      Some((k, v)) => (k.to_string(), v.to_string()),
      None => (pair.to_string(), String::new()),
    })
    .collect()
}

async fn handle_request(
  State(server): State<Arc<WebhookServer>>,
  ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
  method: Method,
  OriginalUri(uri): OriginalUri,
  headers: HeaderMap,
  body: axum::body::Bytes,
) -> impl IntoResponse {
  let path = uri.path().to_string();
  let source_id = server.routes.read().await.get(&path).cloned();

  let Some(source_id) = source_id else {
    return (StatusCode::NOT_FOUND, "not found").into_response();
  };

  let callback = server.callback.read().await.clone();
  let Some(callback) = callback else {
    return (StatusCode::SERVICE_UNAVAILABLE, "provider not started").into_response();
  };

  let body_value: serde_json::Value =
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::String(String::from_utf8_lossy(&body).into_owned()));
  let header_map: HashMap<String, String> = headers
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
    .collect();
  let query: HashMap<String, String> = uri.query().map(parse_query).unwrap_or_default();

  let event_data = serde_json::json!({
    "timestamp": chrono::Utc::now(),
    "method": method.as_str(),
    "path": path,
    "query": query,
    "headers": header_map,
    "body": body_value,
    "remote_addr": remote_addr.to_string(),
  });

  let result = callback(source_id, PROVIDER_ID.to_string(), "WebhookReceived".to_string(), event_data).await;
  if let Err(error) = result {
    tracing::warn!(%error, "webhook: dispatch to callback failed");
  }

  (
    StatusCode::OK,
    Json(serde_json::json!({ "status": "success", "message": "webhook received" })),
  )
    .into_response()
}
