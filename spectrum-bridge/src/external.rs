//! Connection to the external streaming-software control service
//!
//! The bridge only needs the connection to exist while it runs. Once opened,
//! a keeper task answers pings and reads until the service goes away; a drop
//! is logged and not retried.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ExternalServiceConfig;
use crate::error::{BridgeError, Result};

type ServiceStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open connection to the external service
pub struct ExternalServiceLink {
    url: String,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ExternalServiceLink {
    /// Connect within `connect_timeout_ms`; any failure is fatal for startup
    pub async fn connect(config: &ExternalServiceConfig) -> Result<Self> {
        let url = config.url();

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::external(&url, e))?;

        if !config.password.is_empty() {
            let value = HeaderValue::from_str(&config.password)
                .map_err(|e| BridgeError::external(&url, format!("invalid credential: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!("Connecting to external service at {}", url);

        let ws = match tokio::time::timeout(
            config.connect_timeout(),
            tokio_tungstenite::connect_async(request),
        )
        .await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(BridgeError::external(&url, e)),
            Err(_) => {
                return Err(BridgeError::external(
                    &url,
                    format!("no response within {:?}", config.connect_timeout()),
                ))
            }
        };

        info!("Connected to external service at {}", url);

        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(hold_connection(ws, url.clone(), close_rx));

        Ok(Self {
            url,
            close_tx: Some(close_tx),
            task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// False once the service dropped the connection
    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    /// Send a Close frame and wait briefly for the keeper task to finish
    pub async fn close(mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut self.task).await {
            Ok(_) => info!("Disconnected from external service at {}", self.url),
            Err(_) => {
                warn!("External service at {} did not close in time", self.url);
                self.task.abort();
            }
        }
    }
}

impl Drop for ExternalServiceLink {
    fn drop(&mut self) {
        if self.close_tx.is_some() {
            self.task.abort();
        }
    }
}

async fn hold_connection(mut ws: ServiceStream, url: String, mut close_rx: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut close_rx => {
                if let Err(e) = ws.close(None).await {
                    debug!("Close handshake with {} failed: {}", url, e);
                }
                return;
            }

            message = ws.next() => match message {
                Some(Ok(Message::Close(_))) | None => {
                    warn!("External service at {} closed the connection; continuing without it", url);
                    return;
                }
                Some(Err(e)) => {
                    warn!("External service connection to {} lost: {}; continuing without it", url, e);
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
