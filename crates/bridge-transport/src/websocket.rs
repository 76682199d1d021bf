//! WebSocket link to a remote executor

use crate::error::TransportError;
use crate::link::{Connector, Link};
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Opens WebSocket links to a fixed URL
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connector for `url` (`ws://` or `wss://`)
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connection(format!("{}: {e}", self.url)))?;

        tracing::debug!(url = %self.url, "websocket connected");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(WsMessage::Text(text.into()))));

        // Only text frames carry protocol messages; a close frame ends the stream.
        let stream = read
            .take_while(|frame| future::ready(!matches!(frame, Ok(WsMessage::Close(_)))))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
