use futures_util::{SinkExt, StreamExt};
use quiz_protocol::{ClientMessage, ServerMessage};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A thin WS client speaking the `{type, data}` envelope directly, for
/// driving a live `quiz-server` instance end to end in integration tests.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connects with an access token as a bearer header, for a client that
    /// has its own long-lived session rather than a short WS-ticket.
    pub async fn connect_with_bearer(url: &str, token: &str) -> Result<Self, Box<dyn std::error::Error>> {
        use tokio_tungstenite::tungstenite::handshake::client::generate_key;
        let uri: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
        let host = uri.host().unwrap_or("localhost").to_owned();
        let port = uri.port_u16();
        let host_header = if let Some(p) = port { format!("{host}:{p}") } else { host };
        let request = Request::builder()
            .uri(url)
            .header("Host", host_header)
            .header("Authorization", format!("Bearer {token}"))
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connects with `?token=<ws-ticket>` in the URL, the admission path
    /// `admission::admit` takes for a fresh WS handshake.
    pub async fn connect_with_ticket(base_url: &str, ticket: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let url = format!("{base_url}?token={ticket}");
        Self::connect(&url).await
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), Box<dyn std::error::Error>> {
        let (kind, data) = match msg {
            ClientMessage::UserReady(m) => ("user:ready", serde_json::to_value(m)?),
            ClientMessage::UserAnswer(m) => ("user:answer", serde_json::to_value(m)?),
            ClientMessage::UserHeartbeat(m) => ("user:heartbeat", serde_json::to_value(m)?),
        };
        let envelope = serde_json::json!({"type": kind, "data": data});
        self.write.send(Message::Text(envelope.to_string())).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<ServerMessage, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
