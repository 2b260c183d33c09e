//! WebSocket Lobby Server
//!
//! Accepts WebSocket connections, verifies logins, and routes every
//! client message through one dispatcher per connection into the
//! [`Lobby`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::id::{ConnectionId, UserId};
use crate::lobby::{ConnectionHandle, IdentityDirectory, Lobby, LobbyError};
use crate::network::auth::{sanitize_display_name, verify_token, AuthConfig};
use crate::network::protocol::{AuthResult, ClientMessage, ErrorCode, ServerMessage};
use crate::store::{UserRecord, UserStore};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Accept `guestLogin`.
    pub allow_guests: bool,
    /// Pending challenges older than this are withdrawn. `None` keeps them
    /// until answered.
    pub challenge_ttl: Option<Duration>,
    /// How often the challenge sweep runs.
    pub sweep_interval: Duration,
    /// JSON file backing the user store.
    pub data_file: Option<PathBuf>,
    /// Server version string.
    pub version: String,
    /// Login verification.
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            allow_guests: true,
            challenge_ttl: None,
            sweep_interval: Duration::from_secs(5),
            data_file: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self {
            auth: AuthConfig::from_env(),
            ..Self::default()
        };

        if let Ok(addr) = std::env::var("LOBBY_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| GameServerError::Config(format!("LOBBY_BIND_ADDR: bad address {:?}", addr)))?;
        }
        if let Ok(max) = std::env::var("LOBBY_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| GameServerError::Config(format!("LOBBY_MAX_CONNECTIONS: bad number {:?}", max)))?;
        }
        if let Ok(flag) = std::env::var("LOBBY_ALLOW_GUESTS") {
            config.allow_guests = flag == "true" || flag == "1";
        }
        if let Ok(secs) = std::env::var("LOBBY_CHALLENGE_TTL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| GameServerError::Config(format!("LOBBY_CHALLENGE_TTL_SECS: bad number {:?}", secs)))?;
            config.challenge_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.data_file = std::env::var("LOBBY_DATA_FILE").ok().map(PathBuf::from);

        Ok(config)
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Bad configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Connected client bookkeeping.
struct ConnectedClient {
    /// Remote address.
    addr: SocketAddr,
    /// Logged-in user, if any.
    user_id: Option<UserId>,
    /// Connection time.
    connected_at: Instant,
}

type ClientMap = Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>;

/// State owned by one connection's read loop.
struct ClientConnection {
    handle: ConnectionHandle,
    addr: SocketAddr,
    user: Option<UserId>,
}

impl ClientConnection {
    fn id(&self) -> ConnectionId {
        self.handle.id
    }

    fn send(&self, message: ServerMessage) {
        self.handle.send(message);
    }

    /// The connection must be logged in as `user` and hold `user`'s lobby entry.
    async fn acting_as(&self, lobby: &Lobby, user: UserId) -> Result<(), LobbyError> {
        match self.user {
            None => Err(LobbyError::NotAuthenticated),
            Some(own) if own != user => Err(LobbyError::IdentityMismatch),
            Some(own) => {
                if lobby.is_joined(&own, self.id()).await {
                    Ok(())
                } else {
                    Err(LobbyError::NotJoined)
                }
            }
        }
    }
}

fn server_time() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// The lobby server.
pub struct GameServer {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Lobby state.
    lobby: Arc<Lobby>,
    /// Connected clients.
    clients: ClientMap,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server over a user store.
    pub fn new(config: ServerConfig, store: Arc<dyn UserStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        if !config.auth.is_configured() {
            warn!("No token verification key configured; only guest logins will succeed");
        }

        Self {
            config: Arc::new(config),
            lobby: Arc::new(Lobby::new(IdentityDirectory::new(store))),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind to the configured address and run.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Run on an already bound listener until [`GameServer::shutdown`].
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Lobby server listening on {}", listener.local_addr()?);

        let sweep_handle = self.config.challenge_ttl.map(|ttl| {
            let lobby = self.lobby.clone();
            let every = self.config.sweep_interval;
            tokio::spawn(async move {
                Self::run_challenge_sweep(lobby, ttl, every).await;
            })
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(async move {
                                    if let Err(e) = Self::reject_connection(stream).await {
                                        debug!("Rejecting {} failed: {}", addr, e);
                                    }
                                });
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(handle) = sweep_handle {
            handle.abort();
        }

        Ok(())
    }

    /// Complete the handshake only to say the server is full.
    async fn reject_connection(stream: TcpStream) -> Result<(), GameServerError> {
        let mut ws = accept_async(stream).await?;
        let message = ServerMessage::error(
            ErrorCode::ServerOverloaded,
            GameServerError::ConnectionLimitReached.to_string(),
        );
        if let Ok(text) = message.to_json() {
            ws.send(Message::Text(text)).await?;
        }
        ws.close(None).await?;
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let lobby = self.lobby.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
            let mut conn = ClientConnection {
                handle: ConnectionHandle::new(ConnectionId::next(), msg_tx),
                addr,
                user: None,
            };

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(
                    conn.id(),
                    ConnectedClient {
                        addr,
                        user_id: None,
                        connected_at: Instant::now(),
                    },
                );
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", conn.addr, e);
                                        conn.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ));
                                        continue;
                                    }
                                };

                                Self::handle_client_message(&mut conn, client_msg, &lobby, &clients, &config).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                conn.send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                ));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", conn.addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", conn.addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        conn.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Cleanup
            let id = conn.id();
            lobby.leave(id).await;
            let connected_for = {
                let mut clients = clients.write().await;
                clients.remove(&id).map(|c| c.connected_at.elapsed())
            };

            // The lobby no longer holds our sender; dropping ours lets the
            // writer flush what is queued and close.
            drop(conn);
            if tokio::time::timeout(Duration::from_secs(2), sender_task).await.is_err() {
                debug!("Writer for {} did not finish in time", addr);
            }

            info!("Client {} ({}) cleaned up after {:?}", id, addr, connected_for.unwrap_or_default());
        });
    }

    /// Route one client message.
    #[instrument(skip_all, fields(conn = %conn.id()))]
    async fn handle_client_message(
        conn: &mut ClientConnection,
        msg: ClientMessage,
        lobby: &Lobby,
        clients: &ClientMap,
        config: &ServerConfig,
    ) {
        match msg {
            ClientMessage::Authenticate { token } => {
                Self::handle_authenticate(conn, &token, lobby, clients, config).await;
            }
            ClientMessage::GuestLogin { display_name } => {
                Self::handle_guest_login(conn, &display_name, lobby, clients, config).await;
            }
            ClientMessage::JoinLobby { user_id } => {
                let result = match conn.user {
                    None => Err(LobbyError::NotAuthenticated),
                    Some(own) if own != user_id => Err(LobbyError::IdentityMismatch),
                    Some(_) => lobby.join(user_id, conn.handle.clone()).await.map(|_| ()),
                };
                Self::report(conn, result);
            }
            ClientMessage::SendChallenge { challenger_id, challenged_id } => {
                let result = match conn.acting_as(lobby, challenger_id).await {
                    Ok(()) => lobby.send_challenge(challenger_id, challenged_id).await,
                    Err(e) => Err(e),
                };
                Self::report(conn, result);
            }
            ClientMessage::AcceptChallenge { challenged_id } => {
                let result = match conn.acting_as(lobby, challenged_id).await {
                    Ok(()) => lobby.accept_challenge(challenged_id).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                Self::report(conn, result);
            }
            ClientMessage::RefuseChallenge { challenged_id } => {
                let result = match conn.acting_as(lobby, challenged_id).await {
                    Ok(()) => {
                        lobby.refuse_challenge(challenged_id).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                Self::report(conn, result);
            }
            ClientMessage::MakeMove { session_id, user_id, cell_index } => {
                if Self::may_play(conn, lobby, user_id).await {
                    lobby.make_move(session_id, user_id, cell_index).await;
                }
            }
            ClientMessage::QuitGame { session_id, user_id } => {
                if Self::may_play(conn, lobby, user_id).await {
                    lobby.quit_game(session_id, user_id).await;
                }
            }
            ClientMessage::RequestRematch { session_id, user_id }
            | ClientMessage::AcceptRematch { session_id, user_id } => {
                if Self::may_play(conn, lobby, user_id).await {
                    match lobby.vote_rematch(session_id, user_id).await {
                        Ok(()) => {}
                        Err(LobbyError::GameNotFound) => {
                            debug!("Rematch vote for unknown session {}", session_id.short());
                        }
                        Err(e) => conn.send(e.to_message()),
                    }
                }
            }
            ClientMessage::RefuseRematch { session_id, user_id } => {
                if Self::may_play(conn, lobby, user_id).await {
                    lobby.refuse_rematch(session_id, user_id).await;
                }
            }
            ClientMessage::Ping { timestamp } => {
                conn.send(ServerMessage::Pong {
                    timestamp,
                    server_time: server_time(),
                });
            }
        }
    }

    /// Game messages from anyone but the joined identity are dropped.
    async fn may_play(conn: &ClientConnection, lobby: &Lobby, user: UserId) -> bool {
        match conn.acting_as(lobby, user).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropped game message from {} for {}: {}", conn.id(), user.short(), e);
                false
            }
        }
    }

    fn report(conn: &ClientConnection, result: Result<(), LobbyError>) {
        if let Err(e) = result {
            debug!("Request from {} failed: {}", conn.id(), e);
            conn.send(e.to_message());
        }
    }

    /// Handle a provider token login.
    async fn handle_authenticate(
        conn: &mut ClientConnection,
        token: &str,
        lobby: &Lobby,
        clients: &ClientMap,
        config: &ServerConfig,
    ) {
        let result = match verify_token(token, &config.auth) {
            Ok(identity) => lobby.directory().login_provider(identity).await.map_err(LobbyError::from),
            Err(e) => Err(LobbyError::Auth(e)),
        };
        Self::finish_login(conn, result, clients, config).await;
    }

    /// Handle a guest login.
    async fn handle_guest_login(
        conn: &mut ClientConnection,
        display_name: &str,
        lobby: &Lobby,
        clients: &ClientMap,
        config: &ServerConfig,
    ) {
        let result = if !config.allow_guests {
            Err(LobbyError::GuestsDisabled)
        } else {
            match sanitize_display_name(display_name) {
                Some(name) => lobby.directory().login_guest(name).await.map_err(LobbyError::from),
                None => Err(LobbyError::InvalidDisplayName),
            }
        };
        Self::finish_login(conn, result, clients, config).await;
    }

    async fn finish_login(
        conn: &mut ClientConnection,
        result: Result<UserRecord, LobbyError>,
        clients: &ClientMap,
        config: &ServerConfig,
    ) {
        let result = result.and_then(|record| match conn.user {
            Some(own) if own != record.id => Err(LobbyError::IdentityMismatch),
            _ => Ok(record),
        });

        let reply = match result {
            Ok(record) => {
                conn.user = Some(record.id);
                if let Some(client) = clients.write().await.get_mut(&conn.id()) {
                    client.user_id = Some(record.id);
                }
                info!("{} logged in as {} ({})", conn.id(), record.id.short(), record.display_name);
                AuthResult {
                    success: true,
                    user_id: Some(record.id),
                    display_name: Some(record.display_name),
                    error: None,
                    server_version: config.version.clone(),
                }
            }
            Err(e) => {
                warn!("Login failed for {}: {}", conn.addr, e);
                AuthResult {
                    success: false,
                    user_id: None,
                    display_name: None,
                    error: Some(e.to_string()),
                    server_version: config.version.clone(),
                }
            }
        };
        conn.send(ServerMessage::AuthResult(reply));
    }

    /// Periodically withdraw stale challenges.
    async fn run_challenge_sweep(lobby: Arc<Lobby>, ttl: Duration, every: Duration) {
        let mut interval = interval(every);

        loop {
            interval.tick().await;
            let expired = lobby.expire_challenges(ttl).await;
            if expired > 0 {
                info!("Withdrew {} stale challenges", expired);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get logged-in connection count.
    pub async fn authenticated_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.user_id.is_some()).count()
    }

    /// Get session count.
    pub async fn session_count(&self) -> usize {
        self.lobby.session_count().await
    }

    /// The lobby.
    pub fn lobby(&self) -> &Arc<Lobby> {
        &self.lobby
    }

    /// Remote addresses of current connections.
    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.clients.read().await.values().map(|c| c.addr).collect()
    }
}
