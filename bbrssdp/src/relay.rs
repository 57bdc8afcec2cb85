//! Relais SSDP : réception, réécriture et renvoi vers les cibles

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::errors::RelayError;
use crate::message::SsdpMessage;
use crate::tokenizer::{SsdpLexer, Tokenizer};
use crate::{DEFAULT_BUFFER_SIZE, DEFAULT_REWRITE_FIELD, DEFAULT_REWRITE_PREFIX, SSDP_PORT};

/// Stratégie de réécriture lorsqu'il y a plusieurs cibles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewriteMode {
    /// Un seul message modifié sur place : chaque cible reçoit un préfixe de
    /// plus que la précédente (`VPN-x`, `VPN-VPN-x`, ...).
    #[default]
    Cumulative,
    /// Chaque cible reçoit la valeur d'origine préfixée une seule fois.
    PerTarget,
}

impl FromStr for RewriteMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cumulative" => Ok(RewriteMode::Cumulative),
            "per_target" | "per-target" | "pertarget" => Ok(RewriteMode::PerTarget),
            other => Err(RelayError::Configuration(format!(
                "unknown rewrite mode '{}' (expected 'cumulative' or 'per_target')",
                other
            ))),
        }
    }
}

impl fmt::Display for RewriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteMode::Cumulative => f.write_str("cumulative"),
            RewriteMode::PerTarget => f.write_str("per_target"),
        }
    }
}

/// Configuration immuable du relais
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Hôtes destinataires, dans l'ordre de configuration
    pub targets: Vec<String>,
    /// Port d'écoute (et port de destination sauf si `target_port` est défini)
    pub port: u16,
    pub target_port: Option<u16>,
    pub bind_addr: IpAddr,
    /// Champ réécrit
    pub field: String,
    pub prefix: String,
    pub rewrite_mode: RewriteMode,
    pub buffer_size: usize,
}

impl RelayConfig {
    /// Crée une configuration avec les valeurs par défaut.
    ///
    /// Les cibles sont nettoyées ; une liste vide est une erreur de configuration.
    pub fn new<I, S>(targets: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets: Vec<String> = targets
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if targets.is_empty() {
            return Err(RelayError::Configuration(
                "no relay targets configured".to_string(),
            ));
        }

        Ok(Self {
            targets,
            port: SSDP_PORT,
            target_port: None,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            field: DEFAULT_REWRITE_FIELD.to_string(),
            prefix: DEFAULT_REWRITE_PREFIX.to_string(),
            rewrite_mode: RewriteMode::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_target_port(mut self, target_port: Option<u16>) -> Self {
        self.target_port = target_port;
        self
    }

    pub fn with_bind_addr(mut self, bind_addr: IpAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rewrite_mode(mut self, rewrite_mode: RewriteMode) -> Self {
        self.rewrite_mode = rewrite_mode;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Port des cibles : `target_port`, sinon le port d'écoute
    pub fn destination_port(&self) -> u16 {
        self.target_port.unwrap_or(self.port)
    }

    /// Adresse locale du socket de réception
    pub fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Destination des paquets réécrits
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Envoie `payload` à `host:port`
    async fn send_packet(&self, payload: &[u8], host: &str, port: u16) -> io::Result<usize>;
}

#[async_trait]
impl PacketSink for UdpSocket {
    async fn send_packet(&self, payload: &[u8], host: &str, port: u16) -> io::Result<usize> {
        self.send_to(payload, (host, port)).await
    }
}

/// Résultat du renvoi d'un datagramme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Cibles atteintes
    pub sent: usize,
    /// Cibles en échec d'envoi
    pub failed: usize,
}

/// Compteurs cumulés sur la durée de vie du relais
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub relayed: u64,
    pub dropped: u64,
    pub packets_sent: u64,
    pub send_failures: u64,
}

/// Traitement d'un datagramme, indépendant du socket
pub struct RelayHandler {
    config: RelayConfig,
    tokenizer: Box<dyn Tokenizer>,
}

impl RelayHandler {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_tokenizer(config, Box::new(SsdpLexer))
    }

    pub fn with_tokenizer(config: RelayConfig, tokenizer: Box<dyn Tokenizer>) -> Self {
        Self { config, tokenizer }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Décode, parse, réécrit puis envoie le datagramme à chaque cible.
    ///
    /// Les cibles sont servies dans l'ordre de configuration. Un échec d'envoi
    /// est journalisé et n'interrompt pas les cibles suivantes.
    ///
    /// # Errors
    ///
    /// - `Decode` si le datagramme n'est pas de l'UTF-8
    /// - `MalformedPacket` si le parser le rejette
    /// - `MissingField` si le champ réécrit est absent (aucun envoi)
    pub async fn relay_datagram<S>(
        &self,
        sink: &S,
        data: &[u8],
        from: SocketAddr,
    ) -> Result<RelayReport, RelayError>
    where
        S: PacketSink + ?Sized,
    {
        let text = std::str::from_utf8(data)?;
        info!("📥 Received {:?} from {}", text, from);

        let mut message = SsdpMessage::parse(text, self.tokenizer.as_ref())?;
        let field = self.config.field.as_str();
        let original = message
            .get(field)
            .map(str::to_string)
            .ok_or_else(|| RelayError::MissingField(field.to_string()))?;

        let port = self.config.destination_port();
        let mut report = RelayReport::default();
        for target in &self.config.targets {
            match self.config.rewrite_mode {
                RewriteMode::Cumulative => {
                    message.prefix_field(field, &self.config.prefix)?;
                }
                RewriteMode::PerTarget => {
                    message.set(field, format!("{}{}", self.config.prefix, original));
                }
            }

            let payload = message.dump();
            match sink.send_packet(&payload, target, port).await {
                Ok(n) => {
                    debug!(
                        "📤 Relayed {} bytes to {}:{} ({}={})",
                        n,
                        target,
                        port,
                        field,
                        message.get(field).unwrap_or_default()
                    );
                    report.sent += 1;
                }
                Err(source) => {
                    let err = RelayError::Send {
                        target: format!("{}:{}", target, port),
                        source,
                    };
                    warn!("❌ {}", err);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Relais SSDP lié à son socket UDP
///
/// Le socket est fermé quand le relais est détruit, y compris lorsque
/// [`SsdpRelay::run_until`] se termine.
pub struct SsdpRelay {
    handler: RelayHandler,
    socket: UdpSocket,
}

impl SsdpRelay {
    /// Lie le socket de réception avec le lexer intégré
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        Self::bind_with_tokenizer(config, Box::new(SsdpLexer)).await
    }

    pub async fn bind_with_tokenizer(
        config: RelayConfig,
        tokenizer: Box<dyn Tokenizer>,
    ) -> Result<Self, RelayError> {
        let addr = config.bind_socket_addr();
        let socket = bind_udp(addr).map_err(|source| RelayError::Bind { addr, source })?;

        let local = socket.local_addr().unwrap_or(addr);
        info!(
            "✅ SSDP relay listening on {} ({} target(s), mode={})",
            local,
            config.targets.len(),
            config.rewrite_mode
        );

        Ok(Self {
            handler: RelayHandler::with_tokenizer(config, tokenizer),
            socket,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Boucle de réception jusqu'à la résolution de `shutdown`.
    ///
    /// Chaque datagramme est traité entièrement avant la lecture du suivant.
    /// Aucune erreur de datagramme ou de réception n'arrête la boucle.
    pub async fn run_until<F>(self, shutdown: F) -> RelayStats
    where
        F: Future<Output = ()>,
    {
        let mut buf = vec![0u8; self.handler.config().buffer_size.max(1)];
        let mut stats = RelayStats::default();
        tokio::pin!(shutdown);

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 SSDP relay shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((n, from)) => {
                    stats.received += 1;
                    if n == buf.len() {
                        warn!(
                            "⚠️ Datagram from {} fills the {} byte buffer and may be truncated",
                            from, n
                        );
                    }
                    self.handle_datagram(&buf[..n], from, &mut stats).await;
                }
                Err(e) => {
                    warn!("❌ SSDP relay read error: {}", e);
                }
            }
        }

        info!(
            "SSDP relay stopped: received={} relayed={} dropped={} sent={} send_failures={}",
            stats.received, stats.relayed, stats.dropped, stats.packets_sent, stats.send_failures
        );
        stats
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr, stats: &mut RelayStats) {
        match self.handler.relay_datagram(&self.socket, data, from).await {
            Ok(report) => {
                stats.relayed += 1;
                stats.packets_sent += report.sent as u64;
                stats.send_failures += report.failed as u64;
            }
            Err(e) => {
                stats.dropped += 1;
                warn!(
                    "❌ Dropping datagram from {}: {}\n<details>\n\n```\n{}\n```\n</details>\n",
                    from,
                    e,
                    String::from_utf8_lossy(data)
                );
            }
        }
    }
}

/// Socket UDP non bloquant avec SO_REUSEADDR, enregistré auprès de tokio
fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}
