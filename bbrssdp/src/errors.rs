use std::net::SocketAddr;

use thiserror::Error;

/// Erreurs du relais SSDP
///
/// Seules `Configuration` et `Bind` sont fatales (démarrage) ; les autres
/// concernent un datagramme ou une cible et sont journalisées.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Packet is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Missing header field: {0}")]
    MissingField(String),

    #[error("Failed to send to {target}: {source}")]
    Send {
        target: String,
        source: std::io::Error,
    },

    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}
