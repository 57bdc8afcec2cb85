//! # Module SSDP Relay
//!
//! Ce crate relaie les annonces SSDP reçues sur un port UDP local vers une liste
//! de destinataires unicast, en réécrivant un champ d'en-tête au passage.
//!
//! ## Fonctionnalités
//!
//! - ✅ Découpage lexical des paquets ([`Tokenizer`], [`SsdpLexer`])
//! - ✅ Parsing en ligne de départ + en-têtes ordonnés ([`SsdpMessage`])
//! - ✅ Sérialisation canonique (CRLF, bloc terminé par une ligne vide)
//! - ✅ Réécriture du champ `DevName.bambu.com` et envoi vers chaque cible
//!
//! ## Architecture
//!
//! - [`SsdpMessage`] : message SSDP (ligne de départ + champs)
//! - [`RelayHandler`] : traitement d'un datagramme (parse, réécriture, envoi)
//! - [`SsdpRelay`] : boucle de réception sur le socket UDP
//! - [`RelayConfigExt`] : construction d'une [`RelayConfig`] depuis `bbrconfig`
//!
//! ## Flux
//!
//! ```text
//! octets -> Tokenizer -> tokens -> SsdpMessage -> réécriture -> dump -> UDP
//! ```

mod config_ext;
mod errors;
mod message;
mod relay;
mod tokenizer;

pub use config_ext::RelayConfigExt;
pub use errors::RelayError;
pub use message::SsdpMessage;
pub use relay::{
    PacketSink, RelayConfig, RelayHandler, RelayReport, RelayStats, RewriteMode, SsdpRelay,
};
pub use tokenizer::{SsdpLexer, Token, TokenKind, TokenStream, Tokenizer};

/// Port UDP d'écoute et de renvoi
pub const SSDP_PORT: u16 = bbrconfig::DEFAULT_RELAY_PORT;

// Valeurs par défaut partagées avec la configuration
pub use bbrconfig::{DEFAULT_BUFFER_SIZE, DEFAULT_REWRITE_FIELD, DEFAULT_REWRITE_PREFIX};
