//! Extension pour construire la configuration du relais depuis bbrconfig
//!
//! Ce module fournit le trait `RelayConfigExt` qui transforme la
//! configuration générale (`bbrconfig::Config`) en [`RelayConfig`] immuable,
//! passée ensuite au relais.
//!
//! # Exemple
//!
//! ```no_run
//! use bbrconfig::Config;
//! use bbrssdp::{RelayConfigExt, SsdpRelay};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_config("")?;
//! let relay = SsdpRelay::bind(config.relay_config()?).await?;
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;

use bbrconfig::Config;

use crate::DEFAULT_BUFFER_SIZE;
use crate::errors::RelayError;
use crate::relay::{RelayConfig, RewriteMode};

/// Trait d'extension de `bbrconfig::Config` pour le relais SSDP
pub trait RelayConfigExt {
    /// Construit la configuration du relais
    ///
    /// # Errors
    ///
    /// `Configuration` si aucune cible n'est définie, ou si l'adresse d'écoute
    /// ou le mode de réécriture sont invalides.
    fn relay_config(&self) -> Result<RelayConfig, RelayError>;
}

impl RelayConfigExt for Config {
    fn relay_config(&self) -> Result<RelayConfig, RelayError> {
        let targets = self
            .get_relay_targets()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;

        let bind_address = self.get_relay_bind_address();
        let bind_addr: IpAddr = bind_address.parse().map_err(|_| {
            RelayError::Configuration(format!("invalid bind address '{}'", bind_address))
        })?;

        let rewrite_mode: RewriteMode = self.get_rewrite_mode().parse()?;

        let buffer_size = match self.get_relay_buffer_size() {
            0 => {
                tracing::warn!(
                    "Relay buffer size must be positive, using default {}",
                    DEFAULT_BUFFER_SIZE
                );
                DEFAULT_BUFFER_SIZE
            }
            size => size,
        };

        Ok(RelayConfig::new(targets)?
            .with_port(self.get_relay_port())
            .with_target_port(self.get_relay_target_port())
            .with_bind_addr(bind_addr)
            .with_field(self.get_rewrite_field())
            .with_prefix(self.get_rewrite_prefix())
            .with_rewrite_mode(rewrite_mode)
            .with_buffer_size(buffer_size))
    }
}
