//! # BambuRelay Configuration Module
//!
//! This module provides configuration management for BambuRelay, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides (including the `TARGETS` list)
//! - An optional `.env` file completing the process environment
//! - Type-safe getters for configuration values
//!
//! The configuration is loaded once at startup and handed to the relay by value;
//! there is no global instance.
//!
//! ## Usage
//!
//! ```no_run
//! use bbrconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let targets = config.get_relay_targets()?;
//! let port = config.get_relay_port();
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Value};
use std::{env, fs, path::Path};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("bambu-relay.yaml");

const ENV_CONFIG_DIR: &str = "BAMBURELAY_CONFIG";
const ENV_PREFIX: &str = "BAMBURELAY_CONFIG__";
const CONFIG_DIR_NAME: &str = ".bamburelay";

/// Fichier `.env` lu depuis le répertoire courant
pub const DOTENV_FILE: &str = ".env";

/// Variable d'environnement contenant la liste des cibles (séparées par des virgules)
pub const ENV_TARGETS: &str = "TARGETS";

// Default values for configuration
pub const DEFAULT_RELAY_PORT: u16 = 2021;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
/// Plus grande charge utile UDP : un datagramme n'est jamais tronqué
pub const DEFAULT_BUFFER_SIZE: usize = 65535;
pub const DEFAULT_REWRITE_FIELD: &str = "DevName.bambu.com";
pub const DEFAULT_REWRITE_PREFIX: &str = "VPN-";
pub const DEFAULT_REWRITE_MODE: &str = "cumulative";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate a getter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().map_or($default, |v| v as usize),
                Ok(Value::String(s)) => s.trim().parse::<usize>().unwrap_or($default),
                _ => $default,
            }
        }
    };
}

/// Macro to generate a getter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }
    };
}

/// Macro to generate a getter for non-empty string values with default
macro_rules! impl_string_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                Ok(Value::Null) | Err(_) => $default.to_string(),
                Ok(other) => {
                    tracing::warn!(
                        "Configuration value {} is not a string ({:?}), using default {}",
                        $path.join("."),
                        other,
                        $default
                    );
                    $default.to_string()
                }
            }
        }
    };
}

/// Configuration manager for BambuRelay
///
/// The configuration is built from, in increasing priority:
/// - the embedded `bambu-relay.yaml`
/// - `config.yaml` in the configuration directory, if present
/// - `BAMBURELAY_CONFIG__*` environment variables
/// - the `TARGETS` environment variable (for `relay.targets` only)
///
/// Environment variables come from the process first, then from the `.env`
/// file for keys the process does not define.
#[derive(Debug, Clone)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Value,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str, env_dir: Option<&str>) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Some(env_path) = env_dir {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path.to_string();
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        CONFIG_DIR_NAME.to_string()
    }

    /// Loads the configuration from the specified directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `BAMBURELAY_CONFIG` environment variable (process or `.env`)
    /// 3. `.bamburelay` in the current directory
    /// 4. `.bamburelay` in the user's home directory
    ///
    /// A missing `config.yaml` is not an error: the embedded defaults are used.
    /// The directory is never created and nothing is written back.
    ///
    /// # Errors
    ///
    /// Fails if `config.yaml` or `.env` exists but cannot be parsed.
    pub fn load_config(directory: &str) -> Result<Self> {
        let vars = with_dotenv(env::vars(), Path::new(DOTENV_FILE))?;
        Self::load_config_with_env(directory, vars)
    }

    /// Same as [`Config::load_config`], with an explicit set of environment variables
    pub fn load_config_with_env<I>(directory: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let env_dir = vars
            .iter()
            .find(|(key, _)| key == ENV_CONFIG_DIR)
            .map(|(_, value)| value.as_str());
        let config_dir = Self::find_config_dir(directory, env_dir);
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file=%path, "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)
                    .map_err(|e| anyhow!("Invalid configuration file {}: {}", path, e))?;
                merge_yaml(&mut default_value, &Self::lower_keys_value(external_value));
            }
            Err(_) => {
                info!(config_file=%path, "Config file not found, using default embedded config");
            }
        }

        let mut config_value = Self::lower_keys_value(default_value);
        Self::apply_env_overrides(&mut config_value, vars);

        Ok(Config {
            config_dir,
            path,
            data: config_value,
        })
    }

    /// Répertoire de configuration retenu
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Chemin du fichier `config.yaml` (qu'il existe ou non)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Gets a configuration value at the specified path
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["relay", "port"]`)
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the YAML value or an error if the path doesn't exist
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let mut current = &self.data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    fn apply_env_overrides<I>(config: &mut Value, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut targets = None;

        for (key, value) in vars {
            if key == ENV_TARGETS {
                targets = Some(value);
            } else if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(e) = Self::set_value_internal(config, &key_path, yaml_value) {
                    tracing::warn!("Ignoring environment override {}: {}", key, e);
                }
            }
        }

        // TARGETS est toujours une chaîne brute, jamais interprétée comme du YAML
        if let Some(value) = targets {
            info!(env_var = ENV_TARGETS, "Relay targets taken from environment");
            if let Err(e) =
                Self::set_value_internal(config, &["relay", "targets"], Value::String(value))
            {
                tracing::warn!("Ignoring {}: {} (is `relay` a mapping?)", ENV_TARGETS, e);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        let new_key = Value::String(s.to_lowercase());
                        let new_val = Self::lower_keys_value(v);
                        new_map.insert(new_key, new_val);
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Récupère la liste des cibles du relais
    ///
    /// `relay.targets` peut être une liste YAML ou une chaîne séparée par des
    /// virgules (forme utilisée par la variable `TARGETS`). Les entrées sont
    /// nettoyées et les entrées vides ignorées.
    ///
    /// # Errors
    ///
    /// Retourne une erreur si aucune cible n'est configurée : le relais ne
    /// peut pas démarrer sans destinataire.
    pub fn get_relay_targets(&self) -> Result<Vec<String>> {
        let targets: Vec<String> = match self.get_value(&["relay", "targets"]) {
            Ok(Value::String(s)) => split_targets(&s),
            Ok(Value::Sequence(seq)) => seq
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        if targets.is_empty() {
            return Err(anyhow!(
                "No relay targets configured (set {} to a comma-separated list of hosts)",
                ENV_TARGETS
            ));
        }
        Ok(targets)
    }

    /// Gets the UDP port used to receive and forward packets
    ///
    /// Returns the configured port, or the default port (2021) if not configured or invalid.
    pub fn get_relay_port(&self) -> u16 {
        match self.get_value(&["relay", "port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    tracing::warn!(
                        "Invalid relay port '{}', using default {}",
                        n,
                        DEFAULT_RELAY_PORT
                    );
                    DEFAULT_RELAY_PORT
                }
            },
            Ok(Value::String(s)) => match s.trim().parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!(
                        "Invalid relay port '{}', using default {}",
                        s,
                        DEFAULT_RELAY_PORT
                    );
                    DEFAULT_RELAY_PORT
                }
            },
            Ok(_) => {
                tracing::warn!(
                    "Relay port not a number or string, using default {}",
                    DEFAULT_RELAY_PORT
                );
                DEFAULT_RELAY_PORT
            }
            Err(err) => {
                tracing::warn!(
                    "Failed to get relay port: {}, using default {}",
                    err,
                    DEFAULT_RELAY_PORT
                );
                DEFAULT_RELAY_PORT
            }
        }
    }

    /// Port de destination des cibles, s'il diffère du port d'écoute
    ///
    /// Retourne `None` si `relay.target_port` est absent ou invalide.
    pub fn get_relay_target_port(&self) -> Option<u16> {
        match self.get_value(&["relay", "target_port"]) {
            Ok(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Ok(Value::String(s)) => s.trim().parse::<u16>().ok(),
            _ => None,
        }
    }

    impl_string_config!(
        get_relay_bind_address,
        &["relay", "bind_address"],
        DEFAULT_BIND_ADDRESS
    );

    impl_usize_config!(
        get_relay_buffer_size,
        &["relay", "buffer_size"],
        DEFAULT_BUFFER_SIZE
    );

    impl_string_config!(
        get_rewrite_field,
        &["relay", "rewrite", "field"],
        DEFAULT_REWRITE_FIELD
    );

    impl_string_config!(
        get_rewrite_mode,
        &["relay", "rewrite", "mode"],
        DEFAULT_REWRITE_MODE
    );

    /// Récupère le préfixe ajouté à la valeur réécrite
    ///
    /// Contrairement aux autres chaînes, un préfixe vide est accepté tel quel.
    pub fn get_rewrite_prefix(&self) -> String {
        match self.get_value(&["relay", "rewrite", "prefix"]) {
            Ok(Value::String(s)) => s,
            Ok(Value::Null) => String::new(),
            _ => DEFAULT_REWRITE_PREFIX.to_string(),
        }
    }

    impl_string_config!(
        get_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_bool_config!(
        get_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );
}

/// Complète `vars` avec les entrées du fichier `.env` situé à `path`
///
/// Une variable déjà présente dans `vars` garde sa valeur : l'environnement du
/// processus l'emporte sur le fichier. Un fichier absent n'est pas une erreur.
pub fn with_dotenv<I>(vars: I, path: &Path) -> Result<Vec<(String, String)>>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut vars: Vec<(String, String)> = vars.into_iter().collect();

    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(vars),
        Err(e) => return Err(anyhow!("Cannot read {}: {}", path.display(), e)),
    };

    let mut added = 0;
    for entry in entries {
        let (key, value) =
            entry.map_err(|e| anyhow!("Invalid environment file {}: {}", path.display(), e))?;
        if !vars.iter().any(|(k, _)| *k == key) {
            vars.push((key, value));
            added += 1;
        }
    }

    info!(env_file=%path.display(), added, "Loaded environment file");
    Ok(vars)
}

/// Découpe une liste de cibles séparées par des virgules
fn split_targets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}
