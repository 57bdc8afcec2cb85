//! Représentation d'un message SSDP

use std::fmt;

use indexmap::IndexMap;

use crate::errors::RelayError;
use crate::tokenizer::{Token, TokenKind, Tokenizer};

/// État de l'automate nom/valeur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    AwaitingValue,
    AwaitingName,
}

/// Message SSDP : ligne de départ + champs d'en-tête ordonnés
///
/// L'ordre des champs est celui de leur première apparition ; un nom répété
/// garde sa position et prend la dernière valeur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    start_line: String,
    fields: IndexMap<String, String>,
}

impl SsdpMessage {
    /// Crée un message sans champ
    pub fn new(start_line: impl Into<String>) -> Self {
        Self {
            start_line: start_line.into(),
            fields: IndexMap::new(),
        }
    }

    /// Découpe `text` avec `tokenizer` puis construit le message
    pub fn parse(text: &str, tokenizer: &dyn Tokenizer) -> Result<Self, RelayError> {
        Self::from_tokens(tokenizer.tokenize(text))
    }

    /// Construit un message à partir d'un flux de tokens (un seul passage).
    ///
    /// # Errors
    ///
    /// `MalformedPacket` si aucun nom de champ n'apparaît, ou si la ligne de
    /// départ est vide.
    pub fn from_tokens<'a, I>(tokens: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = Token<'a>>,
    {
        let mut tokens = tokens.into_iter();

        // Phase 1 : tout ce qui précède le premier nom de champ
        let mut start_line = String::new();
        let mut pending_name = None;
        for token in tokens.by_ref() {
            if token.kind == TokenKind::FieldName {
                pending_name = Some(token.text);
                break;
            }
            start_line.push_str(token.text);
        }

        let Some(mut pending_name) = pending_name else {
            return Err(RelayError::MalformedPacket(
                "no header field name found".to_string(),
            ));
        };

        let start_line = start_line.trim();
        if start_line.is_empty() {
            return Err(RelayError::MalformedPacket("empty start line".to_string()));
        }

        // Phase 2 : alternance nom/valeur, le reste est ignoré
        let mut fields = IndexMap::new();
        let mut state = ParserState::AwaitingValue;
        for token in tokens {
            match (state, token.kind) {
                (ParserState::AwaitingValue, TokenKind::FieldValue) => {
                    fields.insert(pending_name.to_string(), token.text.to_string());
                    state = ParserState::AwaitingName;
                }
                (ParserState::AwaitingName, TokenKind::FieldName) => {
                    pending_name = token.text;
                    state = ParserState::AwaitingValue;
                }
                _ => {}
            }
        }
        // Un nom sans valeur en fin de flux est abandonné

        Ok(Self {
            start_line: start_line.to_string(),
            fields,
        })
    }

    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Remplace la valeur d'un champ (sa position est conservée) ou l'ajoute en fin
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Préfixe la valeur courante du champ `name` et retourne la nouvelle valeur
    pub fn prefix_field(&mut self, name: &str, prefix: &str) -> Result<&str, RelayError> {
        let value = self
            .fields
            .get_mut(name)
            .ok_or_else(|| RelayError::MissingField(name.to_string()))?;
        value.insert_str(0, prefix);
        Ok(value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Forme filaire canonique, encodée en UTF-8
    pub fn dump(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.start_line)?;
        for (name, value) in &self.fields {
            write!(f, "\r\n{}: {}", name, value)?;
        }
        f.write_str("\r\n\r\n")
    }
}
