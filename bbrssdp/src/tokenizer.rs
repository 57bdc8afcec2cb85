//! Découpage lexical des paquets SSDP
//!
//! Le parser ne dépend que du contrat [`Tokenizer`] : une suite finie de
//! [`Token`] typés, consommée une seule fois. [`SsdpLexer`] en est
//! l'implémentation intégrée, suffisante pour la grammaire SSDP/HTTP.

use std::collections::VecDeque;

/// Catégorie lexicale d'un token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Texte de la ligne de départ (`NOTIFY * HTTP/1.1`, `HTTP/1.1 200 OK`, ...)
    StartLineText,
    /// Nom d'un champ d'en-tête
    FieldName,
    /// Valeur d'un champ d'en-tête
    FieldValue,
    /// Ponctuation, blancs, fins de ligne, bruit
    Other,
}

/// Unité lexicale empruntée au texte source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str) -> Self {
        Self { kind, text }
    }
}

/// Flux paresseux de tokens sur un paquet
pub type TokenStream<'a> = Box<dyn Iterator<Item = Token<'a>> + 'a>;

/// Classifie un texte en tokens des quatre catégories de [`TokenKind`].
///
/// Implémenter ce trait permet de substituer une grammaire plus stricte au
/// lexer intégré.
pub trait Tokenizer: Send + Sync {
    fn tokenize<'a>(&self, text: &'a str) -> TokenStream<'a>;
}

/// Lexer SSDP intégré, orienté lignes.
///
/// - les lignes vides initiales sont du bruit ;
/// - la première ligne non vide est la ligne de départ ;
/// - jusqu'à la première ligne vide, `NOM:VALEUR` donne un nom et une valeur
///   (éventuellement vide), toute autre ligne est du bruit ;
/// - la ligne vide et tout ce qui suit sont du bruit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SsdpLexer;

impl Tokenizer for SsdpLexer {
    fn tokenize<'a>(&self, text: &'a str) -> TokenStream<'a> {
        Box::new(SsdpTokens::new(text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Headers,
    Body,
}

/// Itérateur ligne par ligne ; les tokens d'une ligne sont mis en file.
struct SsdpTokens<'a> {
    rest: &'a str,
    section: Section,
    pending: VecDeque<Token<'a>>,
}

impl<'a> SsdpTokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            rest: text,
            section: Section::Preamble,
            pending: VecDeque::with_capacity(8),
        }
    }

    fn push(&mut self, kind: TokenKind, text: &'a str) {
        if !text.is_empty() {
            self.pending.push_back(Token::new(kind, text));
        }
    }

    fn lex_line(&mut self) {
        if self.section == Section::Body {
            let rest = std::mem::take(&mut self.rest);
            self.push(TokenKind::Other, rest);
            return;
        }

        let (line, eol, rest) = split_line(self.rest);
        self.rest = rest;

        let blank = line.trim().is_empty();
        match self.section {
            Section::Preamble if blank => self.push(TokenKind::Other, line),
            Section::Preamble => {
                self.push(TokenKind::StartLineText, line);
                self.section = Section::Headers;
            }
            Section::Headers if blank => {
                self.push(TokenKind::Other, line);
                self.section = Section::Body;
            }
            Section::Headers => self.lex_header(line),
            Section::Body => unreachable!("body is consumed in one token"),
        }

        self.push(TokenKind::Other, eol);
    }

    fn lex_header(&mut self, line: &'a str) {
        let Some(colon) = line.find(':') else {
            self.push(TokenKind::Other, line);
            return;
        };

        let name = &line[..colon];
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
            self.push(TokenKind::Other, line);
            return;
        }

        let after = &line[colon + 1..];
        let value_start = after.len() - after.trim_start_matches([' ', '\t']).len();
        let value_end = after.trim_end_matches([' ', '\t']).len().max(value_start);

        self.pending.push_back(Token::new(TokenKind::FieldName, name));
        self.push(TokenKind::Other, &line[colon..=colon]);
        self.push(TokenKind::Other, &after[..value_start]);
        // Une valeur vide reste un token, sinon le nom suivant serait mal apparié
        self.pending
            .push_back(Token::new(TokenKind::FieldValue, &after[value_start..value_end]));
        self.push(TokenKind::Other, &after[value_end..]);
    }
}

impl<'a> Iterator for SsdpTokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            if self.rest.is_empty() {
                return None;
            }
            self.lex_line();
        }
    }
}

/// Sépare la première ligne : (contenu, fin de ligne, reste)
fn split_line(text: &str) -> (&str, &str, &str) {
    match text.find('\n') {
        Some(lf) => {
            let line = &text[..lf];
            let line = line.strip_suffix('\r').unwrap_or(line);
            (line, &text[line.len()..=lf], &text[lf + 1..])
        }
        None => (text, "", ""),
    }
}
