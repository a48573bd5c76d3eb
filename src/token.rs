//! The opaque block token handed to clients.

use crate::error::Error;
use crate::identifier::{BlockTokenIdentifier, decode_exact, encode_bounded};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bincode::{Decode, Encode};
use std::fmt;

/// Discriminator carried by every block access token.
pub const KIND_NAME: &str = "BLOCK_ACCESS_TOKEN";

/// An encoded identifier plus its signature ("password").
///
/// 编码后的标识符及其签名（password）。
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct Token {
    identifier: Vec<u8>,
    password: Vec<u8>,
    kind: String,
    service: String,
}

impl Token {
    pub(crate) fn new(identifier: Vec<u8>, password: Vec<u8>) -> Self {
        Self {
            identifier,
            password,
            kind: KIND_NAME.to_string(),
            service: String::new(),
        }
    }

    pub fn identifier_bytes(&self) -> &[u8] {
        &self.identifier
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = service.into();
    }

    pub fn is_block_token(&self) -> bool {
        self.kind == KIND_NAME
    }

    /// Decodes the carried identifier.
    pub fn decode_identifier(&self) -> Result<BlockTokenIdentifier, Error> {
        if !self.is_block_token() {
            return Err(Error::MalformedToken(format!(
                "unexpected token kind {}",
                self.kind
            )));
        }
        BlockTokenIdentifier::decode(&self.identifier)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        encode_bounded(self, "block token")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        decode_exact(bytes, "block token")
    }

    /// URL-safe base64 of [`Token::encode`], for text-only channels.
    pub fn encode_to_url_string(&self) -> Result<String, Error> {
        Ok(URL_SAFE_NO_PAD.encode(self.encode()?))
    }

    pub fn decode_from_url_string(s: &str) -> Result<Self, Error> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| Error::MalformedToken(format!("invalid base64: {e}")))?;
        Self::decode(&bytes)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("service", &self.service)
            .field("identifier_len", &self.identifier.len())
            .finish_non_exhaustive()
    }
}
