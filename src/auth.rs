//! The adapter between an RPC authentication layer and the token engine.
//!
//! The RPC layer hands over the raw credential of each inbound call together
//! with the access mode the invoked operation needs. The bridge either
//! returns an [`AuthorizedCall`] or a typed rejection; the operation handler
//! runs only after a successful authorization.

use crate::error::Error;
use crate::identifier::{AccessMode, BlockTokenIdentifier, ExtendedBlock};
use crate::manager::BlockTokenSecretManager;
use crate::pool::BlockPoolTokenSecretManager;
use crate::token::{KIND_NAME, Token};
use std::sync::Arc;

/// Verification hooks the RPC layer needs from a token secret manager.
///
/// RPC 层所需的令牌校验接口，由单个管理器和池注册表实现。
pub trait TokenVerifier: Send + Sync {
    fn check_access(
        &self,
        token: &Token,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<BlockTokenIdentifier, Error>;

    /// The expected password for `identifier`, for digest-style handshakes.
    fn retrieve_password(&self, identifier: &BlockTokenIdentifier) -> Result<Vec<u8>, Error>;
}

impl TokenVerifier for BlockTokenSecretManager {
    fn check_access(
        &self,
        token: &Token,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<BlockTokenIdentifier, Error> {
        BlockTokenSecretManager::check_access(self, token, expected_owner, block, mode)
    }

    fn retrieve_password(&self, identifier: &BlockTokenIdentifier) -> Result<Vec<u8>, Error> {
        BlockTokenSecretManager::retrieve_password(self, identifier)
    }
}

impl TokenVerifier for BlockPoolTokenSecretManager {
    fn check_access(
        &self,
        token: &Token,
        expected_owner: Option<&str>,
        block: &ExtendedBlock,
        mode: AccessMode,
    ) -> Result<BlockTokenIdentifier, Error> {
        BlockPoolTokenSecretManager::check_access(self, token, expected_owner, block, mode)
    }

    fn retrieve_password(&self, identifier: &BlockTokenIdentifier) -> Result<Vec<u8>, Error> {
        BlockPoolTokenSecretManager::retrieve_password(self, identifier)
    }
}

/// A credential attached to an inbound call.
///
/// 入站调用携带的凭据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// The wire form of a block access token ([`Token::encode`]).
    BlockToken(Vec<u8>),
    /// Any other credential kind the RPC layer supports.
    Other { kind: String, bytes: Vec<u8> },
}

impl Credential {
    pub fn from_token(token: &Token) -> Result<Self, Error> {
        Ok(Credential::BlockToken(token.encode()?))
    }

    pub fn kind(&self) -> &str {
        match self {
            Credential::BlockToken(_) => KIND_NAME,
            Credential::Other { kind, .. } => kind,
        }
    }
}

/// What the RPC layer knows about a call before it runs.
///
/// 调用执行前 RPC 层掌握的信息。
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub credential: Credential,
    /// The authenticated RPC identity, checked against the token owner.
    pub caller: Option<String>,
    pub block: ExtendedBlock,
    pub required_mode: AccessMode,
}

/// A call that passed token verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedCall {
    pub identifier: BlockTokenIdentifier,
    pub block_id: i64,
}

/// Verifies block-token credentials on behalf of an RPC server.
///
/// 代表 RPC 服务端校验块令牌凭据。
pub struct AuthBridge<V: TokenVerifier> {
    verifier: Arc<V>,
}

impl<V: TokenVerifier> Clone for AuthBridge<V> {
    fn clone(&self) -> Self {
        Self {
            verifier: Arc::clone(&self.verifier),
        }
    }
}

impl<V: TokenVerifier> AuthBridge<V> {
    pub fn new(verifier: Arc<V>) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &Arc<V> {
        &self.verifier
    }

    #[tracing::instrument(skip(self, call), fields(block = %call.block, mode = %call.required_mode))]
    pub fn authorize(&self, call: &InboundCall) -> Result<AuthorizedCall, Error> {
        let result = self.verify(call);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "rejected block token credential");
        }
        result
    }

    fn verify(&self, call: &InboundCall) -> Result<AuthorizedCall, Error> {
        let bytes = match &call.credential {
            Credential::BlockToken(bytes) => bytes,
            Credential::Other { kind, .. } => return Err(Error::UnsupportedCredential(kind.clone())),
        };
        let token = Token::decode(bytes)?;
        let identifier = self.verifier.check_access(
            &token,
            call.caller.as_deref(),
            &call.block,
            call.required_mode,
        )?;
        Ok(AuthorizedCall {
            block_id: identifier.block_id(),
            identifier,
        })
    }

    /// Authorizes `call`, then runs `handler`. The handler is never invoked
    /// for a rejected call.
    ///
    /// 先授权再执行处理函数；授权失败时处理函数不会运行。
    pub fn dispatch<R, F>(&self, call: &InboundCall, handler: F) -> Result<R, Error>
    where
        F: FnOnce(&AuthorizedCall) -> R,
    {
        let authorized = self.authorize(call)?;
        Ok(handler(&authorized))
    }
}

/// Picks the block token for a service out of a client's credentials.
pub struct TokenSelector;

impl TokenSelector {
    pub fn select<'a, I>(tokens: I, service: &str) -> Option<&'a Token>
    where
        I: IntoIterator<Item = &'a Token>,
    {
        tokens
            .into_iter()
            .find(|t| t.is_block_token() && t.service() == service)
    }
}
