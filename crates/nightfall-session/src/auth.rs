//! Identity verification at handshake time.
//!
//! Nightfall does not issue or validate credentials itself. The server
//! pulls a bearer credential out of the upgrade request and hands it to an
//! [`Authenticator`]; whatever that returns is the connection's identity
//! for its whole life.

use std::borrow::Cow;

use nightfall_protocol::UserId;
use nightfall_transport::HandshakeInfo;

use crate::SessionError;

/// Who a connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

/// Resolves a bearer credential to an [`Identity`].
///
/// # Example
///
/// ```rust
/// use nightfall_protocol::UserId;
/// use nightfall_session::{Authenticator, Identity, SessionError};
///
/// /// Accepts `<id>` as the credential. Development only.
/// struct NumericAuthenticator;
///
/// impl Authenticator for NumericAuthenticator {
///     async fn authenticate(&self, credential: &str) -> Result<Identity, SessionError> {
///         let id: u64 = credential
///             .parse()
///             .map_err(|_| SessionError::AuthFailed("credential must be a number".into()))?;
///         Ok(Identity { user_id: UserId(id), username: format!("player{id}") })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        credential: &str,
    ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send;
}

/// Finds the bearer credential in an upgrade request.
///
/// Checked in order: `Authorization: Bearer <t>`, the `token` cookie, the
/// `token` query parameter. Empty values are ignored. Cookie and query
/// values are percent-decoded; the header value is used as sent.
pub fn extract_credential(handshake: &HandshakeInfo) -> Option<Cow<'_, str>> {
    let bearer = handshake.header("authorization").and_then(|v| {
        let (scheme, rest) = v.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| Cow::Borrowed(rest.trim()))
    });
    bearer
        .into_iter()
        .chain(handshake.cookie("token"))
        .chain(handshake.query_param("token"))
        .find(|t| !t.is_empty())
}
