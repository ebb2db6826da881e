use ahash::AHashMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha512};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::engine::errors::AuthError;
use crate::shared::config::CONFIG;
use crate::shared::protocol::messages::{ClientRequest, ServerResponse, read_frame, write_frame};

const LOG_TARGET: &str = "engine::auth";

/// Verifies client logins against the configured user list. Passwords are
/// stored and transmitted as `base64(SHA-512(password))`.
pub struct AuthManager {
    enabled: bool,
    users: AHashMap<String, String>,
}

impl AuthManager {
    pub fn from_config() -> Self {
        let users = CONFIG
            .auth
            .users
            .iter()
            .map(|u| (u.name.clone(), u.password_digest.clone()))
            .collect();
        Self {
            enabled: CONFIG.auth.enabled,
            users,
        }
    }

    pub fn for_tests(users: &[(&str, &str)]) -> Self {
        Self {
            enabled: true,
            users: users
                .iter()
                .map(|(name, password)| (name.to_string(), hash_password(password)))
                .collect(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn verify(&self, user: &str, digest: &str) -> bool {
        self.users.get(user).map(|d| d == digest).unwrap_or(false)
    }

    /// Drives the challenge sequence over a fresh client connection:
    /// `login:` wants the username, `password:` the hashed password. The
    /// exchange ends with `NewClientComplete`; a failed exchange surfaces
    /// a connection-setup error.
    pub async fn authenticate<S>(&self, stream: &mut S) -> Result<bool, AuthError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.enabled {
            write_frame(
                stream,
                &ServerResponse::NewClientComplete {
                    authenticated: true,
                },
            )
            .await
            .map_err(|e| AuthError::ConnectionSetup(e.to_string()))?;
            return Ok(true);
        }

        let user = self.prompt(stream, 1, "login:").await?;
        let digest = self.prompt(stream, 2, "password:").await?;
        let authenticated = self.verify(&user, &digest);
        if authenticated {
            debug!(target: LOG_TARGET, %user, "Client authenticated");
        } else {
            warn!(target: LOG_TARGET, %user, "Authentication failed");
        }
        write_frame(stream, &ServerResponse::NewClientComplete { authenticated })
            .await
            .map_err(|e| AuthError::ConnectionSetup(e.to_string()))?;
        Ok(authenticated)
    }

    async fn prompt<S>(
        &self,
        stream: &mut S,
        msg_type: u32,
        prompt: &str,
    ) -> Result<String, AuthError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        write_frame(
            stream,
            &ServerResponse::SecurityMessage {
                msg_type,
                prompt: prompt.to_string(),
            },
        )
        .await
        .map_err(|e| AuthError::ConnectionSetup(e.to_string()))?;
        match read_frame::<_, ClientRequest>(stream)
            .await
            .map_err(|e| AuthError::ConnectionSetup(e.to_string()))?
        {
            Some(ClientRequest::SecurityMessageResponse { response }) => Ok(response),
            _ => Err(AuthError::ConnectionSetup(
                "expected a security response".to_string(),
            )),
        }
    }
}

/// The digest clients answer the password prompt with.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// What a client answers to a prompt it does not recognize.
pub fn answer_prompt(prompt: &str, user: &str, password: &str) -> String {
    match prompt {
        "login:" => user.to_string(),
        "password:" => hash_password(password),
        _ => "Unknown request".to_string(),
    }
}
