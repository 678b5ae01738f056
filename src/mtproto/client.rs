//! MTProto client wrapper around grammers
//!
//! The grammers session is never read from or written to a file directly:
//! it is loaded from the `SessionManager` and every change is handed back
//! to it, so the sync machinery sees each new auth key.

use grammers_client::{Client, Config, InitParams};
use grammers_session::Session as GrammersSession;

use super::error::MtProtoError;
use crate::core::config::Settings;
use crate::session::{SessionLease, SessionManager};

/// MTProto client wrapper for bot operations
pub struct MtProtoClient {
    client: Client,
}

impl MtProtoClient {
    /// Connects with the managed session and signs in as a bot if needed.
    ///
    /// The session lock is held for the whole handshake, so no other
    /// handler can refresh or sync the session halfway through.
    pub async fn connect(settings: &Settings, bot_token: &str, manager: &SessionManager) -> Result<Self, MtProtoError> {
        let (api_id, api_hash) = match (settings.telegram_api_id, settings.telegram_api_hash.as_deref()) {
            (Some(id), Some(hash)) => (id, hash),
            _ => return Err(MtProtoError::MissingCredentials),
        };

        let mut lease = manager.lease().await;
        let session = load_or_reset(&mut lease).await?;

        let client = match Self::sign_in(session, api_id, api_hash, bot_token).await {
            Err(e) if e.is_auth_key_revoked() => {
                log::warn!("Telegram rejected the stored auth key, starting a fresh session");
                lease.invalidate(&e.to_string()).await?;
                Self::sign_in(GrammersSession::new(), api_id, api_hash, bot_token).await?
            }
            other => other?,
        };

        if lease.store(client.session().save()).await? {
            log::info!("MTProto session stored");
        }
        Ok(Self { client })
    }

    async fn sign_in(
        session: GrammersSession,
        api_id: i32,
        api_hash: &str,
        bot_token: &str,
    ) -> Result<Client, MtProtoError> {
        let config = Config {
            session,
            api_id,
            api_hash: api_hash.to_string(),
            params: InitParams {
                device_model: "telesync".to_string(),
                system_version: "1.0".to_string(),
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                system_lang_code: "en".to_string(),
                lang_code: "en".to_string(),
                ..Default::default()
            },
        };

        log::info!("Connecting to Telegram...");
        let client = Client::connect(config)
            .await
            .map_err(|e| MtProtoError::Connect(e.to_string()))?;

        if !client.is_authorized().await? {
            log::info!("Not authorized, signing in as bot...");
            client
                .bot_sign_in(bot_token)
                .await
                .map_err(|e| MtProtoError::SignIn(e.to_string()))?;
        } else {
            log::info!("Already authorized");
        }
        Ok(client)
    }

    /// Hands the current session state back to the manager.
    ///
    /// Returns true if the stored blob changed.
    pub async fn persist(&self, manager: &SessionManager) -> Result<bool, MtProtoError> {
        Ok(manager.refresh(self.client.session().save()).await?)
    }

    /// Get information about the signed-in account
    pub async fn get_me(&self) -> Result<grammers_client::types::User, MtProtoError> {
        Ok(self.client.get_me().await?)
    }
}

/// Builds a grammers session from the managed blob.
///
/// An unreadable blob is treated as corruption: the managed session is
/// invalidated and a fresh grammers session is returned.
async fn load_or_reset(lease: &mut SessionLease<'_>) -> Result<GrammersSession, MtProtoError> {
    let Some(current) = lease.session() else {
        log::info!("No stored session, creating a new one");
        return Ok(GrammersSession::new());
    };

    match decode_session(current.blob()) {
        Ok(session) => {
            log::info!("Loaded stored session {}", current.short_checksum());
            Ok(session)
        }
        Err(e) => {
            log::error!("{}", e);
            lease.invalidate("stored blob is not a valid MTProto session").await?;
            Ok(GrammersSession::new())
        }
    }
}

pub(crate) fn decode_session(blob: &[u8]) -> Result<GrammersSession, MtProtoError> {
    GrammersSession::load(blob).map_err(|e| MtProtoError::SessionData(e.to_string()))
}
