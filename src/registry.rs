//! Live connection registry.
//!
//! Maps a user to at most one open push channel. A newer channel for the
//! same user replaces the older one; closing the older one afterwards
//! leaves the replacement in place. Business code only gets to push and
//! close, never to walk the map.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::SessionKeys;

/// Frames queued for one socket.
pub type Inbox = mpsc::UnboundedReceiver<String>;
type Outbox = mpsc::UnboundedSender<String>;

/// Identifies one admitted channel. Returned by register, given back to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHandle {
    pub user_id: Uuid,
    pub channel_id: Uuid,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no token provided")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
}

struct Channel {
    id: Uuid,
    outbox: Outbox,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<Uuid, Channel>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    /// Admit a channel for whoever the token names. Nothing is recorded
    /// unless the token verifies.
    pub fn register(
        &self,
        token: Option<&str>,
        keys: &SessionKeys,
    ) -> Result<(ChannelHandle, Inbox), RegistryError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(RegistryError::MissingToken)?;
        let claims = keys.verify(token).map_err(|_| RegistryError::InvalidToken)?;

        let (outbox, inbox) = mpsc::unbounded_channel();
        let handle = ChannelHandle {
            user_id: claims.sub,
            channel_id: Uuid::new_v4(),
        };

        let replaced = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.user_id, Channel { id: handle.channel_id, outbox });

        tracing::info!(
            user_id = %handle.user_id,
            channel_id = %handle.channel_id,
            replaced = replaced.is_some(),
            "channel registered"
        );
        Ok((handle, inbox))
    }

    /// Queue a frame on the user's channel. False when the user has no
    /// open channel.
    pub fn push(&self, user_id: Uuid, frame: String) -> bool {
        let stale = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            match channels.get(&user_id) {
                None => return false,
                Some(channel) => match channel.outbox.send(frame) {
                    Ok(()) => return true,
                    Err(_) => channel.id,
                },
            }
        };

        // Socket went away without closing; drop the dead entry.
        self.close(ChannelHandle { user_id, channel_id: stale });
        false
    }

    #[cfg(test)]
    fn is_connected(&self, user_id: Uuid) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&user_id)
    }

    /// Forget a channel, unless it was already replaced by a newer one.
    pub fn close(&self, handle: ChannelHandle) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels.get(&handle.user_id).is_some_and(|c| c.id == handle.channel_id) {
            channels.remove(&handle.user_id);
            tracing::info!(user_id = %handle.user_id, channel_id = %handle.channel_id, "channel closed");
        }
    }
}
