// src/connection.rs

use crate::error::Error;
use crate::transport::{DeviceIdentity, Opener, Transport};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

pub enum ConnectionState<T> {
    Closed,
    Open(T),
}

/// Sole owner of the device session.
pub struct Connection<O: Opener> {
    opener: O,
    state: ConnectionState<O::Session>,
    identity: Option<DeviceIdentity>,
    attempts: usize,
    settle: Duration,
}

impl<O: Opener> Connection<O> {
    pub fn new(opener: O, attempts: usize, settle: Duration) -> Self {
        Self {
            opener,
            state: ConnectionState::Closed,
            identity: None,
            attempts,
            settle,
        }
    }

    /// Open a session, closing any current one first.
    ///
    /// Each opened session must accept a halt-clear on its IN endpoint. When it
    /// does not, the unit is reset and released and the next attempt starts after
    /// the settle delay.
    pub async fn open(&mut self) -> Result<&DeviceIdentity, Error> {
        self.close();

        for attempt in 1..=self.attempts {
            let mut session = match self.opener.open().await {
                Ok(session) => session,
                Err(e) => {
                    debug!("Open attempt {}/{} failed: {}", attempt, self.attempts, e);
                    continue;
                }
            };

            if let Err(e) = session.clear_halt() {
                debug!("Can't reset POWERWARE USB endpoint: {}", e);
                if let Err(e) = session.reset() {
                    debug!("Device reset failed: {}", e);
                }
                session.close();
                sleep(self.settle).await;
                continue;
            }

            let identity = session.identity().clone();
            info!("Opened {} on attempt {}", identity, attempt);
            self.opener.pin(&identity);
            self.state = ConnectionState::Open(session);
            return Ok(&*self.identity.insert(identity));
        }

        Err(Error::TransportUnavailable {
            attempts: self.attempts,
        })
    }

    pub fn close(&mut self) {
        if let ConnectionState::Open(session) = std::mem::replace(&mut self.state, ConnectionState::Closed) {
            session.close();
        }
    }

    pub fn session(&mut self) -> Option<&mut O::Session> {
        match &mut self.state {
            ConnectionState::Open(session) => Some(session),
            ConnectionState::Closed => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open(_))
    }

    /// Identity of the last opened unit. Kept across a close for reconnect logging.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }
}
