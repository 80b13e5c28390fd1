// src/driver.rs

use crate::config::DriverConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::health::{FailureReport, FailureTracker, ShutdownToken};
use crate::reassembly::ReplyAssembler;
use crate::state::StateStore;
use crate::transaction::{Command, Exchange, TransactionManager};
use crate::transport::{DeviceIdentity, Opener};
use bytes::Bytes;
use tracing::{debug, info, warn};

/// Call/response facade over one UPS. Framing never leaks past this type.
pub struct XcpDriver<O: Opener, S: StateStore> {
    connection: Connection<O>,
    transactions: TransactionManager,
    health: FailureTracker,
    store: S,
}

impl<O: Opener, S: StateStore> XcpDriver<O, S> {
    /// Open the device. Failure here means there is nothing to serve.
    pub async fn initialize(opener: O, config: &DriverConfig, store: S, shutdown: ShutdownToken) -> Result<Self, Error> {
        let connection = Connection::new(opener, config.open_attempts, config.reopen_settle);
        let transactions = TransactionManager::new(
            ReplyAssembler::new(config.reply_timeout),
            config.max_attempts,
            config.write_settle,
        );
        let health = FailureTracker::with_limits(config.error_limit, config.error_rate, shutdown);

        let mut driver = Self {
            connection,
            transactions,
            health,
            store,
        };
        let identity = driver.connection.open().await?.clone();
        driver.publish_identity(&identity);
        info!("Connected to {}", identity);
        Ok(driver)
    }

    fn publish_identity(&mut self, identity: &DeviceIdentity) {
        self.store.set_info("ups.vendorid", identity.vendor_id_hex());
        self.store.set_info("ups.productid", identity.product_id_hex());
    }

    pub async fn read_command(&mut self, opcode: u8) -> Result<Bytes, Error> {
        self.transact(Command::read(opcode)).await
    }

    pub async fn write_command(&mut self, opcode: u8, payload: &[u8]) -> Result<Bytes, Error> {
        self.transact(Command::write(opcode, Bytes::copy_from_slice(payload))).await
    }

    async fn transact(&mut self, command: Command) -> Result<Bytes, Error> {
        let Exchange { reply, protocol_faults } = match self.connection.session() {
            Some(session) => self.transactions.exchange(session, &command).await,
            None => Exchange {
                reply: Err(Error::NotConnected),
                protocol_faults: Vec::new(),
            },
        };

        match reply {
            Ok(reply) => {
                self.report_protocol_faults(&protocol_faults).await;
                self.store.data_ok();
                self.report_comm_good();
                Ok(reply)
            }
            Err(e @ Error::CommandTooLong { .. }) => Err(e),
            Err(e) => {
                if e.is_disconnect() {
                    warn!("UPS disconnected, closing session");
                    self.connection.close();
                }
                self.report_protocol_faults(&protocol_faults).await;
                self.store.data_stale();
                self.report_comm_failure(Some("Error executing command")).await;
                Err(e)
            }
        }
    }

    async fn report_protocol_faults(&mut self, faults: &[String]) {
        for fault in faults {
            self.report_comm_failure(Some(fault.as_str())).await;
        }
    }

    pub fn report_comm_good(&mut self) {
        self.health.report_good();
    }

    /// Count a failure; past the limit this also attempts a reconnect.
    pub async fn report_comm_failure(&mut self, detail: Option<&str>) -> FailureReport {
        let report = self.health.report_failure(detail);
        if report == FailureReport::Reconnect {
            self.reconnect().await;
        }
        report
    }

    /// Hook for the surrounding driver's disconnect notification.
    pub async fn on_transport_lost(&mut self) -> bool {
        self.reconnect().await
    }

    async fn reconnect(&mut self) -> bool {
        debug!("= device has been disconnected, try to reconnect =");
        let reopened = self.connection.open().await.map(DeviceIdentity::clone);
        match reopened {
            Ok(identity) => {
                info!("Successfully reconnected to device {}", identity);
                self.publish_identity(&identity);
                true
            }
            Err(e) => {
                let last = self.connection.identity().map(ToString::to_string).unwrap_or_default();
                info!("Cannot reconnect to device {}: {}", last, e);
                false
            }
        }
    }

    pub fn shutdown(&mut self) {
        debug!("Shutting down USB communication");
        self.connection.close();
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.connection.identity()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub fn failures(&self) -> u32 {
        self.health.failures()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn connection(&self) -> &Connection<O> {
        &self.connection
    }
}
