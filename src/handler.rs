// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::arbitration::MasterLock;
use crate::enumerator::DeviceEnumerator;
use crate::errors::ArbitrationError;
use crate::master::SharedMaster;
use crate::slave::{SlaveConnector, SlaveControl};

/// Control mode of a slave device.
///
/// Devices power up bus-controlled; the handler switches them to standalone
/// operation and back. The two modes are mutually exclusive: a handler holds
/// a standalone connection if and only if its mode is [`ControlMode::Standalone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Addressed indirectly through the shared master's channel selection.
    BusControlled,
    /// Independently enumerated and addressed directly.
    Standalone,
}

/// Per-device coordinator implementing the mode-switch state machine.
///
/// One handler exists per physical slave device, typically driven from its
/// own task. Handlers share the factory's [`MasterLock`] and
/// [`SharedMaster`]; everything else here is owned by the handler and needs
/// no further synchronization.
pub struct SlaveHandler {
    channel: u8,
    serial: String,
    mode: ControlMode,
    connection: Option<Box<dyn SlaveControl>>,
    master: Arc<dyn SharedMaster>,
    lock: Arc<MasterLock>,
    enumerator: Arc<dyn DeviceEnumerator>,
    connector: Arc<dyn SlaveConnector>,
    settle_interval: Duration,
}

impl fmt::Debug for SlaveHandler {
    // Manual impl: the connection is a trait object, so only its presence is
    // reported.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlaveHandler")
            .field("channel", &self.channel)
            .field("serial", &self.serial)
            .field("mode", &self.mode)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl SlaveHandler {
    pub(crate) fn new(
        channel: u8,
        serial: String,
        master: Arc<dyn SharedMaster>,
        lock: Arc<MasterLock>,
        enumerator: Arc<dyn DeviceEnumerator>,
        connector: Arc<dyn SlaveConnector>,
        settle_interval: Duration,
    ) -> Self {
        Self {
            channel,
            serial,
            mode: ControlMode::BusControlled,
            connection: None,
            master,
            lock,
            enumerator,
            connector,
            settle_interval,
        }
    }

    /// EPC channel this slave occupies on the shared master.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Hardware serial identity of the slave.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Shared master interface. Only command it while holding the
    /// arbitration lock.
    pub fn master(&self) -> &Arc<dyn SharedMaster> {
        &self.master
    }

    /// Waits until the shared master is free and takes exclusive ownership.
    pub async fn acquire_master(&self) {
        self.lock.acquire().await
    }

    /// Bounded acquisition of the shared master. A `false` return means the
    /// caller did not obtain access and must not command the master.
    pub async fn acquire_master_timeout(&self, timeout: Duration) -> bool {
        self.lock.acquire_timeout(timeout).await
    }

    /// Non-blocking acquisition attempt.
    pub fn try_acquire_master(&self) -> bool {
        self.lock.try_acquire()
    }

    /// Releases the shared master. Panics when it is not held.
    pub fn release_master(&self) {
        self.lock.release()
    }

    /// Advisory probe, diagnostics only.
    pub fn is_master_available(&self) -> bool {
        self.lock.is_available()
    }

    /// Discovers the slave under its standalone identity and opens the
    /// direct control connection.
    ///
    /// Used when the device already enumerates independently; after a bus
    /// handover the same path performs the single reattachment attempt. A
    /// device that does not show up is a fatal
    /// [`ArbitrationError::DeviceNotFound`], never retried here.
    pub async fn connect_standalone(&mut self) -> Result<(), ArbitrationError> {
        let endpoints = self
            .enumerator
            .select(&self.serial)
            .await
            .map_err(ArbitrationError::Discovery)?
            .ok_or_else(|| ArbitrationError::DeviceNotFound {
                serial: self.serial.clone(),
            })?;
        let connection = self
            .connector
            .open(&endpoints)
            .await
            .map_err(ArbitrationError::Slave)?;
        self.connection = Some(connection);
        self.mode = ControlMode::Standalone;
        info!(
            "slave {} connected in standalone mode via {}",
            self.serial, endpoints.command
        );
        Ok(())
    }

    /// Switches the slave from bus control to standalone control, acquiring
    /// the arbitration lock internally.
    ///
    /// Blocks until the lock is free when another handler holds it. Callers
    /// that already hold the lock must use
    /// [`SlaveHandler::switch_to_standalone_locked`] instead.
    pub async fn switch_to_standalone(&mut self) -> Result<(), ArbitrationError> {
        self.lock.acquire().await;
        self.handover_to_standalone().await
    }

    /// Switches the slave from bus control to standalone control. The caller
    /// must already hold the arbitration lock; it is released inside, right
    /// after the handover and before the settle wait.
    pub async fn switch_to_standalone_locked(&mut self) -> Result<(), ArbitrationError> {
        self.handover_to_standalone().await
    }

    async fn handover_to_standalone(&mut self) -> Result<(), ArbitrationError> {
        debug!(
            "handing over EPC channel {} (slave {}) to standalone control",
            self.channel, self.serial
        );
        let handover = async {
            self.master.select_channel(self.channel).await?;
            self.master.handover_to_standalone().await
        }
        .await;
        match handover {
            Ok(()) => self.mode = ControlMode::Standalone,
            Err(e) => {
                self.lock.release();
                return Err(ArbitrationError::Master(e));
            }
        }
        // The settle wait and rediscovery touch only per-handler state, so
        // the lock is released first and other handlers may proceed.
        self.lock.release();
        tokio::time::sleep(self.settle_interval).await;
        self.connect_standalone().await
    }

    /// Switches the slave from standalone control back to bus control.
    ///
    /// The caller must hold the arbitration lock for the whole call; it is
    /// not acquired internally and stays held on return, so the caller can
    /// issue bus commands to the now re-selected channel.
    ///
    /// The slave-side release and close are best effort: the device is being
    /// surrendered to the bus regardless, so a shutdown glitch is logged and
    /// the switch proceeds.
    pub async fn switch_to_bus(&mut self) -> Result<(), ArbitrationError> {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.switch_to_bus_control().await {
                warn!(
                    "slave {} did not acknowledge return to bus control: {e}",
                    self.serial
                );
            }
            if let Err(e) = connection.close().await {
                warn!(
                    "closing standalone connection of slave {} failed: {e}",
                    self.serial
                );
            }
        }
        self.mode = ControlMode::BusControlled;
        tokio::time::sleep(self.settle_interval).await;
        self.master
            .select_channel(self.channel)
            .await
            .map_err(ArbitrationError::Master)?;
        debug!(
            "slave {} is back under bus control on EPC channel {}",
            self.serial, self.channel
        );
        Ok(())
    }

    /// Tears down the standalone connection if one exists.
    ///
    /// Idempotent; a bus-controlled handler has nothing to close. Close
    /// failures are logged and swallowed so bulk teardown always completes.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(
                    "closing standalone connection of slave {} failed: {e}",
                    self.serial
                );
            }
        }
        self.mode = ControlMode::BusControlled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCall, SimRig};

    const SETTLE: Duration = Duration::from_millis(1);

    fn handler_for(rig: &SimRig, lock: &Arc<MasterLock>, channel: u8, serial: &str) -> SlaveHandler {
        SlaveHandler::new(
            channel,
            serial.to_string(),
            rig.master(),
            lock.clone(),
            rig.enumerator(),
            rig.slave_connector(),
            SETTLE,
        )
    }

    #[tokio::test]
    async fn switch_to_standalone_connects_and_releases_lock() {
        let rig = SimRig::new();
        rig.attach_slave(4, "33001");
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 4, "33001");

        assert_eq!(handler.mode(), ControlMode::BusControlled);
        assert!(handler.connection.is_none());

        handler.switch_to_standalone().await.unwrap();

        assert_eq!(handler.mode(), ControlMode::Standalone);
        assert!(handler.connection.is_some());
        assert!(lock.is_available());
        assert_eq!(
            rig.calls(),
            vec![SimCall::SelectChannel(4), SimCall::Handover]
        );
    }

    #[tokio::test]
    async fn connect_standalone_skips_the_master_entirely() {
        let rig = SimRig::new();
        rig.attach_standalone_slave("33002");
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 1, "33002");

        handler.connect_standalone().await.unwrap();

        assert_eq!(handler.mode(), ControlMode::Standalone);
        assert!(handler.connection.is_some());
        assert!(rig.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_device_after_handover_is_fatal() {
        let rig = SimRig::new();
        rig.attach_slave(4, "33001");
        rig.suppress_enumeration();
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 4, "33001");

        let err = handler.switch_to_standalone().await.unwrap_err();
        assert!(matches!(
            err,
            ArbitrationError::DeviceNotFound { ref serial } if serial == "33001"
        ));
        // The handover went through, so the lock must already be free again.
        assert!(lock.is_available());
    }

    #[tokio::test]
    async fn master_failure_during_handover_releases_lock() {
        let rig = SimRig::new();
        rig.attach_slave(4, "33001");
        rig.fail_master_commands();
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 4, "33001");

        let err = handler.switch_to_standalone().await.unwrap_err();
        assert!(matches!(err, ArbitrationError::Master(_)));
        assert_eq!(handler.mode(), ControlMode::BusControlled);
        assert!(handler.connection.is_none());
        assert!(lock.is_available());
    }

    #[tokio::test]
    async fn switch_to_bus_reselects_the_channel() {
        let rig = SimRig::new();
        rig.attach_slave(4, "33001");
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 4, "33001");
        handler.switch_to_standalone().await.unwrap();

        assert!(handler.try_acquire_master());
        assert!(!handler.is_master_available());
        handler.switch_to_bus().await.unwrap();
        handler.release_master();

        assert_eq!(handler.mode(), ControlMode::BusControlled);
        assert!(handler.connection.is_none());
        assert!(rig.standalone_serials().is_empty());
        assert_eq!(rig.calls().last(), Some(&SimCall::SelectChannel(4)));
    }

    #[tokio::test]
    async fn switch_to_bus_swallows_slave_shutdown_failures() {
        let rig = SimRig::new();
        rig.attach_slave(4, "33001");
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 4, "33001");
        handler.switch_to_standalone().await.unwrap();

        rig.fail_slave_shutdown();
        handler.acquire_master().await;
        handler.switch_to_bus().await.unwrap();
        handler.release_master();

        assert_eq!(handler.mode(), ControlMode::BusControlled);
        assert!(handler.connection.is_none());
    }

    #[tokio::test]
    async fn debug_output_reports_identity_and_mode() {
        let rig = SimRig::new();
        rig.attach_standalone_slave("33002");
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 1, "33002");
        handler.connect_standalone().await.unwrap();

        let rendered = format!("{handler:?}");
        assert!(rendered.contains("33002"));
        assert!(rendered.contains("Standalone"));
        assert!(rendered.contains("connected: true"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let rig = SimRig::new();
        rig.attach_standalone_slave("33002");
        let lock = Arc::new(MasterLock::new());
        let mut handler = handler_for(&rig, &lock, 1, "33002");
        handler.connect_standalone().await.unwrap();

        handler.close().await;
        assert_eq!(handler.mode(), ControlMode::BusControlled);
        assert!(handler.connection.is_none());

        handler.close().await;
        assert_eq!(handler.mode(), ControlMode::BusControlled);
        assert!(handler.connection.is_none());
    }
}
