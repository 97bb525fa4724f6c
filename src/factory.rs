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

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};

use crate::arbitration::MasterLock;
use crate::enumerator::DeviceEnumerator;
use crate::errors::ArbitrationError;
use crate::handler::SlaveHandler;
use crate::master::{MasterConnector, SharedMaster};
use crate::slave::SlaveConnector;

/// Handlers are shared between the driving task and the factory registry.
pub type SharedHandler = Arc<tokio::sync::Mutex<SlaveHandler>>;

struct HandlerEntry {
    channel: u8,
    serial: String,
    handler: SharedHandler,
}

/// Registered handlers plus the channels of constructions still in flight.
/// A channel is reserved before the first await of `create_handler`, so two
/// concurrent calls for the same channel cannot both pass the uniqueness
/// check.
#[derive(Default)]
struct Registry {
    entries: Vec<HandlerEntry>,
    reserved: HashSet<u8>,
}

/// Owns the single shared master connection, the arbitration lock scope and
/// the registry of handlers created against them.
pub struct HandlerFactory {
    master: Arc<dyn SharedMaster>,
    lock: Arc<MasterLock>,
    enumerator: Arc<dyn DeviceEnumerator>,
    connector: Arc<dyn SlaveConnector>,
    settle_interval: Duration,
    lock_timeout: Option<Duration>,
    disconnected: AtomicBool,
    registry: Mutex<Registry>,
}

impl HandlerFactory {
    /// Wait after a mode handover before the device is rediscovered. Long
    /// enough for the operating system to enumerate the new interface.
    pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(2);

    /// Connects to the shared master once and prepares the factory.
    ///
    /// An unreachable master is fatal and surfaced immediately as
    /// [`ArbitrationError::Connection`]; there is no retry.
    pub async fn connect<C>(
        master_connector: C,
        enumerator: Arc<dyn DeviceEnumerator>,
        slave_connector: Arc<dyn SlaveConnector>,
    ) -> Result<Self, ArbitrationError>
    where
        C: MasterConnector,
    {
        let master = master_connector
            .connect()
            .await
            .map_err(ArbitrationError::Connection)?;
        info!("connected to the shared master");
        Ok(Self {
            master,
            lock: Arc::new(MasterLock::new()),
            enumerator,
            connector: slave_connector,
            settle_interval: Self::DEFAULT_SETTLE_INTERVAL,
            lock_timeout: None,
            disconnected: AtomicBool::new(false),
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Overrides the settle interval handlers wait after a mode handover.
    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    /// Bounds lock acquisition during handler construction. Unbounded by
    /// default; when set, an expired wait surfaces as
    /// [`ArbitrationError::LockTimeout`].
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Shared master interface, for measurement code driving bus-controlled
    /// slaves. Only command it while holding the arbitration lock.
    pub fn master(&self) -> Arc<dyn SharedMaster> {
        self.master.clone()
    }

    /// The arbitration lock guarding this factory's master.
    pub fn lock(&self) -> Arc<MasterLock> {
        self.lock.clone()
    }

    /// Number of currently registered handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.lock().unwrap().entries.len()
    }

    /// Channel and serial of every registered handler, in creation order.
    pub fn registered(&self) -> Vec<(u8, String)> {
        self.registry
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|entry| (entry.channel, entry.serial.clone()))
            .collect()
    }

    async fn acquire_lock(&self) -> Result<(), ArbitrationError> {
        match self.lock_timeout {
            Some(timeout) => {
                if self.lock.acquire_timeout(timeout).await {
                    Ok(())
                } else {
                    Err(ArbitrationError::LockTimeout)
                }
            }
            None => {
                self.lock.acquire().await;
                Ok(())
            }
        }
    }

    /// Creates the handler for the slave on the given EPC channel and brings
    /// the device under standalone control.
    ///
    /// Direct discovery is attempted first; devices power up bus-controlled,
    /// so the handover is only performed when the slave does not already
    /// enumerate under its standalone identity. In that case the reported
    /// identity on the channel is verified against `serial` before control
    /// is handed over.
    ///
    /// Construction failures (lock timeout, identity mismatch, device never
    /// reappearing) propagate to the caller and leave the registry
    /// untouched.
    pub async fn create_handler(
        &self,
        channel: u8,
        serial: &str,
    ) -> Result<SharedHandler, ArbitrationError> {
        // Reserve the channel before the first await so a concurrent call
        // for the same channel fails here instead of both registering.
        {
            let mut registry = self.registry.lock().unwrap();
            if registry.entries.iter().any(|entry| entry.channel == channel)
                || !registry.reserved.insert(channel)
            {
                return Err(ArbitrationError::ChannelInUse { channel });
            }
        }

        let mut handler = SlaveHandler::new(
            channel,
            serial.to_string(),
            self.master.clone(),
            self.lock.clone(),
            self.enumerator.clone(),
            self.connector.clone(),
            self.settle_interval,
        );

        let result = self.bring_under_standalone_control(&mut handler, channel, serial).await;

        let mut registry = self.registry.lock().unwrap();
        registry.reserved.remove(&channel);
        result?;

        let handler = Arc::new(tokio::sync::Mutex::new(handler));
        registry.entries.push(HandlerEntry {
            channel,
            serial: serial.to_string(),
            handler: handler.clone(),
        });
        info!("registered handler for slave {serial} on EPC channel {channel}");
        Ok(handler)
    }

    async fn bring_under_standalone_control(
        &self,
        handler: &mut SlaveHandler,
        channel: u8,
        serial: &str,
    ) -> Result<(), ArbitrationError> {
        let direct = self
            .enumerator
            .select(serial)
            .await
            .map_err(ArbitrationError::Discovery)?;
        if direct.is_some() {
            debug!("slave {serial} already enumerates in standalone mode");
            return handler.connect_standalone().await;
        }

        self.acquire_lock().await?;
        let identity = async {
            self.master.select_channel(channel).await?;
            self.master.read_device_info().await
        }
        .await;
        self.lock.release();
        let identity = identity.map_err(ArbitrationError::Master)?;
        // The bus reports a truncated identity, so compare by containment.
        if !serial.contains(&identity.serial) {
            return Err(ArbitrationError::IdentityMismatch {
                channel,
                expected: serial.to_string(),
                reported: identity.serial,
            });
        }
        self.acquire_lock().await?;
        handler.switch_to_standalone_locked().await
    }

    /// Closes every registered handler, clears the registry, then closes the
    /// shared master connection.
    ///
    /// Handlers go first so none is left referencing a torn-down master.
    /// Idempotent: a second call finds an empty registry and skips the
    /// already-closed master connection.
    pub async fn close_all(&self) -> Result<(), ArbitrationError> {
        let entries = std::mem::take(&mut self.registry.lock().unwrap().entries);
        for entry in entries {
            entry.handler.lock().await.close().await;
        }
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            self.master
                .disconnect()
                .await
                .map_err(ArbitrationError::Master)?;
        }
        Ok(())
    }
}
