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

use std::sync::Arc;

use anyhow::Error;
use async_trait::async_trait;

/// Name and serial the master reports for the currently selected channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub serial: String,
}

/// Command surface of the shared master controller.
///
/// Every method must only be called while the caller holds the
/// [`MasterLock`](crate::arbitration::MasterLock) guarding this master.
#[async_trait]
pub trait SharedMaster: Send + Sync {
    /// Routes subsequent bus commands to the slave on the given EPC channel.
    async fn select_channel(&self, channel: u8) -> Result<(), Error>;

    /// Hands control of the selected slave over to its standalone interface.
    ///
    /// This is a one-way handover: the master can only relinquish control,
    /// never forcibly reclaim it from a standalone slave.
    async fn handover_to_standalone(&self) -> Result<(), Error>;

    /// Re-registers a slave that has given control back to the bus.
    async fn reclaim_from_standalone(&self) -> Result<(), Error>;

    /// Reads name and serial of the device on the selected channel.
    async fn read_device_info(&self) -> Result<DeviceIdentity, Error>;

    /// Closes the connection to the master.
    async fn disconnect(&self) -> Result<(), Error>;
}

/// Builds the single shared master connection a factory owns.
#[async_trait]
pub trait MasterConnector: Send + Sync {
    async fn connect(self) -> Result<Arc<dyn SharedMaster>, Error>;
}
