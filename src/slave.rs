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

use anyhow::Error;
use async_trait::async_trait;

/// Pair of transport endpoints a slave exposes once it enumerates in
/// standalone mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPair {
    /// Endpoint accepting commands and returning acknowledgements.
    pub command: String,
    /// Endpoint streaming measurement data.
    pub data: String,
}

/// Direct control surface of a slave in standalone mode.
#[async_trait]
pub trait SlaveControl: Send + Sync {
    /// Gives control back to the EPC bus. Like the opposite handover this is
    /// one-way and cannot be interrupted once commanded.
    async fn switch_to_bus_control(&mut self) -> Result<(), Error>;

    /// Closes the standalone connection.
    async fn close(&mut self) -> Result<(), Error>;
}

/// Opens a [`SlaveControl`] over a discovered endpoint pair.
#[async_trait]
pub trait SlaveConnector: Send + Sync {
    async fn open(&self, endpoints: &EndpointPair) -> Result<Box<dyn SlaveControl>, Error>;
}
