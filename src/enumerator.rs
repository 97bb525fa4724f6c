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

use crate::slave::EndpointPair;

/// Discovery service locating slaves that enumerate in standalone mode.
///
/// After a bus handover the operating system needs a settle interval before
/// the device shows up here; the enumerator itself performs one bounded scan
/// per call and never retries.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// Scans the connected interfaces and returns every candidate endpoint
    /// pair.
    async fn search(&self) -> Result<Vec<EndpointPair>, Error>;

    /// Scans for the device with the given serial. Returns `None` when no
    /// match exists within the bounded scan.
    async fn select(&self, serial: &str) -> Result<Option<EndpointPair>, Error>;
}
