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

use thiserror::Error;

/// Errors surfaced by handler construction and mode switching.
///
/// Collaborator failures are carried as opaque [`anyhow::Error`]s so transport
/// implementations can report whatever their backend produces.
#[derive(Error, Debug)]
pub enum ArbitrationError {
    /// The shared master was unreachable when the factory was built.
    #[error("connection to the shared master failed: {0}")]
    Connection(anyhow::Error),

    /// The device found on an EPC channel is not the one the caller expected.
    #[error("device on EPC channel {channel} reports serial {reported}, expected {expected}")]
    IdentityMismatch {
        channel: u8,
        expected: String,
        reported: String,
    },

    /// The device never enumerated under its standalone identity.
    #[error("device {serial} was not found in standalone mode")]
    DeviceNotFound { serial: String },

    /// A bounded wait for the arbitration lock expired.
    #[error("timed out waiting for the shared master arbitration lock")]
    LockTimeout,

    /// Another handler is already registered on this channel.
    #[error("EPC channel {channel} already has a registered handler")]
    ChannelInUse { channel: u8 },

    /// A shared master command failed.
    #[error("shared master command failed: {0}")]
    Master(anyhow::Error),

    /// The enumeration service failed to scan the connected interfaces.
    #[error("device discovery failed: {0}")]
    Discovery(anyhow::Error),

    /// Opening the standalone control connection failed.
    #[error("standalone connection failed: {0}")]
    Slave(anyhow::Error),
}
