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

pub mod arbitration;
pub mod enumerator;
pub mod errors;
pub mod factory;
pub mod handler;
pub mod master;
pub mod sim;
pub mod slave;

pub use arbitration::MasterLock;
pub use enumerator::DeviceEnumerator;
pub use errors::ArbitrationError;
pub use factory::{HandlerFactory, SharedHandler};
pub use handler::{ControlMode, SlaveHandler};
pub use master::{DeviceIdentity, MasterConnector, SharedMaster};
pub use slave::{EndpointPair, SlaveConnector, SlaveControl};
