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

//! In-process simulation of an EPC rig: one shared master, its channels and
//! the slaves currently visible in standalone mode.
//!
//! The simulation backs the unit tests and the `simulated_rig` example. A
//! handover moves the selected channel's slave into the standalone-visible
//! set; the slave-side return moves it back. Re-enumeration is modeled by
//! that visibility set rather than by real settle delays.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Error};
use async_trait::async_trait;

use crate::enumerator::DeviceEnumerator;
use crate::master::{DeviceIdentity, MasterConnector, SharedMaster};
use crate::slave::{EndpointPair, SlaveConnector, SlaveControl};

/// One recorded call against the simulated master, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    SelectChannel(u8),
    Handover,
    Reclaim,
    ReadDeviceInfo,
    Disconnect,
}

#[derive(Default)]
struct SimState {
    /// Slave serial per EPC channel.
    channels: HashMap<u8, String>,
    selected: Option<u8>,
    /// Serials currently visible to standalone enumeration.
    standalone: Vec<String>,
    calls: Vec<SimCall>,
    fail_master: bool,
    fail_slave_shutdown: bool,
    suppress_enumeration: bool,
}

/// Cheaply cloneable handle to the shared state of a simulated rig.
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<SimState>>,
}

impl SimRig {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Attaches a bus-controlled slave to an EPC channel.
    pub fn attach_slave(&self, channel: u8, serial: &str) {
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(channel, serial.to_string());
    }

    /// Attaches a slave that already enumerates in standalone mode.
    pub fn attach_standalone_slave(&self, serial: &str) {
        self.state
            .lock()
            .unwrap()
            .standalone
            .push(serial.to_string());
    }

    /// Makes every subsequent master command fail.
    pub fn fail_master_commands(&self) {
        self.state.lock().unwrap().fail_master = true;
    }

    /// Makes slave-side bus return and close fail.
    pub fn fail_slave_shutdown(&self) {
        self.state.lock().unwrap().fail_slave_shutdown = true;
    }

    /// Models a device that never reappears after a handover.
    pub fn suppress_enumeration(&self) {
        self.state.lock().unwrap().suppress_enumeration = true;
    }

    /// All master calls recorded so far.
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn selected_channel(&self) -> Option<u8> {
        self.state.lock().unwrap().selected
    }

    /// Serials currently visible to standalone enumeration.
    pub fn standalone_serials(&self) -> Vec<String> {
        self.state.lock().unwrap().standalone.clone()
    }

    pub fn master(&self) -> Arc<dyn SharedMaster> {
        Arc::new(SimMaster { rig: self.clone() })
    }

    pub fn master_connector(&self) -> SimMasterConnector {
        SimMasterConnector {
            rig: self.clone(),
            reachable: true,
        }
    }

    /// Connector modelling a master that cannot be reached.
    pub fn unreachable_master_connector(&self) -> SimMasterConnector {
        SimMasterConnector {
            rig: self.clone(),
            reachable: false,
        }
    }

    pub fn enumerator(&self) -> Arc<dyn DeviceEnumerator> {
        Arc::new(SimEnumerator { rig: self.clone() })
    }

    pub fn slave_connector(&self) -> Arc<dyn SlaveConnector> {
        Arc::new(SimSlaveConnector { rig: self.clone() })
    }
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}

fn endpoints_for(serial: &str) -> EndpointPair {
    EndpointPair {
        command: format!("sim://{serial}/cmd"),
        data: format!("sim://{serial}/data"),
    }
}

pub struct SimMasterConnector {
    rig: SimRig,
    reachable: bool,
}

#[async_trait]
impl MasterConnector for SimMasterConnector {
    async fn connect(self) -> Result<Arc<dyn SharedMaster>, Error> {
        if !self.reachable {
            bail!("term service not reachable");
        }
        Ok(self.rig.master())
    }
}

struct SimMaster {
    rig: SimRig,
}

#[async_trait]
impl SharedMaster for SimMaster {
    async fn select_channel(&self, channel: u8) -> Result<(), Error> {
        let mut state = self.rig.state.lock().unwrap();
        state.calls.push(SimCall::SelectChannel(channel));
        if state.fail_master {
            bail!("master rejected channel selection");
        }
        state.selected = Some(channel);
        Ok(())
    }

    async fn handover_to_standalone(&self) -> Result<(), Error> {
        let mut state = self.rig.state.lock().unwrap();
        state.calls.push(SimCall::Handover);
        if state.fail_master {
            bail!("master rejected handover");
        }
        let channel = state
            .selected
            .ok_or_else(|| anyhow!("no channel selected"))?;
        let serial = state
            .channels
            .get(&channel)
            .cloned()
            .ok_or_else(|| anyhow!("no slave on channel {channel}"))?;
        if !state.suppress_enumeration {
            state.standalone.push(serial);
        }
        Ok(())
    }

    async fn reclaim_from_standalone(&self) -> Result<(), Error> {
        let mut state = self.rig.state.lock().unwrap();
        state.calls.push(SimCall::Reclaim);
        if state.fail_master {
            bail!("master rejected reclaim");
        }
        Ok(())
    }

    async fn read_device_info(&self) -> Result<DeviceIdentity, Error> {
        let mut state = self.rig.state.lock().unwrap();
        state.calls.push(SimCall::ReadDeviceInfo);
        if state.fail_master {
            bail!("master rejected device info request");
        }
        let channel = state
            .selected
            .ok_or_else(|| anyhow!("no channel selected"))?;
        let serial = state
            .channels
            .get(&channel)
            .cloned()
            .ok_or_else(|| anyhow!("no slave on channel {channel}"))?;
        Ok(DeviceIdentity {
            name: "PP242".to_string(),
            serial,
        })
    }

    async fn disconnect(&self) -> Result<(), Error> {
        let mut state = self.rig.state.lock().unwrap();
        state.calls.push(SimCall::Disconnect);
        Ok(())
    }
}

struct SimEnumerator {
    rig: SimRig,
}

#[async_trait]
impl DeviceEnumerator for SimEnumerator {
    async fn search(&self) -> Result<Vec<EndpointPair>, Error> {
        let state = self.rig.state.lock().unwrap();
        Ok(state
            .standalone
            .iter()
            .map(|serial| endpoints_for(serial))
            .collect())
    }

    async fn select(&self, serial: &str) -> Result<Option<EndpointPair>, Error> {
        let state = self.rig.state.lock().unwrap();
        Ok(state
            .standalone
            .iter()
            .find(|s| s.as_str() == serial)
            .map(|s| endpoints_for(s)))
    }
}

struct SimSlaveConnector {
    rig: SimRig,
}

#[async_trait]
impl SlaveConnector for SimSlaveConnector {
    async fn open(&self, endpoints: &EndpointPair) -> Result<Box<dyn SlaveControl>, Error> {
        let serial = endpoints
            .command
            .strip_prefix("sim://")
            .and_then(|rest| rest.strip_suffix("/cmd"))
            .ok_or_else(|| anyhow!("unknown endpoint {}", endpoints.command))?;
        Ok(Box::new(SimSlave {
            rig: self.rig.clone(),
            serial: serial.to_string(),
        }))
    }
}

struct SimSlave {
    rig: SimRig,
    serial: String,
}

#[async_trait]
impl SlaveControl for SimSlave {
    async fn switch_to_bus_control(&mut self) -> Result<(), Error> {
        let mut state = self.rig.state.lock().unwrap();
        if state.fail_slave_shutdown {
            bail!("slave {} rejected the bus control request", self.serial);
        }
        state.standalone.retain(|s| s != &self.serial);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        let state = self.rig.state.lock().unwrap();
        if state.fail_slave_shutdown {
            bail!("closing connection to slave {} failed", self.serial);
        }
        Ok(())
    }
}
