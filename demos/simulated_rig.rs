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

//! Two slaves on a simulated EPC rig, each driven from its own task.
//!
//! Every slave is switched to standalone control, then brought back under
//! bus control, with all master traffic serialized by the arbitration lock.
//! Run with `RUST_LOG=debug` to watch the handover sequence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use epc_arbitration::sim::SimRig;
use epc_arbitration::{ControlMode, HandlerFactory};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let rig = SimRig::new();
    rig.attach_slave(2, "33001");
    rig.attach_slave(3, "33002");

    let factory = Arc::new(
        HandlerFactory::connect(rig.master_connector(), rig.enumerator(), rig.slave_connector())
            .await?
            .with_settle_interval(Duration::from_millis(100)),
    );

    let mut tasks = Vec::new();
    for (channel, serial) in [(2u8, "33001"), (3u8, "33002")] {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            let handler = factory.create_handler(channel, serial).await?;
            let mut handler = handler.lock().await;
            assert_eq!(handler.mode(), ControlMode::Standalone);
            println!("slave {serial} is under standalone control");

            // Standalone measurements would run here, without touching the
            // shared master.

            if !handler
                .acquire_master_timeout(Duration::from_secs(5))
                .await
            {
                anyhow::bail!("shared master stayed busy, slave {serial} is left standalone");
            }
            handler.switch_to_bus().await?;
            handler.master().reclaim_from_standalone().await?;
            println!("slave {serial} is back under bus control on channel {channel}");
            // Bus-mediated measurements would run here, still under the lock.
            handler.release_master();
            anyhow::Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    factory.close_all().await?;
    println!("rig closed");
    Ok(())
}
