use std::time::Duration;

use log::info;
use tokio::{task::JoinHandle, time::sleep};

use super::DehydratorController;

/// Keeps the fan running for `seconds`, then lets the controller decide
/// whether the fan can go off.
pub(super) fn spawn(controller: DehydratorController, epoch: u64, seconds: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Cooldown delay, {seconds} secs");
        sleep(Duration::from_secs(u64::from(seconds))).await;
        controller.finish_cooldown(epoch).await;
    })
}
