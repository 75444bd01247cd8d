//! Progress polling thread
//!
//! Runs only while the pool has live voices: it is spawned by the first voice
//! that registers into an empty pool and exits on the first tick that finds
//! the pool empty (or the pool dropped).

use super::PoolShared;
use log::{debug, warn};
use std::sync::Weak;
use std::thread;
use std::time::Duration;

/// Start polling. Returns `false` if the thread could not be spawned.
pub(super) fn spawn(shared: Weak<PoolShared>, interval: Duration) -> bool {
    let result = thread::Builder::new()
        .name("soundstage-progress".to_string())
        .spawn(move || {
            debug!("Effect progress polling started");
            loop {
                thread::sleep(interval);
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if !shared.refresh_progress() {
                    break;
                }
            }
            debug!("Effect progress polling suspended");
        });

    match result {
        Ok(_) => true,
        Err(err) => {
            warn!("Failed to start progress polling: {err}");
            false
        }
    }
}
