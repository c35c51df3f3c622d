use tokio::sync::watch;
use tracing::{info, warn};

/// Cooperative interrupt flag. The monitor checks it between iterations
/// and while sleeping; in-flight probes always run to completion.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if the trigger
    /// is dropped without firing.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Exit status for a forced exit, as a shell reports SIGINT.
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Let the running check finish, then stop the loop.
    Finish,
    /// Leave now. Rows already appended are durable.
    Force,
}

/// How to react to the `received`-th ctrl-c, counting from one.
pub fn interrupt_action(received: u32) -> Interrupt {
    if received <= 1 {
        Interrupt::Finish
    } else {
        Interrupt::Force
    }
}

/// Fires `trigger` on the first ctrl-c and exits the process on the second.
pub fn trigger_on_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        let mut received = 0;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for ctrl-c: {}", e);
                return;
            }
            received += 1;
            match interrupt_action(received) {
                Interrupt::Finish => {
                    info!("Shutdown signal received. Finishing current check, press ctrl-c again to force exit...");
                    trigger.trigger();
                }
                Interrupt::Force => {
                    warn!("Second shutdown signal received. Exiting without waiting");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_visible_to_clones() {
        let (trigger, mut shutdown) = channel();
        let observer = shutdown.clone();
        assert!(!observer.is_requested());
        trigger.trigger();
        shutdown.requested().await;
        assert!(observer.is_requested());
    }

    #[test]
    fn second_interrupt_forces_exit() {
        assert_eq!(interrupt_action(1), Interrupt::Finish);
        assert_eq!(interrupt_action(2), Interrupt::Force);
        assert_eq!(interrupt_action(3), Interrupt::Force);
    }
}
