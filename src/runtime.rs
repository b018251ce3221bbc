//! Background threads driving a balancer.
//!
//! ```text
//!  "balancer" thread   LoadBalancer::start()   sleep / decide / commit
//!  "flusher" thread    LoadBalancer::flush()   every flush_period
//! ```
//!
//! Both stop on [`BalancerRuntime::shutdown`], which is also run on drop.

use crate::balancer::LoadBalancer;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns the balancer and flusher threads.
pub struct BalancerRuntime {
    balancer: Arc<LoadBalancer>,
    stop: Arc<AtomicBool>,
    balancer_thread: Option<JoinHandle<()>>,
    flusher_thread: Option<JoinHandle<()>>,
}

impl BalancerRuntime {
    /// Spawn the control loop and a flusher that moves counted operations
    /// into shard load every `flush_period`.
    pub fn start(balancer: Arc<LoadBalancer>, flush_period: Duration) -> Result<Self> {
        if balancer.is_stopped() {
            return Err(Error::ShuttingDown);
        }
        if flush_period.is_zero() {
            return Err(Error::Config("flush_period cannot be 0".into()));
        }

        let stop = Arc::new(AtomicBool::new(false));

        let balancer_thread = {
            let balancer = balancer.clone();
            thread::Builder::new()
                .name("balancer".into())
                .spawn(move || balancer.start())
                .map_err(|e| Error::Internal(format!("failed to spawn balancer thread: {}", e)))?
        };

        let flusher_thread = {
            let flusher_balancer = balancer.clone();
            let stop = stop.clone();
            let spawned = thread::Builder::new()
                .name("flusher".into())
                .spawn(move || run_flusher(&flusher_balancer, &stop, flush_period));
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    balancer.shut_down();
                    let _ = balancer_thread.join();
                    return Err(Error::Internal(format!(
                        "failed to spawn flusher thread: {}",
                        e
                    )));
                }
            }
        };

        info!(
            flush_period_ms = flush_period.as_millis() as u64,
            rebalance_period_ms = balancer.config().rebalance_period.as_millis() as u64,
            "Balancer runtime started"
        );

        Ok(Self {
            balancer,
            stop,
            balancer_thread: Some(balancer_thread),
            flusher_thread: Some(flusher_thread),
        })
    }

    /// Start with the flush period from the balancer's configuration.
    pub fn start_with_config(balancer: Arc<LoadBalancer>) -> Result<Self> {
        let flush_period = balancer.config().flush_period;
        Self::start(balancer, flush_period)
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    /// Stop both threads and wait for them. A flush in progress and a round
    /// in progress are allowed to finish.
    pub fn shutdown(&mut self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down balancer runtime");

        self.balancer.shut_down();
        if let Some(handle) = self.flusher_thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Flusher thread panicked");
            }
        }
        if let Some(handle) = self.balancer_thread.take() {
            if handle.join().is_err() {
                warn!("Balancer thread panicked");
            }
        }
    }
}

impl Drop for BalancerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_flusher(balancer: &LoadBalancer, stop: &AtomicBool, period: Duration) {
    debug!("Flusher started");
    loop {
        thread::park_timeout(period);
        if stop.load(Ordering::Acquire) {
            break;
        }
        let _running = balancer.pause_handle().shared();
        balancer.flush();
    }
    // one last flush so counted operations are not lost
    balancer.flush();
    debug!("Flusher stopped");
}
