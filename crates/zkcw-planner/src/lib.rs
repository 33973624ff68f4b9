//! Fee planning and fee payer selection.
//!
//! - Split path (prove/sign/send): the caller names the fee; explicit amounts
//!   are checked against the schedule bounds
//! - Merged path (proveAndSend): the worker picks the fee through a pluggable
//!   `FeeStrategy`, whose output is always clamped to the schedule
//! - Fee payers: the worker pays from the first available account in its pool

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use zkcw_types::FeePolicy;

/// Fee bounds in nanomina.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub min_fee: u64,
    pub default_fee: u64,
    pub max_fee: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            min_fee: 1_000_000,
            default_fee: 100_000_000,
            max_fee: 10_000_000_000,
        }
    }
}

impl FeeSchedule {
    /// Reject schedules whose bounds are out of order.
    pub fn check(&self) -> Result<(), String> {
        if self.min_fee > self.default_fee || self.default_fee > self.max_fee {
            return Err(format!(
                "fee schedule must satisfy min <= default <= max (got {} / {} / {})",
                self.min_fee, self.default_fee, self.max_fee
            ));
        }
        Ok(())
    }

    /// Validate a caller-supplied policy. Named policies are always valid.
    pub fn validate(&self, policy: FeePolicy) -> Result<(), String> {
        match policy {
            FeePolicy::Fixed(fee) if fee < self.min_fee || fee > self.max_fee => Err(format!(
                "fee {} is outside the allowed range [{}, {}]",
                fee, self.min_fee, self.max_fee
            )),
            _ => Ok(()),
        }
    }

    pub fn clamp(&self, fee: u64) -> u64 {
        fee.clamp(self.min_fee, self.max_fee)
    }

    /// Map a policy to a concrete fee. `estimate` feeds `AUTO_FEE`.
    pub fn resolve(&self, policy: FeePolicy, estimate: Option<u64>) -> u64 {
        match policy {
            FeePolicy::Min => self.min_fee,
            FeePolicy::Max => self.max_fee,
            FeePolicy::Auto => self.clamp(estimate.unwrap_or(self.default_fee)),
            FeePolicy::Fixed(fee) => self.clamp(fee),
        }
    }
}

/// Worker-side fee choice for proveAndSend.
pub trait FeeStrategy: Send + Sync {
    fn choose_fee(&self, schedule: &FeeSchedule, estimate: Option<u64>) -> u64;
}

/// Use the network estimate when there is one, otherwise the default fee.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateFeeStrategy;

impl FeeStrategy for EstimateFeeStrategy {
    fn choose_fee(&self, schedule: &FeeSchedule, estimate: Option<u64>) -> u64 {
        estimate.unwrap_or(schedule.default_fee)
    }
}

/// Apply `strategy` and clamp its answer to the schedule bounds.
pub fn plan_fee(strategy: &dyn FeeStrategy, schedule: &FeeSchedule, estimate: Option<u64>) -> u64 {
    schedule.clamp(strategy.choose_fee(schedule, estimate))
}

#[derive(Debug)]
struct PayerSlot {
    address: String,
    busy: bool,
}

/// Pool of worker-funded fee payer accounts.
#[derive(Debug, Clone)]
pub struct FeePayerPool {
    slots: Arc<Mutex<Vec<PayerSlot>>>,
}

impl FeePayerPool {
    /// Repeated addresses are kept once: an account pays for one transaction at a time.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots: Vec<PayerSlot> = Vec::new();
        for address in addresses {
            let address = address.into();
            if !slots.iter().any(|s| s.address == address) {
                slots.push(PayerSlot { address, busy: false });
            }
        }
        Self { slots: Arc::new(Mutex::new(slots)) }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<PayerSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the first free payer. It is returned to the pool when the guard drops.
    pub fn acquire(&self) -> Option<FeePayerGuard> {
        let mut slots = self.slots();
        let slot = slots.iter_mut().find(|s| !s.busy)?;
        slot.busy = true;
        Some(FeePayerGuard {
            address: slot.address.clone(),
            pool: self.clone(),
        })
    }

    pub fn contains(&self, address: &str) -> bool {
        self.slots().iter().any(|s| s.address == address)
    }

    pub fn available(&self) -> usize {
        self.slots().iter().filter(|s| !s.busy).count()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, address: &str) {
        if let Some(slot) = self.slots().iter_mut().find(|s| s.address == address) {
            slot.busy = false;
        }
    }
}

/// Exclusive use of one fee payer account.
#[derive(Debug)]
pub struct FeePayerGuard {
    address: String,
    pool: FeePayerPool,
}

impl FeePayerGuard {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for FeePayerGuard {
    fn drop(&mut self) {
        self.pool.release(&self.address);
    }
}
