//! Deployment wiring: a fresh token ledger owned by the deployer, mint
//! authority handed to the platform, then the platform itself.

use crate::address::Address;
use crate::config::PlatformConfig;
use crate::error::Result;
use crate::ledger::LedgerState;
use crate::platform::Platform;

pub fn deploy(
    deployer: Address,
    platform_address: Address,
    config: PlatformConfig,
    now: u64,
) -> Result<Platform> {
    let mut ledger = LedgerState::new(deployer);
    ledger.change_minter(&deployer, platform_address)?;
    tracing::debug!(%deployer, platform = %platform_address, "mint authority transferred");
    Platform::new(config, platform_address, ledger, now)
}
