//! Referral registry and commission schedule.
//!
//! Each participant's ancestor chain is computed once, when it registers,
//! and never changes afterwards. Payouts read the frozen chain directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{PlatformError, Result};
use crate::ledger::Amount;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub registered: bool,
    pub referrer: Option<Address>,
    /// Direct referrer first, then the referrer's referrer, and so on.
    pub ancestors: Vec<Address>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralRegistry {
    participants: BTreeMap<Address, Participant>,
}

impl ReferralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, caller: Address, referrer: Option<Address>) -> Result<&Participant> {
        if self.is_registered(&caller) {
            return Err(PlatformError::AlreadyRegistered);
        }

        let ancestors = match referrer {
            None => Vec::new(),
            Some(referrer) if referrer == caller => return Err(PlatformError::IncorrectAddress),
            Some(referrer) => {
                let parent = self
                    .participants
                    .get(&referrer)
                    .filter(|p| p.registered)
                    .ok_or(PlatformError::IncorrectAddress)?;
                let mut chain = Vec::with_capacity(parent.ancestors.len() + 1);
                chain.push(referrer);
                chain.extend_from_slice(&parent.ancestors);
                chain
            }
        };

        tracing::info!(
            participant = %caller,
            referrer = ?referrer,
            depth = ancestors.len(),
            "participant registered"
        );

        let participant = self.participants.entry(caller).or_default();
        *participant = Participant {
            registered: true,
            referrer,
            ancestors,
        };
        Ok(&*participant)
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.participants
            .get(address)
            .map(|p| p.registered)
            .unwrap_or(false)
    }

    pub fn ensure_registered(&self, address: &Address) -> Result<&Participant> {
        self.participants
            .get(address)
            .filter(|p| p.registered)
            .ok_or(PlatformError::OnlyRegistered)
    }

    pub fn ancestors(&self, address: &Address) -> &[Address] {
        self.participants
            .get(address)
            .map(|p| p.ancestors.as_slice())
            .unwrap_or(&[])
    }

    /// Registration snapshot for any address; unknown addresses read as unregistered.
    pub fn get_user(&self, address: &Address) -> Participant {
        self.participants.get(address).cloned().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralPayout {
    pub recipient: Address,
    pub amount: Amount,
    pub level: u32,
}

/// Commission percentages by referral level, level 1 first.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralSchedule {
    pub levels_pct: Vec<u8>,
}

impl ReferralSchedule {
    pub fn new(levels_pct: Vec<u8>) -> Self {
        Self { levels_pct }
    }

    /// `amount * pct / 100` for the given 1-based level, whether or not anyone holds it.
    pub fn level_amount(&self, amount: Amount, level: usize) -> Result<Amount> {
        let pct = match level.checked_sub(1).and_then(|idx| self.levels_pct.get(idx)) {
            Some(pct) => *pct,
            None => return Ok(0),
        };
        amount
            .checked_mul(Amount::from(pct))
            .map(|v| v / 100)
            .ok_or(PlatformError::Overflow)
    }

    pub fn payouts(&self, amount: Amount, chain: &[Address]) -> Result<Vec<ReferralPayout>> {
        let mut payouts = Vec::new();
        for (idx, recipient) in chain.iter().take(self.levels_pct.len()).enumerate() {
            let level = idx + 1;
            let value = self.level_amount(amount, level)?;
            if value == 0 {
                continue;
            }
            payouts.push(ReferralPayout {
                recipient: *recipient,
                amount: value,
                level: level as u32,
            });
        }
        Ok(payouts)
    }
}
