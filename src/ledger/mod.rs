//! Fungible token and native currency balances.
//!
//! The platform is one holder among many. Every state change goes through
//! [`TokenLedger::apply_mutations`], which applies a whole batch or nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::referral::ReferralPayout;

pub type Amount = u128;
pub type ReceiptId = [u8; 32];

/// Most recent events kept in [`LedgerState::events`]; older ones are dropped.
pub const EVENT_LOG_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient token balance in account {account}")]
    InsufficientTokens { account: Address },
    #[error("insufficient native balance in account {account}")]
    InsufficientNative { account: Address },
    #[error("allowance granted by {owner} to {spender} is too low")]
    InsufficientAllowance { owner: Address, spender: Address },
    #[error("{caller} is not allowed to mint or burn")]
    Unauthorized { caller: Address },
    #[error("balance overflow")]
    Overflow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub tokens: Amount,
    pub native: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: u64,
    pub previous_receipt: Option<ReceiptId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub minter: Address,
    pub total_supply: Amount,
    pub accounts: BTreeMap<Address, AccountBalance>,
    pub allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    pub events: Vec<LedgerEvent>,
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        to: Address,
        amount: Amount,
    },
    Burned {
        from: Address,
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    TokenTransfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    NativeTransfer {
        from: Address,
        to: Address,
        amount: Amount,
        memo: Option<String>,
    },
    ReferralPayout {
        payer: Address,
        recipient: Address,
        amount: Amount,
        level: u32,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMutation {
    Mint {
        authority: Address,
        to: Address,
        amount: Amount,
    },
    Burn {
        authority: Address,
        from: Address,
        amount: Amount,
    },
    Approve {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    TransferTokens {
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// Moves `amount` tokens out of `from` on behalf of `spender`, consuming allowance.
    TransferTokensFrom {
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    },
    TransferNative {
        from: Address,
        to: Address,
        amount: Amount,
        memo: Option<String>,
    },
    ApplyReferralPayouts {
        payer: Address,
        payouts: Vec<ReferralPayout>,
    },
}

/// Collaborator interface the platform needs from a token ledger.
pub trait TokenLedger {
    fn minter(&self) -> Address;
    fn total_supply(&self) -> Amount;
    fn balance_of(&self, account: &Address) -> Amount;
    fn native_balance_of(&self, account: &Address) -> Amount;
    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    /// Applies every mutation or none of them.
    fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        timestamp: u64,
    ) -> Result<ReceiptId, LedgerError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
struct Balances {
    total_supply: Amount,
    accounts: BTreeMap<Address, AccountBalance>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl Balances {
    fn account(&self, account: &Address) -> AccountBalance {
        self.accounts.get(account).cloned().unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|s| s.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn credit_tokens(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.accounts.entry(*account).or_default();
        balance.tokens = balance
            .tokens
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    fn debit_tokens(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let insufficient = || LedgerError::InsufficientTokens { account: *account };
        let balance = self.accounts.get_mut(account).ok_or_else(insufficient)?;
        balance.tokens = balance.tokens.checked_sub(amount).ok_or_else(insufficient)?;
        Ok(())
    }

    fn credit_native(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.accounts.entry(*account).or_default();
        balance.native = balance
            .native
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    fn debit_native(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let insufficient = || LedgerError::InsufficientNative { account: *account };
        let balance = self.accounts.get_mut(account).ok_or_else(insufficient)?;
        balance.native = balance.native.checked_sub(amount).ok_or_else(insufficient)?;
        Ok(())
    }

    fn spend_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let insufficient = || LedgerError::InsufficientAllowance {
            owner: *owner,
            spender: *spender,
        };
        let granted = self
            .allowances
            .get_mut(owner)
            .and_then(|s| s.get_mut(spender))
            .ok_or_else(insufficient)?;
        *granted = granted.checked_sub(amount).ok_or_else(insufficient)?;
        Ok(())
    }

    fn apply(
        &mut self,
        mutation: &LedgerMutation,
        minter: &Address,
        events: &mut Vec<LedgerEvent>,
    ) -> Result<(), LedgerError> {
        match mutation {
            LedgerMutation::Mint {
                authority,
                to,
                amount,
            } => {
                if authority != minter {
                    return Err(LedgerError::Unauthorized { caller: *authority });
                }
                self.total_supply = self
                    .total_supply
                    .checked_add(*amount)
                    .ok_or(LedgerError::Overflow)?;
                self.credit_tokens(to, *amount)?;
                events.push(LedgerEvent::Minted {
                    to: *to,
                    amount: *amount,
                });
            }
            LedgerMutation::Burn {
                authority,
                from,
                amount,
            } => {
                if authority != minter {
                    return Err(LedgerError::Unauthorized { caller: *authority });
                }
                self.debit_tokens(from, *amount)?;
                self.total_supply = self
                    .total_supply
                    .checked_sub(*amount)
                    .ok_or(LedgerError::Overflow)?;
                events.push(LedgerEvent::Burned {
                    from: *from,
                    amount: *amount,
                });
            }
            LedgerMutation::Approve {
                owner,
                spender,
                amount,
            } => {
                self.allowances
                    .entry(*owner)
                    .or_default()
                    .insert(*spender, *amount);
                events.push(LedgerEvent::Approval {
                    owner: *owner,
                    spender: *spender,
                    amount: *amount,
                });
            }
            LedgerMutation::TransferTokens { from, to, amount } => {
                self.debit_tokens(from, *amount)?;
                self.credit_tokens(to, *amount)?;
                events.push(LedgerEvent::TokenTransfer {
                    from: *from,
                    to: *to,
                    amount: *amount,
                });
            }
            LedgerMutation::TransferTokensFrom {
                spender,
                from,
                to,
                amount,
            } => {
                self.spend_allowance(from, spender, *amount)?;
                self.debit_tokens(from, *amount)?;
                self.credit_tokens(to, *amount)?;
                events.push(LedgerEvent::TokenTransfer {
                    from: *from,
                    to: *to,
                    amount: *amount,
                });
            }
            LedgerMutation::TransferNative {
                from,
                to,
                amount,
                memo,
            } => {
                self.debit_native(from, *amount)?;
                self.credit_native(to, *amount)?;
                events.push(LedgerEvent::NativeTransfer {
                    from: *from,
                    to: *to,
                    amount: *amount,
                    memo: memo.clone(),
                });
            }
            LedgerMutation::ApplyReferralPayouts { payer, payouts } => {
                for payout in payouts {
                    self.debit_native(payer, payout.amount)?;
                    self.credit_native(&payout.recipient, payout.amount)?;
                    events.push(LedgerEvent::ReferralPayout {
                        payer: *payer,
                        recipient: payout.recipient,
                        amount: payout.amount,
                        level: payout.level,
                    });
                }
            }
        }
        Ok(())
    }
}

/// In-process ledger holding token and native balances side by side.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub meta: SnapshotMetadata,
    minter: Address,
    balances: Balances,
    pub events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new(minter: Address) -> Self {
        Self {
            minter,
            ..Self::default()
        }
    }

    /// Faucet used by deployment tooling and tests; bypasses the batch path.
    pub fn credit_native(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.balances.credit_native(account, amount)
    }

    /// Hands mint/burn authority to `new_minter`. Only the current minter may do this.
    pub fn change_minter(&mut self, caller: &Address, new_minter: Address) -> Result<(), LedgerError> {
        if *caller != self.minter {
            return Err(LedgerError::Unauthorized { caller: *caller });
        }
        self.minter = new_minter;
        Ok(())
    }

    pub fn approve(
        &mut self,
        owner: Address,
        spender: Address,
        amount: Amount,
        timestamp: u64,
    ) -> Result<ReceiptId, LedgerError> {
        self.apply_mutations(
            &[LedgerMutation::Approve {
                owner,
                spender,
                amount,
            }],
            timestamp,
        )
    }

    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
        timestamp: u64,
    ) -> Result<ReceiptId, LedgerError> {
        self.apply_mutations(
            &[LedgerMutation::TransferTokens { from, to, amount }],
            timestamp,
        )
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_merkle_root(&self.balances)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            minter: self.minter,
            total_supply: self.balances.total_supply,
            accounts: self.balances.accounts.clone(),
            allowances: self.balances.allowances.clone(),
            events: self.events.clone(),
            merkle_root: self.state_root(),
        }
    }
}

impl TokenLedger for LedgerState {
    fn minter(&self) -> Address {
        self.minter
    }

    fn total_supply(&self) -> Amount {
        self.balances.total_supply
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.account(account).tokens
    }

    fn native_balance_of(&self, account: &Address) -> Amount {
        self.balances.account(account).native
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.balances.allowance(owner, spender)
    }

    fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        timestamp: u64,
    ) -> Result<ReceiptId, LedgerError> {
        let mut staged = self.balances.clone();
        let mut events = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            staged.apply(mutation, &self.minter, &mut events)?;
        }

        let height = self.meta.height + 1;
        let receipt_id = receipt_digest(
            height,
            timestamp,
            self.meta.previous_receipt.as_ref(),
            &compute_merkle_root(&staged),
        );

        tracing::debug!(
            height,
            mutations = mutations.len(),
            receipt = %hex::encode(receipt_id),
            "ledger batch committed"
        );

        self.balances = staged;
        self.events.extend(events);
        if self.events.len() > EVENT_LOG_CAPACITY {
            let excess = self.events.len() - EVENT_LOG_CAPACITY;
            self.events.drain(..excess);
        }
        self.meta.height = height;
        self.meta.timestamp = timestamp;
        self.meta.previous_receipt = Some(receipt_id);
        Ok(receipt_id)
    }
}

fn receipt_digest(
    height: u64,
    timestamp: u64,
    previous: Option<&ReceiptId>,
    state_root: &[u8; 32],
) -> ReceiptId {
    let mut hasher = Sha256::new();
    hasher.update(b"receipt");
    hasher.update(height.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    if let Some(prev) = previous {
        hasher.update(prev);
    }
    hasher.update(state_root);
    hasher.finalize().into()
}

fn compute_merkle_root(balances: &Balances) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, balance) in &balances.accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.tokens.to_le_bytes());
        hasher.update(balance.native.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, spenders) in &balances.allowances {
        for (spender, amount) in spenders {
            let mut hasher = Sha256::new();
            hasher.update(b"allowance");
            hasher.update(owner.as_bytes());
            hasher.update(spender.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(b"supply");
    hasher.update(balances.total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
