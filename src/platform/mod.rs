//! Platform facade.
//!
//! Composes the referral registry, the round controller and the ledger into
//! one object. Every operation checks round legality and registration first,
//! stages its round changes on a copy, and commits them only after the
//! ledger has accepted the matching batch, so a failed call changes nothing.

mod orders;
mod sale;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::ledger::{Amount, LedgerError, LedgerMutation, LedgerState, TokenLedger};
use crate::referral::{Participant, ReferralPayout, ReferralRegistry};
use crate::round::{Round, RoundController, RoundKind, RoundTag};

/// Caller identity, attached native payment and the clock reading for one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Call {
    pub sender: Address,
    pub value: Amount,
    pub timestamp: u64,
}

impl Call {
    pub fn new(sender: Address, timestamp: u64) -> Self {
        Self {
            sender,
            value: 0,
            timestamp,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }

    fn ensure_not_payable(&self) -> Result<()> {
        if self.value != 0 {
            return Err(PlatformError::IncorrectAmount);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Platform<L = LedgerState> {
    address: Address,
    config: PlatformConfig,
    registry: ReferralRegistry,
    rounds: RoundController,
    ledger: L,
}

impl<L: TokenLedger> Platform<L> {
    /// Takes over a ledger whose mint authority was already handed to
    /// `address`, mints the initial supply into custody and opens Sale round 1.
    pub fn new(config: PlatformConfig, address: Address, mut ledger: L, now: u64) -> Result<Self> {
        config.validate()?;
        if ledger.minter() != address {
            return Err(LedgerError::Unauthorized { caller: address }.into());
        }
        let rounds = RoundController::new(&config, now)?;
        ledger.apply_mutations(
            &[LedgerMutation::Mint {
                authority: address,
                to: address,
                amount: config.supply,
            }],
            now,
        )?;

        tracing::info!(
            platform = %address,
            supply = %config.supply,
            token_price = %config.token_price,
            round_duration = config.round_duration,
            "platform deployed"
        );

        Ok(Self {
            address,
            config,
            registry: ReferralRegistry::new(),
            rounds,
            ledger,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Direct ledger access for calls that bypass the platform, such as a
    /// holder approving the platform to pull tokens.
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn register(&mut self, call: Call, referrer: Option<Address>) -> Result<()> {
        call.ensure_not_payable()?;
        self.registry.register(call.sender, referrer)?;
        Ok(())
    }

    pub fn get_user(&self, address: &Address) -> Participant {
        self.registry.get_user(address)
    }

    pub fn current_round(&self) -> &Round {
        self.rounds.current()
    }

    pub fn get_round(&self, id: u64) -> Option<&Round> {
        self.rounds.get(id)
    }

    /// Closes the expired round and opens the next one.
    ///
    /// Closing a Sale round empties platform custody: the unsold supply and
    /// anything else sent to the platform address is burned. Orders still
    /// Active when a Trade round closes are cancelled and their escrow
    /// returned to the owners; the fresh Sale round gets a newly minted supply.
    pub fn next_round(&mut self, call: Call) -> Result<()> {
        self.registry.ensure_registered(&call.sender)?;
        call.ensure_not_payable()?;
        self.rounds.ensure_expired(call.timestamp)?;

        let mut staged = self.rounds.current().clone();
        let mut batch = Vec::new();
        let next_kind = match staged.tag() {
            RoundTag::Sale => {
                // No escrow exists during a Sale round, so custody is all unsold stock.
                let held = self.ledger.balance_of(&self.address);
                if held > 0 {
                    tracing::info!(
                        round = staged.id,
                        unsold = %staged.remaining_supply().unwrap_or(0),
                        burned = %held,
                        "burning platform custody"
                    );
                    batch.push(LedgerMutation::Burn {
                        authority: self.address,
                        from: self.address,
                        amount: held,
                    });
                }
                RoundKind::fresh_trade()
            }
            RoundTag::Trade => {
                for order in staged.cancel_active_orders() {
                    tracing::info!(round = staged.id, order = order.id, owner = %order.owner, "cancelling open order");
                    batch.push(LedgerMutation::TransferTokens {
                        from: self.address,
                        to: order.owner,
                        amount: order.amount,
                    });
                }
                batch.push(LedgerMutation::Mint {
                    authority: self.address,
                    to: self.address,
                    amount: self.config.supply,
                });
                RoundKind::fresh_sale(&self.config)
            }
        };
        let next = self.rounds.prepare_next(next_kind, call.timestamp)?;

        if !batch.is_empty() {
            self.ledger.apply_mutations(&batch, call.timestamp)?;
        }
        self.rounds.commit(staged, Some(next));
        Ok(())
    }

    /// Commissions owed to the payer's first and second level referrers.
    fn referral_payouts(&self, payer: &Address, amount: Amount) -> Result<Vec<ReferralPayout>> {
        self.config
            .referral_schedule()
            .payouts(amount, self.registry.ancestors(payer))
    }

    fn ensure_live(&self, call: &Call, expected: RoundTag) -> Result<&Round> {
        self.registry.ensure_registered(&call.sender)?;
        self.rounds.assert_live(expected, call.timestamp)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::deploy::deploy;

    pub const OWNER: Address = Address::repeat_byte(0xf0);
    pub const PLATFORM: Address = Address::repeat_byte(0xaa);
    pub const ACC1: Address = Address::repeat_byte(1);
    pub const ACC2: Address = Address::repeat_byte(2);
    pub const ACC3: Address = Address::repeat_byte(3);
    pub const FUNDS: Amount = 10_000_000_000_000_000_000;
    pub const ONE_ETH: Amount = 1_000_000_000_000_000_000;
    pub const T0: u64 = 1_000;

    /// Freshly deployed platform with three funded accounts.
    pub fn fixture() -> Platform {
        let mut platform = deploy(OWNER, PLATFORM, PlatformConfig::default(), T0).unwrap();
        for acc in [ACC1, ACC2, ACC3] {
            platform.ledger_mut().credit_native(&acc, FUNDS).unwrap();
        }
        platform
    }

    pub fn after_deadline(platform: &Platform) -> u64 {
        platform.current_round().deadline + 1
    }

    #[test]
    fn deploy_mints_supply_into_custody() {
        let platform = fixture();
        assert_eq!(platform.ledger().balance_of(&PLATFORM), platform.config().supply);
        assert_eq!(platform.ledger().minter(), PLATFORM);
        assert_eq!(platform.current_round().id, 1);
        assert_eq!(platform.current_round().tag(), RoundTag::Sale);
    }

    #[test]
    fn new_requires_mint_authority() {
        let ledger = LedgerState::new(OWNER);
        let err = Platform::new(PlatformConfig::default(), PLATFORM, ledger, T0).unwrap_err();
        assert_eq!(err, PlatformError::Ledger(LedgerError::Unauthorized { caller: PLATFORM }));
    }

    #[test]
    fn register_rejects_attached_payment() {
        let mut platform = fixture();
        let err = platform
            .register(Call::new(ACC1, T0).with_value(1), None)
            .unwrap_err();
        assert_eq!(err, PlatformError::IncorrectAmount);
        assert!(!platform.get_user(&ACC1).registered);
    }

    #[test]
    fn next_round_requires_registration_and_expiry() {
        let mut platform = fixture();
        let late = after_deadline(&platform);
        assert_eq!(
            platform.next_round(Call::new(ACC1, late)),
            Err(PlatformError::OnlyRegistered)
        );

        platform.register(Call::new(ACC1, T0), None).unwrap();
        let deadline = platform.current_round().deadline;
        assert_eq!(
            platform.next_round(Call::new(ACC1, deadline)),
            Err(PlatformError::RoundNotProgress)
        );
        platform.next_round(Call::new(ACC1, late)).unwrap();
        assert_eq!(platform.current_round().id, 2);
        assert_eq!(platform.current_round().tag(), RoundTag::Trade);
        assert_eq!(platform.current_round().start_time, late);
    }

    #[test]
    fn expired_sale_round_burns_unsold_supply() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        let supply_before = platform.ledger().total_supply();

        let late = after_deadline(&platform);
        platform.next_round(Call::new(ACC1, late)).unwrap();

        assert_eq!(platform.ledger().balance_of(&PLATFORM), 0);
        assert_eq!(
            platform.ledger().total_supply(),
            supply_before - platform.config().supply
        );
        assert_eq!(platform.get_round(1).unwrap().remaining_supply(), Some(platform.config().supply));
    }

    #[test]
    fn sale_close_burns_tokens_sent_to_platform() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        platform
            .buy_tokens(Call::new(ACC1, T0).with_value(ONE_ETH / 10))
            .unwrap();
        platform.ledger_mut().transfer(ACC1, PLATFORM, 5, T0).unwrap();
        let sold = platform.ledger().balance_of(&ACC1);

        let late = after_deadline(&platform);
        platform.next_round(Call::new(ACC1, late)).unwrap();

        assert_eq!(platform.ledger().balance_of(&PLATFORM), 0);
        assert_eq!(platform.ledger().total_supply(), sold);
    }

    #[test]
    fn payable_checks_come_after_registration() {
        let mut platform = fixture();
        let late = after_deadline(&platform);
        assert_eq!(
            platform.next_round(Call::new(ACC1, late).with_value(1)),
            Err(PlatformError::OnlyRegistered)
        );

        platform.register(Call::new(ACC1, T0), None).unwrap();
        assert_eq!(
            platform.next_round(Call::new(ACC1, late).with_value(1)),
            Err(PlatformError::IncorrectAmount)
        );
        assert_eq!(platform.current_round().id, 1);
    }

    #[test]
    fn trade_to_sale_mints_fresh_supply() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        let t1 = after_deadline(&platform);
        platform.next_round(Call::new(ACC1, t1)).unwrap();
        let t2 = after_deadline(&platform);
        platform.next_round(Call::new(ACC1, t2)).unwrap();

        let round = platform.current_round();
        assert_eq!(round.id, 3);
        assert_eq!(round.tag(), RoundTag::Sale);
        assert_eq!(round.token_price(), Some(platform.config().token_price));
        assert_eq!(round.remaining_supply(), Some(platform.config().supply));
        assert_eq!(platform.ledger().balance_of(&PLATFORM), platform.config().supply);
    }
}
