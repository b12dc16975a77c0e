use crate::error::{PlatformError, Result};
use crate::ledger::{Amount, LedgerMutation, TokenLedger};
use crate::round::RoundTag;

use super::{Call, Platform};

impl<L: TokenLedger> Platform<L> {
    /// Lists `amount` tokens for `price` in total. The tokens move into
    /// platform custody, pulled with the allowance the owner granted.
    pub fn create_order(&mut self, call: Call, amount: Amount, price: Amount) -> Result<u64> {
        let mut staged = self.ensure_live(&call, RoundTag::Trade)?.clone();
        call.ensure_not_payable()?;
        if amount == 0 || price == 0 {
            return Err(PlatformError::IncorrectAmount);
        }
        if self.ledger.balance_of(&call.sender) < amount {
            return Err(PlatformError::NotEnoughFunds);
        }
        let id = staged.push_order(call.sender, amount, price)?;

        self.ledger.apply_mutations(
            &[LedgerMutation::TransferTokensFrom {
                spender: self.address,
                from: call.sender,
                to: self.address,
                amount,
            }],
            call.timestamp,
        )?;

        tracing::info!(
            round = staged.id,
            order = id,
            owner = %call.sender,
            amount = %amount,
            price = %price,
            "order created"
        );
        self.rounds.commit(staged, None);
        Ok(id)
    }

    /// Buys a whole order for exactly its price. The buyer's referrers get
    /// their commission out of the price and the owner receives the rest.
    pub fn buy_order(&mut self, call: Call, id: u64) -> Result<()> {
        let mut staged = self.ensure_live(&call, RoundTag::Trade)?.clone();
        let order = staged.active_order(id)?.clone();
        if call.value != order.price {
            return Err(PlatformError::IncorrectAmount);
        }

        let payouts = self.referral_payouts(&call.sender, order.price)?;
        let commission = payouts
            .iter()
            .try_fold(0 as Amount, |acc, p| acc.checked_add(p.amount))
            .ok_or(PlatformError::Overflow)?;
        let proceeds = order
            .price
            .checked_sub(commission)
            .ok_or(PlatformError::Overflow)?;
        staged.finish_order(id)?;

        let mut batch = vec![LedgerMutation::TransferNative {
            from: call.sender,
            to: self.address,
            amount: order.price,
            memo: Some(format!("round:{} order:{}", staged.id, id)),
        }];
        if !payouts.is_empty() {
            batch.push(LedgerMutation::ApplyReferralPayouts {
                payer: self.address,
                payouts,
            });
        }
        batch.push(LedgerMutation::TransferNative {
            from: self.address,
            to: order.owner,
            amount: proceeds,
            memo: Some(format!("round:{} order:{} proceeds", staged.id, id)),
        });
        batch.push(LedgerMutation::TransferTokens {
            from: self.address,
            to: call.sender,
            amount: order.amount,
        });
        self.ledger.apply_mutations(&batch, call.timestamp)?;

        tracing::info!(
            round = staged.id,
            order = id,
            buyer = %call.sender,
            seller = %order.owner,
            commission = %commission,
            "order bought"
        );
        self.rounds.commit(staged, None);
        Ok(())
    }

    /// Cancels one of the caller's Active orders and returns the escrow.
    ///
    /// Addresses the most recent Trade round. Orders of a superseded round
    /// were already cancelled when it closed.
    pub fn finish_order(&mut self, call: Call, id: u64) -> Result<()> {
        self.registry.ensure_registered(&call.sender)?;
        call.ensure_not_payable()?;
        let round = self
            .rounds
            .latest_trade()
            .ok_or(PlatformError::OrderNotFound { id })?;
        let order = round.active_order(id)?.clone();
        if order.owner != call.sender {
            return Err(PlatformError::IncorrectAddress);
        }
        if round.id != self.rounds.current().id {
            return Err(PlatformError::OrderNotActive { id });
        }
        let mut staged = round.clone();
        staged.finish_order(id)?;

        self.ledger.apply_mutations(
            &[LedgerMutation::TransferTokens {
                from: self.address,
                to: order.owner,
                amount: order.amount,
            }],
            call.timestamp,
        )?;

        tracing::info!(round = staged.id, order = id, owner = %order.owner, "order cancelled");
        self.rounds.commit(staged, None);
        Ok(())
    }
}
