use crate::error::{PlatformError, Result};
use crate::ledger::{Amount, LedgerMutation, TokenLedger};
use crate::round::{RoundKind, RoundTag};

use super::{Call, Platform};

impl<L: TokenLedger> Platform<L> {
    /// Sells platform-held tokens for the attached payment at the round price.
    ///
    /// Integer division decides the token amount; the change stays with the
    /// platform together with any commission nobody is entitled to. Selling
    /// the last token closes the Sale round and opens the Trade round at once.
    pub fn buy_tokens(&mut self, call: Call) -> Result<Amount> {
        let mut staged = self.ensure_live(&call, RoundTag::Sale)?.clone();
        if call.value < self.config.min_purchase_amount {
            return Err(PlatformError::IncorrectAmount);
        }
        let price = staged.token_price().ok_or(PlatformError::RoundNotSale)?;
        let tokens = call.value / price;
        if tokens == 0 {
            return Err(PlatformError::IncorrectAmount);
        }
        let remaining = staged.take_supply(tokens)?;
        let next = if remaining == 0 {
            Some(self.rounds.prepare_next(RoundKind::fresh_trade(), call.timestamp)?)
        } else {
            None
        };

        let payouts = self.referral_payouts(&call.sender, call.value)?;
        for payout in &payouts {
            tracing::debug!(level = payout.level, recipient = %payout.recipient, amount = %payout.amount, "sale commission");
        }

        let mut batch = vec![
            LedgerMutation::TransferNative {
                from: call.sender,
                to: self.address,
                amount: call.value,
                memo: Some(format!("round:{} purchase", staged.id)),
            },
            LedgerMutation::TransferTokens {
                from: self.address,
                to: call.sender,
                amount: tokens,
            },
        ];
        if !payouts.is_empty() {
            batch.push(LedgerMutation::ApplyReferralPayouts {
                payer: self.address,
                payouts,
            });
        }
        self.ledger.apply_mutations(&batch, call.timestamp)?;

        tracing::info!(
            round = staged.id,
            buyer = %call.sender,
            paid = %call.value,
            tokens = %tokens,
            remaining = %remaining,
            "tokens sold"
        );
        if next.is_some() {
            tracing::info!(round = staged.id, "sale supply exhausted");
        }
        self.rounds.commit(staged, next);
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;

    fn referral_chain(platform: &mut Platform) {
        platform.register(Call::new(ACC1, T0), None).unwrap();
        platform.register(Call::new(ACC2, T0), Some(ACC1)).unwrap();
        platform.register(Call::new(ACC3, T0), Some(ACC2)).unwrap();
    }

    #[test]
    fn purchase_pays_both_referral_levels() {
        let mut platform = fixture();
        referral_chain(&mut platform);
        let price = platform.current_round().token_price().unwrap();

        let tokens = platform
            .buy_tokens(Call::new(ACC3, T0).with_value(ONE_ETH))
            .unwrap();

        let ledger = platform.ledger();
        assert_eq!(tokens, ONE_ETH / price);
        assert_eq!(ledger.balance_of(&ACC3), tokens);
        assert_eq!(ledger.native_balance_of(&ACC3), FUNDS - ONE_ETH);
        assert_eq!(ledger.native_balance_of(&ACC2), FUNDS + ONE_ETH * 5 / 100);
        assert_eq!(ledger.native_balance_of(&ACC1), FUNDS + ONE_ETH * 3 / 100);
        assert_eq!(ledger.native_balance_of(&PLATFORM), ONE_ETH * 92 / 100);
    }

    #[test]
    fn missing_referrers_leave_commission_with_platform() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        platform.register(Call::new(ACC2, T0), Some(ACC1)).unwrap();
        let value = ONE_ETH / 10;

        platform
            .buy_tokens(Call::new(ACC2, T0).with_value(value))
            .unwrap();

        let ledger = platform.ledger();
        assert_eq!(ledger.native_balance_of(&ACC1), FUNDS + value * 5 / 100);
        assert_eq!(ledger.native_balance_of(&PLATFORM), value - value * 5 / 100);
    }

    #[test]
    fn change_below_price_is_kept() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        let price = platform.config().token_price;
        let value = price * 3 + 7;

        let tokens = platform
            .buy_tokens(Call::new(ACC1, T0).with_value(value))
            .unwrap();

        assert_eq!(tokens, 3);
        assert_eq!(platform.ledger().native_balance_of(&PLATFORM), value);
        assert_eq!(
            platform.current_round().remaining_supply(),
            Some(platform.config().supply - 3)
        );
    }

    #[test]
    fn demand_above_supply_fails_without_effects() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        platform
            .buy_tokens(Call::new(ACC1, T0).with_value(ONE_ETH / 10))
            .unwrap();
        let root = platform.ledger().state_root();

        let err = platform
            .buy_tokens(Call::new(ACC1, T0).with_value(ONE_ETH))
            .unwrap_err();

        assert_eq!(err, PlatformError::NoSupply);
        assert_eq!(platform.ledger().state_root(), root);
        assert_eq!(platform.current_round().id, 1);
    }

    #[test]
    fn payment_below_minimum_is_rejected() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        let err = platform
            .buy_tokens(Call::new(ACC1, T0).with_value(1_000_000_000_000))
            .unwrap_err();
        assert_eq!(err, PlatformError::IncorrectAmount);
    }

    #[test]
    fn unregistered_buyer_is_rejected() {
        let mut platform = fixture();
        let err = platform
            .buy_tokens(Call::new(ACC1, T0).with_value(ONE_ETH))
            .unwrap_err();
        assert_eq!(err, PlatformError::OnlyRegistered);
    }

    #[test]
    fn expired_round_rejects_purchase() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        let late = after_deadline(&platform);
        let err = platform
            .buy_tokens(Call::new(ACC1, late).with_value(ONE_ETH))
            .unwrap_err();
        assert_eq!(err, PlatformError::RoundNotProgress);
    }

    #[test]
    fn selling_out_opens_trade_round() {
        let mut platform = fixture();
        platform.register(Call::new(ACC1, T0), None).unwrap();
        platform
            .buy_tokens(Call::new(ACC1, T0 + 5).with_value(ONE_ETH))
            .unwrap();

        let round = platform.current_round();
        assert_eq!(round.id, 2);
        assert_eq!(round.tag(), RoundTag::Trade);
        assert_eq!(round.start_time, T0 + 5);
        assert_eq!(platform.get_round(1).unwrap().remaining_supply(), Some(0));
        assert_eq!(platform.ledger().balance_of(&PLATFORM), 0);

        let err = platform
            .buy_tokens(Call::new(ACC1, T0 + 6).with_value(ONE_ETH))
            .unwrap_err();
        assert_eq!(err, PlatformError::RoundNotSale);
    }

    #[test]
    fn insufficient_native_balance_rolls_back() {
        let mut platform = fixture();
        let poor = crate::address::Address::repeat_byte(9);
        platform.register(Call::new(poor, T0), None).unwrap();
        platform.ledger_mut().credit_native(&poor, ONE_ETH / 100).unwrap();

        let err = platform
            .buy_tokens(Call::new(poor, T0).with_value(ONE_ETH))
            .unwrap_err();

        assert!(matches!(err, PlatformError::Ledger(_)));
        assert_eq!(platform.ledger().balance_of(&poor), 0);
        assert_eq!(
            platform.current_round().remaining_supply(),
            Some(platform.config().supply)
        );
    }
}
