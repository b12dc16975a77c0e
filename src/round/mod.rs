//! Round controller.
//!
//! Rounds alternate Sale, Trade, Sale, ... starting with Sale at id 1. The
//! controller keeps the live round separately from the superseded ones,
//! which are never modified again.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::ledger::Amount;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundTag {
    Sale,
    Trade,
}

impl RoundTag {
    pub fn opposite(self) -> Self {
        match self {
            RoundTag::Sale => RoundTag::Trade,
            RoundTag::Trade => RoundTag::Sale,
        }
    }

    fn mismatch(self) -> PlatformError {
        match self {
            RoundTag::Sale => PlatformError::RoundNotSale,
            RoundTag::Trade => PlatformError::RoundNotTrade,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Finished,
}

impl OrderStatus {
    /// Numeric status used by external views.
    pub fn code(self) -> u8 {
        match self {
            OrderStatus::Active => 1,
            OrderStatus::Finished => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub owner: Address,
    pub amount: Amount,
    /// Native price of the whole lot.
    pub price: Amount,
    pub status: OrderStatus,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Sale {
        token_price: Amount,
        remaining_supply: Amount,
    },
    Trade {
        orders: Vec<Order>,
    },
}

impl RoundKind {
    pub fn fresh_sale(config: &PlatformConfig) -> Self {
        RoundKind::Sale {
            token_price: config.token_price,
            remaining_supply: config.supply,
        }
    }

    pub fn fresh_trade() -> Self {
        RoundKind::Trade { orders: Vec::new() }
    }

    pub fn tag(&self) -> RoundTag {
        match self {
            RoundKind::Sale { .. } => RoundTag::Sale,
            RoundKind::Trade { .. } => RoundTag::Trade,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    pub start_time: u64,
    pub deadline: u64,
    pub kind: RoundKind,
}

impl Round {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline
    }

    pub fn tag(&self) -> RoundTag {
        self.kind.tag()
    }

    pub fn token_price(&self) -> Option<Amount> {
        match &self.kind {
            RoundKind::Sale { token_price, .. } => Some(*token_price),
            RoundKind::Trade { .. } => None,
        }
    }

    pub fn remaining_supply(&self) -> Option<Amount> {
        match &self.kind {
            RoundKind::Sale {
                remaining_supply, ..
            } => Some(*remaining_supply),
            RoundKind::Trade { .. } => None,
        }
    }

    /// Orders of a Trade round; empty for Sale rounds.
    pub fn orders(&self) -> &[Order] {
        match &self.kind {
            RoundKind::Trade { orders } => orders,
            RoundKind::Sale { .. } => &[],
        }
    }

    pub fn order(&self, id: u64) -> Result<&Order> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.orders().get(idx))
            .ok_or(PlatformError::OrderNotFound { id })
    }

    /// Like [`Round::order`], but also requires the order to be Active.
    pub fn active_order(&self, id: u64) -> Result<&Order> {
        let order = self.order(id)?;
        if !order.is_active() {
            return Err(PlatformError::OrderNotActive { id });
        }
        Ok(order)
    }

    pub(crate) fn finish_order(&mut self, id: u64) -> Result<()> {
        let order = match &mut self.kind {
            RoundKind::Trade { orders } => usize::try_from(id)
                .ok()
                .and_then(|idx| orders.get_mut(idx))
                .ok_or(PlatformError::OrderNotFound { id })?,
            RoundKind::Sale { .. } => return Err(PlatformError::OrderNotFound { id }),
        };
        order.status = OrderStatus::Finished;
        Ok(())
    }

    /// Finishes every still-Active order and returns them as they were.
    pub(crate) fn cancel_active_orders(&mut self) -> Vec<Order> {
        let mut cancelled = Vec::new();
        if let RoundKind::Trade { orders } = &mut self.kind {
            for order in orders.iter_mut().filter(|o| o.is_active()) {
                cancelled.push(order.clone());
                order.status = OrderStatus::Finished;
            }
        }
        cancelled
    }

    /// Appends an Active order and returns its id.
    pub(crate) fn push_order(&mut self, owner: Address, amount: Amount, price: Amount) -> Result<u64> {
        match &mut self.kind {
            RoundKind::Trade { orders } => {
                let id = orders.len() as u64;
                orders.push(Order {
                    id,
                    owner,
                    amount,
                    price,
                    status: OrderStatus::Active,
                });
                Ok(id)
            }
            RoundKind::Sale { .. } => Err(PlatformError::RoundNotTrade),
        }
    }

    pub(crate) fn take_supply(&mut self, amount: Amount) -> Result<Amount> {
        match &mut self.kind {
            RoundKind::Sale {
                remaining_supply, ..
            } => {
                *remaining_supply = remaining_supply
                    .checked_sub(amount)
                    .ok_or(PlatformError::NoSupply)?;
                Ok(*remaining_supply)
            }
            RoundKind::Trade { .. } => Err(PlatformError::RoundNotSale),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundController {
    round_duration: u64,
    current: Round,
    history: Vec<Round>,
}

impl RoundController {
    /// Opens Sale round 1 at `now`.
    pub fn new(config: &PlatformConfig, now: u64) -> Result<Self> {
        let current = Round {
            id: 1,
            start_time: now,
            deadline: now
                .checked_add(config.round_duration)
                .ok_or(PlatformError::Overflow)?,
            kind: RoundKind::fresh_sale(config),
        };
        Ok(Self {
            round_duration: config.round_duration,
            current,
            history: Vec::new(),
        })
    }

    pub fn current(&self) -> &Round {
        &self.current
    }

    pub fn get(&self, id: u64) -> Option<&Round> {
        if id == self.current.id {
            return Some(&self.current);
        }
        let idx = usize::try_from(id.checked_sub(1)?).ok()?;
        self.history.get(idx)
    }

    pub fn history(&self) -> &[Round] {
        &self.history
    }

    /// The live round, provided it has the expected kind and its window is still open.
    pub fn assert_live(&self, expected: RoundTag, now: u64) -> Result<&Round> {
        if self.current.is_expired(now) {
            return Err(PlatformError::RoundNotProgress);
        }
        if self.current.tag() != expected {
            return Err(expected.mismatch());
        }
        Ok(&self.current)
    }

    /// Advancing is allowed only once the current round's deadline has passed.
    pub fn ensure_expired(&self, now: u64) -> Result<()> {
        if !self.current.is_expired(now) {
            return Err(PlatformError::RoundNotProgress);
        }
        Ok(())
    }

    /// Most recent Trade round, live or superseded.
    pub fn latest_trade(&self) -> Option<&Round> {
        if self.current.tag() == RoundTag::Trade {
            return Some(&self.current);
        }
        self.history.iter().rev().find(|r| r.tag() == RoundTag::Trade)
    }

    /// Builds the round that would follow the current one, without installing it.
    pub fn prepare_next(&self, kind: RoundKind, now: u64) -> Result<Round> {
        debug_assert_eq!(kind.tag(), self.current.tag().opposite());
        Ok(Round {
            id: self.current.id.checked_add(1).ok_or(PlatformError::Overflow)?,
            start_time: now,
            deadline: now
                .checked_add(self.round_duration)
                .ok_or(PlatformError::Overflow)?,
            kind,
        })
    }

    /// Installs a staged copy of the current round and, if given, supersedes
    /// it with `next`. Infallible so it can run after the ledger commits.
    pub(crate) fn commit(&mut self, staged: Round, next: Option<Round>) {
        debug_assert_eq!(staged.id, self.current.id);
        self.current = staged;
        if let Some(next) = next {
            let previous = std::mem::replace(&mut self.current, next);
            tracing::info!(
                closed = previous.id,
                opened = self.current.id,
                kind = ?self.current.tag(),
                deadline = self.current.deadline,
                "round advanced"
            );
            self.history.push(previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlatformConfig {
        PlatformConfig {
            round_duration: 100,
            supply: 1_000,
            ..PlatformConfig::default()
        }
    }

    #[test]
    fn starts_with_sale_round_one() {
        let rounds = RoundController::new(&config(), 10).unwrap();
        let round = rounds.current();
        assert_eq!(round.id, 1);
        assert_eq!(round.start_time, 10);
        assert_eq!(round.deadline, 110);
        assert_eq!(round.remaining_supply(), Some(1_000));
        assert!(rounds.history().is_empty());
    }

    #[test]
    fn assert_live_checks_window_then_kind() {
        let rounds = RoundController::new(&config(), 0).unwrap();
        assert!(rounds.assert_live(RoundTag::Sale, 100).is_ok());
        assert_eq!(
            rounds.assert_live(RoundTag::Trade, 50).unwrap_err(),
            PlatformError::RoundNotTrade
        );
        assert_eq!(
            rounds.assert_live(RoundTag::Sale, 101).unwrap_err(),
            PlatformError::RoundNotProgress
        );
        assert_eq!(
            rounds.assert_live(RoundTag::Trade, 101).unwrap_err(),
            PlatformError::RoundNotProgress
        );
    }

    #[test]
    fn advance_alternates_and_keeps_history() {
        let cfg = config();
        let mut rounds = RoundController::new(&cfg, 0).unwrap();
        assert_eq!(rounds.ensure_expired(100), Err(PlatformError::RoundNotProgress));
        rounds.ensure_expired(101).unwrap();

        let trade = rounds.prepare_next(RoundKind::fresh_trade(), 101).unwrap();
        rounds.commit(rounds.current().clone(), Some(trade));
        let mut staged = rounds.current().clone();
        staged.push_order(Address::repeat_byte(1), 5, 50).unwrap();
        let sale = rounds.prepare_next(RoundKind::fresh_sale(&cfg), 300).unwrap();
        rounds.commit(staged, Some(sale));

        assert_eq!(rounds.current().id, 3);
        assert_eq!(rounds.current().tag(), RoundTag::Sale);
        assert_eq!(rounds.current().start_time, 300);
        assert_eq!(rounds.current().deadline, 400);
        assert_eq!(rounds.get(1).unwrap().tag(), RoundTag::Sale);
        assert_eq!(rounds.get(2).unwrap().orders().len(), 1);
        assert_eq!(rounds.latest_trade().unwrap().id, 2);
        assert!(rounds.get(0).is_none());
        assert!(rounds.get(4).is_none());
    }

    #[test]
    fn orders_are_numbered_per_round() {
        let cfg = config();
        let rounds = RoundController::new(&cfg, 0).unwrap();
        let mut round = rounds.prepare_next(RoundKind::fresh_trade(), 1).unwrap();
        assert_eq!(round.push_order(Address::repeat_byte(1), 10, 1).unwrap(), 0);
        assert_eq!(round.push_order(Address::repeat_byte(2), 20, 2).unwrap(), 1);
        round.finish_order(0).unwrap();

        assert_eq!(round.order(0).unwrap().status.code(), 2);
        assert_eq!(round.active_order(0), Err(PlatformError::OrderNotActive { id: 0 }));
        assert_eq!(round.active_order(1).unwrap().status.code(), 1);
        assert_eq!(round.order(7), Err(PlatformError::OrderNotFound { id: 7 }));
    }

    #[test]
    fn take_supply_never_goes_negative() {
        let rounds = RoundController::new(&config(), 0).unwrap();
        let mut round = rounds.current().clone();
        assert_eq!(round.take_supply(600).unwrap(), 400);
        assert_eq!(round.take_supply(401), Err(PlatformError::NoSupply));
        assert_eq!(round.take_supply(400).unwrap(), 0);
        assert_eq!(rounds.current().remaining_supply(), Some(1_000));
    }

    #[test]
    fn commit_without_next_only_replaces_current() {
        let mut rounds = RoundController::new(&config(), 0).unwrap();
        let mut staged = rounds.current().clone();
        staged.take_supply(10).unwrap();
        rounds.commit(staged, None);
        assert_eq!(rounds.current().id, 1);
        assert_eq!(rounds.current().remaining_supply(), Some(990));
        assert!(rounds.history().is_empty());
    }
}
