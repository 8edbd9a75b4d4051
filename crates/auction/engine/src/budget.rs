//! Budget/phase ledger
//!
//! Tracks each bidder's remaining balance and enforces the phase-dependent
//! minimum reserve. The reserve a bidder must keep after a purchase depends
//! only on which phase the round number falls into; past the last
//! boundary the policy's terminal reserve applies.

use crate::clock::Clock;
use crate::error::EngineResult;
use async_trait::async_trait;
use auction_storage::{AuctionStorage, DebitOutcome};
use auction_types::{
    Actor, Amount, BidderAccount, BidderId, Outcome, PhasePolicy, ReasonCode, SeriesId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Source of opening balances for bidders the engine has not seen yet
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance_snapshot(&self, bidder_id: &BidderId) -> EngineResult<Amount>;
}

/// Same opening balance for everybody, with per-bidder overrides
#[derive(Debug, Clone, Default)]
pub struct StaticBalanceSource {
    default_balance: Amount,
    overrides: HashMap<BidderId, Amount>,
}

impl StaticBalanceSource {
    pub fn new(default_balance: Amount) -> Self {
        Self {
            default_balance,
            overrides: HashMap::new(),
        }
    }

    pub fn with_balance(mut self, bidder_id: BidderId, balance: Amount) -> Self {
        self.overrides.insert(bidder_id, balance);
        self
    }
}

#[async_trait]
impl BalanceSource for StaticBalanceSource {
    async fn balance_snapshot(&self, bidder_id: &BidderId) -> EngineResult<Amount> {
        Ok(self
            .overrides
            .get(bidder_id)
            .copied()
            .unwrap_or(self.default_balance))
    }
}

/// Why a prospective purchase is or is not affordable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReserveDecision {
    Allowed { remaining: Amount },
    ReserveBreach { required: Amount, remaining: Amount },
    ItemCapReached { cap: u32 },
    InsufficientBalance { balance: Amount },
}

impl ReserveDecision {
    /// Pure decision over an account snapshot.
    pub fn evaluate(
        policy: &PhasePolicy,
        round_number: u32,
        account: &BidderAccount,
        spend: Amount,
    ) -> Self {
        if account.items_acquired >= policy.max_items_per_bidder {
            return ReserveDecision::ItemCapReached {
                cap: policy.max_items_per_bidder,
            };
        }
        let Some(remaining) = account.balance.checked_sub(spend) else {
            return ReserveDecision::InsufficientBalance {
                balance: account.balance,
            };
        };
        let required = policy.reserve_for_round(round_number);
        if remaining < required {
            return ReserveDecision::ReserveBreach {
                required,
                remaining,
            };
        }
        ReserveDecision::Allowed { remaining }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, ReserveDecision::Allowed { .. })
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            ReserveDecision::Allowed { .. } => None,
            ReserveDecision::ItemCapReached { .. } => Some(ReasonCode::ItemCapReached),
            ReserveDecision::ReserveBreach { .. } | ReserveDecision::InsufficientBalance { .. } => {
                Some(ReasonCode::ReserveBreach)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ReserveDecision::Allowed { remaining } => format!("allowed, {remaining} remains"),
            ReserveDecision::ReserveBreach {
                required,
                remaining,
            } => format!("leaves {remaining}, phase reserve is {required}"),
            ReserveDecision::ItemCapReached { cap } => format!("already holds {cap} items"),
            ReserveDecision::InsufficientBalance { balance } => {
                format!("balance {balance} cannot cover the amount")
            }
        }
    }
}

/// Budget ledger over the account and policy stores
pub struct BudgetLedger {
    storage: Arc<dyn AuctionStorage>,
    balances: Arc<dyn BalanceSource>,
    clock: Arc<dyn Clock>,
}

impl BudgetLedger {
    pub fn new(
        storage: Arc<dyn AuctionStorage>,
        balances: Arc<dyn BalanceSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            balances,
            clock,
        }
    }

    /// Stored account, seeded from the balance source on first use.
    pub async fn account(&self, bidder_id: &BidderId) -> EngineResult<BidderAccount> {
        if let Some(account) = self.storage.get_account(bidder_id).await? {
            return Ok(account);
        }
        let balance = self.balances.balance_snapshot(bidder_id).await?;
        let seeded = self
            .storage
            .seed_account(BidderAccount::new(bidder_id.clone(), balance, self.clock.now()))
            .await?;
        info!(bidder = %bidder_id, balance = seeded.balance, "Seeded bidder account");
        Ok(seeded)
    }

    /// Account as it would be seeded, without writing anything.
    pub async fn peek_account(&self, bidder_id: &BidderId) -> EngineResult<BidderAccount> {
        if let Some(account) = self.storage.get_account(bidder_id).await? {
            return Ok(account);
        }
        let balance = self.balances.balance_snapshot(bidder_id).await?;
        Ok(BidderAccount::new(bidder_id.clone(), balance, self.clock.now()))
    }

    /// Administrative balance set. Acquired item counts are kept.
    pub async fn set_balance(
        &self,
        actor: &Actor,
        bidder_id: &BidderId,
        balance: Amount,
    ) -> EngineResult<Outcome<BidderAccount>> {
        if !actor.is_operator() {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "only operators may set balances",
                None,
            ));
        }
        let mut account = self.account(bidder_id).await?;
        account.balance = balance;
        account.updated_at = self.clock.now();
        self.storage.put_account(account.clone()).await?;
        info!(bidder = %bidder_id, balance, "Balance set");
        Ok(Outcome::accepted(account))
    }

    /// Policy for a series; series without one are unrestricted.
    pub async fn policy(&self, series_id: &SeriesId) -> EngineResult<PhasePolicy> {
        Ok(self
            .storage
            .get_policy(series_id)
            .await?
            .unwrap_or_else(|| PhasePolicy::unrestricted(series_id.clone(), u32::MAX)))
    }

    #[instrument(skip(self, policy), fields(series = %policy.series_id))]
    pub async fn register_policy(
        &self,
        actor: &Actor,
        policy: PhasePolicy,
    ) -> EngineResult<Outcome<PhasePolicy>> {
        if !actor.is_operator() {
            return Ok(Outcome::rejected(
                ReasonCode::Unauthorized,
                "only operators may register policies",
                None,
            ));
        }
        if let Err(err) = policy.validate() {
            warn!(error = %err, "Rejected phase policy");
            return Ok(Outcome::rejected(
                ReasonCode::InvalidPolicy,
                err.to_string(),
                Some(policy),
            ));
        }
        self.storage.put_policy(policy.clone()).await?;
        info!(phases = policy.phases.len(), "Phase policy registered");
        Ok(Outcome::accepted(policy))
    }

    pub async fn evaluate(
        &self,
        bidder_id: &BidderId,
        series_id: &SeriesId,
        round_number: u32,
        prospective_spend: Amount,
    ) -> EngineResult<ReserveDecision> {
        let policy = self.policy(series_id).await?;
        let account = self.peek_account(bidder_id).await?;
        Ok(ReserveDecision::evaluate(
            &policy,
            round_number,
            &account,
            prospective_spend,
        ))
    }

    /// Whether spending `prospective_spend` keeps the bidder within the
    /// phase reserve and the item cap.
    pub async fn reserve_check(
        &self,
        bidder_id: &BidderId,
        series_id: &SeriesId,
        round_number: u32,
        prospective_spend: Amount,
    ) -> EngineResult<bool> {
        Ok(self
            .evaluate(bidder_id, series_id, round_number, prospective_spend)
            .await?
            .is_allowed())
    }

    /// Largest amount the bidder could pay in this round.
    pub async fn max_bid(
        &self,
        bidder_id: &BidderId,
        series_id: &SeriesId,
        round_number: u32,
    ) -> EngineResult<Amount> {
        let policy = self.policy(series_id).await?;
        let account = self.peek_account(bidder_id).await?;
        Ok(account
            .balance
            .saturating_sub(policy.reserve_for_round(round_number)))
    }

    /// Atomic decrement that never drives the balance negative.
    pub async fn debit(&self, bidder_id: &BidderId, amount: Amount) -> EngineResult<DebitOutcome> {
        self.account(bidder_id).await?;
        let outcome = self
            .storage
            .debit(bidder_id, amount, 0, self.clock.now())
            .await?;
        if let DebitOutcome::Rejected { account, .. } = &outcome {
            warn!(bidder = %bidder_id, amount, balance = account.balance, "Debit refused");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use auction_storage::InMemoryAuctionStorage;
    use auction_types::PhaseBoundary;

    fn ledger(balance: Amount) -> BudgetLedger {
        BudgetLedger::new(
            Arc::new(InMemoryAuctionStorage::new()),
            Arc::new(StaticBalanceSource::new(balance)),
            Arc::new(SystemClock),
        )
    }

    fn policy() -> PhasePolicy {
        PhasePolicy {
            series_id: SeriesId::new("league"),
            phases: vec![PhaseBoundary {
                end_round_number: 10,
                min_reserve_balance: 100,
            }],
            terminal_reserve: 0,
            max_items_per_bidder: 2,
        }
    }

    #[tokio::test]
    async fn test_reserve_breach_is_reported() {
        let ledger = ledger(500);
        ledger
            .register_policy(&Actor::admin(), policy())
            .await
            .unwrap();

        let decision = ledger
            .evaluate(&BidderId::new("a"), &SeriesId::new("league"), 4, 450)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ReserveDecision::ReserveBreach {
                required: 100,
                remaining: 50
            }
        );
        assert!(ledger
            .reserve_check(&BidderId::new("a"), &SeriesId::new("league"), 4, 400)
            .await
            .unwrap());
        // Terminal phase has no reserve.
        assert!(ledger
            .reserve_check(&BidderId::new("a"), &SeriesId::new("league"), 11, 450)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_max_bid_subtracts_phase_reserve() {
        let ledger = ledger(500);
        ledger
            .register_policy(&Actor::admin(), policy())
            .await
            .unwrap();
        let max = ledger
            .max_bid(&BidderId::new("a"), &SeriesId::new("league"), 1)
            .await
            .unwrap();
        assert_eq!(max, 400);
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let ledger = ledger(100);
        let applied = ledger.debit(&BidderId::new("a"), 60).await.unwrap();
        let refused = ledger.debit(&BidderId::new("a"), 60).await.unwrap();

        assert!(matches!(applied, DebitOutcome::Applied(ref a) if a.balance == 40));
        assert!(matches!(refused, DebitOutcome::Rejected { ref account, .. } if account.balance == 40));
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected() {
        let ledger = ledger(100);
        let mut bad = policy();
        bad.max_items_per_bidder = 0;
        let outcome = ledger.register_policy(&Actor::admin(), bad).await.unwrap();
        assert_eq!(outcome.code(), Some(ReasonCode::InvalidPolicy));

        let outcome = ledger
            .register_policy(&Actor::bidder(BidderId::new("a")), policy())
            .await
            .unwrap();
        assert_eq!(outcome.code(), Some(ReasonCode::Unauthorized));
    }
}
