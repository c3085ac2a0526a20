use crate::{
    clock::DayBoundary,
    config::{
        EXTRA_ATTEMPT_COMMISSION,
        EconomyConfig,
    },
    reels::Reels,
    store::{
        Keyspace,
        Store,
        decode,
        get_record,
        set_record,
    },
    tax::{
        InactivityTax,
        gas_tax,
        inactivity_tax,
    },
    user::{
        UserId,
        UserState,
    },
};
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RollRules {
    pub stake_price: i64,
    pub attempts_limit: u32,
}

impl RollRules {
    pub fn gas(&self) -> i64 {
        gas_tax(self.stake_price as f64)
    }
}

impl From<&EconomyConfig> for RollRules {
    fn from(config: &EconomyConfig) -> Self {
        Self {
            stake_price: config.stake_price,
            attempts_limit: config.attempts_limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub reels: Reels,
    pub prize: i64,
    /// Stake plus gas, or gas plus commission on a bonus attempt.
    pub fixed_loss: i64,
    pub tax: InactivityTax,
    pub is_win: bool,
    pub is_extra_attempt: bool,
    pub attempt_count: u32,
    pub attempts_left: u32,
    pub balance: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollOutcome {
    Settled(Settlement),
    QuotaExceeded { limit: u32 },
    InsufficientFunds { required: i64, balance: i64 },
}

/// Apply one roll to `state`. Rejections return `None` for the next state.
pub fn plan_roll(
    state: &UserState,
    reels: Reels,
    today: i64,
    rules: RollRules,
) -> (RollOutcome, Option<UserState>) {
    let is_current_day = state.is_current_day(today);
    let limit = rules.attempts_limit + state.extra_attempts;

    if is_current_day && state.attempt_count >= limit {
        return (RollOutcome::QuotaExceeded { limit }, None);
    }

    let is_extra_attempt = is_current_day && state.attempt_count >= rules.attempts_limit;
    let gas = rules.gas();
    let fixed_loss = if is_extra_attempt {
        gas + EXTRA_ATTEMPT_COMMISSION
    } else {
        rules.stake_price + gas
    };

    if state.coins < fixed_loss {
        return (
            RollOutcome::InsufficientFunds {
                required: fixed_loss,
                balance: state.coins,
            },
            None,
        );
    }

    let prize = reels.prize();
    let idle_days = DayBoundary::days_between(today, state.last_day_utc);
    let tax = inactivity_tax(state.coins, idle_days);

    let next = UserState {
        display_name: state.display_name.clone(),
        coins: state.coins + prize - fixed_loss - tax.total,
        last_day_utc: today,
        attempt_count: if is_current_day {
            state.attempt_count + 1
        } else {
            1
        },
        extra_attempts: if is_current_day {
            state.extra_attempts
        } else {
            0
        },
    };

    let settlement = Settlement {
        reels,
        prize,
        fixed_loss,
        tax,
        is_win: prize - fixed_loss > 0,
        is_extra_attempt,
        attempt_count: next.attempt_count,
        attempts_left: next.attempts_left(rules.attempts_limit),
        balance: next.coins,
    };
    (RollOutcome::Settled(settlement), Some(next))
}

/// State after redeeming one gift code: one more bonus attempt valid until the next boundary.
pub fn grant_extra_attempt(state: &UserState, today: i64) -> UserState {
    if state.is_current_day(today) {
        UserState {
            extra_attempts: state.extra_attempts + 1,
            ..state.clone()
        }
    } else {
        UserState {
            extra_attempts: 1,
            attempt_count: 0,
            last_day_utc: today,
            ..state.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceReport {
    pub state: UserState,
    pub is_visible: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Place {
    pub place: usize,
    pub users: Vec<(UserId, UserState)>,
}

#[derive(Clone)]
pub struct Ledger<S> {
    store: S,
    keys: Keyspace,
    boundary: DayBoundary,
    rules: RollRules,
    hide_after_days: i64,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S, config: &EconomyConfig) -> crate::Result<Self> {
        Ok(Self {
            store,
            keys: Keyspace::new(config.key_namespace.clone()),
            boundary: config.day_boundary()?,
            rules: RollRules::from(config),
            hide_after_days: config.hide_after_days,
        })
    }

    pub fn rules(&self) -> RollRules {
        self.rules
    }

    pub fn today(&self, now: DateTime<Utc>) -> i64 {
        self.boundary.day_start(now)
    }

    pub fn load(&self, user: UserId) -> crate::Result<Option<UserState>> {
        get_record(&self.store, &self.keys.user(user), "user state")
    }

    /// The state together with the stored bytes it was decoded from.
    pub fn load_versioned(&self, user: UserId) -> crate::Result<Option<(Vec<u8>, UserState)>> {
        let Some(bytes) = self
            .store
            .get(&self.keys.user(user))
            .context("load user state")?
        else {
            return Ok(None);
        };
        let state = decode(&bytes, "user state")?;
        Ok(Some((bytes, state)))
    }

    pub fn save(&self, user: UserId, state: &UserState) -> crate::Result<()> {
        set_record(&self.store, &self.keys.user(user), state, "user state")
    }

    /// Read-modify-write of one roll. Not compare-and-swap: concurrent rolls by the
    /// same user may overwrite each other.
    pub fn roll(
        &self,
        user: UserId,
        display_name: &str,
        reels: Reels,
        now: DateTime<Utc>,
    ) -> crate::Result<RollOutcome> {
        let today = self.today(now);
        let state = self
            .load(user)?
            .unwrap_or_else(|| UserState::new(display_name, today));
        let (outcome, next) = plan_roll(&state, reels, today, self.rules);
        if let Some(next) = next {
            self.save(user, &next)?;
            tracing::debug!(
                "User {user} rolled {:?}: balance {} -> {}",
                reels.symbols(),
                state.coins,
                next.coins
            );
        }
        Ok(outcome)
    }

    /// Current state, creating and persisting the default one on first contact.
    pub fn balance(
        &self,
        user: UserId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<BalanceReport> {
        let today = self.today(now);
        let state = match self.load(user)? {
            Some(state) => state,
            None => {
                let state = UserState::new(display_name, today);
                self.save(user, &state)?;
                state
            }
        };
        let is_visible = self.is_visible(&state, today);
        Ok(BalanceReport { state, is_visible })
    }

    fn is_visible(&self, state: &UserState, today: i64) -> bool {
        DayBoundary::days_between(today, state.last_day_utc) < self.hide_after_days
    }

    /// Active users ranked by balance; equal balances share a place.
    pub fn standings(
        &self,
        now: DateTime<Utc>,
        max_places: Option<usize>,
    ) -> crate::Result<Vec<Place>> {
        let today = self.today(now);
        let mut users = Vec::new();
        for entry in self.store.list(&self.keys.users_prefix()) {
            let entry = entry?;
            let id = self.keys.user_id_from_key(&entry.key)?;
            let state: UserState = decode(&entry.value, "user state")?;
            if self.is_visible(&state, today) {
                users.push((id, state));
            }
        }
        users.sort_by(|a, b| b.1.coins.cmp(&a.1.coins));

        let mut places: Vec<Place> = Vec::new();
        for (id, state) in users {
            match places.last_mut() {
                Some(last) if last.users[0].1.coins == state.coins => {
                    last.users.push((id, state));
                }
                _ => {
                    if max_places.is_some_and(|max| places.len() >= max) {
                        break;
                    }
                    places.push(Place {
                        place: places.len() + 1,
                        users: vec![(id, state)],
                    });
                }
            }
        }
        Ok(places)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        reels::Symbol,
        store::InMemoryStore,
    };
    use chrono::Duration;

    const DAY: i64 = 86_400_000;
    const RULES: RollRules = RollRules {
        stake_price: 8,
        attempts_limit: 3,
    };

    fn state(coins: i64, last_day_utc: i64, attempt_count: u32, extra: u32) -> UserState {
        UserState {
            display_name: "alice".to_string(),
            coins,
            last_day_utc,
            attempt_count,
            extra_attempts: extra,
        }
    }

    fn settled(outcome: RollOutcome) -> Settlement {
        match outcome {
            RollOutcome::Settled(settlement) => settlement,
            other => panic!("expected settled roll, got {other:?}"),
        }
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().to_utc()
    }

    #[test]
    fn plan_roll__triple_seven_from_one_hundred_ends_at_one_sixty_eight() {
        // given
        let before = state(100, 0, 0, 0);
        let reels = Reels([Symbol::Seven; 3]);

        // when
        let (outcome, next) = plan_roll(&before, reels, 0, RULES);

        // then
        let settlement = settled(outcome);
        assert_eq!(settlement.fixed_loss, 9);
        assert_eq!(settlement.balance, 168);
        assert!(settlement.is_win);
        let next = next.unwrap();
        assert_eq!(next.coins, 168);
        assert_eq!(next.attempt_count, 1);
    }

    #[test]
    fn plan_roll__limit_reached_today_is_rejected() {
        // given
        let before = state(100, 0, 3, 0);

        // when
        let (outcome, next) = plan_roll(&before, Reels([Symbol::Bar; 3]), 0, RULES);

        // then
        assert_eq!(outcome, RollOutcome::QuotaExceeded { limit: 3 });
        assert!(next.is_none());
    }

    #[test]
    fn plan_roll__limit_resets_on_a_new_day() {
        // given
        let before = state(100, 0, 3, 2);

        // when
        let (outcome, next) = plan_roll(&before, Reels([Symbol::Bar; 3]), DAY, RULES);

        // then
        let settlement = settled(outcome);
        assert!(!settlement.is_extra_attempt);
        let next = next.unwrap();
        assert_eq!(next.attempt_count, 1);
        assert_eq!(next.extra_attempts, 0);
        assert_eq!(next.last_day_utc, DAY);
    }

    #[test]
    fn plan_roll__bonus_attempt_costs_gas_plus_commission() {
        // given
        let before = state(100, 0, 3, 1);

        // when
        let (outcome, next) = plan_roll(&before, Reels([Symbol::Bar; 3]), 0, RULES);

        // then
        let settlement = settled(outcome);
        assert!(settlement.is_extra_attempt);
        assert_eq!(settlement.fixed_loss, 1 + 2);
        assert_eq!(settlement.attempts_left, 0);
        assert_eq!(next.unwrap().coins, 100 + 21 - 3);
    }

    #[test]
    fn plan_roll__insufficient_balance_is_rejected() {
        // given
        let before = state(8, 0, 0, 0);

        // when
        let (outcome, next) = plan_roll(&before, Reels([Symbol::Seven; 3]), 0, RULES);

        // then
        assert_eq!(
            outcome,
            RollOutcome::InsufficientFunds {
                required: 9,
                balance: 8
            }
        );
        assert!(next.is_none());
    }

    #[test]
    fn plan_roll__idle_days_are_taxed() {
        // given
        // two idle days on 200 coins cost 5 + 4
        let before = state(200, 0, 1, 0);

        // when
        let (outcome, next) = plan_roll(&before, Reels([Symbol::Bar; 3]), 2 * DAY, RULES);

        // then
        let settlement = settled(outcome);
        assert_eq!(settlement.tax, InactivityTax { total: 9, days: 2 });
        assert_eq!(next.unwrap().coins, 200 + 21 - 9 - 9);
    }

    #[test]
    fn grant_extra_attempt__same_day_adds_to_the_bonus() {
        let before = state(50, DAY, 3, 1);
        let after = grant_extra_attempt(&before, DAY);
        assert_eq!(after.extra_attempts, 2);
        assert_eq!(after.attempt_count, 3);
    }

    #[test]
    fn grant_extra_attempt__new_day_resets_counters() {
        let before = state(50, 0, 3, 4);
        let after = grant_extra_attempt(&before, DAY);
        assert_eq!(after.extra_attempts, 1);
        assert_eq!(after.attempt_count, 0);
        assert_eq!(after.last_day_utc, DAY);
        assert_eq!(after.coins, 50);
    }

    #[test]
    fn roll__persists_the_new_state() {
        // given
        let store = InMemoryStore::new();
        let ledger = Ledger::new(store, &EconomyConfig::default()).unwrap();
        let now = at("2024-05-01T12:00:00Z");

        // when
        let outcome = ledger
            .roll(UserId(7), "alice", Reels([Symbol::Seven; 3]), now)
            .unwrap();

        // then
        assert_eq!(settled(outcome).balance, 168);
        let stored = ledger.load(UserId(7)).unwrap().unwrap();
        assert_eq!(stored.coins, 168);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_day_utc, ledger.today(now));
    }

    #[test]
    fn roll__rejection_does_not_create_the_user() {
        // given
        let config = EconomyConfig {
            stake_price: 500,
            ..EconomyConfig::default()
        };
        let ledger = Ledger::new(InMemoryStore::new(), &config).unwrap();

        // when
        let outcome = ledger
            .roll(UserId(7), "alice", Reels([Symbol::Seven; 3]), Utc::now())
            .unwrap();

        // then
        assert!(matches!(outcome, RollOutcome::InsufficientFunds { .. }));
        assert!(ledger.load(UserId(7)).unwrap().is_none());
    }

    #[test]
    fn balance__creates_the_default_state_once() {
        // given
        let ledger = Ledger::new(InMemoryStore::new(), &EconomyConfig::default()).unwrap();
        let now = at("2024-05-01T12:00:00Z");

        // when
        let first = ledger.balance(UserId(1), "bob", now).unwrap();

        // then
        assert_eq!(first.state.coins, 100);
        assert!(first.is_visible);
        assert_eq!(ledger.load(UserId(1)).unwrap(), Some(first.state));
    }

    #[test]
    fn balance__long_idle_users_are_hidden() {
        // given
        let ledger = Ledger::new(InMemoryStore::new(), &EconomyConfig::default()).unwrap();
        let then = at("2024-05-01T12:00:00Z");
        ledger.balance(UserId(1), "bob", then).unwrap();

        // when
        let later = ledger
            .balance(UserId(1), "bob", then + Duration::days(8))
            .unwrap();

        // then
        assert!(!later.is_visible);
    }

    #[test]
    fn standings__ties_share_a_place_and_idle_users_are_skipped() {
        // given
        let ledger = Ledger::new(InMemoryStore::new(), &EconomyConfig::default()).unwrap();
        let now = at("2024-05-10T12:00:00Z");
        let today = ledger.today(now);
        ledger.save(UserId(1), &state(150, today, 1, 0)).unwrap();
        ledger.save(UserId(2), &state(90, today, 1, 0)).unwrap();
        ledger.save(UserId(3), &state(150, today, 2, 0)).unwrap();
        ledger
            .save(UserId(4), &state(999, today - 30 * DAY, 1, 0))
            .unwrap();

        // when
        let places = ledger.standings(now, None).unwrap();

        // then
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].place, 1);
        let leaders: Vec<UserId> = places[0].users.iter().map(|(id, _)| *id).collect();
        assert_eq!(leaders, vec![UserId(1), UserId(3)]);
        assert_eq!(places[1].users[0].0, UserId(2));
    }

    #[test]
    fn standings__respects_the_place_limit() {
        // given
        let ledger = Ledger::new(InMemoryStore::new(), &EconomyConfig::default()).unwrap();
        let now = at("2024-05-10T12:00:00Z");
        let today = ledger.today(now);
        for id in 1..=5 {
            ledger
                .save(UserId(id), &state(100 + id, today, 1, 0))
                .unwrap();
        }

        // when
        let places = ledger.standings(now, Some(2)).unwrap();

        // then
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].users[0].0, UserId(5));
    }
}
