use crate::{
    analytics::{
        Analytics,
        AnalyticsEvent,
    },
    clock::Clock,
    config::{
        DEFAULT_STANDINGS_PLACES,
        EconomyConfig,
    },
    ledger::{
        BalanceReport,
        Ledger,
        Place,
        RollOutcome,
    },
    redemption::{
        PendingRedemption,
        RedeemOutcome,
        RedemptionDesk,
        Step,
    },
    reels::Reels,
    store::Store,
    user::UserId,
    vault::CodeVault,
};
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollRequest {
    pub user: UserId,
    pub display_name: String,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub value: u8,
    pub forwarded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollReply {
    Forwarded,
    InvalidValue,
    Outcome {
        outcome: RollOutcome,
        /// Freshly issued code to advertise under the result.
        gift_code: Option<String>,
    },
}

/// Every economy operation behind one handle, with analytics and failure reporting.
pub struct Casino<S, A, C> {
    ledger: Ledger<S>,
    vault: CodeVault<S>,
    desk: RedemptionDesk<S, A>,
    analytics: A,
    clock: C,
    config: EconomyConfig,
}

impl<S, A, C> Casino<S, A, C>
where
    S: Store + Clone,
    A: Analytics + Clone,
    C: Clock,
{
    pub fn new(store: S, analytics: A, clock: C, config: EconomyConfig) -> crate::Result<Self> {
        config.validate()?;
        let ledger = Ledger::new(store.clone(), &config)?;
        let vault = CodeVault::new(store, &config);
        let desk = RedemptionDesk::new(vault.clone(), ledger.clone(), analytics.clone(), &config)?;
        Ok(Self {
            ledger,
            vault,
            desk,
            analytics,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn vault(&self) -> &CodeVault<S> {
        &self.vault
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn roll<R: Rng + ?Sized>(
        &self,
        request: &RollRequest,
        rng: &mut R,
    ) -> crate::Result<RollReply> {
        let result = self.try_roll(request, rng);
        self.fail_closed("roll", request.user, result)
    }

    fn try_roll<R: Rng + ?Sized>(
        &self,
        request: &RollRequest,
        rng: &mut R,
    ) -> crate::Result<RollReply> {
        let base = json!({
            "chat_id": request.chat_id,
            "user_id": request.user,
            "dice_value": request.value,
        });

        if request.forwarded {
            self.report_dice("forwarded", &base, json!({}));
            return Ok(RollReply::Forwarded);
        }
        let Some(reels) = Reels::decode(request.value) else {
            tracing::warn!("User {} sent roll value {}", request.user, request.value);
            self.report_dice("invalid_value", &base, json!({}));
            return Ok(RollReply::InvalidValue);
        };

        let now = self.clock.now();
        let outcome = self
            .ledger
            .roll(request.user, &request.display_name, reels, now)?;

        let mut gift_code = None;
        match &outcome {
            RollOutcome::QuotaExceeded { limit } => {
                self.report_dice("attempts_limit_reached", &base, json!({ "limit": limit }));
            }
            RollOutcome::InsufficientFunds { required, .. } => {
                self.report_dice("not_enough_coins", &base, json!({ "fixed_loss": required }));
            }
            RollOutcome::Settled(settlement) => {
                self.report_dice(
                    "success",
                    &base,
                    json!({
                        "is_win": settlement.is_win,
                        "prize": settlement.prize,
                        "fixed_loss": settlement.fixed_loss,
                        "attempts_left": settlement.attempts_left,
                        "is_extra_attempt": settlement.is_extra_attempt,
                        "attempts_count": settlement.attempt_count,
                        "tax": settlement.tax.total,
                    }),
                );
                if request.chat_kind == ChatKind::Group
                    && rng.random_bool(self.config.code_grant_probability)
                {
                    // the roll is already persisted; a failed mint only skips the advert
                    let minted = self.issue_code(request.user, request.chat_id);
                    gift_code = self.fail_closed("codegen", request.user, minted).ok();
                }
            }
        }
        Ok(RollReply::Outcome { outcome, gift_code })
    }

    /// Remember which message advertises `token` so it can be marked once spent.
    pub fn link_code(&self, token: &str, chat_id: i64, message_id: i64) -> crate::Result<bool> {
        let result = self.vault.link(token, chat_id, message_id);
        self.fail_closed("link_code", UserId::HOUSE, result)
    }

    pub fn balance(&self, user: UserId, display_name: &str) -> crate::Result<BalanceReport> {
        let result = self.ledger.balance(user, display_name, self.clock.now());
        self.fail_closed("balance", user, result)
    }

    /// Ranked active users, the first places only unless `full`.
    pub fn standings(
        &self,
        requested_by: UserId,
        chat_id: i64,
        full: bool,
    ) -> crate::Result<Vec<Place>> {
        let max_places = (!full).then_some(DEFAULT_STANDINGS_PLACES);
        let result = self.ledger.standings(self.clock.now(), max_places);
        let places = self.fail_closed("standings", requested_by, result)?;
        if let Some(first) = places.first() {
            for (user, state) in &first.users {
                self.analytics.report(AnalyticsEvent::new(
                    "achievement",
                    json!({
                        "type": "first_place",
                        "chat_id": chat_id,
                        "user_id": user,
                        "coins": state.coins,
                    }),
                ));
            }
        }
        Ok(places)
    }

    /// Mint a code on behalf of the house. Authorization is the caller's concern.
    pub fn issue_house_code(&self, admin: UserId, chat_id: i64) -> crate::Result<String> {
        let result = self.issue_code_as(UserId::HOUSE, admin, chat_id);
        self.fail_closed("codegen", admin, result)
    }

    fn issue_code(&self, issuer: UserId, chat_id: i64) -> crate::Result<String> {
        self.issue_code_as(issuer, issuer, chat_id)
    }

    fn issue_code_as(
        &self,
        issuer: UserId,
        requested_by: UserId,
        chat_id: i64,
    ) -> crate::Result<String> {
        let now = self.clock.now();
        let token = self.vault.issue(issuer, now)?;
        self.analytics.report(AnalyticsEvent::new(
            "codegen",
            json!({
                "chat_id": chat_id,
                "user_id": requested_by,
                "issued_by": issuer,
                "code_text": token,
                "issued_at": now.timestamp_millis(),
            }),
        ));
        Ok(token)
    }

    pub fn begin_redeem<R: Rng + ?Sized>(
        &self,
        user: UserId,
        chat_id: i64,
        argument: Option<&str>,
        rng: &mut R,
    ) -> crate::Result<Step> {
        let result = self
            .desk
            .begin(user, chat_id, argument, self.clock.now(), rng);
        self.fail_closed("redeem", user, result)
    }

    pub fn answer_captcha<R: Rng + ?Sized>(
        &self,
        pending: PendingRedemption,
        selection: usize,
        rng: &mut R,
    ) -> crate::Result<Step> {
        let user = pending.user;
        let result = self
            .desk
            .answer(pending, selection, self.clock.now(), rng);
        self.fail_closed("captcha", user, result)
    }

    pub fn expire_redeem(&self, pending: &PendingRedemption) -> RedeemOutcome {
        self.desk.expire(pending)
    }

    fn report_dice(&self, kind: &str, base: &serde_json::Value, extra: serde_json::Value) {
        let mut payload = base.clone();
        if let (Some(payload), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            payload.insert("type".to_string(), json!(kind));
            payload.extend(extra.clone());
        }
        self.analytics.report(AnalyticsEvent::new("dice", payload));
    }

    fn fail_closed<T>(
        &self,
        operation: &str,
        user: UserId,
        result: crate::Result<T>,
    ) -> crate::Result<T> {
        if let Err(error) = &result {
            tracing::error!("Operation {operation} for user {user} failed: {error:#}");
            self.analytics.report(AnalyticsEvent::new(
                "error",
                json!({
                    "type": operation,
                    "user_id": user,
                    "error": format!("{error:#}"),
                }),
            ));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        analytics::RecordingAnalytics,
        clock::ManualClock,
        ledger::Settlement,
        redemption::AbortReason,
        store::{
            AtomicBatch,
            Entry,
            InMemoryStore,
        },
        user::UserState,
        vault::Code,
    };
    use anyhow::anyhow;
    use chrono::{
        DateTime,
        Utc,
    };
    use rand::{
        SeedableRng,
        rngs::StdRng,
    };

    const GROUP: i64 = -1001;
    const TRIPLE_SEVEN: u8 = 64;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .to_utc()
    }

    fn casino(
        config: EconomyConfig,
    ) -> (
        Casino<InMemoryStore, RecordingAnalytics, ManualClock>,
        RecordingAnalytics,
    ) {
        let analytics = RecordingAnalytics::new();
        let casino = Casino::new(
            InMemoryStore::new(),
            analytics.clone(),
            ManualClock::new(start()),
            config,
        )
        .unwrap();
        (casino, analytics)
    }

    fn no_codes() -> EconomyConfig {
        EconomyConfig {
            code_grant_probability: 0.0,
            ..EconomyConfig::default()
        }
    }

    fn always_codes() -> EconomyConfig {
        EconomyConfig {
            code_grant_probability: 1.0,
            ..EconomyConfig::default()
        }
    }

    fn roll_request(user: i64, chat_kind: ChatKind, value: u8) -> RollRequest {
        RollRequest {
            user: UserId(user),
            display_name: format!("user{user}"),
            chat_id: if chat_kind == ChatKind::Group { GROUP } else { user },
            chat_kind,
            value,
            forwarded: false,
        }
    }

    fn settled(reply: RollReply) -> (Settlement, Option<String>) {
        match reply {
            RollReply::Outcome {
                outcome: RollOutcome::Settled(settlement),
                gift_code,
            } => (settlement, gift_code),
            other => panic!("expected a settled roll, got {other:?}"),
        }
    }

    #[test]
    fn roll__triple_seven_for_a_newcomer_ends_at_one_sixty_eight() {
        // given
        let (casino, analytics) = casino(no_codes());
        let mut rng = StdRng::seed_from_u64(0);

        // when
        let reply = casino
            .roll(&roll_request(7, ChatKind::Private, TRIPLE_SEVEN), &mut rng)
            .unwrap();

        // then
        let (settlement, gift_code) = settled(reply);
        assert_eq!(settlement.prize, 77);
        assert_eq!(settlement.fixed_loss, 9);
        assert_eq!(settlement.balance, 168);
        assert_eq!(settlement.attempts_left, 2);
        assert!(gift_code.is_none());
        assert_eq!(analytics.kinds("dice"), vec!["success"]);
    }

    #[test]
    fn roll__forwarded_rolls_never_touch_the_ledger() {
        // given
        let (casino, analytics) = casino(no_codes());
        let mut rng = StdRng::seed_from_u64(0);
        let request = RollRequest {
            forwarded: true,
            ..roll_request(7, ChatKind::Group, TRIPLE_SEVEN)
        };

        // when
        let reply = casino.roll(&request, &mut rng).unwrap();

        // then
        assert_eq!(reply, RollReply::Forwarded);
        assert!(casino.ledger().load(UserId(7)).unwrap().is_none());
        assert_eq!(analytics.kinds("dice"), vec!["forwarded"]);
    }

    #[test]
    fn roll__out_of_range_values_are_rejected() {
        let (casino, _) = casino(no_codes());
        let mut rng = StdRng::seed_from_u64(0);
        for value in [0, 65] {
            let reply = casino
                .roll(&roll_request(7, ChatKind::Private, value), &mut rng)
                .unwrap();
            assert_eq!(reply, RollReply::InvalidValue);
        }
    }

    #[test]
    fn roll__fourth_roll_of_the_day_hits_the_limit() {
        // given
        let (casino, analytics) = casino(no_codes());
        let mut rng = StdRng::seed_from_u64(0);
        let request = roll_request(7, ChatKind::Private, TRIPLE_SEVEN);
        for _ in 0..3 {
            casino.roll(&request, &mut rng).unwrap();
        }

        // when
        let reply = casino.roll(&request, &mut rng).unwrap();

        // then
        assert_eq!(
            reply,
            RollReply::Outcome {
                outcome: RollOutcome::QuotaExceeded { limit: 3 },
                gift_code: None,
            }
        );
        assert_eq!(
            analytics.kinds("dice").last().map(String::as_str),
            Some("attempts_limit_reached")
        );
    }

    #[test]
    fn roll__group_rolls_can_grant_a_code_owned_by_the_roller() {
        // given
        let (casino, analytics) = casino(always_codes());
        let mut rng = StdRng::seed_from_u64(0);

        // when
        let reply = casino
            .roll(&roll_request(7, ChatKind::Group, 1), &mut rng)
            .unwrap();

        // then
        let (_, gift_code) = settled(reply);
        let token = gift_code.unwrap();
        let code = casino.vault().peek(&token).unwrap();
        assert_eq!(code.as_active().unwrap().issued_by, UserId(7));
        let issued = analytics
            .events()
            .into_iter()
            .filter(|event| event.event_type == "codegen")
            .count();
        assert_eq!(issued, 1);
        assert!(casino.link_code(&token, GROUP, 500).unwrap());
    }

    #[test]
    fn roll__private_rolls_never_grant_codes() {
        let (casino, _) = casino(always_codes());
        let mut rng = StdRng::seed_from_u64(0);
        let reply = casino
            .roll(&roll_request(7, ChatKind::Private, 1), &mut rng)
            .unwrap();
        let (_, gift_code) = settled(reply);
        assert!(gift_code.is_none());
    }

    #[test]
    fn standings__reports_every_first_place_holder() {
        // given
        let (casino, analytics) = casino(no_codes());
        let today = casino.ledger().today(start());
        for (id, coins) in [(1, 300), (2, 300), (3, 50)] {
            let state = UserState {
                coins,
                ..UserState::new(format!("user{id}"), today)
            };
            casino.ledger().save(UserId(id), &state).unwrap();
        }

        // when
        let places = casino.standings(UserId(3), GROUP, false).unwrap();

        // then
        assert_eq!(places.len(), 2);
        assert_eq!(
            analytics.kinds("achievement"),
            vec!["first_place", "first_place"]
        );
    }

    #[test]
    fn issue_house_code__belongs_to_the_house() {
        // given
        let (casino, analytics) = casino(no_codes());

        // when
        let token = casino.issue_house_code(UserId(42), 42).unwrap();

        // then
        let Code::Active(active) = casino.vault().peek(&token).unwrap() else {
            panic!("house code should be active");
        };
        assert_eq!(active.issued_by, UserId::HOUSE);
        let event = analytics.events().pop().unwrap();
        assert_eq!(event.event_type, "codegen");
        assert_eq!(event.payload["user_id"], json!(42));
    }

    #[test]
    fn begin_redeem__grant_code_flows_through_to_a_bonus_attempt() {
        // given
        let (casino, _) = casino(always_codes());
        let mut rng = StdRng::seed_from_u64(9);
        let (_, gift_code) = settled(
            casino
                .roll(&roll_request(7, ChatKind::Group, 1), &mut rng)
                .unwrap(),
        );
        let token = gift_code.unwrap();
        casino
            .roll(&roll_request(8, ChatKind::Private, 1), &mut rng)
            .unwrap();

        // when
        let Step::Challenge(pending) = casino
            .begin_redeem(UserId(8), 8, Some(&token), &mut rng)
            .unwrap()
        else {
            panic!("expected a captcha");
        };
        let selection = pending.challenge.target_index;
        let step = casino.answer_captcha(pending, selection, &mut rng).unwrap();

        // then
        let Step::Done(RedeemOutcome::Committed(redeemed)) = step else {
            panic!("expected a committed redemption, got {step:?}");
        };
        assert_eq!(redeemed.state.extra_attempts, 1);
        assert_eq!(redeemed.attempts_left, 3);
    }

    #[test]
    fn begin_redeem__self_redeem_is_refused() {
        // given
        let (casino, _) = casino(always_codes());
        let mut rng = StdRng::seed_from_u64(9);
        let (_, gift_code) = settled(
            casino
                .roll(&roll_request(7, ChatKind::Group, 1), &mut rng)
                .unwrap(),
        );

        // when
        let step = casino
            .begin_redeem(UserId(7), 7, gift_code.as_deref(), &mut rng)
            .unwrap();

        // then
        assert_eq!(
            step,
            Step::Done(RedeemOutcome::Aborted(AbortReason::SelfRedeem))
        );
    }

    #[derive(Clone)]
    struct BrokenStore;

    impl Store for BrokenStore {
        fn get(&self, _key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
            Err(anyhow!("disk unavailable"))
        }

        fn set(&self, _key: &[u8], _value: Vec<u8>) -> crate::Result<()> {
            Err(anyhow!("disk unavailable"))
        }

        fn delete(&self, _key: &[u8]) -> crate::Result<()> {
            Err(anyhow!("disk unavailable"))
        }

        fn list(&self, _prefix: &[u8]) -> impl Iterator<Item = crate::Result<Entry>> + '_ {
            std::iter::once(Err(anyhow!("disk unavailable")))
        }

        fn commit(&self, _batch: &AtomicBatch) -> crate::Result<bool> {
            Err(anyhow!("disk unavailable"))
        }
    }

    /// In-memory store that refuses to write gift codes.
    #[derive(Clone, Default)]
    struct CodeRefusingStore {
        inner: InMemoryStore,
    }

    fn is_code_key(key: &[u8]) -> bool {
        String::from_utf8_lossy(key).contains("-code-treasure/")
    }

    impl Store for CodeRefusingStore {
        fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &[u8], value: Vec<u8>) -> crate::Result<()> {
            if is_code_key(key) {
                return Err(anyhow!("code shard unavailable"));
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &[u8]) -> crate::Result<()> {
            self.inner.delete(key)
        }

        fn list(&self, prefix: &[u8]) -> impl Iterator<Item = crate::Result<Entry>> + '_ {
            self.inner.list(prefix)
        }

        fn commit(&self, batch: &AtomicBatch) -> crate::Result<bool> {
            self.inner.commit(batch)
        }
    }

    #[test]
    fn roll__failed_code_grant_still_reports_the_settled_roll() {
        // given
        let analytics = RecordingAnalytics::new();
        let store = CodeRefusingStore::default();
        let casino = Casino::new(
            store.clone(),
            analytics.clone(),
            ManualClock::new(start()),
            always_codes(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        // when
        let reply = casino
            .roll(&roll_request(7, ChatKind::Group, TRIPLE_SEVEN), &mut rng)
            .unwrap();

        // then
        let (settlement, gift_code) = settled(reply);
        assert_eq!(settlement.balance, 168);
        assert!(gift_code.is_none());
        let stored = casino.ledger().load(UserId(7)).unwrap().unwrap();
        assert_eq!(stored.coins, 168);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(analytics.kinds("error"), vec!["codegen"]);
        assert_eq!(analytics.kinds("dice"), vec!["success"]);
        assert!(analytics.events().iter().all(|event| event.event_type != "codegen"));
    }

    #[test]
    fn roll__store_failures_fail_closed_and_are_reported() {
        // given
        let analytics = RecordingAnalytics::new();
        let casino = Casino::new(
            BrokenStore,
            analytics.clone(),
            ManualClock::new(start()),
            no_codes(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        // when
        let result = casino.roll(&roll_request(7, ChatKind::Private, 1), &mut rng);

        // then
        assert!(result.is_err());
        assert_eq!(analytics.kinds("error"), vec!["roll"]);
    }
}
