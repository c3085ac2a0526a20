// Gift-code redemption as a resumable state record. The caller keeps the
// `PendingRedemption` between chat updates and feeds it back with the user's
// selection or, once `deadline` passes, hands it to `expire`.
use crate::{
    analytics::{
        Analytics,
        AnalyticsEvent,
    },
    captcha::CaptchaChallenge,
    config::EconomyConfig,
    ledger::{
        Ledger,
        grant_extra_attempt,
    },
    store::Store,
    user::{
        UserId,
        UserState,
    },
    vault::{
        Advert,
        Code,
        CodeVault,
        parse_token,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    AwaitingCodeInput,
    CodeValidated,
    CaptchaOffered,
    CaptchaRetry,
    CaptchaResolved,
    CodeRevalidated,
    Committed,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    Malformed,
    SelfRedeem,
    NoHistory,
    AlreadyRedeemed,
    CaptchaFailed,
    TimedOut,
    /// The code was spent by someone else while the captcha was open.
    TooSlow,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::Malformed => "invalid",
            AbortReason::SelfRedeem => "self_redeem",
            AbortReason::NoHistory => "no_history",
            AbortReason::AlreadyRedeemed => "already_redeemed",
            AbortReason::CaptchaFailed => "captcha_failed",
            AbortReason::TimedOut => "timed_out",
            AbortReason::TooSlow => "too_slow",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redeemed {
    pub state: UserState,
    pub attempts_left: u32,
    /// Advertisement to mark as spent.
    pub advert: Option<Advert>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedeemOutcome {
    Committed(Redeemed),
    Aborted(AbortReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRedemption {
    pub user: UserId,
    pub chat_id: i64,
    pub token: String,
    pub phase: Phase,
    pub challenge: CaptchaChallenge,
    pub attempts_left: u8,
    pub deadline: DateTime<Utc>,
    /// Message carrying the challenge, once the chat boundary has sent it.
    pub message_id: Option<i64>,
}

impl PendingRedemption {
    fn enter(&mut self, phase: Phase) {
        transition(self.user, self.phase, phase);
        self.phase = phase;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

fn transition(user: UserId, from: Phase, to: Phase) {
    tracing::debug!("Redemption by user {user}: {from:?} -> {to:?}");
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Show the challenge and wait for one selection.
    Challenge(PendingRedemption),
    /// Wrong selection with attempts remaining; show the new challenge in place.
    Retry(PendingRedemption),
    Done(RedeemOutcome),
}

#[derive(Clone)]
pub struct RedemptionDesk<S, A> {
    vault: CodeVault<S>,
    ledger: Ledger<S>,
    analytics: A,
    timeout: chrono::Duration,
    captcha_attempts: u8,
}

impl<S: Store, A: Analytics> RedemptionDesk<S, A> {
    pub fn new(
        vault: CodeVault<S>,
        ledger: Ledger<S>,
        analytics: A,
        config: &EconomyConfig,
    ) -> crate::Result<Self> {
        let timeout = chrono::Duration::from_std(config.captcha_timeout())?;
        Ok(Self {
            vault,
            ledger,
            analytics,
            timeout,
            captcha_attempts: config.captcha_attempts,
        })
    }

    /// Validate the typed code and, when it is redeemable, open a captcha.
    pub fn begin<R: Rng + ?Sized>(
        &self,
        user: UserId,
        chat_id: i64,
        argument: Option<&str>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> crate::Result<Step> {
        let raw = argument.unwrap_or_default();
        let Some(token) = parse_token(raw) else {
            return Ok(Step::Done(self.abort(
                user,
                chat_id,
                raw,
                Phase::AwaitingCodeInput,
                AbortReason::Malformed,
            )));
        };

        let code = self.vault.peek(&token)?;
        let Code::Active(active) = code else {
            return Ok(Step::Done(self.abort(
                user,
                chat_id,
                &token,
                Phase::AwaitingCodeInput,
                AbortReason::AlreadyRedeemed,
            )));
        };
        if active.issued_by == user {
            return Ok(Step::Done(self.abort(
                user,
                chat_id,
                &token,
                Phase::AwaitingCodeInput,
                AbortReason::SelfRedeem,
            )));
        }
        transition(user, Phase::AwaitingCodeInput, Phase::CodeValidated);
        if self.ledger.load(user)?.is_none() {
            return Ok(Step::Done(self.abort(
                user,
                chat_id,
                &token,
                Phase::CodeValidated,
                AbortReason::NoHistory,
            )));
        }
        transition(user, Phase::CodeValidated, Phase::CaptchaOffered);

        Ok(Step::Challenge(PendingRedemption {
            user,
            chat_id,
            token,
            phase: Phase::CaptchaOffered,
            challenge: CaptchaChallenge::generate(rng),
            attempts_left: self.captcha_attempts,
            deadline: now + self.timeout,
            message_id: None,
        }))
    }

    /// Resolve the captcha with the user's selection and commit when it passes.
    pub fn answer<R: Rng + ?Sized>(
        &self,
        mut pending: PendingRedemption,
        selection: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> crate::Result<Step> {
        if pending.is_expired(now) {
            return Ok(Step::Done(self.expire(&pending)));
        }

        if !pending.challenge.verify(selection) {
            self.report_captcha(&pending, "fail");
            pending.attempts_left = pending.attempts_left.saturating_sub(1);
            if pending.attempts_left > 0 {
                pending.enter(Phase::CaptchaRetry);
                pending.challenge = CaptchaChallenge::generate(rng);
                pending.deadline = now + self.timeout;
                return Ok(Step::Retry(pending));
            }
            return Ok(Step::Done(
                self.abort_pending(&pending, AbortReason::CaptchaFailed),
            ));
        }
        pending.enter(Phase::CaptchaResolved);
        self.report_captcha(&pending, "pass");

        self.commit(pending, now).map(Step::Done)
    }

    fn commit(
        &self,
        mut pending: PendingRedemption,
        now: DateTime<Utc>,
    ) -> crate::Result<RedeemOutcome> {
        let user = pending.user;
        let Code::Active(active) = self.vault.peek(&pending.token)? else {
            return Ok(self.abort_pending(&pending, AbortReason::TooSlow));
        };
        pending.enter(Phase::CodeRevalidated);

        let Some((seen, state)) = self.ledger.load_versioned(user)? else {
            return Ok(self.abort_pending(&pending, AbortReason::NoHistory));
        };
        let next = grant_extra_attempt(&state, self.ledger.today(now));
        if !self
            .vault
            .redeem_atomically(&pending.token, user, &seen, &next)?
        {
            return Ok(self.abort_pending(&pending, AbortReason::TooSlow));
        }
        pending.enter(Phase::Committed);
        tracing::info!("User {user} redeemed a gift code");

        self.analytics.report(AnalyticsEvent::new(
            "redeem",
            json!({
                "type": "success",
                "chat_id": pending.chat_id,
                "user_id": user,
                "code_text": pending.token,
                "redeem_interval": now.timestamp_millis() - active.issued_at,
            }),
        ));
        Ok(RedeemOutcome::Committed(Redeemed {
            attempts_left: next.attempts_left(self.ledger.rules().attempts_limit),
            state: next,
            advert: active.advert,
        }))
    }

    /// Drop a flow whose deadline passed. The vault is left untouched.
    pub fn expire(&self, pending: &PendingRedemption) -> RedeemOutcome {
        tracing::debug!("Captcha for user {} timed out", pending.user);
        self.abort_pending(pending, AbortReason::TimedOut)
    }

    fn abort_pending(&self, pending: &PendingRedemption, reason: AbortReason) -> RedeemOutcome {
        self.abort(
            pending.user,
            pending.chat_id,
            &pending.token,
            pending.phase,
            reason,
        )
    }

    fn abort(
        &self,
        user: UserId,
        chat_id: i64,
        code_text: &str,
        phase: Phase,
        reason: AbortReason,
    ) -> RedeemOutcome {
        transition(user, phase, Phase::Aborted);
        self.analytics.report(AnalyticsEvent::new(
            "redeem",
            json!({
                "type": reason.as_str(),
                "chat_id": chat_id,
                "user_id": user,
                "code_text": code_text,
            }),
        ));
        RedeemOutcome::Aborted(reason)
    }

    fn report_captcha(&self, pending: &PendingRedemption, kind: &str) {
        self.analytics.report(AnalyticsEvent::new(
            "captcha",
            json!({
                "type": kind,
                "chat_id": pending.chat_id,
                "user_id": pending.user,
                "attempts_left": pending.attempts_left,
            }),
        ));
    }
}
