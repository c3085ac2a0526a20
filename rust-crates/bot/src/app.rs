use crate::{
    Result,
    app::{
        chat_output::ChatOutput,
        intent_source::IntentSource,
    },
    intents::{
        Chat,
        Command,
        Intent,
        Sender,
        parse_captcha_callback,
    },
    render::{
        self,
        Reply,
    },
};
use economy::{
    analytics::Analytics,
    casino::{
        Casino,
        ChatKind,
        RollReply,
        RollRequest,
    },
    clock::Clock,
    redemption::{
        PendingRedemption,
        RedeemOutcome,
        Step,
    },
    store::Store,
    user::UserId,
};
use rand::rngs::StdRng;
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    path::Path,
    time::Duration,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub mod chat_output;
pub mod clickhouse_reporter;
pub mod intent_source;
pub mod stdio;


const LOG_FILE_PREFIX: &str = "dice-bot.log";

/// Logs go to stderr (stdout carries chat actions) or to a daily file under `log_dir`.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

pub enum RunState {
    Continue,
    Exit,
}

pub struct App<Intents, Output, S, A, C> {
    intents: Intents,
    output: Output,
    casino: Casino<S, A, C>,
    rng: StdRng,
    admins: HashSet<UserId>,
    redemptions: HashMap<UserId, PendingRedemption>,
}

impl<Intents, Output, S, A, C> App<Intents, Output, S, A, C> {
    pub fn new(
        intents: Intents,
        output: Output,
        casino: Casino<S, A, C>,
        rng: StdRng,
        admins: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            intents,
            output,
            casino,
            rng,
            admins: admins.into_iter().collect(),
            redemptions: HashMap::new(),
        }
    }

    pub fn pending_redemption(&self, user: UserId) -> Option<&PendingRedemption> {
        self.redemptions.get(&user)
    }
}

impl<Intents, Output, S, A, C> App<Intents, Output, S, A, C>
where
    Intents: IntentSource,
    Output: ChatOutput,
    S: Store + Clone,
    A: Analytics + Clone,
    C: Clock,
{
    /// Handle the next intent, or expire the captcha whose deadline comes first.
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<RunState> {
        let next_deadline = self.until_next_deadline();
        let deadline = async {
            match next_deadline {
                Some(wait) => tokio::time::sleep(wait).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = interrupt => Ok(RunState::Exit),
            intent = self.intents.next_intent() => match intent? {
                Some(intent) => {
                    self.handle(intent).await;
                    Ok(RunState::Continue)
                }
                None => {
                    tracing::info!("Intent source closed");
                    Ok(RunState::Exit)
                }
            },
            _ = deadline => {
                self.expire_due().await;
                Ok(RunState::Continue)
            }
        }
    }

    fn until_next_deadline(&self) -> Option<Duration> {
        let now = self.casino.now();
        self.redemptions
            .values()
            .map(|pending| pending.deadline)
            .min()
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Cancel every captcha whose deadline has passed.
    pub async fn expire_due(&mut self) {
        let now = self.casino.now();
        let due: Vec<UserId> = self
            .redemptions
            .iter()
            .filter(|(_, pending)| pending.is_expired(now))
            .map(|(user, _)| *user)
            .collect();
        for user in due {
            let Some(pending) = self.redemptions.remove(&user) else {
                continue;
            };
            let outcome = self.casino.expire_redeem(&pending);
            self.show_on_captcha(&pending, &render::redeem_outcome(&outcome))
                .await;
        }
    }

    pub async fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::Roll {
                chat,
                from,
                message_id,
                value,
                forwarded,
            } => self.handle_roll(chat, from, message_id, value, forwarded).await,
            Intent::Command {
                chat,
                from,
                message_id,
                text,
            } => match Command::parse(&text) {
                Some(command) => self.handle_command(chat, from, message_id, command).await,
                None => tracing::trace!("Ignoring plain text from {}", from.id),
            },
            Intent::Callback {
                chat,
                from,
                message_id,
                data,
            } => self.handle_callback(chat, from, message_id, &data).await,
        }
    }

    async fn handle_roll(
        &mut self,
        chat: Chat,
        from: Sender,
        message_id: i64,
        value: u8,
        forwarded: bool,
    ) {
        let request = RollRequest {
            user: from.id,
            display_name: from.display_name(),
            chat_id: chat.id,
            chat_kind: chat.kind,
            value,
            forwarded,
        };
        let reply = match self.casino.roll(&request, &mut self.rng) {
            Ok(reply) => reply,
            Err(_) => {
                self.reply(chat.id, Some(message_id), &render::failure()).await;
                return;
            }
        };
        match reply {
            RollReply::Forwarded => {
                self.reply(chat.id, Some(message_id), &render::forwarded()).await;
            }
            RollReply::InvalidValue => {
                self.reply(chat.id, Some(message_id), &render::invalid_roll())
                    .await;
            }
            RollReply::Outcome { outcome, gift_code } => {
                let sent = self
                    .reply(chat.id, Some(message_id), &render::roll(&outcome))
                    .await;
                if sent.is_none() {
                    return;
                }
                if let Some(code) = gift_code {
                    self.advertise(chat.id, message_id, &code).await;
                }
            }
        }
    }

    async fn advertise(&mut self, chat_id: i64, roll_message_id: i64, code: &str) {
        let Some(advert_id) = self
            .reply(chat_id, Some(roll_message_id), &render::gift_code_advert(code))
            .await
        else {
            return;
        };
        // failures are reported by the casino; the code simply stays unlinked
        let _ = self.casino.link_code(code, chat_id, advert_id);
    }

    async fn handle_command(
        &mut self,
        chat: Chat,
        from: Sender,
        message_id: i64,
        command: Command,
    ) {
        let reply = match command {
            Command::Help | Command::Unknown(_) => render::help(),
            Command::Balance => {
                let name = from.display_name();
                match self.casino.balance(from.id, &name) {
                    Ok(report) => render::balance(&name, &report),
                    Err(_) => render::failure(),
                }
            }
            Command::Top { full } => match self.casino.standings(from.id, chat.id, full) {
                Ok(places) => render::standings(&places),
                Err(_) => render::failure(),
            },
            Command::Codegen => {
                if !self.admins.contains(&from.id) {
                    tracing::debug!("Ignoring codegen from non-admin {}", from.id);
                    return;
                }
                match self.casino.issue_house_code(from.id, chat.id) {
                    Ok(code) => render::house_code(&code),
                    Err(_) => render::failure(),
                }
            }
            Command::Redeem { code } => {
                if chat.kind != ChatKind::Private {
                    render::redeem_in_private()
                } else {
                    self.begin_redeem(chat, from, code.as_deref()).await;
                    return;
                }
            }
        };
        self.reply(chat.id, Some(message_id), &reply).await;
    }

    async fn begin_redeem(&mut self, chat: Chat, from: Sender, code: Option<&str>) {
        let step = match self
            .casino
            .begin_redeem(from.id, chat.id, code, &mut self.rng)
        {
            Ok(step) => step,
            Err(_) => {
                self.reply(chat.id, None, &render::failure()).await;
                return;
            }
        };
        match step {
            Step::Challenge(mut pending) | Step::Retry(mut pending) => {
                let reply = render::captcha(&pending.challenge, false);
                let Some(message_id) = self.reply(chat.id, None, &reply).await else {
                    return;
                };
                pending.message_id = Some(message_id);
                if self.redemptions.insert(from.id, pending).is_some() {
                    tracing::debug!("User {} restarted a pending redemption", from.id);
                }
            }
            Step::Done(outcome) => {
                self.reply(chat.id, None, &render::redeem_outcome(&outcome))
                    .await;
                self.mark_advert_spent(&outcome).await;
            }
        }
    }

    async fn handle_callback(&mut self, chat: Chat, from: Sender, message_id: i64, data: &str) {
        let Some(selection) = parse_captcha_callback(data) else {
            tracing::debug!("Ignoring unknown callback {data}");
            return;
        };
        let pending = match self.redemptions.remove(&from.id) {
            Some(pending) if pending.message_id == Some(message_id) => pending,
            stale => {
                if let Some(pending) = stale {
                    self.redemptions.insert(from.id, pending);
                }
                self.edit(chat.id, message_id, &render::captcha_closed()).await;
                return;
            }
        };

        let step = match self.casino.answer_captcha(pending.clone(), selection, &mut self.rng) {
            Ok(step) => step,
            Err(_) => {
                self.show_on_captcha(&pending, &render::failure()).await;
                return;
            }
        };
        match step {
            Step::Retry(retry) | Step::Challenge(retry) => {
                self.show_on_captcha(&retry, &render::captcha(&retry.challenge, true))
                    .await;
                self.redemptions.insert(from.id, retry);
            }
            Step::Done(outcome) => {
                self.show_on_captcha(&pending, &render::redeem_outcome(&outcome))
                    .await;
                self.mark_advert_spent(&outcome).await;
            }
        }
    }

    async fn mark_advert_spent(&mut self, outcome: &RedeemOutcome) {
        let RedeemOutcome::Committed(redeemed) = outcome else {
            return;
        };
        let Some(advert) = redeemed.advert else {
            return;
        };
        if let Err(error) = self
            .output
            .edit(advert.chat_id, advert.message_id, &render::gift_code_spent())
            .await
        {
            tracing::warn!("Could not mark gift code advert as spent: {error:#}");
        }
    }

    async fn show_on_captcha(&mut self, pending: &PendingRedemption, reply: &Reply) {
        match pending.message_id {
            Some(message_id) => self.edit(pending.chat_id, message_id, reply).await,
            None => {
                self.reply(pending.chat_id, None, reply).await;
            }
        }
    }

    async fn reply(&mut self, chat_id: i64, reply_to: Option<i64>, reply: &Reply) -> Option<i64> {
        match self.output.send(chat_id, reply_to, reply).await {
            Ok(message_id) => Some(message_id),
            Err(error) => {
                tracing::error!("Failed to reply in chat {chat_id}: {error:#}");
                None
            }
        }
    }

    async fn edit(&mut self, chat_id: i64, message_id: i64, reply: &Reply) {
        if let Err(error) = self.output.edit(chat_id, message_id, reply).await {
            tracing::error!("Failed to edit message {message_id} in chat {chat_id}: {error:#}");
        }
    }
}
