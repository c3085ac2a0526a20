// Plain-text rendering of economy results for the chat boundary.
use crate::intents::captcha_callback;
use economy::{
    captcha::CaptchaChallenge,
    ledger::{
        BalanceReport,
        Place,
        RollOutcome,
        Settlement,
    },
    redemption::{
        AbortReason,
        RedeemOutcome,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

const CAPTCHA_ROW: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyboard: Vec<Vec<Button>>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }
}

fn coins(amount: i64) -> String {
    if amount.abs() == 1 {
        format!("{amount} coin")
    } else {
        format!("{amount} coins")
    }
}

fn rolls(count: u32) -> String {
    if count == 1 {
        "1 roll".to_string()
    } else {
        format!("{count} rolls")
    }
}

pub fn forwarded() -> Reply {
    Reply::text("Nice try! Forwarded rolls do not count.")
}

pub fn invalid_roll() -> Reply {
    Reply::text("I could not read that roll.")
}

pub fn roll(outcome: &RollOutcome) -> Reply {
    match outcome {
        RollOutcome::QuotaExceeded { limit } => Reply::text(format!(
            "Daily limit reached ({}). Come back after the daily reset!",
            rolls(*limit)
        )),
        RollOutcome::InsufficientFunds { required, balance } => Reply::text(format!(
            "Out of coins? A roll costs {}, you have {}.",
            coins(*required),
            coins(*balance)
        )),
        RollOutcome::Settled(settlement) => Reply::text(settled(settlement)),
    }
}

fn settled(settlement: &Settlement) -> String {
    let mut lines = Vec::new();
    let net = settlement.prize - settlement.fixed_loss;
    if settlement.is_win {
        lines.push(format!(
            "You won {} - {} (stake) = {}!",
            settlement.prize,
            settlement.fixed_loss,
            coins(net)
        ));
    } else {
        lines.push(format!(
            "No luck this time: you lost {} - {} (compensation) = {}.",
            settlement.fixed_loss,
            settlement.prize,
            coins(-net)
        ));
    }
    lines.push(format!("Your balance: {}", coins(settlement.balance)));
    if settlement.attempts_left > 0 {
        lines.push(format!("({} left today)", rolls(settlement.attempts_left)));
    } else {
        lines.push("(no rolls left today)".to_string());
    }
    if settlement.tax.is_charged() {
        lines.push(format!(
            "The bank charged {} for {} idle days.",
            coins(settlement.tax.total),
            settlement.tax.days
        ));
    }
    lines.join("\n")
}

pub fn gift_code_advert(code: &str) -> Reply {
    Reply::text(format!(
        "By the way, someone else can claim a free roll with this gift code. \
         Send me /redeem {code} in a private chat. Who will be the fastest?"
    ))
}

pub fn gift_code_spent() -> Reply {
    Reply::text("There was a gift code here, but it has already been redeemed.")
}

pub fn house_code(code: &str) -> Reply {
    Reply::text(code.to_string())
}

pub fn balance(name: &str, report: &BalanceReport) -> Reply {
    let mut text = format!("{name}, your balance: {}", coins(report.state.coins));
    if !report.is_visible {
        text.push_str("\nYou are hidden from /top until you roll again.");
    }
    Reply::text(text)
}

pub fn standings(places: &[Place]) -> Reply {
    if places.is_empty() {
        return Reply::text("Nobody has rolled recently.");
    }
    let mut lines = vec!["Top players".to_string()];
    for place in places {
        let names: Vec<&str> = place
            .users
            .iter()
            .map(|(_, state)| state.display_name.as_str())
            .collect();
        let balance = place.users.first().map(|(_, state)| state.coins).unwrap_or(0);
        lines.push(format!(
            "{}. {} - {}",
            place.place,
            names.join(", "),
            coins(balance)
        ));
    }
    Reply::text(lines.join("\n"))
}

pub fn help() -> Reply {
    Reply::text(
        "Roll the slot machine to play. Every day you get a few rolls.\n\
         /balance shows your coins, /top the leaders, \
         /redeem <code> claims a gift code in a private chat.",
    )
}

pub fn redeem_in_private() -> Reply {
    Reply::text("Send me /redeem in a private chat to claim a free roll.")
}

pub fn captcha(challenge: &CaptchaChallenge, retry: bool) -> Reply {
    let intro = if retry {
        "Not quite, try another one."
    } else {
        "Prove you are human first."
    };
    let buttons: Vec<Button> = challenge
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| Button {
            label: item.clone(),
            data: captcha_callback(index),
        })
        .collect();
    Reply {
        text: format!("{intro}\nPick the picture for: {}", challenge.pattern),
        keyboard: buttons
            .chunks(CAPTCHA_ROW)
            .map(|row| row.to_vec())
            .collect(),
    }
}

pub fn captcha_closed() -> Reply {
    Reply::text("This captcha is no longer active.")
}

pub fn redeem_outcome(outcome: &RedeemOutcome) -> Reply {
    let text = match outcome {
        RedeemOutcome::Committed(redeemed) => format!(
            "That was fast! You have one more roll, valid until the daily reset ({} left today).",
            rolls(redeemed.attempts_left)
        ),
        RedeemOutcome::Aborted(reason) => abort_reason(*reason).to_string(),
    };
    Reply::text(text)
}

fn abort_reason(reason: AbortReason) -> &'static str {
    match reason {
        AbortReason::Malformed => "This code is not valid.",
        AbortReason::SelfRedeem => "Oops, you cannot redeem your own code.",
        AbortReason::NoHistory => {
            "Roll at least once before redeeming other players' codes."
        }
        AbortReason::AlreadyRedeemed => "Sorry, someone has already redeemed this code.",
        AbortReason::CaptchaFailed => "Wrong picture. The code stays unredeemed.",
        AbortReason::TimedOut => "Time is up. Send /redeem with the code again to restart.",
        AbortReason::TooSlow => {
            "Too late! Someone redeemed this code while you were solving the captcha."
        }
    }
}

pub fn failure() -> Reply {
    Reply::text("Something went wrong, please try again later.")
}
