pub mod analytics;
pub mod captcha;
pub mod casino;
pub mod clock;
pub mod config;
pub mod ledger;
pub mod redemption;
pub mod reels;
pub mod store;
pub mod tax;
pub mod user;
pub mod vault;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type Error = anyhow::Error;
