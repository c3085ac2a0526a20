use anyhow::Context;
use clap::{
    ArgAction,
    Parser,
};
use dice_bot::app::{
    App,
    RunState,
    clickhouse_reporter::{
        ClickHouseConfig,
        ClickHouseReporter,
    },
    init_tracing,
    stdio::{
        StdinIntents,
        StdoutChat,
    },
};
use economy::{
    casino::Casino,
    clock::SystemClock,
    config::{
        DEFAULT_ATTEMPTS_LIMIT,
        DEFAULT_CAPTCHA_ATTEMPTS,
        DEFAULT_CAPTCHA_TIMEOUT_SECS,
        DEFAULT_CODE_GRANT_PROBABILITY,
        DEFAULT_DAY_OFFSET_HOURS,
        DEFAULT_HIDE_AFTER_DAYS,
        DEFAULT_KEY_NAMESPACE,
        DEFAULT_STAKE_PRICE,
        EconomyConfig,
    },
    store::SledStore,
    user::UserId,
};
use rand::{
    SeedableRng,
    rngs::StdRng,
};
use std::{
    fs,
    path::PathBuf,
};
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "true", action = ArgAction::Set)]
    tracing: bool,

    /// Write daily rolling log files here instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "DATA_DIR", default_value = "dice_bot_data")]
    data_dir: PathBuf,

    #[arg(long, env = "STAKE_PRICE", default_value_t = DEFAULT_STAKE_PRICE)]
    stake_price: i64,

    #[arg(long, env = "ATTEMPTS_LIMIT", default_value_t = DEFAULT_ATTEMPTS_LIMIT)]
    attempts_limit: u32,

    #[arg(long, env = "FREECODE_PROB", default_value_t = DEFAULT_CODE_GRANT_PROBABILITY)]
    code_grant_probability: f64,

    #[arg(
        long,
        env = "DAY_OFFSET_HOURS",
        default_value_t = DEFAULT_DAY_OFFSET_HOURS,
        allow_negative_numbers = true
    )]
    day_offset_hours: i32,

    /// Prefix of every persisted key; change it to start a new season.
    #[arg(long, env = "CURRENT_KEY", default_value = DEFAULT_KEY_NAMESPACE)]
    key_namespace: String,

    #[arg(long, env = "CAPTCHA_TIMEOUT_SECS", default_value_t = DEFAULT_CAPTCHA_TIMEOUT_SECS)]
    captcha_timeout_secs: u64,

    #[arg(long, env = "CAPTCHA_ATTEMPTS", default_value_t = DEFAULT_CAPTCHA_ATTEMPTS)]
    captcha_attempts: u8,

    #[arg(long, env = "HIDE_AFTER_DAYS", default_value_t = DEFAULT_HIDE_AFTER_DAYS)]
    hide_after_days: i64,

    #[arg(long, env = "ADMINS", value_delimiter = ',')]
    admins: Vec<i64>,

    #[arg(
        long,
        env = "CLICKHOUSE_CONNECT_URL",
        default_value = "http://localhost:8123"
    )]
    clickhouse_url: Url,

    #[arg(long, env = "CLICKHOUSE_TABLE", default_value = "events")]
    clickhouse_table: String,

    #[arg(long, env = "CLICKHOUSE_PROJECT", default_value = "fallback")]
    clickhouse_project: String,

    #[arg(
        long,
        env = "CLICKHOUSE_ENABLED",
        default_value = "false",
        action = ArgAction::Set
    )]
    clickhouse_enabled: bool,
}

impl Args {
    fn economy_config(&self) -> EconomyConfig {
        EconomyConfig {
            stake_price: self.stake_price,
            attempts_limit: self.attempts_limit,
            code_grant_probability: self.code_grant_probability,
            day_offset_hours: self.day_offset_hours,
            key_namespace: self.key_namespace.clone(),
            captcha_timeout_secs: self.captcha_timeout_secs,
            captcha_attempts: self.captcha_attempts,
            hide_after_days: self.hide_after_days,
        }
    }
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = if args.tracing {
        if let Some(dir) = &args.log_dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
        }
        init_tracing(args.log_dir.as_deref())
    } else {
        None
    };

    let config = args.economy_config();
    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("create data directory {}", args.data_dir.display()))?;
    tracing::info!(
        "Using sled storage directory {} with key namespace {}",
        args.data_dir.display(),
        config.key_namespace
    );
    let store = SledStore::open(&args.data_dir)?;

    let (reporter, flusher) = if args.clickhouse_enabled {
        let clickhouse = ClickHouseConfig::new(
            args.clickhouse_url.clone(),
            args.clickhouse_table.clone(),
            args.clickhouse_project.clone(),
        );
        let (reporter, handle) = ClickHouseReporter::spawn(clickhouse)?;
        tracing::info!("Reporting analytics to table {}", args.clickhouse_table);
        (reporter, Some(handle))
    } else {
        (ClickHouseReporter::disabled(), None)
    };

    let casino = Casino::new(store.clone(), reporter.clone(), SystemClock, config)
        .context("invalid economy configuration")?;
    let admins = args.admins.iter().copied().map(UserId);
    let mut app = App::new(
        StdinIntents::new(),
        StdoutChat::stdout(),
        casino,
        StdRng::from_os_rng(),
        admins,
    );

    tracing::info!("Starting dice bot");
    let result = loop {
        let interrupt = handle_interupt();
        match app.run(interrupt).await {
            Ok(RunState::Continue) => continue,
            Ok(RunState::Exit) => break Ok(()),
            Err(error) => break Err(error),
        }
    };

    tracing::info!("Exiting dice bot");
    reporter.shutdown().await;
    if let Some(handle) = flusher {
        if let Err(error) = handle.await {
            tracing::warn!("Analytics flusher ended abnormally: {error}");
        }
    }
    store.flush()?;
    result
}
