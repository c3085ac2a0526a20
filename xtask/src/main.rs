use anyhow::{
    Context,
    Result,
    anyhow,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Dice bot helper tasks (clippy, tests, smoke run)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run the workspace tests
    Test {
        /// Only test the economy crate
        #[arg(long)]
        economy_only: bool,
    },
    /// Feed a scripted roll through the bot binary with a scratch data dir
    Smoke,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root()?;

    match cli.command {
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { economy_only } => run_tests(&root, economy_only)?,
        Commands::Smoke => run_smoke(&root)?,
    }

    Ok(())
}

fn repo_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("xtask has no parent directory"))
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("clippy")
        .arg("--workspace")
        .arg("--all-targets")
        .arg("--all-features")
        .arg("--")
        .arg("-D")
        .arg("warnings")
        .current_dir(root);
    run_command(cmd, "cargo clippy")
}

fn run_tests(root: &Path, economy_only: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test").current_dir(root);
    if economy_only {
        cmd.arg("-p").arg("economy");
        run_command(cmd, "cargo test -p economy")
    } else {
        cmd.arg("--workspace");
        run_command(cmd, "cargo test --workspace")
    }
}

fn run_smoke(root: &Path) -> Result<()> {
    let data_dir = root.join("target").join("smoke_data");
    if data_dir.exists() {
        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("clear {}", data_dir.display()))?;
    }
    let script = root.join("demos").join("session.jsonl");
    ensure!(script.exists(), "missing smoke script at {}", script.display());
    let input = std::fs::File::open(&script)
        .with_context(|| format!("open {}", script.display()))?;
    let mut cmd = Command::new("cargo");
    cmd.arg("run")
        .arg("-p")
        .arg("dice-bot")
        .arg("--quiet")
        .arg("--")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--code-grant-probability")
        .arg("1")
        .stdin(input)
        .current_dir(root);
    run_command(cmd, "dice-bot smoke run")
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
