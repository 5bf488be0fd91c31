use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;

use colloquy_channels::{run_console, ConsoleRuntime, ConsoleTransport};
use colloquy_core::Caller;
use colloquy_runtime::BotApp;

#[derive(Debug, Parser)]
#[command(name = "colloquy", about = "Talk to the colloquy demo bot from a terminal")]
pub struct Cli {
    #[arg(long, default_value = "configs/colloquy.yaml")]
    config: PathBuf,
    /// Id the console user talks as; also used as the chat id
    #[arg(long, default_value_t = 1)]
    user_id: i64,
    /// Language of the console user
    #[arg(long)]
    language: Option<String>,
    /// Read turns from a file instead of stdin ('#' comments supported)
    #[arg(long)]
    script: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        ensure_log_filter(self.verbose);

        let transport = Arc::new(ConsoleTransport::stdout());
        let mut app = BotApp::from_config_path(&self.config, transport)
            .await
            .with_context(|| format!("load bot from {}", self.config.display()))?;
        crate::demo::register(&mut app)
            .await
            .context("register demo triggers")?;

        let mut caller = Caller::new(self.user_id);
        if let Some(language) = self.language {
            caller = caller.with_language(language);
        }
        let runtime = ConsoleRuntime::new(app.router, caller);

        match self.script {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("read script file {}", path.display()))?;
                run_console(&runtime, BufReader::new(file), true).await?;
            }
            None => {
                println!("Type /help to begin, !<data> presses a button, Ctrl-D quits.");
                run_console(&runtime, BufReader::new(tokio::io::stdin()), false).await?;
            }
        }
        Ok(())
    }
}

fn ensure_log_filter(verbose: bool) {
    if env::var("RUST_LOG").is_ok() {
        return;
    }
    if verbose {
        env::set_var("RUST_LOG", "debug");
    }
}
