use std::path::PathBuf;

use clap::Parser;
use reminder_bot::config::Config;
use reminder_bot::daemon;
use reminder_bot::error::Result;

#[derive(Parser, Debug)]
#[command(name = "reminder-botd")]
#[command(about = "Reminder scheduling daemon", version)]
struct Cli {
    /// JSON config file. Missing files fall back to defaults.
    #[arg(long, env = "REMINDER_BOT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Reminder store file.
    #[arg(long)]
    store: Option<String>,

    /// IANA zone every reminder is interpreted in.
    #[arg(long)]
    timezone: Option<String>,

    #[arg(long, env = "REMINDER_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.daemon.host = host;
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(store) = self.store {
            config.store_path = Some(store);
        }
        if let Some(timezone) = self.timezone {
            config.timezone = timezone;
        }
        if let Some(token) = self.token {
            config.daemon.token = Some(token);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    reminder_bot::logging::init_tracing("reminder_botd");
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.timezone()?;

    daemon::supervise(config).await
}
