use std::fmt::Write as _;

use account_panel::config::normalize_base_url;
use account_panel::projection;
use account_panel::{
    ConfigError, GatewayConfig, HttpGateway, LoadOutcome, LoginOutcome, LogoutOutcome, Navigator, SessionState,
    SessionStore,
};
use clap::{Parser, Subcommand};

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("not signed in")]
    NotSignedIn,
    #[error("login could not be started")]
    LoginFailed,
    #[error("logout was rejected by the gateway (still signed in: {still_signed_in})")]
    LogoutFailed { still_signed_in: bool },
}

#[derive(Parser, Debug)]
#[command(name = "account-cli", about = "Account panel session CLI")]
struct Cli {
    /// API base URL.
    #[arg(long, env = "ACCOUNT_API_URL")]
    api_url: Option<String>,

    /// `session_id` cookie value.
    #[arg(long, env = "ACCOUNT_SESSION_TOKEN")]
    session_token: Option<String>,

    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Show the signed-in user's profile.
    Whoami,
    /// Print the identity-provider URL that starts a login.
    Login,
    /// End the gateway session.
    Logout,
    /// Dump the session state as JSON.
    Debug,
}

/// Prints the login URL instead of navigating; a terminal has no location bar.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn redirect(&self, url: &str) {
        println!("Open this URL to sign in:\n{url}");
    }
}

type Store = SessionStore<HttpGateway, TerminalNavigator>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = apply_overrides(GatewayConfig::from_env()?, cli.api_url.as_deref(), cli.session_token)?;
    tracing::debug!(base_url = %config.base_url, "using gateway");
    let store = SessionStore::new(HttpGateway::new(&config)?, TerminalNavigator);
    store.initialize().await;

    match cli.command {
        Command::Whoami => run_whoami(&store),
        Command::Login => run_login(&store).await,
        Command::Logout => run_logout(&store).await,
        Command::Debug => run_debug(&store),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn apply_overrides(
    mut config: GatewayConfig,
    api_url: Option<&str>,
    session_token: Option<String>,
) -> Result<GatewayConfig, ConfigError> {
    if let Some(api_url) = api_url {
        config.base_url = normalize_base_url(api_url)?;
    }
    if let Some(token) = session_token.filter(|token| !token.is_empty()) {
        config.session_token = Some(token);
    }
    Ok(config)
}

fn run_whoami(store: &Store) -> Result<(), CliError> {
    let state = store.state();
    if !state.is_authenticated() {
        return Err(CliError::NotSignedIn);
    }
    print!("{}", render_profile(&state));
    Ok(())
}

async fn run_login(store: &Store) -> Result<(), CliError> {
    match store.login().await {
        LoginOutcome::AlreadyAuthenticated => {
            println!("already signed in as {}", projection::username(&store.state()));
            Ok(())
        }
        LoginOutcome::Redirected => Ok(()),
        LoginOutcome::Failed => Err(CliError::LoginFailed),
    }
}

async fn run_logout(store: &Store) -> Result<(), CliError> {
    match store.logout().await {
        LogoutOutcome::AlreadyAnonymous => {
            println!("already signed out");
            Ok(())
        }
        LogoutOutcome::LoggedOut => {
            println!("signed out");
            Ok(())
        }
        LogoutOutcome::Failed { reconciled } => Err(CliError::LogoutFailed {
            still_signed_in: reconciled == LoadOutcome::Authenticated,
        }),
    }
}

fn run_debug(store: &Store) -> Result<(), CliError> {
    println!("{}", projection::snapshot_json(&store.state())?);
    Ok(())
}

fn render_profile(state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "name:     {}", projection::username(state));
    if let Some(user) = state.user() {
        let _ = writeln!(out, "email:    {}", user.email);
    }
    if let Some(role) = projection::role(state) {
        let _ = writeln!(out, "role:     {role}");
    }
    let _ = writeln!(out, "avatar:   {}", projection::avatar_url(state));
    let contexts = projection::contexts(state);
    if contexts.is_empty() {
        let _ = writeln!(out, "contexts: -");
    } else {
        let _ = writeln!(out, "contexts: {}", contexts.join(", "));
    }
    out
}
