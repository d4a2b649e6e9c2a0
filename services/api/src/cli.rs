use crate::server;
use captureget::config::AppConfig;
use captureget::error::AppError;
use captureget::identity::{Role, TokenKeys};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "CaptureGet",
    about = "Run the CaptureGet recruitment pipeline service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Issue a bearer token signed with the configured secret, for local testing
    Token(TokenArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct TokenArgs {
    /// Company or candidate identifier carried as the token subject
    #[arg(long)]
    pub(crate) subject: String,
    /// Either `user` or `company`
    #[arg(long, value_parser = parse_role)]
    pub(crate) role: Role,
    /// Token lifetime in hours
    #[arg(long, default_value_t = 24)]
    pub(crate) ttl_hours: i64,
}

pub(crate) fn parse_role(raw: &str) -> Result<Role, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "user" | "candidate" => Ok(Role::User),
        "company" => Ok(Role::Company),
        other => Err(format!("unknown role '{other}', expected 'user' or 'company'")),
    }
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Token(args) => issue_token(args),
    }
}

fn issue_token(args: TokenArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let keys = TokenKeys::new(&config.auth.jwt_secret);
    let token = keys.issue(&args.subject, args.role, chrono::Duration::hours(args.ttl_hours))?;
    println!("{token}");
    Ok(())
}
