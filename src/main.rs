//! kc-session CLI binary entry point.

use keycloak_session::cli::{auth, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();

    let session = match auth::open_session(cli.config.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Status => auth::handle_status(&session).await,
        Commands::Claims => auth::handle_claims(&session).await,
        Commands::Login => auth::handle_login(&session).await,
        Commands::Refresh => auth::handle_refresh(&session).await,
        Commands::Logout(args) => auth::handle_logout(&session, args.everywhere).await,
        Commands::Userinfo => auth::handle_userinfo(&session).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
