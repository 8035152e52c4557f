// src/bin/issue_admin_token.rs

use clap::Parser;
use exam_portal::{
    config::Config,
    utils::jwt::{ADMIN_ROLE, sign_jwt},
};

/// Issues a bearer token for the portal's admin routes.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Who the token is issued to; recorded in the `sub` claim.
    #[arg(long, default_value = "operator")]
    subject: String,

    /// Lifetime in seconds; defaults to JWT_EXPIRATION.
    #[arg(long)]
    expires_in: Option<u64>,
}

fn main() {
    let args = Args::parse();
    let config = Config::from_env();

    let expires_in = args.expires_in.unwrap_or(config.jwt_expiration);
    match sign_jwt(&args.subject, ADMIN_ROLE, &config.jwt_secret, expires_in) {
        Ok(token) => println!("{token}"),
        Err(e) => {
            eprintln!("failed to sign token: {e}");
            std::process::exit(1);
        }
    }
}
