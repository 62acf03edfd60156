//! Command parsing and the handlers behind each subcommand.

use std::io::{self, Write};

use abrencare_core::{Config, GuardDecision, ProfileUpdate, RouteGuard, SessionManager};
use anyhow::{bail, Context, Result};
use tracing::warn;

pub const USAGE: &str = "\
Usage: abrencare <command>

Commands:
  login [username]            Log in (prompts for the password)
  register <username> [email] Create an account and log in
  logout                      End the session
  status [--json]             Show the current session
  profile                     Show the logged-in user's profile
  update-profile <field=value>...
                              Change profile fields (email, first_name,
                              last_name, phone_number, date_of_birth, city)
  refresh                     Exchange the refresh token for a new access token
  help                        Show this message

Environment:
  ABRENCARE_USERNAME, ABRENCARE_PASSWORD   Non-interactive credentials
  ABRENCARE_BASE_URL                       Backend origin override
  ABRENCARE_STORE                          keyring | file | memory
  RUST_LOG                                 Log filter (default: warn)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: Option<String> },
    Register { username: String, email: Option<String> },
    Logout,
    Status { json: bool },
    Profile,
    UpdateProfile(ProfileUpdate),
    Refresh,
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut args = args.iter().map(String::as_str);
        let command = match args.next() {
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("login") => Command::Login {
                username: args.next().map(str::to_string),
            },
            Some("register") => {
                let username = args
                    .next()
                    .ok_or_else(|| "register needs a username".to_string())?
                    .to_string();
                Command::Register {
                    username,
                    email: args.next().map(str::to_string),
                }
            }
            Some("logout") => Command::Logout,
            Some("status") => {
                let json = match args.next() {
                    None => false,
                    Some("--json") => true,
                    Some(other) => return Err(format!("Unknown status option: {}", other)),
                };
                Command::Status { json }
            }
            Some("profile") => Command::Profile,
            Some("update-profile") => {
                let mut update = ProfileUpdate::default();
                for change in args.by_ref() {
                    let (field, value) = change
                        .split_once('=')
                        .ok_or_else(|| format!("Expected field=value, got '{}'", change))?;
                    update.set(field, value)?;
                }
                if update.is_empty() {
                    return Err("update-profile needs at least one field=value".to_string());
                }
                Command::UpdateProfile(update)
            }
            Some("refresh") => Command::Refresh,
            Some(other) => return Err(format!("Unknown command: {}", other)),
        };

        if let Some(extra) = args.next() {
            return Err(format!("Unexpected argument: {}", extra));
        }
        Ok(command)
    }
}

pub async fn run(command: Command, session: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { username } => login(session, config, username).await,
        Command::Register { username, email } => register(session, config, &username, email.as_deref()).await,
        Command::Logout => {
            session.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Command::Status { json } => status(session, json).await,
        Command::Profile => profile(session, config).await,
        Command::UpdateProfile(update) => {
            require_login(session, config, "update your profile").await?;
            let user = session
                .update_profile(&update)
                .await
                .context("Could not update profile")?;
            println!("Profile updated for {}.", user.display_name());
            Ok(())
        }
        Command::Refresh => {
            session.refresh_token().await?;
            println!("Session refreshed.");
            Ok(())
        }
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

async fn login(session: &SessionManager, config: &mut Config, username: Option<String>) -> Result<()> {
    let snapshot = session.snapshot();
    if let Some(user) = snapshot.user().filter(|_| snapshot.is_authenticated()) {
        println!("Already logged in as {}. Run `abrencare logout` first.", user.username);
        return Ok(());
    }

    let username = match username.or_else(|| std::env::var("ABRENCARE_USERNAME").ok()) {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = read_password("Password: ")?;

    println!("Authenticating...");
    let user = session.login(&username, &password).await.context("Login failed")?;

    remember_username(config, &user.username);
    println!("Logged in as {}.", user.display_name());
    Ok(())
}

async fn register(
    session: &SessionManager,
    config: &mut Config,
    username: &str,
    email: Option<&str>,
) -> Result<()> {
    let password = read_password("Choose a password: ")?;
    if std::env::var("ABRENCARE_PASSWORD").is_err() {
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if confirm != password {
            bail!("Passwords do not match");
        }
    }

    let user = session
        .register(username, &password, email)
        .await
        .context("Could not create account")?;

    remember_username(config, &user.username);
    println!("Account created. Logged in as {}.", user.display_name());
    Ok(())
}

async fn status(session: &SessionManager, json: bool) -> Result<()> {
    let snapshot = session.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Origin:  {}", session.origin());
    println!("Session: {}", snapshot.state.display_name());
    if let Some(user) = snapshot.user() {
        println!("User:    {} (id {})", user.display_name(), user.id);
        if let Some(ref email) = user.email {
            println!("Email:   {}", email);
        }
        if session.needs_refresh().await {
            println!("Access token is about to expire; run `abrencare refresh`.");
        }
    }
    Ok(())
}

/// Protected screens go through the route guard, which either lets them show
/// or sends the user through login first.
async fn require_login(session: &SessionManager, config: &mut Config, purpose: &str) -> Result<()> {
    match RouteGuard::decide(&session.snapshot()) {
        GuardDecision::Allow => Ok(()),
        GuardDecision::RedirectToLogin => {
            println!("You need to log in to {}.", purpose);
            login(session, config, None).await
        }
        GuardDecision::Wait => bail!("Session is still loading, try again"),
    }
}

async fn profile(session: &SessionManager, config: &mut Config) -> Result<()> {
    require_login(session, config, "view your profile").await?;

    if let Err(e) = session.refresh_if_needed().await {
        warn!(error = %e, "Token refresh failed, trying the current token");
    }

    let user = session.fetch_profile().await.context("Could not load profile")?;

    println!("Username: {}", user.username);
    println!("Name:     {}", user.display_name());
    let optional = [
        ("Email:   ", &user.email),
        ("Phone:   ", &user.phone_number),
        ("City:    ", &user.city),
        ("Born:    ", &user.date_of_birth),
    ];
    for (label, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            println!("{} {}", label, value);
        }
    }
    Ok(())
}

fn remember_username(config: &mut Config, username: &str) {
    config.last_username = Some(username.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => bail!("Username required"),
        (false, _) => Ok(input.to_string()),
    }
}

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var("ABRENCARE_PASSWORD") {
        return Ok(password);
    }
    Ok(rpassword::prompt_password(prompt)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args(&[])), Ok(Command::Help));
        assert_eq!(
            Command::parse(&args(&["login"])),
            Ok(Command::Login { username: None })
        );
        assert_eq!(
            Command::parse(&args(&["login", "alice"])),
            Ok(Command::Login { username: Some("alice".to_string()) })
        );
        assert_eq!(
            Command::parse(&args(&["register", "bob", "bob@example.com"])),
            Ok(Command::Register {
                username: "bob".to_string(),
                email: Some("bob@example.com".to_string()),
            })
        );
        assert_eq!(Command::parse(&args(&["status", "--json"])), Ok(Command::Status { json: true }));
        assert_eq!(Command::parse(&args(&["logout"])), Ok(Command::Logout));

        let mut update = ProfileUpdate::default();
        update.city = Some("Adama".to_string());
        update.phone_number = Some("+251911000000".to_string());
        assert_eq!(
            Command::parse(&args(&["update-profile", "city=Adama", "phone_number=+251911000000"])),
            Ok(Command::UpdateProfile(update))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(&args(&["register"])).is_err());
        assert!(Command::parse(&args(&["frobnicate"])).is_err());
        assert!(Command::parse(&args(&["logout", "now"])).is_err());
        assert!(Command::parse(&args(&["status", "--yaml"])).is_err());
        assert!(Command::parse(&args(&["update-profile"])).is_err());
        assert!(Command::parse(&args(&["update-profile", "city"])).is_err());
        assert!(Command::parse(&args(&["update-profile", "is_superuser=true"])).is_err());
    }
}
