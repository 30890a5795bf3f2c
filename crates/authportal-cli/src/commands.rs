//! Command handlers. Each one drives the shared `SessionManager` and prints
//! results to stdout; failures come back as user-facing messages.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

use authportal_core::config::DEFAULT_API_URL;
use authportal_core::{ApiError, Role, SessionEvent, SessionManager, SessionState, User};

/// Turn a core error into the message the user should see
pub fn user_error(e: ApiError) -> anyhow::Error {
    debug!(error = %e, "Command failed");
    anyhow!(e.user_message())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{} [y/N]: ", question))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

fn print_user(user: &User) {
    println!("Signed in as {} <{}>", user.name, user.email);
    println!("  id:   {}", user.id);
    println!("  role: {}", user.role);
    if user.has_google_account() {
        println!("  linked to Google");
    }
}

fn print_users(users: &[User]) {
    if users.is_empty() {
        println!("No users.");
        return;
    }

    println!("{:<26} {:<24} {:<32} {:<6} {}", "ID", "NAME", "EMAIL", "ROLE", "JOINED");
    for user in users {
        let joined = user
            .created_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<26} {:<24} {:<32} {:<6} {}",
            user.id, user.name, user.email, user.role, joined
        );
    }
    println!("{} user(s)", users.len());
}

fn print_state(state: &SessionState) {
    match state {
        SessionState::Authenticated(user) => {
            println!("Session: {} as {} ({})", state.label(), user.email, user.role)
        }
        other => println!("Session: {}", other.label()),
    }
}

/// Check the session and insist on an admin account
async fn require_admin(manager: &SessionManager) -> Result<User> {
    let user = manager
        .bootstrap()
        .await
        .map_err(user_error)?
        .ok_or_else(|| anyhow!("Please log in to continue"))?;

    if !user.is_admin() {
        bail!("Admin access required");
    }
    Ok(user)
}

pub async fn status(manager: &SessionManager) -> Result<()> {
    println!("API: {}", manager.config().api_url);
    match manager.bootstrap().await {
        Ok(Some(user)) => print_user(&user),
        Ok(None) => println!("Not signed in."),
        Err(e) => {
            println!("Not signed in.");
            return Err(user_error(e));
        }
    }
    Ok(())
}

pub async fn login(manager: &SessionManager, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.to_string(),
        None => prompt("Email: ")?,
    };
    let password = prompt_password()?;

    println!("\nSigning in...");
    let user = manager.login(&email, &password).await.map_err(user_error)?;
    print_user(&user);
    Ok(())
}

pub async fn signup(manager: &SessionManager) -> Result<()> {
    let name = prompt("Name: ")?;
    let email = prompt("Email: ")?;
    let password = prompt_password()?;

    println!("\nCreating account...");
    let user = manager
        .signup(&name, &email, &password)
        .await
        .map_err(user_error)?;
    print_user(&user);
    Ok(())
}

pub async fn logout(manager: &SessionManager) -> Result<()> {
    manager.logout().await;
    println!("Signed out.");
    Ok(())
}

pub async fn users(manager: &SessionManager) -> Result<()> {
    require_admin(manager).await?;
    let users = manager.list_users().await.map_err(user_error)?;
    print_users(&users);
    Ok(())
}

pub async fn set_role(manager: &SessionManager, user_id: &str, role: &str) -> Result<()> {
    let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
    require_admin(manager).await?;

    let users = manager
        .set_user_role(user_id, role)
        .await
        .map_err(user_error)?;
    println!("Role of {} set to {}.\n", user_id, role);
    print_users(&users);
    Ok(())
}

pub async fn delete_user(manager: &SessionManager, user_id: &str) -> Result<()> {
    let admin = require_admin(manager).await?;
    if admin.id == user_id {
        println!("Warning: this is your own account.");
    }

    if !confirm(&format!("Delete user {}? This cannot be undone.", user_id))? {
        println!("Cancelled.");
        return Ok(());
    }

    let users = manager.delete_user(user_id).await.map_err(user_error)?;
    println!("Deleted {}.\n", user_id);
    print_users(&users);
    Ok(())
}

pub fn google(manager: &SessionManager) -> Result<()> {
    println!("Open this URL in a browser to sign in with Google:\n");
    println!("  {}\n", manager.google_sign_in_url());
    println!("Then run `authportal callback '<redirect url>'` with the URL you land on.");
    Ok(())
}

pub async fn callback(manager: &SessionManager, url: &str) -> Result<()> {
    match manager.complete_oauth_callback(url).await.map_err(user_error)? {
        Some(user) => print_user(&user),
        None => println!("No tokens or error found in that URL."),
    }
    Ok(())
}

/// Follow session state and periodic user lists until Ctrl+C or sign-out
pub async fn watch(manager: &SessionManager) -> Result<()> {
    let mut events = manager
        .take_events()
        .context("Session events are already being consumed")?;
    let mut state = manager.subscribe();

    if let Err(e) = manager.bootstrap().await {
        println!("{}", e.user_message());
    }
    let current = state.borrow_and_update().clone();
    print_state(&current);
    let Some(user) = current.user() else {
        return Ok(());
    };

    let config = manager.config();
    if !config.auto_refresh {
        println!("Auto refresh is disabled; nothing to watch.");
        return Ok(());
    }
    if user.is_admin() {
        println!(
            "Refreshing the user list every {}s. Press Ctrl+C to stop.",
            config.refresh_period().as_secs()
        );
    } else {
        println!("Watching the session. Press Ctrl+C to stop.");
    }

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                print_state(&current);
                if matches!(current, SessionState::Unauthenticated) {
                    break;
                }
            }
            Some(event) = events.recv() => match event {
                SessionEvent::Users(users) => {
                    println!();
                    print_users(&users);
                }
                SessionEvent::Error(message) => eprintln!("Refresh failed: {}", message),
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    Ok(())
}

pub async fn config(manager: &SessionManager, args: &[String]) -> Result<()> {
    let Some(sub) = args.first() else {
        bail!("Usage: authportal config <show|set-api-url|toggle-theme|reset|detect>");
    };

    match sub.as_str() {
        "show" => {
            let rendered = serde_json::to_string_pretty(&manager.config())?;
            println!("{}", rendered);
        }
        "set-api-url" => {
            let url = args
                .get(1)
                .ok_or_else(|| anyhow!("Usage: authportal config set-api-url <url>"))?;
            manager.set_api_url(url).map_err(user_error)?;
            println!("API URL set to {}", manager.config().api_url);
            // The stored tokens belong to whichever API issued them
            status(manager).await?;
        }
        "toggle-theme" => {
            let theme = manager.toggle_theme().map_err(user_error)?;
            println!("Theme: {}", theme.as_str());
        }
        "reset" => {
            let config = manager.reset_config().map_err(user_error)?;
            println!("Configuration reset. API URL: {}", config.api_url);
        }
        "detect" => {
            let mut candidates: Vec<String> = args[1..].to_vec();
            if candidates.is_empty() {
                candidates.push(manager.config().api_url);
                if candidates[0] != DEFAULT_API_URL {
                    candidates.push(DEFAULT_API_URL.to_string());
                }
            }

            match manager.detect_api_url(&candidates).await.map_err(user_error)? {
                Some(url) => println!("Using {}", url),
                None => bail!("No reachable API among: {}", candidates.join(", ")),
            }
        }
        other => bail!("Unknown config command: {}", other),
    }
    Ok(())
}
