//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use librored_core::api::ApiClient;
use librored_core::auth::AuthSession;
use librored_core::config::paths;

pub async fn login(client: &ApiClient, username: &str, password: Option<String>) -> Result<()> {
    let password = resolve_password(password)?;

    let snapshot = client
        .login(username, &password)
        .await
        .context("Login failed")?;

    let session_path = paths::session_path();
    if let Some(identity) = snapshot.identity.filter(|_| snapshot.logged_in) {
        println!("✓ Logged in as {}", identity.username);
        println!("  Session saved to: {}", session_path.display());
    } else {
        // Tokens were stored, but the session reads as logged out
        eprintln!("Warning: Login succeeded but the access token could not be read; not logged in");
        println!("Credentials saved to: {}", session_path.display());
        println!("  Run `librored whoami` to check the session state.");
    }
    Ok(())
}

pub async fn register(
    client: &ApiClient,
    username: &str,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let password = resolve_password(password)?;

    let message = client
        .register(username, email, &password)
        .await
        .context("Registration failed")?;

    println!("✓ {message}");
    println!("  Run `librored login --username {username}` to start a session.");
    Ok(())
}

pub async fn logout(client: &ApiClient) -> Result<()> {
    if client.logout().await? {
        println!("✓ Logged out");
        println!("  Session removed from: {}", paths::session_path().display());
    } else {
        println!("Not logged in (no session found).");
    }
    Ok(())
}

pub fn whoami(session: &AuthSession) {
    let snapshot = session.snapshot();
    let Some(identity) = snapshot.identity.filter(|_| snapshot.logged_in) else {
        println!("Not logged in.");
        return;
    };

    println!("Logged in as {} (unverified token claims)", identity.username);
    if let Some(id) = &identity.id {
        println!("  id:    {id}");
    }
    if !identity.email.is_empty() {
        println!("  email: {}", identity.email);
    }
    if !identity.roles.is_empty() {
        let roles: Vec<&str> = identity.roles.iter().map(String::as_str).collect();
        println!("  roles: {}", roles.join(", "));
    }
    if identity.is_admin_hint() {
        println!("  admin: yes (display only; the server decides)");
    }
}

/// Uses the flag value, or reads one line from stdin.
fn resolve_password(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }

    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("read password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password.to_string())
}
