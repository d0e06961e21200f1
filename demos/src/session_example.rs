use std::env;

use calendar_admin_auth::Navigator;
use calendar_admin_client::fetch::RequestOptions;
use calendar_admin_client::prelude::*;
use dotenv::dotenv;
use log::info;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    pretty_env_logger::init();

    let username = env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD")?;

    let client = AdminClient::new(ClientOptions::from_env()?)?;

    // A refresh cookie from a previous run is enough to get back in
    match client.restore().await {
        Some(snapshot) => info!("Resumed session for {:?}", snapshot.user.username),
        None => {
            let snapshot = client.login(&username, &password).await?;
            println!("Signed in: {:?}", snapshot);
        }
    }

    let _subscription = client.session().subscribe(|snapshot| {
        println!("Session changed: authenticated={}", snapshot.is_authenticated);
    });

    let calendars: Value = client
        .execute_json("/api/calendars", RequestOptions::get())
        .await?;
    println!("Calendars: {}", calendars);

    let created = client
        .execute(
            "/api/events",
            RequestOptions::post().json(&json!({
                "title": "Team sync",
                "start": "2026-10-19T09:00:00Z",
                "end": "2026-10-19T09:30:00Z"
            }))?,
        )
        .await;

    match created {
        Ok(response) => println!("Create event: {}", response.status()),
        Err(err) if err.is_auth_failure() => {
            println!(
                "Session ended, now at {}",
                client.navigator().current_path()
            );
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    client.logout().await;
    println!("Signed out, now at {}", client.navigator().current_path());

    Ok(())
}
