use lms_admin_client::{ApiClient, AuthSession, Config, RequestOptions};
use serde_json::Value;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional: enable basic logging for the example
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // Requires LMS_API_BASE_URL; refuses to start without it
    let client = ApiClient::new(Config::from_env()?)?;
    client.set_on_persistent_auth_failure(|| eprintln!("session expired; please sign in again"));

    let session = AuthSession::new(client.clone());
    let email = std::env::var("LMS_EMAIL")?;
    let password = std::env::var("LMS_PASSWORD")?;
    let user = session.login(&email, &password).await?;
    println!("signed in as {} {}", user.first_name, user.last_name);

    let students: Value = client
        .get(
            "/admin/students",
            RequestOptions::new().abort_key("students").query("page", 1),
        )
        .await?;
    println!("{students:#}");

    session.logout().await;
    Ok(())
}
