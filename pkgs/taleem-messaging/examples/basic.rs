use taleem_messaging::{MessagingClient, MessagingConfig, Role, UserRef};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let me = UserRef {
        id: "aeo-14".to_string(),
        username: "nilore.aeo".to_string(),
        role: Role::AEO,
        school_name: None,
    };

    let config = MessagingConfig::new(
        "https://dashboard.example.org",
        "wss://dashboard.example.org",
        std::env::var("TALEEM_TOKEN")?,
        me,
    );

    let client = MessagingClient::new(config)?;
    client.start().await?;
    client.open_surface().await?;

    println!("Conversations:");
    for conv in client.conversations() {
        let preview = conv
            .latest_message
            .map(|m| m.text)
            .unwrap_or_else(|| "(no messages)".to_string());
        println!(
            "  {} [{} unread] {}",
            conv.subject_label, conv.unread_count, preview
        );
    }

    // Follow the badge count as pushes and polls come in
    let mut badge = client.subscribe_unread();
    loop {
        badge.changed().await?;
        println!("Unread total: {}", *badge.borrow());
    }
}
