// Set a user's password by email, or create the user when --name is given.
// Usage: cargo run --bin reset_password -- <email> <new_password> [--name "Ann"]
//
// Goes through the same store and mutation hook as the API, so peers receive
// user_updated / user_created like for any other change.

use clap::Parser;

use user_service::config::{Config, NotifyMode};
use user_service::database::{self, PgUserStore};
use user_service::models::{NewUser, UserChanges, UserInput};
use user_service::services::user_store::hash_password;
use user_service::services::{event_publisher, MutationHook, MutationKind, ServiceNotifier, UserStore};

#[derive(Parser, Debug)]
#[command(name = "reset_password", about = "Reset a user's password")]
struct Args {
    /// Email of the user
    email: String,

    /// New password
    password: String,

    /// Create the user with this name if the email is unknown
    #[arg(long)]
    name: Option<String>,

    /// Database URL; defaults to DATABASE_URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_service=info".into()),
        )
        .init();

    let args = Args::parse();
    if args.password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    let mut config = Config::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    // A one-shot process must not exit before its notifications are sent.
    config.notify_mode = NotifyMode::Inline;

    let pool = database::new_pool(&config.database_url).await?;
    let store = PgUserStore::new(pool);
    let hook = MutationHook::new(
        event_publisher::from_config(&config).await,
        ServiceNotifier::from_config(&config)?,
    );

    let password_hash = hash_password(args.password.clone(), config.bcrypt_cost).await?;

    match store.find_by_email(&args.email).await? {
        Some(existing) => {
            let changes = UserChanges {
                password_hash: Some(password_hash),
                ..Default::default()
            };
            let user = store
                .update(existing.id, changes)
                .await?
                .ok_or_else(|| anyhow::anyhow!("User {} disappeared during update", existing.id))?;

            let input = UserInput {
                password: Some(args.password),
                ..Default::default()
            };
            hook.after_mutation(MutationKind::Updated, &user, Some(&input)).await;
            println!("Password updated for user {} ({})", user.id, user.email);
        }
        None => {
            let Some(name) = args.name else {
                anyhow::bail!("No user with email {}; pass --name to create one", args.email);
            };
            let user = store
                .create(NewUser {
                    name: name.clone(),
                    email: args.email.clone(),
                    password_hash,
                })
                .await?;

            let input = UserInput {
                name: Some(name),
                email: Some(args.email),
                password: Some(args.password),
            };
            hook.after_mutation(MutationKind::Created, &user, Some(&input)).await;
            println!("User created: {} ({})", user.id, user.email);
        }
    }

    // Give detached publisher tasks (Redis) a moment to flush.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    Ok(())
}
