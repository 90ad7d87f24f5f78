use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::{
    domain::UserId,
    protocol::{CreatePostRequest, SyncUserRequest},
    time::format_relative,
};
use storage::{NewUser, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/feed.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    SyncUser {
        identity_subject: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    CreatePost {
        author_user_id: i64,
        content: String,
        #[arg(long)]
        image: Option<String>,
    },
    Follow {
        follower_user_id: i64,
        following_user_id: i64,
    },
    ListPosts,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::SyncUser {
            identity_subject,
            username,
            first_name,
            last_name,
            email,
        } => {
            let request = SyncUserRequest {
                identity_subject,
                first_name,
                last_name,
                username,
                email_addresses: email.into_iter().collect(),
                image_url: None,
            };
            request.validate().map_err(|err| anyhow!(err.message))?;
            let username = request.resolved_username().unwrap_or_default();
            let synced = storage
                .sync_user(&NewUser {
                    identity_subject: &request.identity_subject,
                    name: &request.display_name(),
                    username: &username,
                    email: request.primary_email().unwrap_or_default(),
                    image: "",
                })
                .await?;
            let verb = if synced.created { "created" } else { "found" };
            println!(
                "{verb} user_id={} username={}",
                synced.user.user_id, synced.user.username
            );
        }
        Command::CreatePost {
            author_user_id,
            content,
            image,
        } => {
            let request = CreatePostRequest { content, image };
            request.validate().map_err(|err| anyhow!(err.message))?;
            let author = UserId(author_user_id);
            if storage.get_user(author).await?.is_none() {
                return Err(anyhow!("unknown user {author}"));
            }
            let post_id = storage
                .create_post(author, request.content.trim(), request.image.as_deref())
                .await?;
            println!("created post_id={post_id}");
        }
        Command::Follow {
            follower_user_id,
            following_user_id,
        } => {
            let added = storage
                .follow_user(UserId(follower_user_id), UserId(following_user_id))
                .await?;
            if added {
                println!("user {follower_user_id} now follows {following_user_id}");
            } else {
                println!("user {follower_user_id} already follows {following_user_id}");
            }
        }
        Command::ListPosts => {
            let now = Utc::now();
            for post in storage.list_posts().await? {
                println!(
                    "#{} @{} ({}) likes={} comments={}",
                    post.post_id,
                    post.author.username,
                    format_relative(post.created_at, now),
                    post.liker_ids.len(),
                    post.comments.len()
                );
                if !post.content.is_empty() {
                    println!("  {}", post.content);
                }
            }
        }
    }

    Ok(())
}
