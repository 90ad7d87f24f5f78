use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    AutoConfirm, BroadcastNotifier, ConfirmationGate, DeletionOutcome, FeedView, HttpBackend,
    NoticeLevel, PostView, ViewerActions,
};
use shared::{
    domain::PostId,
    protocol::{CreatePostRequest, SyncUserRequest},
    time::format_relative,
};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server_url: String,
    /// Identity provider subject; omit to browse signed out.
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Feed,
    Post {
        content: String,
        #[arg(long)]
        image: Option<String>,
    },
    Like {
        post_id: i64,
    },
    Comment {
        post_id: i64,
        text: String,
    },
    Delete {
        post_id: i64,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    Profile,
    Tasks {
        #[arg(long)]
        add: Option<String>,
    },
}

struct StdinConfirm;

#[async_trait]
impl ConfirmationGate for StdinConfirm {
    async fn confirm(&self, item_id: PostId) -> bool {
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            print!("Delete post {item_id}? This cannot be undone. [y/N] ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim(), "y" | "Y" | "yes"),
            Ok(Err(err)) => {
                warn!(error = %err, "failed to read confirmation");
                false
            }
            Err(err) => {
                warn!(error = %err, "confirmation prompt panicked");
                false
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let args = Args::parse();

    let backend = Arc::new(HttpBackend::new(&args.server_url)?);
    if let Some(subject) = &args.subject {
        let identity = backend
            .sign_in(&SyncUserRequest {
                identity_subject: subject.clone(),
                username: args.username.clone(),
                email_addresses: args.email.iter().cloned().collect(),
                ..SyncUserRequest::default()
            })
            .await?;
        println!("Signed in as @{} (user_id={})", identity.username, identity.user_id);
    }

    let notifier = Arc::new(BroadcastNotifier::new(16));
    let mut notices = notifier.subscribe();
    let gate: Arc<dyn ConfirmationGate> = match &args.command {
        Command::Delete { yes: true, .. } => Arc::new(AutoConfirm(true)),
        _ => Arc::new(StdinConfirm),
    };

    match args.command {
        Command::Feed => {
            let feed = load_feed(&backend, gate, notifier).await?;
            for view in feed.posts().await {
                print_post(&view).await;
            }
        }
        Command::Post { content, image } => {
            let post = backend.create_post(&CreatePostRequest { content, image }).await?;
            println!("created post_id={}", post.post_id);
        }
        Command::Like { post_id } => {
            let feed = load_feed(&backend, gate, notifier).await?;
            let view = find_post(&feed, post_id).await?;
            match view.toggle_like().await {
                Ok(state) => println!(
                    "{} ({} likes)",
                    if state.has_liked { "liked" } else { "unliked" },
                    state.like_count
                ),
                Err(err) => println!("{err}"),
            }
        }
        Command::Comment { post_id, text } => {
            let feed = load_feed(&backend, gate, notifier).await?;
            let view = find_post(&feed, post_id).await?;
            view.set_comment_draft(text).await;
            if let Err(err) = view.submit_comment().await {
                println!("{err}");
            }
        }
        Command::Delete { post_id, .. } => {
            let feed = load_feed(&backend, gate, notifier).await?;
            match feed.delete_post(PostId(post_id)).await {
                Ok(DeletionOutcome::Declined) => println!("kept post {post_id}"),
                Ok(DeletionOutcome::Removed) => {}
                Err(err) => println!("{err}"),
            }
        }
        Command::Profile => {
            let subject = args
                .subject
                .as_deref()
                .ok_or_else(|| anyhow!("--subject is required to show a profile"))?;
            let profile = backend.profile(subject).await?;
            println!("{} (@{})", profile.user.name, profile.user.username);
            if let Some(bio) = &profile.user.bio {
                println!("{bio}");
            }
            println!(
                "{} posts, {} followers, {} following",
                profile.post_count, profile.follower_count, profile.following_count
            );
        }
        Command::Tasks { add } => {
            if let Some(title) = add {
                let task = backend.create_task(&title).await?;
                println!("created task {}", task.id);
            }
            for task in backend.list_tasks().await? {
                let mark = if task.completed { "x" } else { " " };
                println!("[{mark}] {} {}", task.id, task.title);
            }
        }
    }

    loop {
        match notices.try_recv() {
            Ok(notice) => match notice.level {
                NoticeLevel::Success => println!("{}", notice.message),
                NoticeLevel::Error => eprintln!("{}", notice.message),
            },
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    Ok(())
}

async fn load_feed(
    backend: &Arc<HttpBackend>,
    gate: Arc<dyn ConfirmationGate>,
    notifier: Arc<BroadcastNotifier>,
) -> Result<FeedView> {
    let posts = backend.list_posts().await?;
    Ok(FeedView::load(backend.clone(), posts, gate, notifier).await)
}

async fn find_post(feed: &FeedView, post_id: i64) -> Result<Arc<PostView>> {
    feed.post(PostId(post_id))
        .await
        .ok_or_else(|| anyhow!("post {post_id} not found"))
}

async fn print_post(view: &PostView) {
    let post = view.post();
    let likes = view.likes().await;
    println!(
        "#{} {} @{} - {}",
        post.post_id,
        post.author.name,
        post.author.username,
        format_relative(post.created_at, Utc::now())
    );
    if !post.content.is_empty() {
        println!("  {}", post.content);
    }
    if let Some(image) = &post.image {
        println!("  [image] {image}");
    }
    let comments = view.comments().await;
    println!(
        "  {} likes{}, {} comments",
        likes.like_count,
        if likes.has_liked { " (you)" } else { "" },
        comments.len()
    );
    for comment in comments {
        println!(
            "    @{}: {} ({})",
            comment.author.username,
            comment.content,
            format_relative(comment.created_at, Utc::now())
        );
    }
    if matches!(view.actions(), ViewerActions::Interactive { can_delete: true, .. }) {
        println!("  (yours: `delete {}` to remove)", post.post_id);
    }
}
