use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;

use shared::domain::{AuthorSummary, CommentId, PostId, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: UserId,
    pub identity_subject: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub image: String,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn author_summary(&self) -> AuthorSummary {
        AuthorSummary {
            user_id: self.user_id,
            name: self.name.clone(),
            username: self.username.clone(),
            image: non_empty(self.image.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredProfile {
    pub user: StoredUser,
    pub follower_count: u64,
    pub following_count: u64,
    pub post_count: u64,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub identity_subject: &'a str,
    pub name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub image: &'a str,
}

#[derive(Debug, Clone)]
pub struct SyncedUser {
    pub user: StoredUser,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct StoredComment {
    pub comment_id: CommentId,
    pub post_id: PostId,
    pub author: AuthorSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredPost {
    pub post_id: PostId,
    pub author: AuthorSummary,
    pub content: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub liker_ids: Vec<UserId>,
    pub comments: Vec<StoredComment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: u64,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // every pooled connection to `sqlite::memory:` would open its own empty database
        let pool = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(connect_options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(connect_options)
                .await?
        };
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Find the user for an identity subject, creating it on first sign-in.
    /// Concurrent first sign-ins for one subject resolve to the same row.
    pub async fn sync_user(&self, new_user: &NewUser<'_>) -> Result<SyncedUser> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        if let Some(user) = user_by_identity_in(&mut tx, new_user.identity_subject).await? {
            tx.commit().await?;
            return Ok(SyncedUser {
                user,
                created: false,
            });
        }

        let username = available_username(&mut tx, new_user.username).await?;
        let inserted = sqlx::query(
            "INSERT INTO users (identity_subject, name, username, email, image)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(identity_subject) DO NOTHING
             RETURNING id, identity_subject, name, username, email, image, bio, created_at",
        )
        .bind(new_user.identity_subject)
        .bind(new_user.name)
        .bind(&username)
        .bind(new_user.email)
        .bind(new_user.image)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("failed to create user '{username}'"))?;

        let synced = match inserted {
            Some(row) => {
                let user = user_from_row(&row);
                info!(user_id = user.user_id.0, %username, "created user from identity provider");
                SyncedUser {
                    user,
                    created: true,
                }
            }
            None => {
                let user = user_by_identity_in(&mut tx, new_user.identity_subject)
                    .await?
                    .with_context(|| {
                        format!("user '{}' vanished after conflict", new_user.identity_subject)
                    })?;
                SyncedUser {
                    user,
                    created: false,
                }
            }
        };

        tx.commit().await?;
        Ok(synced)
    }

    pub async fn user_by_identity(&self, identity_subject: &str) -> Result<Option<StoredUser>> {
        let mut conn = self.pool.acquire().await?;
        user_by_identity_in(&mut conn, identity_subject).await
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, identity_subject, name, username, email, image, bio, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn profile_by_identity(&self, identity_subject: &str) -> Result<Option<StoredProfile>> {
        let Some(user) = self.user_by_identity(identity_subject).await? else {
            return Ok(None);
        };

        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                (SELECT COUNT(*) FROM follows WHERE follower_id = ?1),
                (SELECT COUNT(*) FROM posts WHERE author_id = ?1)",
        )
        .bind(user.user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(StoredProfile {
            user,
            follower_count: row.get::<i64, _>(0) as u64,
            following_count: row.get::<i64, _>(1) as u64,
            post_count: row.get::<i64, _>(2) as u64,
        }))
    }

    /// Returns `false` when the follow already existed.
    pub async fn follow_user(&self, follower: UserId, following: UserId) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO follows (follower_id, following_id) VALUES (?, ?)
             ON CONFLICT(follower_id, following_id) DO NOTHING",
        )
        .bind(follower.0)
        .bind(following.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unfollow_user(&self, follower: UserId, following: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower.0)
            .bind(following.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_post(
        &self,
        author_id: UserId,
        content: &str,
        image: Option<&str>,
    ) -> Result<PostId> {
        let rec = sqlx::query("INSERT INTO posts (author_id, content, image) VALUES (?, ?, ?) RETURNING id")
            .bind(author_id.0)
            .bind(content)
            .bind(image)
            .fetch_one(&self.pool)
            .await?;
        Ok(PostId(rec.get::<i64, _>(0)))
    }

    pub async fn post_author(&self, post_id: PostId) -> Result<Option<UserId>> {
        let row = sqlx::query("SELECT author_id FROM posts WHERE id = ?")
            .bind(post_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserId(r.get::<i64, _>(0))))
    }

    /// Newest post first; comments oldest first.
    pub async fn list_posts(&self) -> Result<Vec<StoredPost>> {
        self.load_posts(None).await
    }

    pub async fn load_post(&self, post_id: PostId) -> Result<Option<StoredPost>> {
        Ok(self.load_posts(Some(post_id)).await?.into_iter().next())
    }

    async fn load_posts(&self, only: Option<PostId>) -> Result<Vec<StoredPost>> {
        let only = only.map(|id| id.0);

        let post_rows = sqlx::query(
            "SELECT p.id, p.content, p.image, p.created_at, u.id, u.name, u.username, u.image
             FROM posts p
             INNER JOIN users u ON u.id = p.author_id
             WHERE (?1 IS NULL OR p.id = ?1)
             ORDER BY p.created_at DESC, p.id DESC",
        )
        .bind(only)
        .fetch_all(&self.pool)
        .await
        .context("failed to load posts")?;

        let like_rows = sqlx::query(
            "SELECT post_id, user_id FROM likes
             WHERE (?1 IS NULL OR post_id = ?1)
             ORDER BY id ASC",
        )
        .bind(only)
        .fetch_all(&self.pool)
        .await
        .context("failed to load likes")?;

        let comment_rows = sqlx::query(
            "SELECT c.id, c.post_id, c.content, c.created_at, u.id, u.name, u.username, u.image
             FROM comments c
             INNER JOIN users u ON u.id = c.author_id
             WHERE (?1 IS NULL OR c.post_id = ?1)
             ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(only)
        .fetch_all(&self.pool)
        .await
        .context("failed to load comments")?;

        let mut likers: HashMap<PostId, Vec<UserId>> = HashMap::new();
        for row in like_rows {
            likers
                .entry(PostId(row.get::<i64, _>(0)))
                .or_default()
                .push(UserId(row.get::<i64, _>(1)));
        }

        let mut comments: HashMap<PostId, Vec<StoredComment>> = HashMap::new();
        for row in comment_rows {
            let comment = comment_from_row(&row);
            comments.entry(comment.post_id).or_default().push(comment);
        }

        Ok(post_rows
            .into_iter()
            .map(|r| {
                let post_id = PostId(r.get::<i64, _>(0));
                StoredPost {
                    post_id,
                    author: AuthorSummary {
                        user_id: UserId(r.get::<i64, _>(4)),
                        name: r.get::<String, _>(5),
                        username: r.get::<String, _>(6),
                        image: non_empty(r.get::<String, _>(7)),
                    },
                    content: r.get::<String, _>(1),
                    image: r.get::<Option<String>, _>(2).and_then(non_empty),
                    created_at: r.get::<DateTime<Utc>, _>(3),
                    liker_ids: likers.remove(&post_id).unwrap_or_default(),
                    comments: comments.remove(&post_id).unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Flips the viewer's like on a post. `None` when the post does not exist.
    pub async fn toggle_like(&self, post_id: PostId, user_id: UserId) -> Result<Option<LikeState>> {
        // write lock before the existence read
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let exists = sqlx::query("SELECT 1 FROM posts WHERE id = ?")
            .bind(post_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let removed = sqlx::query("DELETE FROM likes WHERE post_id = ? AND user_id = ?")
            .bind(post_id.0)
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let liked = if removed == 0 {
            sqlx::query("INSERT INTO likes (post_id, user_id) VALUES (?, ?)")
                .bind(post_id.0)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await
                .context("failed to insert like")?;
            true
        } else {
            false
        };

        let like_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE post_id = ?")
            .bind(post_id.0)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(LikeState {
            liked,
            like_count: like_count as u64,
        }))
    }

    /// `None` when the post does not exist.
    pub async fn create_comment(
        &self,
        post_id: PostId,
        author_id: UserId,
        content: &str,
    ) -> Result<Option<StoredComment>> {
        if self.post_author(post_id).await?.is_none() {
            return Ok(None);
        }

        let rec = sqlx::query(
            "INSERT INTO comments (post_id, author_id, content) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(post_id.0)
        .bind(author_id.0)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        let comment_id = rec.get::<i64, _>(0);

        let row = sqlx::query(
            "SELECT c.id, c.post_id, c.content, c.created_at, u.id, u.name, u.username, u.image
             FROM comments c
             INNER JOIN users u ON u.id = c.author_id
             WHERE c.id = ?",
        )
        .bind(comment_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to reload created comment")?;

        Ok(Some(comment_from_row(&row)))
    }

    /// Removes the post together with its likes and comments.
    pub async fn delete_post(&self, post_id: PostId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM likes WHERE post_id = ?")
            .bind(post_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(post_id.0)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }
}

async fn user_by_identity_in(
    conn: &mut SqliteConnection,
    identity_subject: &str,
) -> Result<Option<StoredUser>> {
    let row = sqlx::query(
        "SELECT id, identity_subject, name, username, email, image, bio, created_at
         FROM users WHERE identity_subject = ?",
    )
    .bind(identity_subject)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}

async fn available_username(conn: &mut SqliteConnection, base: &str) -> Result<String> {
    let mut candidate = base.to_string();
    let mut suffix = 1u32;
    while username_taken(conn, &candidate).await? {
        suffix += 1;
        candidate = format!("{base}{suffix}");
    }
    Ok(candidate)
}

async fn username_taken(conn: &mut SqliteConnection, username: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

fn user_from_row(row: &SqliteRow) -> StoredUser {
    StoredUser {
        user_id: UserId(row.get::<i64, _>(0)),
        identity_subject: row.get::<String, _>(1),
        name: row.get::<String, _>(2),
        username: row.get::<String, _>(3),
        email: row.get::<String, _>(4),
        image: row.get::<String, _>(5),
        bio: row.get::<Option<String>, _>(6),
        created_at: row.get::<DateTime<Utc>, _>(7),
    }
}

fn comment_from_row(row: &SqliteRow) -> StoredComment {
    StoredComment {
        comment_id: CommentId(row.get::<i64, _>(0)),
        post_id: PostId(row.get::<i64, _>(1)),
        content: row.get::<String, _>(2),
        created_at: row.get::<DateTime<Utc>, _>(3),
        author: AuthorSummary {
            user_id: UserId(row.get::<i64, _>(4)),
            name: row.get::<String, _>(5),
            username: row.get::<String, _>(6),
            image: non_empty(row.get::<String, _>(7)),
        },
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
