use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::search::{SearchLoad, Searchable};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub about_me: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl User {
    pub fn avatar(&self, size: u32) -> String {
        avatar_url(&self.email, size)
    }
}

/// Gravatar identicon for an email address.
pub fn avatar_url(email: &str, size: u32) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!(
        "https://www.gravatar.com/avatar/{}?d=identicon&s={}",
        hex::encode(digest),
        size
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub language: Option<String>,
    pub user_id: i64,
}

impl Searchable for Post {
    const TABLE: &'static str = "posts";
    const SEARCHABLE_FIELDS: &'static [&'static str] = &["body"];

    fn search_id(&self) -> i64 {
        self.id
    }
}

impl SearchLoad for Post {
    const SELECT: &'static str = "SELECT id, body, timestamp, language, user_id FROM posts";
}

/// A post joined with what the templates need to know about its author.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub post: Post,
    pub author_username: String,
    #[serde(skip_serializing)]
    pub author_email: String,
    #[sqlx(skip)]
    pub author_avatar: String,
}

impl PostView {
    pub fn with_avatar(mut self) -> Self {
        self.author_avatar = avatar_url(&self.author_email, 36);
        self
    }
}

impl SearchLoad for PostView {
    const SELECT: &'static str = "SELECT posts.id AS id, posts.body AS body, \
        posts.timestamp AS timestamp, posts.language AS language, posts.user_id AS user_id, \
        users.username AS author_username, users.email AS author_email \
        FROM posts JOIN users ON users.id = posts.user_id";
    const ID_COLUMN: &'static str = "posts.id";
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: i64,
    pub remember: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetToken {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_ignores_case_and_whitespace() {
        assert_eq!(avatar_url(" Bob@Example.com ", 80), avatar_url("bob@example.com", 80));
        assert!(avatar_url("bob@example.com", 128).ends_with("?d=identicon&s=128"));
    }

    #[test]
    fn post_document_contains_only_searchable_fields() {
        let post = Post {
            id: 7,
            body: "apple pie".to_string(),
            timestamp: Utc::now(),
            language: Some("en".to_string()),
            user_id: 1,
        };
        assert_eq!(post.document(), serde_json::json!({"body": "apple pie"}));
        assert_eq!(Post::index_name(), "posts");
    }
}
