use actix_web::{web, HttpRequest};
use serde::Deserialize;
use sqlx::{Executor, Sqlite};

use crate::core::csrf;
use crate::core::errors::ApiResult;
use crate::core::flash;
use crate::core::session::CurrentUser;
use crate::users;
use crate::AppState;

/// Idempotent; following someone twice leaves one edge.
pub async fn follow<'e, E>(db: E, follower_id: i64, followed_id: i64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT OR IGNORE INTO followers (follower_id, followed_id) VALUES (?, ?)")
        .bind(follower_id)
        .bind(followed_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn unfollow<'e, E>(db: E, follower_id: i64, followed_id: i64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM followers WHERE follower_id = ? AND followed_id = ?")
        .bind(follower_id)
        .bind(followed_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn is_following<'e, E>(db: E, follower_id: i64, followed_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM followers WHERE follower_id = ? AND followed_id = ?",
    )
    .bind(follower_id)
    .bind(followed_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

pub async fn followers_count<'e, E>(db: E, user_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM followers WHERE followed_id = ?")
        .bind(user_id)
        .fetch_one(db)
        .await
}

pub async fn following_count<'e, E>(db: E, user_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM followers WHERE follower_id = ?")
        .bind(user_id)
        .fetch_one(db)
        .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CsrfForm {
    pub csrf_token: String,
}

fn profile_url(username: &str) -> String {
    format!("/users/{}", urlencoding::encode(username))
}

/// `POST /follow/{username}`
pub async fn follow_user(
    req: HttpRequest,
    user: CurrentUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<CsrfForm>,
) -> ApiResult {
    csrf::verify(&req, &form.csrf_token)?;
    let username = path.into_inner();

    let Some(target) = users::find_by_username(&state.pool, &username).await? else {
        return Ok(flash::redirect("/index", Some("User not found.")));
    };
    if target.id == user.0.id {
        return Ok(flash::redirect(&profile_url(&username), Some("You cannot follow yourself!")));
    }

    follow(&state.pool, user.0.id, target.id).await?;
    tracing::info!(follower = user.0.id, followed = target.id, "followed");
    Ok(flash::redirect(&profile_url(&username), Some("You are now following this user.")))
}

/// `POST /unfollow/{username}`
pub async fn unfollow_user(
    req: HttpRequest,
    user: CurrentUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<CsrfForm>,
) -> ApiResult {
    csrf::verify(&req, &form.csrf_token)?;
    let username = path.into_inner();

    let Some(target) = users::find_by_username(&state.pool, &username).await? else {
        return Ok(flash::redirect("/index", Some("User not found.")));
    };
    if target.id == user.0.id {
        return Ok(flash::redirect(&profile_url(&username), Some("You cannot unfollow yourself!")));
    }

    unfollow(&state.pool, user.0.id, target.id).await?;
    tracing::info!(follower = user.0.id, unfollowed = target.id, "unfollowed");
    Ok(flash::redirect(
        &profile_url(&username),
        Some("You are no longer following this user."),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::connect_in_memory;

    async fn user(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        users::create_user(pool, name, &format!("{}@example.com", name), "hash")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn follow_is_idempotent_and_counted() {
        let pool = connect_in_memory().await.unwrap();
        let (john, susan) = (user(&pool, "john").await, user(&pool, "susan").await);

        follow(&pool, john, susan).await.unwrap();
        follow(&pool, john, susan).await.unwrap();
        assert!(is_following(&pool, john, susan).await.unwrap());
        assert!(!is_following(&pool, susan, john).await.unwrap());
        assert_eq!(followers_count(&pool, susan).await.unwrap(), 1);
        assert_eq!(following_count(&pool, john).await.unwrap(), 1);

        unfollow(&pool, john, susan).await.unwrap();
        unfollow(&pool, john, susan).await.unwrap();
        assert_eq!(followers_count(&pool, susan).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn database_refuses_self_follow() {
        let pool = connect_in_memory().await.unwrap();
        let john = user(&pool, "john").await;

        follow(&pool, john, john).await.unwrap();
        assert!(!is_following(&pool, john, john).await.unwrap());
        assert_eq!(following_count(&pool, john).await.unwrap(), 0);
    }
}
