use actix_web::{web, HttpRequest};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tera::Context;

use crate::config::MAX_POST_LENGTH;
use crate::core::db::UnitOfWork;
use crate::core::errors::ApiResult;
use crate::core::forms::FormErrors;
use crate::core::helpers::now;
use crate::core::query_params::{limit_offset, PageQuery, Paginated, SearchQuery};
use crate::core::session::CurrentUser;
use crate::core::{csrf, flash};
use crate::i18n::detect_language;
use crate::models::{Post, PostView, User};
use crate::search::{SearchLoad, Searchable};
use crate::{templates, AppState};

const NEWEST_FIRST: &str = " ORDER BY posts.timestamp DESC, posts.id DESC LIMIT ? OFFSET ?";

/// Inserts a post inside `uow` and records it for the search index.
pub async fn insert_post(uow: &mut UnitOfWork, user_id: i64, body: &str) -> Result<Post, sqlx::Error> {
    let language = detect_language(body);
    let post = sqlx::query_as::<_, Post>(
        "INSERT INTO posts (body, timestamp, language, user_id) VALUES (?, ?, ?, ?) \
         RETURNING id, body, timestamp, language, user_id",
    )
    .bind(body)
    .bind(now())
    .bind(language)
    .bind(user_id)
    .fetch_one(uow.conn())
    .await?;
    uow.added(&post);
    Ok(post)
}

pub async fn update_post_body(uow: &mut UnitOfWork, post: &mut Post, body: &str) -> Result<(), sqlx::Error> {
    post.body = body.to_string();
    post.language = detect_language(body).map(str::to_string);
    sqlx::query("UPDATE posts SET body = ?, language = ? WHERE id = ?")
        .bind(&post.body)
        .bind(&post.language)
        .bind(post.id)
        .execute(uow.conn())
        .await?;
    uow.updated(&*post);
    Ok(())
}

pub async fn delete_post(uow: &mut UnitOfWork, post: &Post) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(post.id)
        .execute(uow.conn())
        .await?;
    uow.deleted(post);
    Ok(())
}

async fn page_of(
    pool: &SqlitePool,
    filter: &str,
    bind: Option<i64>,
    page: usize,
    per_page: usize,
    base: &str,
) -> Result<Paginated<PostView>, sqlx::Error> {
    let (limit, offset) = limit_offset(page, per_page);
    let sql = format!("{}{}{}", PostView::SELECT, filter, NEWEST_FIRST);
    let mut query = sqlx::query_as::<_, PostView>(&sql);
    if let Some(value) = bind {
        query = query.bind(value);
    }
    let rows = query.bind(limit).bind(offset).fetch_all(pool).await?;
    let rows = rows.into_iter().map(PostView::with_avatar).collect();
    Ok(Paginated::from_rows(rows, page, per_page, base))
}

/// Posts by the users `user_id` follows, newest first.
pub async fn timeline(
    pool: &SqlitePool,
    user_id: i64,
    page: usize,
    per_page: usize,
) -> Result<Paginated<PostView>, sqlx::Error> {
    page_of(
        pool,
        " JOIN followers ON followers.followed_id = posts.user_id WHERE followers.follower_id = ?",
        Some(user_id),
        page,
        per_page,
        "/index",
    )
    .await
}

pub async fn explore(pool: &SqlitePool, page: usize, per_page: usize) -> Result<Paginated<PostView>, sqlx::Error> {
    page_of(pool, "", None, page, per_page, "/explore").await
}

pub async fn user_posts(
    pool: &SqlitePool,
    user_id: i64,
    page: usize,
    per_page: usize,
    base: &str,
) -> Result<Paginated<PostView>, sqlx::Error> {
    page_of(pool, " WHERE posts.user_id = ?", Some(user_id), page, per_page, base).await
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub post: String,
}

impl PostForm {
    fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        if errors.required("post", &self.post) {
            errors.length("post", self.post.trim(), 1, MAX_POST_LENGTH);
        }
        errors
    }
}

async fn render_index(
    req: &HttpRequest,
    state: &AppState,
    user: &User,
    page: usize,
    form: &PostForm,
    errors: &FormErrors,
) -> ApiResult {
    let posts = timeline(&state.pool, user.id, page, state.config.posts_per_page).await?;
    let mut context = Context::new();
    context.insert("show_form", &true);
    context.insert("form", form);
    context.insert("errors", errors);
    context.insert("posts", &posts);
    templates::render(req, "index.html", "Home", context)
}

/// `GET /` and `GET /index`
pub async fn index(
    req: HttpRequest,
    user: CurrentUser,
    state: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> ApiResult {
    render_index(&req, &state, &user.0, query.page(), &PostForm::default(), &FormErrors::default()).await
}

/// `POST /` and `POST /index`
pub async fn create_post(
    req: HttpRequest,
    user: CurrentUser,
    state: web::Data<AppState>,
    form: web::Form<PostForm>,
) -> ApiResult {
    csrf::verify(&req, &form.csrf_token)?;
    let form = form.into_inner();
    let errors = form.validate();
    if !errors.is_empty() {
        return render_index(&req, &state, &user.0, 1, &form, &errors).await;
    }

    let mut uow = UnitOfWork::begin(&state.pool).await?;
    let post = insert_post(&mut uow, user.0.id, form.post.trim()).await?;
    uow.commit(&state.mirror).await?;

    tracing::info!(post_id = post.id, user_id = user.0.id, language = ?post.language, "post created");
    Ok(flash::redirect("/index", Some("Your post is now live!")))
}

/// `GET /explore`
pub async fn explore_page(
    req: HttpRequest,
    _user: CurrentUser,
    state: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> ApiResult {
    let posts = explore(&state.pool, query.page(), state.config.posts_per_page).await?;
    let mut context = Context::new();
    context.insert("show_form", &false);
    context.insert("posts", &posts);
    templates::render(&req, "index.html", "Explore", context)
}

/// `GET /search?q=...`
pub async fn search(
    req: HttpRequest,
    _user: CurrentUser,
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> ApiResult {
    let expression = query.q.trim();
    if expression.is_empty() {
        return Ok(flash::redirect("/explore", None));
    }

    let page = query.page();
    let per_page = state.config.posts_per_page;
    let (rows, total) = state
        .mirror
        .search::<PostView>(&state.pool, Post::index_name(), expression, page, per_page)
        .await?;
    let rows: Vec<PostView> = rows.into_iter().map(PostView::with_avatar).collect();

    let base = format!("/search?q={}", urlencoding::encode(expression));
    let posts = Paginated::from_total(rows, total, page, per_page, &base);

    let mut context = Context::new();
    context.insert("search_query", expression);
    context.insert("total", &total);
    context.insert("posts", &posts);
    templates::render(&req, "search.html", "Search", context)
}
