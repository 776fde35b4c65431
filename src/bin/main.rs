use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use clap::{Parser, Subcommand};

use microblog::config::Config;
use microblog::core::session::load_current_user;
use microblog::models::Post;
use microblog::search::Searchable;
use microblog::{configure, logging, AppState};

/// Microblog web server and maintenance commands
#[derive(Parser, Debug)]
#[command(name = "microblog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server (default)
    Serve,
    /// Create the search index if it does not exist
    CreateIndex,
    /// Rebuild the search index from the database
    Reindex,
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.bind_address.clone();
    let data = web::Data::new(state);

    tracing::info!(address = %bind, search = data.mirror.is_enabled(), "microblog starting");

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(from_fn(load_current_user))
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind(&bind)?
    .run()
    .await?;

    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    logging::init(&config.log_format);

    let state = AppState::from_config(config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::CreateIndex => {
            state.mirror.create_index(Post::index_name()).await?;
            Ok(())
        }
        Command::Reindex => {
            state.mirror.create_index(Post::index_name()).await?;
            let report = state.mirror.reindex::<Post>(&state.pool).await?;
            tracing::info!(indexed = report.indexed, failed = report.failed, "reindex complete");
            Ok(())
        }
    }
}
