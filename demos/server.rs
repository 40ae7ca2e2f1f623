//! Demo server: an in-memory token table for authentication, one anonymous
//! auth controller, and a note controller exercising the repository and the
//! transaction chain.
//!
//! Expects a `note` table: `CREATE TABLE note (id BIGSERIAL PRIMARY KEY,
//! title TEXT, body TEXT)`.

use async_trait::async_trait;
use gantry::db::Repository;
use gantry::{
    into_router, AppError, AuthUser, Authenticator, CallArgs, DbConfig, DbContext, Entity,
    FieldDef, Mode, ParamKind, Reply, RouteDef, RouteRegistry, ServerConfig, Verb,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone)]
struct Note {
    id: Option<i64>,
    title: Option<String>,
    body: Option<String>,
}

impl Entity for Note {
    fn type_name() -> &'static str {
        "Note"
    }
    fn fields() -> &'static [FieldDef] {
        const FIELDS: &[FieldDef] =
            &[FieldDef::id("id"), FieldDef::new("title"), FieldDef::new("body")];
        FIELDS
    }
}

/// Tokens handed out by `/auth/login`, resolved on every authenticated call.
#[derive(Default)]
struct TokenTable {
    tokens: RwLock<HashMap<String, AuthUser>>,
}

impl TokenTable {
    fn issue(&self, user: AuthUser) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens
            .write()
            .expect("token table")
            .insert(token.clone(), user);
        token
    }
}

#[async_trait]
impl Authenticator for TokenTable {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>, AppError> {
        Ok(self.tokens.read().expect("token table").get(token).cloned())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gantry=debug".parse()?))
        .init();

    let db_config = DbConfig::from_env()?;
    let pool = db_config.connect().await?;
    let db = DbContext::with_begin_deadline(pool, db_config.begin_deadline);

    let tokens = Arc::new(TokenTable::default());
    let server = ServerConfig::from_env()?;

    let mut registry = RouteRegistry::new(&server.mount_prefix);

    let issuer = Arc::clone(&tokens);
    registry.controller("AuthController").allow_anonymous().route(
        RouteDef::new("login")
            .param("username", ParamKind::Str)
            .handler(move |args: CallArgs| {
                let issuer = Arc::clone(&issuer);
                async move {
                    let username = args.str(0)?.to_string();
                    let user = AuthUser::new(1, json!({ "login": username }))
                        .with_roles(["user"]);
                    let token = issuer.issue(user);
                    Reply::json(json!({ "token": token }))
                }
            }),
    );

    let create_db = db.clone();
    let get_db = db.clone();
    let search_db = db.clone();
    let remove_db = db.clone();
    registry
        .controller("NoteController")
        .route(
            RouteDef::new("create")
                .param("note", ParamKind::Body)
                .param("user", ParamKind::User)
                .handler(move |args: CallArgs| {
                    let db = create_db.fork();
                    async move {
                        let note: Note = args.json(0)?;
                        let author = args.user(1)?.id;
                        tracing::debug!(author, "creating note");
                        let created = db
                            .in_transaction(|db| async move {
                                Repository::<Note>::new(&db).create(&note).await
                            })
                            .await?;
                        Reply::json(json!({ "created": created.unwrap_or(0) }))
                    }
                }),
        )
        .route(
            RouteDef::new("get")
                .verb(Verb::Get)
                .param("id", ParamKind::Int)
                .handler(move |args: CallArgs| {
                    let db = get_db.fork();
                    async move {
                        let id = args.int(0)?;
                        let note = Repository::<Note>::new(&db)
                            .get(id)
                            .await?
                            .ok_or_else(|| AppError::NotFound(format!("note {id}")))?;
                        Reply::json(note)
                    }
                }),
        )
        .route(
            RouteDef::new("search")
                .verb(Verb::Get)
                .opt_param("title", ParamKind::Str)
                .handler(move |args: CallArgs| {
                    let db = search_db.fork();
                    async move {
                        let title = args.opt_str(0)?.map(str::to_string);
                        let mut query = Repository::<Note>::new(&db).query();
                        if let Some(title) = &title {
                            query = query.like("title", title);
                        }
                        let notes = query.order_by_desc(["id"]).fetch_all().await?;
                        Reply::json(notes)
                    }
                }),
        )
        .route(
            RouteDef::new("remove")
                .param("id", ParamKind::Int)
                .require_role(["admin"], Mode::And)
                .handler(move |args: CallArgs| {
                    let db = remove_db.fork();
                    async move {
                        let id = args.int(0)?;
                        let removed = Repository::<Note>::new(&db).delete(id).await?;
                        Reply::json(json!({ "removed": removed }))
                    }
                }),
        );

    let app = into_router(registry, tokens);
    let listener = TcpListener::bind(server.bind_addr()).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
