//! Companies API with filtering, uploads and CSV export
//!
//! ```bash
//! cargo run --example companies
//! ```
//!
//! Then try:
//! - `curl 'http://localhost:3000/companies?name.like=ac&sort.employees=desc'`
//! - `curl -H 'x-content-type: csv' http://localhost:3000/companies`
//! - `curl -F name=Hooli -F logo=@logo.png http://localhost:3000/companies`

use axum::Router;
use crudman::{
    ActionConfig, ActionKind, Combinator, CrudService, LocalDiskStorage, ModelSchema,
    ModuleOptions, Registry, ResourceSection, SeaOrmAdapter, SortOrder, UploadSpec,
};
use sea_orm::{ConnectionTrait, Database, Schema};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod company {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "companies")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
        pub employees: i32,
        pub logo: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crudman=debug,info")))
        .init();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let db = Database::connect(&database_url).await?;
    let backend = db.get_database_backend();
    let mut create = Schema::new(backend).create_table_from_entity(company::Entity);
    db.execute(backend.build(create.if_not_exists())).await?;

    let companies = ResourceSection::new("companies", ModelSchema::from_entity::<company::Entity>())
        .adapter(SeaOrmAdapter::<company::Entity, company::ActiveModel>::new(db.clone()))
        .defaults(
            ActionConfig::new()
                .whitelist(["name", "employees"])
                .unique(["name"], Combinator::Or)
                .uploads(UploadSpec::new().field("logo", "image").storage("local")),
        )
        .action(
            ActionKind::List,
            ActionConfig::new().cache(Some(30)).order_by("name", SortOrder::Asc),
        );

    let registry = Registry::builder()
        .options(ModuleOptions::from_env())
        .storage(
            "local",
            LocalDiskStorage::new("./uploads").public_base_url("http://localhost:3000/uploads"),
        )
        .section(companies)
        .build();

    for route in registry.routes() {
        tracing::info!("{} {} -> {}", route.method, route.path, route.action);
    }

    let app = Router::new().merge(crudman::router(Arc::new(CrudService::new(registry))));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("Listening on http://0.0.0.0:3000");
    axum::serve(listener, app).await?;
    Ok(())
}
