use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header::CONTENT_TYPE};
use crudman::{
    CrudService, MemoryStorage, ModelSchema, ModuleOptions, Registry, ResourceSection, SeaOrmAdapter,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database, DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub mod company {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "companies")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
        pub employees: i32,
        pub price: f64,
        pub active: bool,
        pub logo: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub type CompanyAdapter = SeaOrmAdapter<company::Entity, company::ActiveModel>;

// Helper function to get database URL from environment or default to SQLite
fn get_test_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

#[allow(dead_code)]
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let database_url = get_test_database_url();
    let db = Database::connect(&database_url).await?;
    if database_url.starts_with("sqlite::memory:") {
        Migrator::up(&db, None).await?;
    } else {
        // Persistent databases keep rows between runs
        Migrator::fresh(&db).await?;
    }
    Ok(db)
}

/// Database with four companies:
///
/// | id | name          | employees | price | active |
/// |----|---------------|-----------|-------|--------|
/// | 1  | Acme Corp     | 10        | 9.5   | true   |
/// | 2  | Globex        | 250       | 120.0 | true   |
/// | 3  | Initech       | 40        | 45.0  | false  |
/// | 4  | Acme Holdings | 5         | 300.0 | true   |
#[allow(dead_code)]
pub async fn setup_seeded_db() -> Result<DatabaseConnection, DbErr> {
    let db = setup_test_db().await?;
    let rows = [
        ("Acme Corp", 10, 9.5, true),
        ("Globex", 250, 120.0, true),
        ("Initech", 40, 45.0, false),
        ("Acme Holdings", 5, 300.0, true),
    ];
    for (name, employees, price, active) in rows {
        company::ActiveModel {
            name: Set(name.to_string()),
            employees: Set(employees),
            price: Set(price),
            active: Set(active),
            logo: Set(None),
            ..Default::default()
        }
        .insert(&db)
        .await?;
    }
    Ok(db)
}

/// The `companies` section backed by Sea-ORM, before any per-test configuration.
#[allow(dead_code)]
pub fn companies_section(db: &DatabaseConnection) -> ResourceSection {
    ResourceSection::new("companies", ModelSchema::from_entity::<company::Entity>())
        .adapter(CompanyAdapter::new(db.clone()))
}

#[allow(dead_code)]
pub fn setup_test_app(section: ResourceSection, options: ModuleOptions) -> Router {
    let registry = Registry::builder()
        .options(options)
        .storage("memory", MemoryStorage::new())
        .section(section)
        .build();
    Router::new().nest("/api/v1", crudman::router(Arc::new(CrudService::new(registry))))
}

#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|err| {
            panic!("invalid JSON ({err}): {}", String::from_utf8_lossy(&self.body))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body: body.to_vec(),
    }
}

#[allow(dead_code)]
pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

#[allow(dead_code)]
pub async fn send_json(app: &Router, method: &str, uri: &str, body: &Value) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// Names from a list response, in response order.
#[allow(dead_code)]
pub fn names(body: &Value) -> Vec<String> {
    body["data"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Migrations
// ============================================================================

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateCompanyTable)]
    }
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
    Name,
    Employees,
    Price,
    Active,
    Logo,
}

pub struct CreateCompanyTable;

impl MigrationName for CreateCompanyTable {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_company_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateCompanyTable {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Companies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Companies::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Companies::Name).string().not_null())
                    .col(ColumnDef::new(Companies::Employees).integer().not_null().default(0))
                    .col(ColumnDef::new(Companies::Price).double().not_null().default(0.0))
                    .col(ColumnDef::new(Companies::Active).boolean().not_null().default(true))
                    .col(ColumnDef::new(Companies::Logo).string().null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Companies::Table).to_owned())
            .await
    }
}
