use chrono::{Duration, Utc};
use pastyshop_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{coupon, product},
    events::{self, EventSender},
    message_queue::InMemoryMessageQueue,
    services::recommender::InMemoryScoreStore,
    sessions::InMemorySessionStore,
    AppServices, AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Test fixture: the full service graph on an in-memory sqlite database
/// with in-memory session, score and queue backends. No live services.
pub struct TestApp {
    pub state: AppState,
    pub queue: Arc<InMemoryMessageQueue>,
    pub scores: Arc<InMemoryScoreStore>,
}

pub async fn spawn_app() -> TestApp {
    // One connection: every handle must see the same in-memory database.
    let db_cfg = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let db = Arc::new(
        db::establish_connection_with_config(&db_cfg)
            .await
            .expect("sqlite connection"),
    );
    db::run_migrations(&db).await.expect("migrations");

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(events::process_events(rx));
    let event_sender = Arc::new(EventSender::new(tx));

    let sessions = Arc::new(InMemorySessionStore::new());
    let scores = Arc::new(InMemoryScoreStore::new());
    let queue = Arc::new(InMemoryMessageQueue::new());

    let mut cfg = AppConfig::new("sqlite::memory:", "redis://127.0.0.1", "127.0.0.1", 0, "test");
    cfg.payment_webhook_secret = Some("whsec_test".to_string());

    let services = AppServices::build(
        db.clone(),
        sessions,
        scores.clone(),
        queue.clone(),
        event_sender,
        &cfg,
    );

    TestApp {
        state: AppState {
            db,
            redis: None,
            config: Arc::new(cfg),
            services,
        },
        queue,
        scores,
    }
}

pub async fn insert_product(app: &TestApp, name: &str, price: Decimal) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        slug: Set(name.to_lowercase().replace(' ', "-")),
        description: Set(None),
        price: Set(price),
        available: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("insert product")
}

pub async fn insert_coupon(app: &TestApp, code: &str, percent: i32, active: bool) -> coupon::Model {
    let now = Utc::now();
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        discount_percent: Set(percent),
        valid_from: Set(now - Duration::days(1)),
        valid_to: Set(now + Duration::days(1)),
        active: Set(active),
        created_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("insert coupon")
}

/// Customer fixture shared by the order tests.
pub fn customer() -> pastyshop_api::services::orders::CustomerInfo {
    pastyshop_api::services::orders::CustomerInfo {
        first_name: "Demelza".to_string(),
        last_name: "Trewartha".to_string(),
        email: "demelza@example.com".to_string(),
        address: "3 Harbour Row".to_string(),
        postal_code: "TR11 3XA".to_string(),
        city: "Falmouth".to_string(),
    }
}
