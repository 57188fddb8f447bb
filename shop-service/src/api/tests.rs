use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::Algorithm;
use serde_json::{json, Value};
use shared::auth::{TokenService, TokenSettings};
use tower::ServiceExt;
use uuid::Uuid;

use super::extract::CART_SESSION_HEADER;
use super::{create_router, AppState};
use crate::cart_store::MemoryCartStore;
use crate::models::{NewCategory, NewProduct, NewUser, Product, User};
use crate::repository::{CatalogRepository, MemoryStore, UserRepository};

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    tokens: TokenService,
}

#[derive(Default)]
struct Call<'a> {
    token: Option<&'a str>,
    session: Option<Uuid>,
    body: Option<Value>,
}

impl TestApp {
    fn new() -> Self {
        let tokens = TokenService::new(TokenSettings {
            secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            algorithm: Algorithm::HS256,
            access_ttl: chrono::Duration::minutes(15),
            refresh_ttl: chrono::Duration::days(30),
        })
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), Arc::new(MemoryCartStore::new()), tokens.clone());
        Self {
            router: create_router(state, Duration::from_secs(5)),
            store,
            tokens,
        }
    }

    async fn send(&self, method: Method, uri: &str, call: Call<'_>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = call.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(session) = call.session {
            request = request.header(CART_SESSION_HEADER, session.to_string());
        }
        let body = match call.body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    /// A user created straight in the store, with an access token.
    async fn user(&self, name: &str, superuser: bool) -> (User, String) {
        let user = self
            .store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                hashed_password: "unused".to_string(),
                is_active: true,
                is_superuser: superuser,
            })
            .await
            .unwrap();
        let token = self.tokens.issue_access(user.id, &user.username).unwrap();
        (user, token)
    }

    async fn product(&self, name: &str, price: &str, stock: i32) -> Product {
        let category = match self.store.get_category_by_slug("general").await.unwrap() {
            Some(category) => category,
            None => self
                .store
                .create_category(NewCategory {
                    name: "General".to_string(),
                    slug: "general".to_string(),
                    parent_id: None,
                })
                .await
                .unwrap(),
        };
        self.store
            .create_product(NewProduct {
                name: name.to_string(),
                slug: name.to_lowercase(),
                description: None,
                price: price.parse().unwrap(),
                stock,
                is_active: true,
                image: None,
                category_id: category.id,
            })
            .await
            .unwrap()
    }

    async fn stock_of(&self, id: i32) -> i32 {
        self.store.get_product(id).await.unwrap().unwrap().stock
    }
}

const ADDRESS: &str = "12 Long Street, Springfield";

#[tokio::test]
async fn health_check_answers() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/health", Call::default()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn register_login_and_token_types() {
    let app = TestApp::new();
    let credentials = json!({"username": "alice", "email": "alice@example.com", "password": "wonderland"});

    let (status, user) = app
        .send(Method::POST, "/api/v1/auth/register", Call { body: Some(credentials.clone()), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["username"], "alice");
    assert!(user.get("hashed_password").is_none());

    let (status, body) = app
        .send(Method::POST, "/api/v1/auth/register", Call { body: Some(credentials), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/auth/login",
            Call { body: Some(json!({"username": "alice", "password": "wrong"})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_credentials");

    let (status, tokens) = app
        .send(
            Method::POST,
            "/api/v1/auth/login",
            Call { body: Some(json!({"username": "alice", "password": "wonderland"})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tokens["token_type"], "bearer");
    let access = tokens["access_token"].as_str().unwrap().to_string();
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let (status, me) = app
        .send(Method::GET, "/api/v1/auth/me", Call { token: Some(&access), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");

    let (status, body) = app
        .send(Method::GET, "/api/v1/auth/me", Call { token: Some(&refresh), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "wrong_token_type");

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/auth/refresh",
            Call { body: Some(json!({"refresh_token": access})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, renewed) = app
        .send(
            Method::POST,
            "/api/v1/auth/refresh",
            Call { body: Some(json!({"refresh_token": refresh})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(renewed["access_token"].is_string());
}

#[tokio::test]
async fn missing_token_is_unauthenticated() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/api/v1/auth/me", Call::default()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn catalog_writes_need_an_administrator() {
    let app = TestApp::new();
    let (_, customer) = app.user("carol", false).await;
    let (_, admin) = app.user("root", true).await;
    app.product("Seed", "1.00", 1).await;
    let category_id = app.store.get_category_by_slug("general").await.unwrap().unwrap().id;
    let payload = json!({"name": "Fancy Lamp", "price": 19.99, "category_id": category_id, "stock": 4});

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/products",
            Call { token: Some(&customer), body: Some(payload.clone()), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, product) = app
        .send(
            Method::POST,
            "/api/v1/products",
            Call { token: Some(&admin), body: Some(payload), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(product["slug"], "fancy-lamp");
    assert_eq!(product["price"], "19.99");
}

#[tokio::test]
async fn cart_checkout_places_order_and_empties_cart() {
    let app = TestApp::new();
    let (_, token) = app.user("dave", false).await;
    let lamp = app.product("Lamp", "19.99", 5).await;
    let bulb = app.product("Bulb", "0.10", 10).await;

    let (status, session) = app.send(Method::POST, "/api/v1/cart/session", Call::default()).await;
    assert_eq!(status, StatusCode::CREATED);
    let session: Uuid = session["session_id"].as_str().unwrap().parse().unwrap();

    for (product_id, quantity) in [(lamp.id, 2), (bulb.id, 3)] {
        let (status, _) = app
            .send(
                Method::POST,
                "/api/v1/cart",
                Call {
                    session: Some(session),
                    body: Some(json!({"product_id": product_id, "quantity": quantity})),
                    ..Call::default()
                },
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, cart) = app
        .send(Method::GET, "/api/v1/cart", Call { session: Some(session), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total_items"], 5);
    assert_eq!(cart["total_price"], "40.28");

    let (status, order) = app
        .send(
            Method::POST,
            "/api/v1/cart/checkout",
            Call {
                token: Some(&token),
                session: Some(session),
                body: Some(json!({"shipping_address": ADDRESS})),
            },
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_price"], "40.28");
    assert_eq!(order["items"].as_array().unwrap().len(), 2);
    assert_eq!(app.stock_of(lamp.id).await, 3);
    assert_eq!(app.stock_of(bulb.id).await, 7);

    let (_, cart) = app
        .send(Method::GET, "/api/v1/cart", Call { session: Some(session), ..Call::default() })
        .await;
    assert_eq!(cart["items"], json!([]));

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/cart/checkout",
            Call {
                token: Some(&token),
                session: Some(session),
                body: Some(json!({"shipping_address": ADDRESS})),
            },
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_cart");
}

#[tokio::test]
async fn adding_more_than_stock_is_rejected() {
    let app = TestApp::new();
    let lamp = app.product("Lamp", "19.99", 2).await;
    let session = Uuid::new_v4();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/cart",
            Call {
                session: Some(session),
                body: Some(json!({"product_id": lamp.id, "quantity": 3})),
                ..Call::default()
            },
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "insufficient_stock");

    let (status, _) = app.send(Method::GET, "/api/v1/cart", Call::default()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn owner_cancel_restores_stock_and_strangers_are_refused() {
    let app = TestApp::new();
    let (_, owner) = app.user("erin", false).await;
    let (_, stranger) = app.user("frank", false).await;
    let lamp = app.product("Lamp", "19.99", 5).await;

    let (status, order) = app
        .send(
            Method::POST,
            "/api/v1/orders",
            Call {
                token: Some(&owner),
                body: Some(json!({
                    "shipping_address": ADDRESS,
                    "items": [{"product_id": lamp.id, "quantity": 3}],
                })),
                ..Call::default()
            },
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.stock_of(lamp.id).await, 2);
    let uri = format!("/api/v1/orders/{}/status?new_status=cancelled", order["id"]);

    let (status, _) = app
        .send(Method::GET, &format!("/api/v1/orders/{}", order["id"]), Call { token: Some(&stranger), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::PATCH, &uri, Call { token: Some(&stranger), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.stock_of(lamp.id).await, 2);

    let (status, cancelled) = app
        .send(Method::PATCH, &uri, Call { token: Some(&owner), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(app.stock_of(lamp.id).await, 5);

    let (status, body) = app
        .send(Method::PATCH, &uri, Call { token: Some(&owner), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(app.stock_of(lamp.id).await, 5);
}

#[tokio::test]
async fn unknown_status_is_a_validation_error() {
    let app = TestApp::new();
    let (_, admin) = app.user("root", true).await;
    let (status, body) = app
        .send(Method::GET, "/api/v1/orders/status/lost", Call { token: Some(&admin), ..Call::default() })
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn one_review_per_user_and_product() {
    let app = TestApp::new();
    let (_, token) = app.user("gina", false).await;
    let lamp = app.product("Lamp", "19.99", 5).await;
    let uri = format!("/api/v1/products/{}/reviews", lamp.id);

    let (status, body) = app
        .send(
            Method::POST,
            &uri,
            Call { token: Some(&token), body: Some(json!({"rating": 6})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, _) = app
        .send(
            Method::POST,
            &uri,
            Call { token: Some(&token), body: Some(json!({"rating": 4, "comment": "bright"})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send(
            Method::POST,
            &uri,
            Call { token: Some(&token), body: Some(json!({"rating": 2})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "duplicate_review");

    // Range checking comes before the duplicate lookup.
    let (status, body) = app
        .send(
            Method::POST,
            &uri,
            Call { token: Some(&token), body: Some(json!({"rating": 6})), ..Call::default() },
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, rating) = app
        .send(Method::GET, &format!("/api/v1/products/{}/rating", lamp.id), Call::default())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rating["total_reviews"], 1);
    assert_eq!(rating["average_rating"], 4.0);
}
