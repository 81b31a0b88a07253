//! API integration tests
//!
//! These run against a live server with a seeded admin account.

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to get an admin access token
async fn get_admin_token(client: &Client) -> String {
    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": "admin@bibliotheca.org",
            "password": "admin-password"
        }))
        .send()
        .await
        .expect("Failed to send login request");

    let body: Value = response.json().await.expect("Failed to parse login response");
    body["access_token"]
        .as_str()
        .expect("No access token in response")
        .to_string()
}

/// Helper to register and log in a fresh reader account
async fn get_reader_token(client: &Client) -> String {
    let email = format!("reader-{}@bibliotheca.org", std::process::id());

    let _ = client
        .post(format!("{}/auth/register", BASE_URL))
        .json(&json!({
            "email": email,
            "password": "reader-password",
            "name": "Test",
            "surname": "Reader"
        }))
        .send()
        .await
        .expect("Failed to send register request");

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": email,
            "password": "reader-password"
        }))
        .send()
        .await
        .expect("Failed to send login request");

    let body: Value = response.json().await.expect("Failed to parse login response");
    body["access_token"]
        .as_str()
        .expect("No access token in response")
        .to_string()
}

/// Helper to create a book as admin, returning its id
async fn create_test_book(client: &Client, admin_token: &str) -> i64 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .header("Authorization", format!("Bearer {}", admin_token))
        .json(&json!({
            "name": "Integration Test Book",
            "author": "Test Author",
            "description": "A book created by the integration suite",
            "cover_image_url": "https://covers.example.org/test.jpg",
            "reader_url": "https://reader.example.org/test"
        }))
        .send()
        .await
        .expect("Failed to send create book request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    body["id"].as_i64().expect("No book ID")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_login() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": "admin@bibliotheca.org",
            "password": "admin-password"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
}

#[tokio::test]
#[ignore]
async fn test_login_invalid_credentials() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": "admin@bibliotheca.org",
            "password": "wrong"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_refresh_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": "admin@bibliotheca.org",
            "password": "admin-password"
        }))
        .send()
        .await
        .expect("Failed to send request");

    let body: Value = response.json().await.expect("Failed to parse response");
    let refresh_token = body["refresh_token"].as_str().expect("No refresh token");

    let response = client
        .post(format!("{}/auth/refresh", BASE_URL))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["access_token"].is_string());
}

#[tokio::test]
#[ignore]
async fn test_profile() {
    let client = Client::new();
    let token = get_admin_token(&client).await;

    let response = client
        .get(format!("{}/auth/profile", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["email"], "admin@bibliotheca.org");
    assert!(body["borrowed_books"].is_array());
    // Password hash must never leak
    assert!(body.get("password").is_none());
}

#[tokio::test]
#[ignore]
async fn test_list_books() {
    let client = Client::new();
    let token = get_admin_token(&client).await;

    let response = client
        .get(format!("{}/books", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body.is_array());
}

#[tokio::test]
#[ignore]
async fn test_create_and_delete_book() {
    let client = Client::new();
    let token = get_admin_token(&client).await;

    let book_id = create_test_book(&client, &token).await;

    let response = client
        .delete(format!("{}/books/{}", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 204);
}

#[tokio::test]
#[ignore]
async fn test_create_book_requires_admin() {
    let client = Client::new();
    let token = get_reader_token(&client).await;

    let response = client
        .post(format!("{}/books", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({
            "name": "Should Fail",
            "author": "Nobody",
            "description": "Readers cannot create books",
            "cover_image_url": "https://covers.example.org/fail.jpg",
            "reader_url": "https://reader.example.org/fail"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}

#[tokio::test]
#[ignore]
async fn test_borrow_read_return_flow() {
    let client = Client::new();
    let admin_token = get_admin_token(&client).await;
    let reader_token = get_reader_token(&client).await;
    let book_id = create_test_book(&client, &admin_token).await;

    // Borrow
    let response = client
        .post(format!("{}/books/{}/borrow", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send borrow request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    let book_token = body["token"].as_str().expect("No borrow token").to_string();
    assert!(body["expires_at"].is_string());

    // Borrowing the same book again must conflict
    let response = client
        .post(format!("{}/books/{}/borrow", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send borrow request");

    assert_eq!(response.status(), 409);

    // Read with the token
    let response = client
        .get(format!("{}/books/{}/read", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", reader_token))
        .header("Book-Token", &book_token)
        .send()
        .await
        .expect("Failed to send read request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["reader_url"].is_string());

    // Reading without a token is denied
    let response = client
        .get(format!("{}/books/{}/read", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send read request");

    assert_eq!(response.status(), 401);

    // The live list includes the loan
    let response = client
        .get(format!("{}/transactions/active", BASE_URL))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["expired_count"], 0);
    assert!(body["live_loans"]
        .as_array()
        .unwrap()
        .iter()
        .any(|l| l["token"] == book_token.as_str()));

    // Return
    let response = client
        .post(format!("{}/transactions/{}/return", BASE_URL, book_token))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send return request");

    assert!(response.status().is_success());

    // Returning again is harmless
    let response = client
        .post(format!("{}/transactions/{}/return", BASE_URL, book_token))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send return request");

    assert!(response.status().is_success());

    // The returned token no longer grants access
    let response = client
        .get(format!("{}/books/{}/read?token={}", BASE_URL, book_id, book_token))
        .header("Authorization", format!("Bearer {}", reader_token))
        .send()
        .await
        .expect("Failed to send read request");

    assert_eq!(response.status(), 401);

    // Cleanup
    let _ = client
        .delete(format!("{}/books/{}", BASE_URL, book_id))
        .header("Authorization", format!("Bearer {}", admin_token))
        .send()
        .await;
}

#[tokio::test]
#[ignore]
async fn test_list_users_requires_admin() {
    let client = Client::new();
    let token = get_reader_token(&client).await;

    let response = client
        .get(format!("{}/users", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}

#[tokio::test]
#[ignore]
async fn test_list_transactions_as_admin() {
    let client = Client::new();
    let token = get_admin_token(&client).await;

    let response = client
        .get(format!("{}/transactions", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body.is_array());
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .get(format!("{}/books", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}
