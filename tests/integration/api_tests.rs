//! API integration tests
//!
//! Need a running server (with any storage backend) on localhost:8080.

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to create an author, a book and a member, returns (book_id, member_id)
async fn seed(client: &Client, copies: i32) -> (i64, i64) {
    let author: Value = client
        .post(format!("{}/authors", BASE_URL))
        .json(&json!({ "first_name": "Octavia", "last_name": "Butler" }))
        .send()
        .await
        .expect("Failed to create author")
        .json()
        .await
        .expect("Failed to parse author");

    let book: Value = client
        .post(format!("{}/books", BASE_URL))
        .json(&json!({
            "title": "Kindred",
            "author_id": author["id"],
            "total_copies": copies
        }))
        .send()
        .await
        .expect("Failed to create book")
        .json()
        .await
        .expect("Failed to parse book");

    // Unique per run, members.email is unique
    let email = format!("reader{}@example.org", book["id"]);
    let member: Value = client
        .post(format!("{}/members", BASE_URL))
        .json(&json!({ "first_name": "Ada", "last_name": "Lovelace", "email": email }))
        .send()
        .await
        .expect("Failed to create member")
        .json()
        .await
        .expect("Failed to parse member");

    (
        book["id"].as_i64().expect("No book id"),
        member["id"].as_i64().expect("No member id"),
    )
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
async fn test_readiness_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn test_loan_and_return() {
    let client = Client::new();
    let (book_id, member_id) = seed(&client, 1).await;

    let response = client
        .post(format!("{}/books/{}/loan", BASE_URL, book_id))
        .json(&json!({ "member_id": member_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);

    let response = client
        .post(format!("{}/books/{}/loan", BASE_URL, book_id))
        .json(&json!({ "member_id": member_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "NoCopiesAvailable");

    let response = client
        .post(format!("{}/books/{}/return_book", BASE_URL, book_id))
        .json(&json!({ "member_id": member_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);

    let book: Value = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(book["available_copies"], 1);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_loans_respect_copies() {
    let client = Client::new();
    let (book_id, _) = seed(&client, 2).await;

    let mut members = Vec::new();
    for i in 0..8 {
        let member: Value = client
            .post(format!("{}/members", BASE_URL))
            .json(&json!({
                "first_name": "Reader",
                "last_name": format!("{}", i),
                "email": format!("race{}-{}@example.org", book_id, i)
            }))
            .send()
            .await
            .expect("Failed to create member")
            .json()
            .await
            .expect("Failed to parse member");
        members.push(member["id"].as_i64().expect("No member id"));
    }

    let mut handles = Vec::new();
    for member_id in members {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .post(format!("{}/books/{}/loan", BASE_URL, book_id))
                .json(&json!({ "member_id": member_id }))
                .send()
                .await
                .expect("Failed to send request")
                .status()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.expect("Task panicked") == 201 {
            created += 1;
        }
    }
    assert_eq!(created, 2);
}

#[tokio::test]
#[ignore]
async fn test_book_listing_is_cached() {
    let client = Client::new();
    seed(&client, 1).await;

    let first = client
        .get(format!("{}/books/list?page=1&page_size=10", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");
    assert!(first.status().is_success());
    let first = first.bytes().await.expect("Failed to read body");

    let second = client
        .get(format!("{}/books/list?page=1&page_size=10", BASE_URL))
        .send()
        .await
        .expect("Failed to send request")
        .bytes()
        .await
        .expect("Failed to read body");

    assert_eq!(first, second);
    let page: Value = serde_json::from_slice(&first).expect("Failed to parse page");
    assert!(page["results"].is_array());
}
