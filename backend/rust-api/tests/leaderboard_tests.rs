use axum::http::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

mod common;

async fn play(app: &common::TestApp, token: &str, quiz_id: &str, correct: &[bool]) {
    let (_, started) = app.start(token, quiz_id).await;
    let id = started["session"]["id"].as_str().unwrap().to_string();
    for (i, is_correct) in correct.iter().enumerate() {
        let answer = json!({
            "answer": {
                "questionId": format!("q{}", i),
                "answer": "x",
                "isCorrect": is_correct,
                "timeSpent": 5
            }
        });
        let (status, _) = app
            .post(&format!("/api/v1/attempts/{}/answers", id), token, Some(answer))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = app
        .post(&format!("/api/v1/attempts/{}/finish", id), token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

/// Rewards are applied off the request path; wait until `expected` rows show up.
async fn leaderboard_with(app: &common::TestApp, token: &str, expected: usize) -> Value {
    for _ in 0..100 {
        let (status, body) = app.get("/api/v1/leaderboard", token).await;
        assert_eq!(status, StatusCode::OK);
        if body["leaderboard"].as_array().map_or(0, |rows| rows.len()) >= expected {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("leaderboard never reached {} rows", expected);
}

#[tokio::test]
async fn finished_attempts_feed_the_leaderboard() {
    let app = common::create_test_app();
    let ada = app.token("ada", "Ada");
    let bob = app.token("bob", "Bob");

    // 3 correct, fast: 30 + 10 + 7.5 + 4.5 = 52
    play(&app, &ada, "quiz-1", &[true, true, true]).await;
    // 1 of 2 correct, fast: 10 + 1.5, no accuracy bonus
    play(&app, &bob, "quiz-1", &[true, false]).await;

    let body = leaderboard_with(&app, &ada, 2).await;
    let rows = body["leaderboard"].as_array().unwrap();
    assert_eq!(rows[0]["userId"], "ada");
    assert_eq!(rows[0]["name"], "Ada");
    assert_eq!(rows[0]["xp"], 52);
    assert_eq!(rows[0]["position"], 1);
    assert_eq!(rows[0]["rank"], "Novice");
    assert_eq!(rows[1]["userId"], "bob");
    assert_eq!(rows[1]["xp"], 12);
    assert_eq!(rows[1]["position"], 2);
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn repeated_finish_does_not_double_the_reward() {
    let app = common::create_test_app();
    let token = app.token("ada", "Ada");
    let (_, started) = app.start(&token, "quiz-1").await;
    let id = started["session"]["id"].as_str().unwrap().to_string();
    let finish = json!({
        "answers": [{ "questionId": "q1", "answer": 1, "isCorrect": true, "timeSpent": 3 }]
    });

    for _ in 0..3 {
        let (status, _) = app
            .post(&format!("/api/v1/attempts/{}/finish", id), &token, Some(finish.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let body = leaderboard_with(&app, &token, 1).await;
    // 10 + 10 + 2.5 + 1.5
    assert_eq!(body["leaderboard"][0]["xp"], 24);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_, me) = app.get("/api/v1/progress/me", &token).await;
    assert_eq!(me["xp"], 24);
}

#[tokio::test]
async fn progress_for_a_new_user_starts_at_zero() {
    let app = common::create_test_app();
    let token = app.token("newbie", "Nia");

    let (status, me) = app.get("/api/v1/progress/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["xp"], 0);
    assert_eq!(me["name"], "Nia");
    assert_eq!(me["rank"]["current"]["name"], "Novice");
    assert_eq!(me["rank"]["progressPercent"], 0.0);
}

#[tokio::test]
async fn rank_lookup_is_public() {
    let app = common::create_test_app();

    let (status, rank) = app.request("GET", "/api/v1/rank/150", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rank["current"]["name"], "Apprentice");
    assert_eq!(rank["next"]["name"], "Scholar");

    let (_, top) = app.request("GET", "/api/v1/rank/100000", None, None).await;
    assert_eq!(top["current"]["name"], "Legend");
    assert!(top["next"].is_null());
    assert_eq!(top["progressPercent"], 100.0);

    let (status, _) = app.request("GET", "/api/v1/rank/lots", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn leaderboard_pages() {
    let app = common::create_test_app();
    for user in ["u1", "u2", "u3"] {
        app.state
            .progress_store
            .add_xp(user, user, 100)
            .await
            .unwrap();
    }

    let (_, page) = app
        .request("GET", "/api/v1/leaderboard?limit=2&page=1", None, None)
        .await;
    assert_eq!(page["leaderboard"].as_array().unwrap().len(), 2);
    assert_eq!(page["hasMore"], true);
    assert_eq!(page["leaderboard"][0]["userId"], "u1");

    let (_, page) = app
        .request("GET", "/api/v1/leaderboard?limit=2&page=2", None, None)
        .await;
    assert_eq!(page["leaderboard"][0]["userId"], "u3");
    assert_eq!(page["leaderboard"][0]["position"], 3);
    assert_eq!(page["hasMore"], false);
}
