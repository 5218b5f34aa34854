use std::time::Duration as StdDuration;

use axum::http::StatusCode;
use chrono::Duration;
use chrono::Utc;
use uuid::Uuid;

use crate::tests::helper;

#[tokio::test]
async fn test_create_and_list() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    // nothing yet
    let (status_code, capsules) = helper::list_capsules(&mut app, &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(Some(vec![]), capsules);

    let first =
        helper::create_capsule(&mut app, &access_token, "First", Utc::now() + Duration::days(1))
            .await;
    assert_eq!("locked", first.state);
    assert_eq!("First", first.title);
    assert_eq!(None, first.message);
    assert_eq!(None, first.image_url);

    let second =
        helper::create_capsule(&mut app, &access_token, "Second", Utc::now() + Duration::days(2))
            .await;

    // in order of creation
    let (status_code, capsules) = helper::list_capsules(&mut app, &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(Some(vec![first, second]), capsules);
}

#[tokio::test]
async fn test_create_in_the_past_is_rejected() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    let (status_code, capsule, error) = helper::maybe_create_capsule(
        &mut app,
        &access_token,
        "Too late",
        "Hello",
        Some(Utc::now() - Duration::seconds(1)),
        None,
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(capsule.is_none());
    assert_eq!(
        Some(helper::Error {
            error: "Invalid capsule".to_string(),
            description: Some("Open date must be in the future".to_string()),
        }),
        error
    );

    // nothing was written
    let (_, capsules) = helper::list_capsules(&mut app, &access_token).await;
    assert_eq!(Some(vec![]), capsules);
}

#[tokio::test]
async fn test_create_validation() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;
    let open_date = Some(Utc::now() + Duration::days(1));

    let cases = [
        ("  ", "Hello", open_date, None, "Title is required"),
        ("Title", "", open_date, None, "Message is required"),
        ("Title", "Hello", None, None, "Open date is required"),
    ];

    for (title, message, open_date, image_url, description) in cases {
        let (status_code, _, error) = helper::maybe_create_capsule(
            &mut app,
            &access_token,
            title,
            message,
            open_date,
            image_url,
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, status_code);
        assert_eq!(Some(description.to_string()), error.unwrap().description);
    }

    let (status_code, _, error) = helper::maybe_create_capsule(
        &mut app,
        &access_token,
        "Title",
        "Hello",
        open_date,
        Some("not a url"),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(
        error
            .unwrap()
            .description
            .unwrap()
            .starts_with("Invalid image URL")
    );
}

#[tokio::test]
async fn test_locked_capsule_hides_message_and_image() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    let capsule =
        helper::create_capsule(&mut app, &access_token, "Secret", Utc::now() + Duration::hours(1))
            .await;

    let json = helper::single_capsule_json(&mut app, &access_token, &capsule.id).await;
    assert_eq!(Some("locked"), json["state"].as_str());
    assert_eq!(Some("Secret"), json["title"].as_str());
    assert!(json.contains_key("openDate"));
    assert!(!json.contains_key("message"));
    assert!(!json.contains_key("imageUrl"));

    // the edit form is not prefilled with the message either
    let (status_code, edit, _) = helper::edit_capsule(&mut app, &access_token, &capsule.id).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(None, edit.unwrap().message);
}

#[tokio::test]
async fn test_capsule_unlocks_on_open_date() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    let capsule = helper::create_capsule(
        &mut app,
        &access_token,
        "Soon",
        Utc::now() + Duration::milliseconds(500),
    )
    .await;
    assert_eq!("locked", capsule.state);

    tokio::time::sleep(StdDuration::from_millis(600)).await;

    let (status_code, capsule, _) =
        helper::single_capsule(&mut app, &access_token, &capsule.id.to_string()).await;
    assert_eq!(StatusCode::OK, status_code);
    let capsule = capsule.unwrap();
    assert_eq!("unlocked", capsule.state);
    assert_eq!(Some("Hello from the past".to_string()), capsule.message);
    assert_eq!(
        Some("https://www.example.com/picture.png".to_string()),
        capsule.image_url
    );
    assert!(!capsule.open_date_display.is_empty());

    let (_, edit, _) = helper::edit_capsule(&mut app, &access_token, &capsule.id).await;
    assert_eq!(Some("Hello from the past".to_string()), edit.unwrap().message);
}

#[tokio::test]
async fn test_capsules_of_others() {
    let mut app = helper::setup_test_app().await;

    let owner_token = helper::register(&mut app, "owner@example.com").await;
    let intruder_token = helper::register(&mut app, "intruder@example.com").await;

    let capsule =
        helper::create_capsule(&mut app, &owner_token, "Mine", Utc::now() + Duration::hours(1))
            .await;

    // not listed for others
    let (_, capsules) = helper::list_capsules(&mut app, &intruder_token).await;
    assert_eq!(Some(vec![]), capsules);

    let (status_code, _, error) =
        helper::single_capsule(&mut app, &intruder_token, &capsule.id.to_string()).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!(Some("Not allowed to access capsule".to_string()), error);

    let (status_code, _, _) = helper::edit_capsule(&mut app, &intruder_token, &capsule.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _, _) = helper::maybe_update_capsule(
        &mut app,
        &intruder_token,
        &capsule.id,
        "Yours now",
        Utc::now() + Duration::hours(2),
    )
    .await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _) = helper::maybe_delete_capsule(&mut app, &intruder_token, &capsule.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    // still there, unchanged
    let (status_code, unchanged, _) =
        helper::single_capsule(&mut app, &owner_token, &capsule.id.to_string()).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(Some(capsule), unchanged);
}

#[tokio::test]
async fn test_missing_capsule_is_not_found() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    let (status_code, _, error) =
        helper::single_capsule(&mut app, &access_token, &Uuid::new_v4().to_string()).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!(Some("Capsule not found".to_string()), error);

    let (status_code, _) = helper::maybe_delete_capsule(&mut app, &access_token, &Uuid::new_v4()).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);

    // not a capsule ID at all
    let (status_code, _, error) =
        helper::single_capsule(&mut app, &access_token, "not-a-uuid").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Invalid path parameter".to_string()), error);
}

#[tokio::test]
async fn test_update_and_delete() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    let capsule =
        helper::create_capsule(&mut app, &access_token, "Before", Utc::now() + Duration::hours(1))
            .await;

    // all fields are overwritten, the image is gone
    let (status_code, updated, _) = helper::maybe_update_capsule(
        &mut app,
        &access_token,
        &capsule.id,
        "After",
        Utc::now() + Duration::hours(2),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);
    let updated = updated.unwrap();
    assert_eq!(capsule.id, updated.id);
    assert_eq!("After", updated.title);

    // the open date has to stay in the future
    let (status_code, _, error) = helper::maybe_update_capsule(
        &mut app,
        &access_token,
        &capsule.id,
        "After",
        Utc::now() - Duration::hours(2),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Invalid capsule".to_string()), error);

    let (status_code, _) = helper::maybe_delete_capsule(&mut app, &access_token, &capsule.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    let (status_code, _, _) =
        helper::single_capsule(&mut app, &access_token, &capsule.id.to_string()).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);

    let (status_code, _, _) = helper::maybe_update_capsule(
        &mut app,
        &access_token,
        &capsule.id,
        "Gone",
        Utc::now() + Duration::hours(2),
    )
    .await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
}
