use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_users() {
    let mut app = helper::setup_test_app().await;

    let access_token = helper::register(&mut app, "someone@example.com").await;

    // fetch current user
    let (status_code, current_user) = helper::current_user(&mut app, &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert!(current_user.is_some());
    let current_user = current_user.unwrap();
    assert_eq!("someone@example.com", current_user.email);

    // register again with the same email
    let (status_code, _, error) =
        helper::maybe_register(&mut app, "Someone@Example.com", "othersecret").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(
        Some("Email address is already registered".to_string()),
        error
    );

    // weak password
    let (status_code, _, error) =
        helper::maybe_register(&mut app, "someone-else@example.com", "12345").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(
        Some("Password must be at least 6 characters".to_string()),
        error
    );

    // invalid email
    let (status_code, _, error) =
        helper::maybe_register(&mut app, "someone-else", helper::PASSWORD).await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Invalid email address".to_string()), error);

    // a second user is someone else
    let other_access_token = helper::register(&mut app, "someone-else@example.com").await;
    let (_, other_user) = helper::current_user(&mut app, &other_access_token).await;
    assert_ne!(current_user.id, other_user.unwrap().id);
}

#[tokio::test]
async fn test_logout_invalidates_tokens() {
    let mut app = helper::setup_test_app().await;

    let registration_token = helper::register(&mut app, "someone@example.com").await;
    let access_token = helper::login(&mut app, "someone@example.com", helper::PASSWORD).await;

    let status_code = helper::logout(&mut app, &access_token).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    // every token of the user is gone
    let (status_code, _) = helper::current_user(&mut app, &access_token).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);

    let (status_code, _) = helper::current_user(&mut app, &registration_token).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);

    // signing in again works
    let access_token = helper::login(&mut app, "someone@example.com", helper::PASSWORD).await;
    let (status_code, _) = helper::current_user(&mut app, &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
}

#[tokio::test]
async fn test_missing_or_invalid_token() {
    let mut app = helper::setup_test_app().await;

    let (status_code, _) = helper::current_user(&mut app, "").await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);

    let (status_code, _) = helper::current_user(&mut app, "Bearer not-a-token").await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);

    let (status_code, _) = helper::list_capsules(&mut app, "Bearer not-a-token").await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);
}
