// HTTP surface - thin axum handlers over SocialService

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::models::{
    Comment, NewComment, NewNotification, NewPost, NewUser, Notification, Post, PostUpdate, User,
    UserUpdate,
};
use crate::services::{CacheReport, SocialService};

#[derive(Deserialize)]
pub struct FriendRequest {
    pub friend: String,
}

#[derive(Deserialize)]
pub struct LikeRequest {
    pub username: String,
}

#[derive(Deserialize)]
pub struct CommentUpdateRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct NotificationQuery {
    pub read_status: Option<bool>,
}

// HTTP Handlers

pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn create_user_handler(
    State(service): State<SocialService>,
    Json(req): Json<NewUser>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = service.create_user(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users_handler(
    State(service): State<SocialService>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(service.list_users().await?))
}

pub async fn get_user_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
) -> AppResult<Json<User>> {
    Ok(Json(service.get_user(&username).await?))
}

pub async fn update_user_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
    Json(req): Json<UserUpdate>,
) -> AppResult<Json<User>> {
    Ok(Json(service.update_user(&username, req).await?))
}

pub async fn delete_user_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
) -> AppResult<StatusCode> {
    service.delete_user(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_friend_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
    Json(req): Json<FriendRequest>,
) -> AppResult<Json<User>> {
    Ok(Json(service.add_friend(&username, &req.friend).await?))
}

pub async fn create_post_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
    Json(req): Json<NewPost>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let post = service.create_post(&username, req).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_user_posts_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(service.list_posts(&username).await?))
}

pub async fn list_all_posts_handler(
    State(service): State<SocialService>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(service.list_all_posts().await?))
}

pub async fn get_post_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number)): AxumPath<(String, i64)>,
) -> AppResult<Json<Post>> {
    Ok(Json(service.get_post(&username, post_number).await?))
}

pub async fn update_post_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number)): AxumPath<(String, i64)>,
    Json(req): Json<PostUpdate>,
) -> AppResult<Json<Post>> {
    Ok(Json(service.update_post(&username, post_number, req).await?))
}

pub async fn delete_post_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number)): AxumPath<(String, i64)>,
) -> AppResult<Json<Post>> {
    Ok(Json(service.delete_post(&username, post_number).await?))
}

pub async fn like_post_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number)): AxumPath<(String, i64)>,
    Json(req): Json<LikeRequest>,
) -> AppResult<Json<Post>> {
    Ok(Json(
        service
            .like_post(&username, post_number, &req.username)
            .await?,
    ))
}

pub async fn create_comment_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number)): AxumPath<(String, i64)>,
    Json(req): Json<NewComment>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = service.create_comment(&username, post_number, req).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_comments_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number)): AxumPath<(String, i64)>,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(service.list_comments(&username, post_number).await?))
}

pub async fn get_comment_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number, id)): AxumPath<(String, i64, String)>,
) -> AppResult<Json<Comment>> {
    Ok(Json(service.get_comment(&username, post_number, &id).await?))
}

pub async fn update_comment_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number, id)): AxumPath<(String, i64, String)>,
    Json(req): Json<CommentUpdateRequest>,
) -> AppResult<Json<Comment>> {
    Ok(Json(
        service
            .update_comment(&username, post_number, &id, &req.content)
            .await?,
    ))
}

pub async fn delete_comment_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number, id)): AxumPath<(String, i64, String)>,
) -> AppResult<Json<Comment>> {
    Ok(Json(
        service.delete_comment(&username, post_number, &id).await?,
    ))
}

pub async fn like_comment_handler(
    State(service): State<SocialService>,
    AxumPath((username, post_number, id)): AxumPath<(String, i64, String)>,
    Json(req): Json<LikeRequest>,
) -> AppResult<Json<Comment>> {
    Ok(Json(
        service
            .like_comment(&username, post_number, &id, &req.username)
            .await?,
    ))
}

pub async fn list_notifications_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
    Query(params): Query<NotificationQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    Ok(Json(
        service
            .list_notifications(&username, params.read_status)
            .await?,
    ))
}

pub async fn reconcile_notifications_handler(
    State(service): State<SocialService>,
    AxumPath(username): AxumPath<String>,
) -> AppResult<Json<User>> {
    Ok(Json(service.reconcile_notifications(&username).await?))
}

pub async fn create_notification_handler(
    State(service): State<SocialService>,
    Json(req): Json<NewNotification>,
) -> AppResult<(StatusCode, Json<Notification>)> {
    let notification = service.create_notification(req).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn get_notification_handler(
    State(service): State<SocialService>,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Notification>> {
    Ok(Json(service.get_notification(&id).await?))
}

pub async fn mark_notification_read_handler(
    State(service): State<SocialService>,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Notification>> {
    Ok(Json(service.mark_as_read(&id).await?))
}

pub async fn cache_report_handler(
    State(service): State<SocialService>,
) -> AppResult<Json<CacheReport>> {
    Ok(Json(service.cache_report().await?))
}

pub fn create_router(service: SocialService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Users
        .route("/users", post(create_user_handler).get(list_users_handler))
        .route(
            "/users/{username}",
            get(get_user_handler)
                .put(update_user_handler)
                .delete(delete_user_handler),
        )
        .route("/users/{username}/friends", post(add_friend_handler))
        // Posts
        .route(
            "/users/{username}/posts",
            post(create_post_handler).get(list_user_posts_handler),
        )
        .route(
            "/users/{username}/posts/{post_number}",
            get(get_post_handler)
                .put(update_post_handler)
                .delete(delete_post_handler),
        )
        .route(
            "/users/{username}/posts/{post_number}/likes",
            post(like_post_handler),
        )
        .route("/posts", get(list_all_posts_handler))
        // Comments
        .route(
            "/users/{username}/posts/{post_number}/comments",
            post(create_comment_handler).get(list_comments_handler),
        )
        .route(
            "/users/{username}/posts/{post_number}/comments/{id}",
            get(get_comment_handler)
                .put(update_comment_handler)
                .delete(delete_comment_handler),
        )
        .route(
            "/users/{username}/posts/{post_number}/comments/{id}/likes",
            post(like_comment_handler),
        )
        // Notifications
        .route(
            "/users/{username}/notifications",
            get(list_notifications_handler),
        )
        .route(
            "/users/{username}/notifications/reconcile",
            post(reconcile_notifications_handler),
        )
        .route("/notifications", post(create_notification_handler))
        .route(
            "/notifications/{id}",
            get(get_notification_handler).put(mark_notification_read_handler),
        )
        // Diagnostics
        .route("/cache/stats", get(cache_report_handler))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::context;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_user_and_post_routes() {
        let router = create_router(context().service);

        let (status, user) = send(&router, "POST", "/users", Some(json!({"username": "alice"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["username"], "alice");

        let (status, _) = send(&router, "POST", "/users", Some(json!({"username": "alice"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, post) = send(
            &router,
            "POST",
            "/users/alice/posts",
            Some(json!({"content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(post["post_number"], 1);

        let (status, post) = send(&router, "GET", "/users/alice/posts/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(post["content"], "hi");

        let (status, body) = send(&router, "GET", "/users/alice/posts/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let (status, _) = send(&router, "DELETE", "/users/alice", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&router, "GET", "/users/alice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_like_and_comment_routes() {
        let router = create_router(context().service);
        for name in ["alice", "bob"] {
            send(&router, "POST", "/users", Some(json!({"username": name}))).await;
        }
        send(&router, "POST", "/users/alice/posts", Some(json!({"content": "hi"}))).await;

        for _ in 0..2 {
            let (status, post) = send(
                &router,
                "POST",
                "/users/alice/posts/1/likes",
                Some(json!({"username": "bob"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(post["number_of_likes"], 1);
        }

        let (status, comment) = send(
            &router,
            "POST",
            "/users/alice/posts/1/comments",
            Some(json!({"username": "bob", "content": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = comment["_id"].as_str().unwrap().to_string();

        let (status, fetched) = send(
            &router,
            "GET",
            &format!("/users/alice/posts/1/comments/{}", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["content"], "hello");

        let (status, listed) = send(&router, "GET", "/users/alice/posts/1/comments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, report) = send(&router, "GET", "/cache/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(report["post_keys"]
            .as_array()
            .unwrap()
            .contains(&json!("post:alice:1")));
    }

    #[tokio::test]
    async fn test_notification_routes() {
        let router = create_router(context().service);
        send(&router, "POST", "/users", Some(json!({"username": "bob"}))).await;

        let (status, list) = send(&router, "GET", "/users/bob/notifications?read_status=false", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(list.as_array().unwrap().is_empty());

        let (status, _) = send(&router, "PUT", "/notifications/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, created) = send(
            &router,
            "POST",
            "/notifications",
            Some(json!({"recipient": "bob", "kind": "post_liked", "actor": "alice", "content": "liked"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["_id"].as_str().unwrap().to_string();

        let (status, read) = send(&router, "PUT", &format!("/notifications/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["read_status"], true);

        let (status, _) = send(
            &router,
            "POST",
            "/notifications",
            Some(json!({"recipient": "ghost", "kind": "post_liked", "content": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
