// Fetches a public profile's posts from Instagram's web profile endpoint,
// paging through the rest of the timeline over GraphQL, and turns them into
// records ready for the vector collection.

use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::ServiceError;

// App id sent by the Instagram web client; the endpoint rejects requests without it.
const WEB_APP_ID: &str = "936619743392459";

// The web client's "profile posts" query; pages are addressed by `end_cursor`.
const PROFILE_POSTS_QUERY_HASH: &str = "003056d32c2554def87228bc3fd9668a";
const POSTS_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostType {
    Reels,
    StaticImage,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Reels => "reels",
            PostType::StaticImage => "static_image",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub post_id: String,
    pub post_type: PostType,
    pub likes: u64,
    pub comments: u64,
    pub date_posted: String,
    pub username: String,
}

impl PostRecord {
    /// One-sentence summary used both as the document content and as the
    /// text the vector store embeds.
    pub fn describe(&self) -> String {
        format!(
            "A post with username:\"{}\", post_id: \"{}\", post_type: \"{}\", likes: {}, comments: {}, date_posted: \"{}\".",
            self.username,
            self.post_id,
            self.post_type.as_str(),
            self.likes,
            self.comments,
            self.date_posted
        )
    }

    pub fn to_document(&self) -> Value {
        let description = self.describe();
        json!({
            "post_id": self.post_id,
            "post_type": self.post_type.as_str(),
            "likes": self.likes,
            "comments": self.comments,
            "date_posted": self.date_posted,
            "username": self.username,
            "content": description,
            "metadata": {
                "post_type": self.post_type.as_str(),
                "username": self.username,
            },
            "$vectorize": description,
        })
    }
}

/// Everything fetched for one profile. `total` is the post count the
/// profile reports, which can exceed `posts.len()` when paging stopped early.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePosts {
    pub posts: Vec<PostRecord>,
    pub total: u64,
}

impl ProfilePosts {
    pub fn is_complete(&self) -> bool {
        self.posts.len() as u64 >= self.total
    }
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    data: ProfileData,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    user: Option<ProfileUser>,
}

#[derive(Debug, Deserialize)]
struct ProfileUser {
    id: String,
    edge_owner_to_timeline_media: MediaConnection,
}

#[derive(Debug, Deserialize)]
struct MediaPageResponse {
    data: MediaPageData,
}

#[derive(Debug, Deserialize)]
struct MediaPageData {
    user: Option<MediaPageUser>,
}

#[derive(Debug, Deserialize)]
struct MediaPageUser {
    edge_owner_to_timeline_media: MediaConnection,
}

#[derive(Debug, Deserialize)]
struct MediaConnection {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<MediaEdge>,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

impl PageInfo {
    fn next_cursor(self) -> Option<String> {
        let has_next_page = self.has_next_page;
        self.end_cursor
            .filter(|cursor| has_next_page && !cursor.is_empty())
    }
}

// Field order is the order Instagram's own client sends.
#[derive(Debug, Serialize)]
struct PageVariables<'a> {
    id: &'a str,
    first: u32,
    after: &'a str,
}

#[derive(Debug, Deserialize)]
struct MediaEdge {
    node: MediaNode,
}

#[derive(Debug, Deserialize)]
struct Counter {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct MediaNode {
    id: String,
    #[serde(default)]
    is_video: bool,
    taken_at_timestamp: i64,
    edge_liked_by: Option<Counter>,
    edge_media_preview_like: Option<Counter>,
    edge_media_to_comment: Option<Counter>,
}

impl MediaNode {
    fn into_record(self, username: &str) -> PostRecord {
        let likes = self
            .edge_liked_by
            .or(self.edge_media_preview_like)
            .map_or(0, |c| c.count);
        let date_posted = DateTime::from_timestamp(self.taken_at_timestamp, 0)
            .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default();
        PostRecord {
            post_id: self.id,
            post_type: if self.is_video {
                PostType::Reels
            } else {
                PostType::StaticImage
            },
            likes,
            comments: self.edge_media_to_comment.map_or(0, |c| c.count),
            date_posted,
            username: username.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstagramClient {
    client: Client,
    base_url: String,
}

impl InstagramClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// All of the profile's posts. The profile response carries the first
    /// page; the rest is followed through `end_cursor` until Instagram
    /// reports no next page. A failing follow-up page ends paging with what
    /// was collected so far.
    #[instrument(skip(self))]
    pub async fn fetch_posts(&self, profile_name: &str) -> Result<ProfilePosts, ServiceError> {
        let profile_name = profile_name.trim();
        if profile_name.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Profile name is empty. Please provide a valid profile name.".to_string(),
            ));
        }

        info!("Fetching data for profile: {}", profile_name);
        let url = format!("{}/api/v1/users/web_profile_info/", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("username", profile_name)])
            .header("x-ig-app-id", WEB_APP_ID)
            .send()
            .await
            .map_err(unexpected)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ServiceError::InvalidInput(format!(
                "The profile '{}' does not exist.",
                profile_name
            )));
        }
        if !response.status().is_success() {
            return Err(ServiceError::Runtime(format!(
                "An unexpected error occurred: Instagram returned status {}",
                response.status()
            )));
        }

        let profile: ProfileResponse = response.json().await.map_err(unexpected)?;
        let user = profile.data.user.ok_or_else(|| {
            ServiceError::InvalidInput(format!("The profile '{}' does not exist.", profile_name))
        })?;

        let media = user.edge_owner_to_timeline_media;
        let total = media.count;
        let mut posts: Vec<PostRecord> = media
            .edges
            .into_iter()
            .map(|edge| edge.node.into_record(profile_name))
            .collect();

        let mut cursor = media.page_info.next_cursor();
        while let Some(after) = cursor.take() {
            let page = match self.fetch_page(&user.id, &after).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Stopped paging posts for {}: {}", profile_name, e);
                    break;
                }
            };
            if page.edges.is_empty() {
                break;
            }
            debug!(page = page.edges.len(), "Fetched another page of posts");
            posts.extend(
                page.edges
                    .into_iter()
                    .map(|edge| edge.node.into_record(profile_name)),
            );
            cursor = page
                .page_info
                .next_cursor()
                .filter(|next| *next != after);
        }

        let fetched = ProfilePosts { posts, total };
        if fetched.is_complete() {
            info!(
                fetched = fetched.posts.len(),
                total, "Data fetching complete for profile: {}", profile_name
            );
        } else {
            warn!(
                fetched = fetched.posts.len(),
                total, "Only part of the posts were fetched for profile: {}", profile_name
            );
        }
        Ok(fetched)
    }

    async fn fetch_page(&self, user_id: &str, after: &str) -> Result<MediaConnection, ServiceError> {
        let variables = serde_json::to_string(&PageVariables {
            id: user_id,
            first: POSTS_PAGE_SIZE,
            after,
        })
        .map_err(unexpected)?;
        let page: MediaPageResponse = self
            .client
            .get(format!("{}/graphql/query/", self.base_url))
            .query(&[
                ("query_hash", PROFILE_POSTS_QUERY_HASH),
                ("variables", variables.as_str()),
            ])
            .header("x-ig-app-id", WEB_APP_ID)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(unexpected)?
            .json()
            .await
            .map_err(unexpected)?;

        page.data
            .user
            .map(|user| user.edge_owner_to_timeline_media)
            .ok_or_else(|| {
                ServiceError::Runtime("An unexpected error occurred: empty posts page".to_string())
            })
    }
}

fn unexpected(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Runtime(format!("An unexpected error occurred: {}", e))
}
