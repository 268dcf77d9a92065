// Environment-backed settings and fixed strings shared by the web front-end,
// the terminal chat and the data backend.

use std::env;

lazy_static::lazy_static! {
    // Hosted completion provider
    pub static ref OPENAI_API_KEY: String = env::var("OPENAI_API_KEY").unwrap_or_default();
    pub static ref OPENAI_BASE_URL: String = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    pub static ref OPENAI_MODEL: String = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4".to_string());

    // Web front-end assets
    pub static ref TEMPLATE_DIR: String = env::var("INSTAIQ_TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("INSTAIQ_STATIC_DIR").unwrap_or_else(|_| "static".to_string());

    // Data backend services. Missing values are reported per request, not at startup.
    pub static ref INSTAGRAM_BASE_URL: String = env::var("INSTAGRAM_BASE_URL").unwrap_or_else(|_| "https://i.instagram.com".to_string());
    pub static ref ASTRA_DB_API_ENDPOINT: Option<String> = env::var("ASTRA_DB_API_ENDPOINT").ok();
    pub static ref ASTRA_DB_APPLICATION_TOKEN: Option<String> = env::var("ASTRA_DB_APPLICATION_TOKEN").ok();
    pub static ref ASTRA_DB_COLLECTION_NAME: Option<String> = env::var("ASTRA_DB_COLLECTION_NAME").ok();
    pub static ref ASTRA_DB_KEYSPACE: String = env::var("ASTRA_DB_KEYSPACE").unwrap_or_else(|_| "default_keyspace".to_string());
    pub static ref BASE_API_URL: Option<String> = env::var("BASE_API_URL").ok();
    pub static ref LANGFLOW_ID: Option<String> = env::var("LANGFLOW_ID").ok();
    pub static ref LANGFLOW_ENDPOINT: Option<String> = env::var("ENDPOINT").ok();
}

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that specializes in analyzing social media content and providing insights.";

pub const NO_RESPONSE_RECEIVED: &str = "No response received";
pub const CONNECTED_SUFFIX: &str = "You can now ask specific questions about your content!";
pub const CONNECTED_FALLBACK: &str = "Your Instagram data is ready.";
pub const CONNECT_FAILED_REPLY: &str = "Sorry, there was an error processing your Instagram data.";
pub const CONNECT_FAILED_BANNER: &str = "Failed to process Instagram data. Please try again.";
pub const CHAT_FAILED_REPLY: &str = "Sorry, I encountered an error processing your request.";

// Documents are uploaded to the vector collection in chunks of this size.
pub const UPLOAD_CHUNK_SIZE: usize = 50;
