//! Room administration against a LiveKit-compatible RoomService.
//!
//! The service speaks Twirp: JSON `POST`s to
//! `/twirp/livekit.RoomService/<Method>`, authorized by a short-lived HS256
//! access token signed with the API secret.

use crate::config::RoomAdminConfig;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rumi_core::cleanup::{AdminError, RoomAdmin};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

const TOKEN_TTL_SECS: i64 = 600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGrant {
    room_list: bool,
    room_create: bool,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    nbf: i64,
    exp: i64,
    video: VideoGrant,
}

#[derive(Deserialize)]
struct ListRoomsResponse {
    #[serde(default)]
    rooms: Vec<RoomInfo>,
}

#[derive(Deserialize)]
struct RoomInfo {
    name: String,
}

/// Signs an admin access token for `api_key`.
pub fn admin_token(api_key: &str, api_secret: &str, now: i64) -> Result<String, AdminError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = Claims {
        iss: api_key,
        nbf: now,
        exp: now + TOKEN_TTL_SECS,
        video: VideoGrant {
            room_list: true,
            room_create: true,
        },
    };
    let claims = serde_json::to_vec(&claims).map_err(|e| AdminError::Token(e.to_string()))?;
    let signing_input = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(claims));

    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .map_err(|e| AdminError::Token(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", signing_input, signature))
}

/// The admin API lives on the HTTP side of the room server.
fn http_base(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

/// `RoomAdmin` over the LiveKit Twirp API using `reqwest`.
pub struct LiveKitRoomAdmin {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl LiveKitRoomAdmin {
    pub fn new(config: &RoomAdminConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: http_base(&config.url),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, AdminError> {
        let token = admin_token(
            &self.api_key,
            &self.api_secret,
            chrono::Utc::now().timestamp(),
        )?;
        let url = format!("{}/twirp/livekit.RoomService/{}", self.base_url, method);
        debug!(%url, "Calling room service.");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AdminError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdminError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RoomAdmin for LiveKitRoomAdmin {
    async fn list_rooms(&self) -> Result<Vec<String>, AdminError> {
        let response = self.call("ListRooms", json!({})).await?;
        let listed: ListRoomsResponse = response
            .json()
            .await
            .map_err(|e| AdminError::Request(e.to_string()))?;
        Ok(listed.rooms.into_iter().map(|r| r.name).collect())
    }

    async fn delete_room(&self, name: &str) -> Result<(), AdminError> {
        self.call("DeleteRoom", json!({ "room": name })).await?;
        Ok(())
    }
}
