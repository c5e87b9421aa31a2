//! Kick public API (`/public/v1`) behind [`PlatformApi`].

use std::time::Duration;

use async_trait::async_trait;
use cvb_core::{
    domain::{Subscription, UserId, UserProfile},
    errors::Error,
    ports::PlatformApi,
    subscriptions::{CHAT_MESSAGE_EVENT, CHAT_MESSAGE_EVENT_VERSION},
    Result,
};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{http_client, snippet, unauthorized_reason};

#[derive(Clone, Debug)]
pub struct KickClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    subscription_id: Option<Value>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RawSubscription {
    fn into_subscription(self) -> Option<Subscription> {
        let id = self.id.or(self.subscription_id).and_then(value_to_id)?;
        Some(Subscription {
            id,
            event: self.event.or(self.name),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    user_id: Value,
    #[serde(default)]
    name: Option<String>,
}

impl KickClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: http_client(timeout)?,
        })
    }

    fn request(&self, method: Method, path: &str, access_token: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(access_token)
    }

    /// Send and return the JSON body, mapping token rejection to
    /// [`Error::Unauthorized`] and any other non-2xx answer to
    /// [`Error::External`].
    async fn send(&self, op: &str, req: RequestBuilder) -> Result<Value> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("kick {op} request error: {e}")))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };
        debug!(op, status = status.as_u16(), "kick response");

        if let Some(reason) = unauthorized_reason(status.as_u16(), &body) {
            return Err(Error::Unauthorized(reason));
        }
        if !status.is_success() {
            return Err(Error::External(format!(
                "kick {op} failed: {status} {}",
                snippet(&text)
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl PlatformApi for KickClient {
    async fn list_subscriptions(&self, access_token: &str) -> Result<Vec<Subscription>> {
        let body = self
            .send(
                "list_subscriptions",
                self.request(Method::GET, "/events/subscriptions", access_token),
            )
            .await?;
        let env: Envelope<Vec<RawSubscription>> = serde_json::from_value(body)?;
        Ok(env
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawSubscription::into_subscription)
            .collect())
    }

    async fn delete_subscription(&self, access_token: &str, subscription_id: &str) -> Result<()> {
        self.send(
            "delete_subscription",
            self.request(
                Method::DELETE,
                &format!("/events/subscriptions/{subscription_id}"),
                access_token,
            ),
        )
        .await?;
        Ok(())
    }

    async fn create_subscription(&self, access_token: &str) -> Result<Subscription> {
        let payload = json!({
            "events": [{ "name": CHAT_MESSAGE_EVENT, "version": CHAT_MESSAGE_EVENT_VERSION }],
            "method": "webhook",
        });
        let body = self
            .send(
                "create_subscription",
                self.request(Method::POST, "/events/subscriptions", access_token)
                    .json(&payload),
            )
            .await?;

        // `data` is a single object on older responses, a per-event list on newer ones.
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let raw: Option<RawSubscription> = match data {
            Value::Array(items) => items
                .into_iter()
                .next()
                .map(serde_json::from_value)
                .transpose()?,
            Value::Object(_) => Some(serde_json::from_value(data)?),
            _ => None,
        };
        if let Some(err) = raw.as_ref().and_then(|r| r.error.clone()) {
            return Err(Error::External(format!("kick create_subscription failed: {err}")));
        }
        raw.and_then(RawSubscription::into_subscription)
            .ok_or_else(|| {
                Error::External("kick create_subscription returned no subscription id".to_string())
            })
    }

    async fn current_user(&self, access_token: &str) -> Result<UserProfile> {
        let body = self
            .send("current_user", self.request(Method::GET, "/users", access_token))
            .await?;
        let env: Envelope<Vec<RawUser>> = serde_json::from_value(body)?;
        let user = env
            .data
            .and_then(|users| users.into_iter().next())
            .ok_or_else(|| Error::External("kick current_user returned no user".to_string()))?;
        let user_id = value_to_id(user.user_id)
            .ok_or_else(|| Error::External("kick user has no id".to_string()))?;
        Ok(UserProfile {
            user_id: UserId(user_id),
            name: user.name,
        })
    }

    async fn send_chat_message(
        &self,
        access_token: &str,
        broadcaster_user_id: &UserId,
        content: &str,
    ) -> Result<()> {
        // Kick ids are numeric; keep non-numeric ids as strings.
        let broadcaster = broadcaster_user_id
            .as_str()
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(broadcaster_user_id.as_str()));
        let payload = json!({
            "broadcaster_user_id": broadcaster,
            "content": content,
            "type": "bot",
        });
        self.send(
            "send_chat_message",
            self.request(Method::POST, "/chat", access_token).json(&payload),
        )
        .await?;
        Ok(())
    }
}

fn value_to_id(v: Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
