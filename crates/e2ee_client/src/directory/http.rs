use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use e2ee_proto::api::{
    codes, ChangePinRequest, ChangePinResponse, ErrorResponse, OwnKeysResponse, PeerKeyBundle,
    PeerKeysResponse, RegisterRequest, RegisterResponse,
};

use super::{is_canonical_user_id, KeyDirectory, CHANGE_PIN_PATH, KEYS_PATH, OWN_KEYS_PATH, REGISTER_PATH};
use crate::{config::ClientConfig, error::E2eeError};

/// Key directory over HTTP. Cheap to clone.
#[derive(Clone)]
pub struct HttpKeyDirectory {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpKeyDirectory {
    pub fn new(config: &ClientConfig) -> Result<Self, E2eeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("e2ee-client/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Decode a success body, or turn `{error, detail}` into `RemoteRejected`.
async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, E2eeError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json().await?);
    }
    Err(rejection(status, res).await)
}

async fn rejection(status: StatusCode, res: Response) -> E2eeError {
    let body = res.text().await.unwrap_or_default();
    let (code, detail) = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => (err.error, err.detail),
        Err(_) => (codes::SERVER.to_string(), None),
    };
    warn!(status = status.as_u16(), code = %code, "[directory] request rejected");
    E2eeError::RemoteRejected { status: status.as_u16(), code, detail }
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, E2eeError> {
        let res = self.authed(self.client.post(self.url(REGISTER_PATH))).json(req).send().await?;
        let body: RegisterResponse = read_json(res).await?;
        debug!(device_id = %body.device_id, created = body.created, "[directory] registered");
        Ok(body)
    }

    async fn fetch_own(&self, device_id: &str) -> Result<Option<OwnKeysResponse>, E2eeError> {
        let res = self
            .authed(self.client.get(self.url(OWN_KEYS_PATH)))
            .query(&[("deviceId", device_id)])
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(res).await.map(Some)
    }

    async fn fetch_peer(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Vec<PeerKeyBundle>, E2eeError> {
        if !is_canonical_user_id(user_id) {
            return Err(E2eeError::InvalidArgument(format!("'{user_id}' is not a user id")));
        }
        let mut req = self.authed(self.client.get(self.url(&format!("{KEYS_PATH}/{user_id}"))));
        if let Some(device_id) = device_id {
            req = req.query(&[("deviceId", device_id)]);
        }
        let res = req.send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(E2eeError::NotFound(format!("no keys published for user {user_id}")));
        }
        let body: PeerKeysResponse = read_json(res).await?;
        Ok(body.keys)
    }

    async fn change_pin(&self, req: &ChangePinRequest) -> Result<ChangePinResponse, E2eeError> {
        let res = self.authed(self.client.post(self.url(CHANGE_PIN_PATH))).json(req).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(E2eeError::NotFound(format!(
                "device {} is not registered",
                req.device_id
            )));
        }
        read_json(res).await
    }
}
