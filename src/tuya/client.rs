use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::sign::{self, SIGN_METHOD};
use super::{ApiError, CloudApi, DeviceDescriptor, DpCommand, DpMap, flatten_code_values};

const TOKEN_PATH: &str = "/v1.0/token";

/// Business error code for an expired or revoked access token.
const TOKEN_INVALID: i64 = 1010;

/// Refresh the access token this long before the cloud expires it.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Envelope shared by every OpenAPI response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    refresh_token: String,
    /// Lifetime in seconds.
    expire_time: u64,
}

#[derive(Debug)]
struct TokenInfo {
    access_token: String,
    refresh_token: String,
    expires_at: Instant,
}

impl TokenInfo {
    fn from_result(result: TokenResult) -> Self {
        Self {
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            expires_at: Instant::now() + Duration::from_secs(result.expire_time),
        }
    }

    fn needs_refresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

/// Signed client for the Tuya OpenAPI of one regional endpoint.
pub struct TuyaCloudClient {
    http: reqwest::Client,
    endpoint: String,
    access_id: String,
    access_secret: String,
    token: Mutex<Option<TokenInfo>>,
}

impl TuyaCloudClient {
    pub fn new(endpoint: &str, access_id: &str, access_secret: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_id: access_id.to_string(),
            access_secret: access_secret.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Obtain an access token. Must succeed before any other call.
    pub async fn connect(&self) -> Result<(), ApiError> {
        debug!("Connecting to Tuya cloud endpoint={}", self.endpoint);
        let token = self.grant().await?;
        *self.token.lock().await = Some(token);
        info!("Connected to Tuya cloud");
        Ok(())
    }

    async fn grant(&self) -> Result<TokenInfo, ApiError> {
        let res = self
            .send(Method::GET, TOKEN_PATH, &[("grant_type", "1")], None, None)
            .await?;
        parse_token(res)
    }

    /// Current access token, refreshed first when it is about to expire. A
    /// refresh the cloud refuses falls back to a new grant.
    async fn access_token(&self) -> Result<String, ApiError> {
        let mut guard = self.token.lock().await;
        let refresh_token = match guard.as_ref() {
            None => return Err(ApiError::NotConnected),
            Some(token) if token.needs_refresh() => token.refresh_token.clone(),
            Some(token) => return Ok(token.access_token.clone()),
        };

        debug!("Refreshing Tuya access token");
        let path = format!("{TOKEN_PATH}/{refresh_token}");
        let res = self.send(Method::GET, &path, &[], None, None).await?;
        let token = match parse_token(res) {
            Ok(token) => token,
            Err(ApiError::Authentication { code, msg }) => {
                warn!("Token refresh rejected (code {}): {}, requesting a new grant", code, msg);
                self.grant().await?
            }
            Err(e) => return Err(e),
        };
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    /// Replace the current token with a new grant.
    async fn regrant(&self) -> Result<String, ApiError> {
        let mut guard = self.token.lock().await;
        let token = self.grant().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.call(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        self.call(Method::POST, path, Some(body)).await
    }

    /// Authenticated call, retried once with a fresh grant when the cloud
    /// reports the token as invalid.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        let token = self.access_token().await?;
        let res = self
            .send(method.clone(), path, &[], body, Some(&token))
            .await?;
        if res.success || res.code != TOKEN_INVALID {
            return Ok(res);
        }
        warn!("Tuya rejected the access token for {}, requesting a new grant", path);
        let token = self.regrant().await?;
        self.send(method, path, &[], body, Some(&token)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        // The body is hashed into the signature, so sign exactly what is sent.
        let body = match body {
            Some(value) => serde_json::to_string(value).map_err(|e| ApiError::Decode(e.to_string()))?,
            None => String::new(),
        };
        let url = sign::canonical_url(path, query);
        let t = now_millis();
        let signature = sign::sign(
            &self.access_id,
            &self.access_secret,
            access_token,
            t,
            &sign::string_to_sign(method.as_str(), &body, &url),
        )?;

        debug!("{} {}", method, url);
        let mut request = self
            .http
            .request(method, format!("{}{}", self.endpoint, url))
            .header("client_id", &self.access_id)
            .header("sign", signature)
            .header("sign_method", SIGN_METHOD)
            .header("t", t.to_string())
            .header("lang", "en");
        if let Some(token) = access_token {
            request = request.header("access_token", token);
        }
        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let text = request.send().await?.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{e}: {text}")))
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn parse_token(res: ApiResponse) -> Result<TokenInfo, ApiError> {
    if !res.success {
        return Err(ApiError::Authentication {
            code: res.code,
            msg: res.msg,
        });
    }
    let result: TokenResult =
        serde_json::from_value(res.result).map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(TokenInfo::from_result(result))
}

fn parse_device_list(res: ApiResponse) -> Result<Vec<DeviceDescriptor>, ApiError> {
    if !res.success {
        error!("Tuya list_devices failed: code={} msg={}", res.code, res.msg);
        return Err(ApiError::Backend {
            operation: "list_devices",
            code: res.code,
            msg: res.msg,
        });
    }
    Ok(res
        .result
        .get("list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|d| d.as_object().cloned().map(DeviceDescriptor))
                .collect()
        })
        .unwrap_or_default())
}

fn parse_status(device_id: &str, res: ApiResponse) -> DpMap {
    if !res.success {
        warn!(
            "Tuya get_device_status failed for {}: code={} msg={}",
            device_id, res.code, res.msg
        );
        return DpMap::new();
    }
    res.result
        .as_array()
        .map(|items| flatten_code_values(items))
        .unwrap_or_default()
}

fn parse_shadow(device_id: &str, res: ApiResponse) -> DpMap {
    if !res.success {
        warn!(
            "Shadow properties not available for {}: code={} msg={}",
            device_id, res.code, res.msg
        );
        return DpMap::new();
    }
    res.result
        .get("properties")
        .and_then(Value::as_array)
        .map(|items| flatten_code_values(items))
        .unwrap_or_default()
}

fn commands_body(commands: &[DpCommand]) -> Value {
    json!({ "commands": commands })
}

fn parse_command_result(device_id: &str, res: ApiResponse) -> bool {
    if !res.success {
        error!(
            "Failed to send commands to {}: code={} msg={}",
            device_id, res.code, res.msg
        );
    }
    res.success
}

fn parse_functions(device_id: &str, res: ApiResponse) -> DpMap {
    if !res.success {
        warn!(
            "Tuya get_device_functions failed for {}: code={} msg={}",
            device_id, res.code, res.msg
        );
        return DpMap::new();
    }
    match res.result {
        Value::Object(map) => map,
        _ => DpMap::new(),
    }
}

#[async_trait]
impl CloudApi for TuyaCloudClient {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, ApiError> {
        let res = self.get("/v1.0/iot-03/devices").await?;
        parse_device_list(res)
    }

    async fn get_device_status(&self, device_id: &str) -> Result<DpMap, ApiError> {
        let res = self.get(&format!("/v1.0/devices/{device_id}/status")).await?;
        Ok(parse_status(device_id, res))
    }

    async fn get_device_shadow_properties(&self, device_id: &str) -> Result<DpMap, ApiError> {
        let res = self
            .get(&format!("/v2.0/cloud/thing/{device_id}/shadow/properties"))
            .await?;
        Ok(parse_shadow(device_id, res))
    }

    async fn get_device_functions(&self, device_id: &str) -> Result<DpMap, ApiError> {
        let res = self
            .get(&format!("/v1.0/devices/{device_id}/functions"))
            .await?;
        Ok(parse_functions(device_id, res))
    }

    async fn send_commands(
        &self,
        device_id: &str,
        commands: &[DpCommand],
    ) -> Result<bool, ApiError> {
        info!("Sending commands to {}: {:?}", device_id, commands);
        let res = self
            .post(
                &format!("/v1.0/devices/{device_id}/commands"),
                &commands_body(commands),
            )
            .await?;
        Ok(parse_command_result(device_id, res))
    }
}
