//! 基于 HTTP 批量接口的推送服务商
//!
//! 一次 POST 发送一批消息，响应中的结果与请求顺序一一对应。

use application::{ApplicationError, PushMessage, PushProvider, SendResponse};
use async_trait::async_trait;
use config::PushConfig;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct BatchRequest<'a> {
    messages: &'a [PushMessage],
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<SendResponse>,
}

pub struct HttpPushProvider {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl HttpPushProvider {
    pub fn new(config: &PushConfig) -> Result<Self, ApplicationError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ApplicationError::infrastructure(format!("push client: {err}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            server_key: config.server_key.clone(),
        })
    }
}

/// 响应条数必须与请求一致，否则整批视为失败
fn match_responses(
    response: BatchResponse,
    expected: usize,
) -> Result<Vec<SendResponse>, ApplicationError> {
    if response.responses.len() != expected {
        return Err(ApplicationError::push(format!(
            "expected {expected} responses, got {}",
            response.responses.len()
        )));
    }
    Ok(response.responses)
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<SendResponse>, ApplicationError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", self.server_key))
            .json(&BatchRequest {
                messages: &messages,
            })
            .send()
            .await
            .map_err(|err| ApplicationError::push(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApplicationError::push(format!("status {status}: {body}")));
        }

        let body: BatchResponse = response
            .json()
            .await
            .map_err(|err| ApplicationError::push(format!("invalid response: {err}")))?;
        let responses = match_responses(body, messages.len())?;
        tracing::debug!(batch = messages.len(), "推送批次已发送");
        Ok(responses)
    }
}
