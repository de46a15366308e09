//! Local generator client: `POST endpoint` with
//! `{"model","prompt","stream":false}`, replies `{"response": <text>}`.

use serde::{Deserialize, Serialize};

use crate::{OracleClient, OracleError, reject_error_status};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub(crate) async fn generate(client: &OracleClient, prompt: &str) -> Result<String, OracleError> {
    let body = GenerateRequest {
        model: client.model(),
        prompt,
        stream: false,
    };
    let response = client
        .http()
        .post(client.endpoint())
        .json(&body)
        .send()
        .await?;
    let response = reject_error_status(response).await?;
    let reply: GenerateResponse = response.json().await?;
    if reply.response.is_empty() {
        return Err(OracleError::EmptyResponse);
    }
    Ok(reply.response)
}
