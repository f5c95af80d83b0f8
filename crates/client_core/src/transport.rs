use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::ModelSummary,
    error::TransportError,
    protocol::{ModelDataResponse, ModelListResponse, PredictResponse, StatusResponse},
};
use tracing::{debug, info};

use crate::{
    config::{prepare_server_url, ClientSettings},
    types::{ModelImages, PredictionPayload, TrainingUpload},
    TrainingService,
};

/// `TrainingService` over the service's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpTrainingService {
    http: Client,
    server_url: String,
}

impl HttpTrainingService {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let server_url = prepare_server_url(&settings.server_url)?;
        let mut builder = Client::builder();
        if let Some(timeout) = settings.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            server_url,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }
}

fn network(err: reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransportError::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response
        .json()
        .await
        .map_err(|err| TransportError::InvalidBody(err.to_string()))
}

fn file_part(
    bytes: Vec<u8>,
    file_name: String,
    mime_type: Option<&str>,
) -> Result<Part, TransportError> {
    let part = Part::bytes(bytes).file_name(file_name);
    match mime_type {
        Some(mime) => part
            .mime_str(mime)
            .map_err(|err| TransportError::InvalidBody(format!("invalid mime type: {err}"))),
        None => Ok(part),
    }
}

#[async_trait]
impl TrainingService for HttpTrainingService {
    async fn status(&self) -> Result<StatusResponse, TransportError> {
        let response = self
            .http
            .get(self.endpoint("/status"))
            .send()
            .await
            .map_err(network)?;
        decode_json(ensure_success(response).await?).await
    }

    async fn start_training(&self, upload: TrainingUpload) -> Result<(), TransportError> {
        let file_count = upload.files.len();
        let mut form = Form::new()
            .text("name", upload.name.clone())
            .text("type", upload.task_type.as_str());
        for file in upload.files {
            form = form.part("files", file_part(file.bytes, file.relative_path, None)?);
        }

        info!(
            name = %upload.name,
            task_type = %upload.task_type,
            file_count,
            "uploading training dataset"
        );
        let response = self
            .http
            .post(self.endpoint("/train"))
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn stop_training(&self) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.endpoint("/stop"))
            .send()
            .await
            .map_err(network)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn predict(&self, payload: PredictionPayload) -> Result<PredictResponse, TransportError> {
        let extra = serde_json::to_string(&payload.extra)
            .map_err(|err| TransportError::InvalidBody(err.to_string()))?;
        let image = payload.image;
        let form = Form::new()
            .part(
                "image",
                file_part(image.bytes, image.file_name, image.mime_type.as_deref())?,
            )
            .text("extraData", extra);

        debug!(
            player = %payload.extra.player,
            cropped = payload.extra.corners.is_some(),
            "sending prediction request"
        );
        let response = self
            .http
            .post(self.endpoint("/predict"))
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        decode_json(ensure_success(response).await?).await
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, TransportError> {
        let response = self
            .http
            .get(self.endpoint("/models"))
            .send()
            .await
            .map_err(network)?;
        let body: ModelListResponse = decode_json(ensure_success(response).await?).await?;
        Ok(body.model_list)
    }

    async fn model_data(
        &self,
        name: &str,
        model_type: &str,
    ) -> Result<ModelImages, TransportError> {
        let response = self
            .http
            .get(self.endpoint("/model_data"))
            .query(&[("name", name), ("type", model_type)])
            .send()
            .await
            .map_err(network)?;
        let body: ModelDataResponse = decode_json(ensure_success(response).await?).await?;

        let mut images = BTreeMap::new();
        for (key, encoded) in body.images {
            let bytes = STANDARD.decode(encoded.trim()).map_err(|err| {
                TransportError::InvalidBody(format!("image '{key}' is not valid base64: {err}"))
            })?;
            images.insert(key, bytes);
        }
        Ok(ModelImages { images })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
