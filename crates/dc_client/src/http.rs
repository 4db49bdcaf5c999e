//! HTTP relay client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use dc_proto::{
    api::{
        DeleteRequest, ErrorBody, LookupResponse, PollResponse, RegisterRequest, SendAccepted,
        SendRequest, UploadResponse,
    },
    Handle, Millis, RecordId,
};

use crate::{error::RelayError, relay::Relay};

const USER_AGENT: &str = concat!("dc-courier/", env!("CARGO_PKG_VERSION"));
const BLOB_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Register,
    Lookup,
    Send,
    Poll,
    Delete,
    Upload,
    Download,
}

#[derive(Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    base: Url,
}

impl HttpRelay {
    /// `timeout` bounds every request; an expired request surfaces as
    /// `RelayError::Network`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        let base = Url::parse(base_url)
            .map_err(|e| RelayError::Validation(format!("relay url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RelayError::Validation(format!("relay url {base_url:?} cannot be a base")));
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Network(format!("http client: {e}")))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, RelayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::Validation("relay url cannot be a base".into()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn check(op: Op, res: reqwest::Response) -> Result<reqwest::Response, RelayError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(classify(op, status, &body))
    }

    async fn json<T: DeserializeOwned>(op: Op, res: reqwest::Response) -> Result<T, RelayError> {
        let res = Self::check(op, res).await?;
        let status = res.status().as_u16();
        res.json::<T>().await.map_err(|e| RelayError::Unexpected {
            status,
            message: format!("{op:?} response body: {e}"),
        })
    }
}

fn transport(op: Op, e: reqwest::Error) -> RelayError {
    RelayError::Network(format!("{op:?}: {e}"))
}

/// Maps a non-success status to the error taxonomy. A 404 means different
/// things depending on what was asked for.
pub(crate) fn classify(op: Op, status: StatusCode, body: &str) -> RelayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RelayError::Validation(message),
        StatusCode::NOT_FOUND => match op {
            Op::Lookup => RelayError::PeerNotFound(message),
            _ => RelayError::NotFound(message),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RelayError::Network(format!("{status}: {message}"))
        }
        s if s.is_server_error() => RelayError::Network(format!("{status}: {message}")),
        s => RelayError::Unexpected { status: s.as_u16(), message },
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn register(&self, req: &RegisterRequest) -> Result<(), RelayError> {
        req.validate()?;
        let res = self
            .client
            .post(self.url(&["register"])?)
            .json(req)
            .send()
            .await
            .map_err(|e| transport(Op::Register, e))?;
        Self::check(Op::Register, res).await?;
        debug!(event = "relay_register", handle = %req.handle);
        Ok(())
    }

    async fn lookup(&self, handle: &Handle) -> Result<LookupResponse, RelayError> {
        if handle.is_empty() {
            return Err(RelayError::Validation("handle is required".into()));
        }
        let res = self
            .client
            .get(self.url(&["keys", handle.as_str()])?)
            .send()
            .await
            .map_err(|e| transport(Op::Lookup, e))?;
        match Self::json::<LookupResponse>(Op::Lookup, res).await {
            Err(RelayError::PeerNotFound(_)) => Err(RelayError::PeerNotFound(handle.to_string())),
            other => other,
        }
    }

    async fn send(&self, req: &SendRequest) -> Result<RecordId, RelayError> {
        req.validate()?;
        let res = self
            .client
            .post(self.url(&["messages"])?)
            .json(req)
            .send()
            .await
            .map_err(|e| transport(Op::Send, e))?;
        let accepted: SendAccepted = Self::json(Op::Send, res).await?;
        Ok(accepted.id)
    }

    async fn poll(&self, handle: &Handle, since: Millis) -> Result<PollResponse, RelayError> {
        let res = self
            .client
            .get(self.url(&["messages", handle.as_str()])?)
            .query(&[("since", since)])
            .send()
            .await
            .map_err(|e| transport(Op::Poll, e))?;
        Self::json(Op::Poll, res).await
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<(), RelayError> {
        req.validate()?;
        let res = self
            .client
            .post(self.url(&["messages", "delete"])?)
            .json(req)
            .send()
            .await
            .map_err(|e| transport(Op::Delete, e))?;
        Self::check(Op::Delete, res).await?;
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, name: Option<&str>) -> Result<String, RelayError> {
        if bytes.is_empty() {
            return Err(RelayError::Validation("no file part".into()));
        }
        let len = bytes.len();
        let part = multipart::Part::bytes(bytes)
            .file_name(name.unwrap_or("blob").to_string())
            .mime_str(BLOB_MIME)
            .map_err(|e| RelayError::Validation(format!("multipart: {e}")))?;
        let form = multipart::Form::new().part("file", part);
        let res = self
            .client
            .post(self.url(&["blobs"])?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(Op::Upload, e))?;
        let uploaded: UploadResponse = Self::json(Op::Upload, res).await?;
        debug!(event = "relay_upload", blob_id = %uploaded.id, len);
        Ok(uploaded.id)
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>, RelayError> {
        let res = self
            .client
            .get(self.url(&["blobs", id])?)
            .send()
            .await
            .map_err(|e| transport(Op::Download, e))?;
        let res = Self::check(Op::Download, res).await?;
        let bytes = res.bytes().await.map_err(|e| transport(Op::Download, e))?;
        Ok(bytes.to_vec())
    }
}
