use std::future::Future;

/// One named file part of a multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Text fields in insertion order, followed by a single file part.
#[derive(Debug, Clone)]
pub struct MultipartPayload {
    pub fields: Vec<(&'static str, String)>,
    pub file: FilePart,
}

impl MultipartPayload {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A settled HTTP exchange with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network request failed: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

pub trait Transport {
    /// Sends `payload` as `multipart/form-data` and waits for the whole body.
    /// A non-2xx status is still `Ok`.
    fn post_multipart(
        &self,
        url: &str,
        payload: MultipartPayload,
    ) -> impl Future<Output = Result<HttpReply, TransportError>>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn post_multipart(
        &self,
        url: &str,
        payload: MultipartPayload,
    ) -> Result<HttpReply, TransportError> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in payload.fields {
            form = form.text(name, value);
        }
        let file = reqwest::multipart::Part::bytes(payload.file.bytes)
            .file_name(payload.file.file_name);
        form = form.part(payload.file.field, file);

        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        log::info!("POST {} returned {} ({} bytes)", url, status, body.len());

        Ok(HttpReply { status, body })
    }
}
