use parking_lot::Mutex;
use std::fmt;

use crate::download::{FileSaver, SaveError};
use crate::transport::{FilePart, MultipartPayload, Transport, TransportError};

/// Path of the generation endpoint, relative to the configured server.
pub const GENERATE_PATH: &str = "/generate";
/// Name under which the generated deck is saved.
pub const OUTPUT_FILE_NAME: &str = "generated_presentation.pptx";

pub const MISSING_INPUT_NOTICE: &str = "Please provide text, API key and a template file.";
pub const GENERATING_STATUS: &str = "Generating... this may take 10-60s depending on your LLM.";
pub const DONE_STATUS: &str = "Done — downloaded.";
pub const SERVER_ERROR_FALLBACK: &str = "Server returned an error";

/// Form element identifiers. They double as the multipart field names.
pub mod field {
    pub const TEXT: &str = "text";
    pub const GUIDANCE: &str = "guidance";
    pub const PROVIDER: &str = "provider";
    pub const MODEL: &str = "model";
    pub const API_KEY: &str = "api_key";
    pub const TEMPLATE: &str = "template";
}

/// A user-selected file, held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for TemplateFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateFile")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// API key forwarded to the generation server. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Everything needed for one generation request, read from the form at
/// trigger time.
#[derive(Debug, Clone)]
pub struct SubmissionInput {
    pub text: String,
    pub guidance: String,
    pub provider: String,
    pub model: String,
    pub api_key: ApiKey,
    pub template: TemplateFile,
}

impl SubmissionInput {
    /// Reads the current form values. `text`, `api_key` and `template` are
    /// required; the rest may be empty.
    pub fn from_form<F: SubmitForm + ?Sized>(form: &F) -> Result<Self, SubmitError> {
        let text = form.get_field(field::TEXT);
        let api_key = ApiKey::new(form.get_field(field::API_KEY));
        let template = match form.get_file(field::TEMPLATE) {
            Some(template) if !text.is_empty() && !api_key.is_empty() => template,
            _ => return Err(SubmitError::MissingInput),
        };

        Ok(Self {
            text,
            guidance: form.get_field(field::GUIDANCE),
            provider: form.get_field(field::PROVIDER),
            model: form.get_field(field::MODEL),
            api_key,
            template,
        })
    }

    pub fn into_payload(self) -> MultipartPayload {
        MultipartPayload {
            fields: vec![
                (field::TEXT, self.text),
                (field::GUIDANCE, self.guidance),
                (field::PROVIDER, self.provider),
                (field::MODEL, self.model),
                (field::API_KEY, self.api_key.0),
            ],
            file: FilePart {
                field: field::TEMPLATE,
                file_name: self.template.file_name,
                bytes: self.template.bytes,
            },
        }
    }
}

/// UI-state boundary the handler reads from and reports to.
pub trait SubmitForm {
    /// Current value of a text field; empty when the field is blank or unknown.
    fn get_field(&self, name: &str) -> String;
    fn get_file(&self, name: &str) -> Option<TemplateFile>;
    fn set_status(&self, text: &str);
    fn show_blocking_notice(&self, text: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{}", MISSING_INPUT_NOTICE)]
    MissingInput,
    #[error("{0}")]
    Server(String),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Save(#[from] SaveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// What a single trigger ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A request was already in flight.
    Ignored,
    /// Required input was missing; no request was made.
    Rejected,
    Succeeded,
    Failed(String),
}

/// Runs one trigger → request → download cycle at a time.
pub struct SubmitHandler<T, S> {
    transport: T,
    saver: S,
    endpoint: String,
    state: Mutex<SubmitState>,
}

impl<T: Transport, S: FileSaver> SubmitHandler<T, S> {
    pub fn new(transport: T, saver: S, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            saver,
            endpoint: endpoint.into(),
            state: Mutex::new(SubmitState::Idle),
        }
    }

    pub fn state(&self) -> SubmitState {
        *self.state.lock()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn handle_submit<F: SubmitForm + ?Sized>(&self, form: &F) -> SubmitOutcome {
        let Some(mut in_flight) = self.begin() else {
            log::warn!("Generation already in progress; ignoring trigger.");
            return SubmitOutcome::Ignored;
        };

        let input = match SubmissionInput::from_form(form) {
            Ok(input) => input,
            Err(err) => {
                form.show_blocking_notice(&err.to_string());
                in_flight.settle(SubmitState::Idle);
                return SubmitOutcome::Rejected;
            }
        };

        form.set_status(GENERATING_STATUS);
        log::info!(
            "Requesting generation from {} (provider: {:?}, model: {:?}, template: {}, {} bytes)",
            self.endpoint,
            input.provider,
            input.model,
            input.template.file_name,
            input.template.bytes.len()
        );

        match self.generate(input).await {
            Ok(()) => {
                form.set_status(DONE_STATUS);
                in_flight.settle(SubmitState::Succeeded);
                SubmitOutcome::Succeeded
            }
            Err(err) => {
                log::error!("Generation failed: {:?}", err);
                let message = err.to_string();
                form.set_status(&format!("Error: {}", message));
                in_flight.settle(SubmitState::Failed);
                SubmitOutcome::Failed(message)
            }
        }
    }

    async fn generate(&self, input: SubmissionInput) -> Result<(), SubmitError> {
        let reply = self
            .transport
            .post_multipart(&self.endpoint, input.into_payload())
            .await?;

        if !reply.is_success() {
            let body = reply.text();
            let message = if body.is_empty() {
                SERVER_ERROR_FALLBACK.to_string()
            } else {
                body
            };
            return Err(SubmitError::Server(message));
        }

        log::info!("Received {} bytes, saving as {}", reply.body.len(), OUTPUT_FILE_NAME);
        self.saver.save(&reply.body, OUTPUT_FILE_NAME)?;
        Ok(())
    }

    fn begin(&self) -> Option<InFlight<'_>> {
        let mut state = self.state.lock();
        if *state == SubmitState::Submitting {
            return None;
        }
        *state = SubmitState::Submitting;
        Some(InFlight {
            state: &self.state,
            settled_as: SubmitState::Failed,
        })
    }
}

/// Holds the `Submitting` flag. Whatever state was settled on is written
/// back on drop, `Failed` if the future was dropped mid-request.
struct InFlight<'a> {
    state: &'a Mutex<SubmitState>,
    settled_as: SubmitState,
}

impl InFlight<'_> {
    fn settle(&mut self, state: SubmitState) {
        self.settled_as = state;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.state.lock() = self.settled_as;
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::transport::HttpReply;
    use futures::executor::block_on;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeForm {
        fields: HashMap<&'static str, String>,
        template: Option<TemplateFile>,
        statuses: Mutex<Vec<String>>,
        notices: Mutex<Vec<String>>,
    }

    impl FakeForm {
        fn complete() -> Self {
            let mut fields = HashMap::new();
            fields.insert(field::TEXT, "# Quarterly review".to_string());
            fields.insert(field::GUIDANCE, "keep it short".to_string());
            fields.insert(field::PROVIDER, "openai".to_string());
            fields.insert(field::MODEL, "gpt-4o-mini".to_string());
            fields.insert(field::API_KEY, "sk-test".to_string());
            Self {
                fields,
                template: Some(TemplateFile {
                    file_name: "corporate.pptx".to_string(),
                    bytes: vec![0x50, 0x4b, 0x03, 0x04],
                }),
                ..Default::default()
            }
        }

        fn without(mut self, name: &str) -> Self {
            if name == field::TEMPLATE {
                self.template = None;
            } else {
                self.fields.remove(name);
            }
            self
        }

        fn last_status(&self) -> Option<String> {
            self.statuses.lock().last().cloned()
        }
    }

    impl SubmitForm for FakeForm {
        fn get_field(&self, name: &str) -> String {
            self.fields.get(name).cloned().unwrap_or_default()
        }

        fn get_file(&self, _name: &str) -> Option<TemplateFile> {
            self.template.clone()
        }

        fn set_status(&self, text: &str) {
            self.statuses.lock().push(text.to_string());
        }

        fn show_blocking_notice(&self, text: &str) {
            self.notices.lock().push(text.to_string());
        }
    }

    enum Reply {
        Status(u16, &'static [u8]),
        Unreachable,
    }

    struct FakeTransport {
        reply: Reply,
        requests: Mutex<Vec<(String, MultipartPayload)>>,
    }

    impl FakeTransport {
        fn replying(reply: Reply) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for FakeTransport {
        async fn post_multipart(
            &self,
            url: &str,
            payload: MultipartPayload,
        ) -> Result<HttpReply, TransportError> {
            self.requests.lock().push((url.to_string(), payload));
            match self.reply {
                Reply::Status(status, body) => Ok(HttpReply {
                    status,
                    body: body.to_vec(),
                }),
                Reply::Unreachable => Err(TransportError::Network(
                    "error sending request: connection refused".to_string(),
                )),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSaver {
        saved: Mutex<Vec<(Vec<u8>, String)>>,
        fail: bool,
    }

    impl FileSaver for RecordingSaver {
        fn save(&self, bytes: &[u8], file_name: &str) -> Result<(), SaveError> {
            if self.fail {
                return Err(SaveError::Browser("anchor rejected".to_string()));
            }
            self.saved.lock().push((bytes.to_vec(), file_name.to_string()));
            Ok(())
        }
    }

    fn handler(reply: Reply) -> SubmitHandler<FakeTransport, RecordingSaver> {
        SubmitHandler::new(
            FakeTransport::replying(reply),
            RecordingSaver::default(),
            "http://localhost:8000/generate",
        )
    }

    #[test]
    fn missing_required_input_shows_notice_without_request() {
        for missing in [field::TEXT, field::API_KEY, field::TEMPLATE] {
            let handler = handler(Reply::Status(200, b"deck"));
            let form = FakeForm::complete().without(missing);

            let outcome = block_on(handler.handle_submit(&form));

            assert_eq!(outcome, SubmitOutcome::Rejected, "missing {missing}");
            assert!(handler.transport.requests.lock().is_empty());
            assert_eq!(*form.notices.lock(), vec![MISSING_INPUT_NOTICE.to_string()]);
            assert!(form.statuses.lock().is_empty());
            assert_eq!(handler.state(), SubmitState::Idle);
        }
    }

    #[test]
    fn optional_fields_may_be_empty() {
        let handler = handler(Reply::Status(200, b"deck"));
        let form = FakeForm::complete()
            .without(field::GUIDANCE)
            .without(field::PROVIDER)
            .without(field::MODEL);

        assert_eq!(block_on(handler.handle_submit(&form)), SubmitOutcome::Succeeded);

        let requests = handler.transport.requests.lock();
        let (_, payload) = &requests[0];
        assert_eq!(payload.field(field::GUIDANCE), Some(""));
        assert_eq!(payload.field(field::PROVIDER), Some(""));
        assert_eq!(payload.field(field::MODEL), Some(""));
    }

    #[test]
    fn valid_input_posts_all_fields_once() {
        let handler = handler(Reply::Status(200, b"deck"));
        let form = FakeForm::complete();

        block_on(handler.handle_submit(&form));

        let requests = handler.transport.requests.lock();
        assert_eq!(requests.len(), 1);
        let (url, payload) = &requests[0];
        assert_eq!(url, "http://localhost:8000/generate");
        assert_eq!(payload.field(field::TEXT), Some("# Quarterly review"));
        assert_eq!(payload.field(field::GUIDANCE), Some("keep it short"));
        assert_eq!(payload.field(field::PROVIDER), Some("openai"));
        assert_eq!(payload.field(field::MODEL), Some("gpt-4o-mini"));
        assert_eq!(payload.field(field::API_KEY), Some("sk-test"));
        assert_eq!(payload.file.field, field::TEMPLATE);
        assert_eq!(payload.file.file_name, "corporate.pptx");
        assert_eq!(payload.file.bytes, vec![0x50, 0x4b, 0x03, 0x04]);
    }

    #[test]
    fn success_saves_body_and_reports_done() {
        let handler = handler(Reply::Status(200, b"PK\x03\x04generated"));
        let form = FakeForm::complete();

        let outcome = block_on(handler.handle_submit(&form));

        assert_eq!(outcome, SubmitOutcome::Succeeded);
        let saved = handler.saver.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, b"PK\x03\x04generated".to_vec());
        assert_eq!(saved[0].1, OUTPUT_FILE_NAME);
        assert_eq!(
            *form.statuses.lock(),
            vec![GENERATING_STATUS.to_string(), DONE_STATUS.to_string()]
        );
        assert_eq!(handler.state(), SubmitState::Succeeded);
    }

    #[test]
    fn server_error_uses_body_text() {
        let handler = handler(Reply::Status(500, b"bad request"));
        let form = FakeForm::complete();

        let outcome = block_on(handler.handle_submit(&form));

        assert_eq!(outcome, SubmitOutcome::Failed("bad request".to_string()));
        assert_eq!(form.last_status().as_deref(), Some("Error: bad request"));
        assert!(handler.saver.saved.lock().is_empty());
        assert_eq!(handler.state(), SubmitState::Failed);
    }

    #[test]
    fn server_error_with_empty_body_uses_fallback() {
        let handler = handler(Reply::Status(500, b""));
        let form = FakeForm::complete();

        block_on(handler.handle_submit(&form));

        assert_eq!(
            form.last_status().as_deref(),
            Some("Error: Server returned an error")
        );
    }

    #[test]
    fn server_error_with_whitespace_body_keeps_it() {
        let handler = handler(Reply::Status(502, b"  "));
        let form = FakeForm::complete();

        let outcome = block_on(handler.handle_submit(&form));

        assert_eq!(outcome, SubmitOutcome::Failed("  ".to_string()));
        assert_eq!(form.last_status().as_deref(), Some("Error:   "));
    }

    #[test]
    fn missing_input_message_matches_notice() {
        assert_eq!(SubmitError::MissingInput.to_string(), MISSING_INPUT_NOTICE);
    }

    #[test]
    fn network_failure_reports_error_description() {
        let handler = handler(Reply::Unreachable);
        let form = FakeForm::complete();

        let outcome = block_on(handler.handle_submit(&form));

        assert!(matches!(outcome, SubmitOutcome::Failed(_)));
        let status = form.last_status().unwrap_or_default();
        assert!(status.starts_with("Error: "), "{status}");
        assert!(status.contains("connection refused"), "{status}");
        assert!(handler.saver.saved.lock().is_empty());
    }

    #[test]
    fn save_failure_is_reported() {
        let handler = SubmitHandler::new(
            FakeTransport::replying(Reply::Status(200, b"deck")),
            RecordingSaver {
                fail: true,
                ..Default::default()
            },
            "/generate",
        );
        let form = FakeForm::complete();

        block_on(handler.handle_submit(&form));

        assert_eq!(
            form.last_status().as_deref(),
            Some("Error: Could not save file: anchor rejected")
        );
        assert_eq!(handler.state(), SubmitState::Failed);
    }

    #[test]
    fn trigger_while_submitting_is_ignored() {
        let handler = handler(Reply::Status(200, b"deck"));
        let form = FakeForm::complete();
        *handler.state.lock() = SubmitState::Submitting;

        let outcome = block_on(handler.handle_submit(&form));

        assert_eq!(outcome, SubmitOutcome::Ignored);
        assert!(handler.transport.requests.lock().is_empty());
        assert!(form.statuses.lock().is_empty());
        assert!(form.notices.lock().is_empty());
    }

    #[test]
    fn terminal_states_accept_the_next_trigger() {
        let handler = handler(Reply::Status(500, b"quota exceeded"));
        let form = FakeForm::complete();

        block_on(handler.handle_submit(&form));
        block_on(handler.handle_submit(&form));

        assert_eq!(handler.transport.requests.lock().len(), 2);
    }

    #[test]
    fn dropped_request_releases_the_guard() {
        let handler = handler(Reply::Status(200, b"deck"));
        {
            let _in_flight = handler.begin();
            assert_eq!(handler.state(), SubmitState::Submitting);
        }
        assert_eq!(handler.state(), SubmitState::Failed);
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let input = SubmissionInput::from_form(&FakeForm::complete()).unwrap();
        let printed = format!("{:?}", input);
        assert!(!printed.contains("sk-test"));
        assert!(printed.contains("<redacted>"));
    }
}
