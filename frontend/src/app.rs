use egui_commonmark::{CommonMarkCache, CommonMarkViewer};
use parking_lot::{Mutex, MutexGuard};
use poll_promise::Promise;
use std::fmt;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::submit::{field, SubmitForm, SubmitHandler, SubmitOutcome, SubmitState, TemplateFile};
use crate::transport::ReqwestTransport;

#[cfg(not(target_arch = "wasm32"))]
type PlatformSaver = crate::download::DirectorySaver;
#[cfg(target_arch = "wasm32")]
type PlatformSaver = crate::download::BrowserSaver;

type Handler = SubmitHandler<ReqwestTransport, PlatformSaver>;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

// LLM providers the generation server knows how to call
#[derive(Debug, PartialEq, Copy, Clone)]
enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Gemini];

    fn form_value(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "OpenAI"),
            Provider::Gemini => write!(f, "Gemini"),
        }
    }
}

// Live form values plus what the handler reports back
struct FormState {
    text: String,
    guidance: String,
    provider: Provider,
    model: String,
    api_key: String,
    template: Option<TemplateFile>,
    status: String,
    notice: Option<String>,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            text: String::new(),
            guidance: String::new(),
            provider: Provider::OpenAi,
            model: DEFAULT_MODEL.to_owned(),
            api_key: String::new(),
            template: None,
            status: String::new(),
            notice: None,
        }
    }
}

/// Form state shared between the UI thread and the running request.
#[derive(Clone)]
struct SharedForm {
    state: Arc<Mutex<FormState>>,
    ctx: egui::Context,
}

impl SharedForm {
    fn new(ctx: egui::Context) -> Self {
        Self {
            state: Arc::new(Mutex::new(FormState::default())),
            ctx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FormState> {
        self.state.lock()
    }
}

impl SubmitForm for SharedForm {
    fn get_field(&self, name: &str) -> String {
        let state = self.lock();
        match name {
            field::TEXT => state.text.clone(),
            field::GUIDANCE => state.guidance.clone(),
            field::PROVIDER => state.provider.form_value().to_owned(),
            field::MODEL => state.model.clone(),
            field::API_KEY => state.api_key.clone(),
            _ => String::new(),
        }
    }

    fn get_file(&self, name: &str) -> Option<TemplateFile> {
        match name {
            field::TEMPLATE => self.lock().template.clone(),
            _ => None,
        }
    }

    fn set_status(&self, text: &str) {
        self.lock().status = text.to_owned();
        self.ctx.request_repaint();
    }

    fn show_blocking_notice(&self, text: &str) {
        self.lock().notice = Some(text.to_owned());
        self.ctx.request_repaint();
    }
}

/// Main application state. Only `config` survives a restart.
pub struct DeckgenApp {
    config: AppConfig,
    server_url_draft: String,
    form: SharedForm,
    handler: Arc<Handler>,
    submit_promise: Option<Promise<SubmitOutcome>>,
    #[cfg(target_arch = "wasm32")]
    template_promise: Option<Promise<Option<TemplateFile>>>,
    #[cfg(not(target_arch = "wasm32"))]
    runtime: Arc<tokio::runtime::Runtime>,
    show_preview: bool,
    markdown_cache: CommonMarkCache,
}

impl DeckgenApp {
    /// Called once before the first frame.
    pub fn new(cc: &eframe::CreationContext<'_>) -> std::io::Result<Self> {
        let config = AppConfig::load(cc.storage);
        log::info!("Generation endpoint: {}", config.generate_url());

        Ok(Self {
            server_url_draft: config.server_url.clone(),
            handler: Arc::new(build_handler(&config)),
            config,
            form: SharedForm::new(cc.egui_ctx.clone()),
            submit_promise: None,
            #[cfg(target_arch = "wasm32")]
            template_promise: None,
            #[cfg(not(target_arch = "wasm32"))]
            runtime: Arc::new(
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .build()?,
            ),
            show_preview: false,
            markdown_cache: CommonMarkCache::default(),
        })
    }

    fn is_submitting(&self) -> bool {
        self.submit_promise.is_some() || self.handler.state() == SubmitState::Submitting
    }

    fn trigger_submit(&mut self) {
        if self.submit_promise.is_some() {
            log::warn!("Generate clicked while a request is pending; ignoring.");
            return;
        }
        log::info!("Generate triggered");
        self.submit_promise = Some(spawn_submit(self));
    }

    fn apply_settings(&mut self) {
        self.config.server_url = self.server_url_draft.trim().to_owned();
        self.handler = Arc::new(build_handler(&self.config));
        log::info!("Generation endpoint changed to {}", self.handler.endpoint());
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn browse_template(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("PowerPoint template", &["pptx", "potx"])
            .add_filter("All files", &["*"])
            .pick_file()
        else {
            log::info!("User cancelled template dialog.");
            return;
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "template.pptx".to_owned());
                log::info!("Template selected: {} ({} bytes)", file_name, bytes.len());
                self.form.lock().template = Some(TemplateFile { file_name, bytes });
            }
            Err(e) => {
                log::error!("Failed to read template {:?}: {}", path, e);
                self.form
                    .set_status(&format!("Error: could not read {}: {}", path.display(), e));
            }
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn browse_template(&mut self) {
        if self.template_promise.is_some() {
            return;
        }
        self.template_promise = Some(Promise::spawn_local(async {
            let handle = rfd::AsyncFileDialog::new()
                .add_filter("PowerPoint template", &["pptx", "potx"])
                .pick_file()
                .await?;
            Some(TemplateFile {
                file_name: handle.file_name(),
                bytes: handle.read().await,
            })
        }));
    }

    #[cfg(target_arch = "wasm32")]
    fn poll_template_promise(&mut self) {
        let Some(promise) = &self.template_promise else {
            return;
        };
        if let Some(picked) = promise.ready() {
            match picked {
                Some(template) => {
                    log::info!(
                        "Template selected: {} ({} bytes)",
                        template.file_name,
                        template.bytes.len()
                    );
                    self.form.lock().template = Some(template.clone());
                }
                None => log::info!("User cancelled template dialog."),
            }
            self.template_promise = None;
        }
    }

    fn poll_submit_promise(&mut self) {
        let Some(promise) = &self.submit_promise else {
            return;
        };
        if let Some(outcome) = promise.ready() {
            log::info!("Generate finished: {:?}", outcome);
            self.submit_promise = None;
        }
    }

    fn notice_modal(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.form.lock().notice.clone() else {
            return;
        };
        let modal = egui::Modal::new(egui::Id::new("blocking_notice")).show(ctx, |ui| {
            ui.set_width(320.0);
            ui.heading("Missing input");
            ui.add_space(6.0);
            ui.label(notice);
            ui.add_space(10.0);
            ui.button("OK").clicked()
        });
        if modal.inner || modal.should_close() {
            self.form.lock().notice = None;
        }
    }

    fn form_panel(&mut self, ui: &mut egui::Ui) -> FormActions {
        let mut actions = FormActions::default();
        let enabled = !self.is_submitting();
        let mut state = self.form.lock();

        egui::Grid::new("generate_form")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label("Text");
                ui.vertical(|ui| {
                    ui.add_enabled(
                        enabled,
                        egui::TextEdit::multiline(&mut state.text)
                            .id_salt(field::TEXT)
                            .desired_rows(10)
                            .desired_width(f32::INFINITY)
                            .hint_text("Paste markdown or prose to turn into slides..."),
                    );
                    ui.checkbox(&mut self.show_preview, "Preview");
                });
                ui.end_row();

                ui.label("Guidance");
                ui.add_enabled(
                    enabled,
                    egui::TextEdit::singleline(&mut state.guidance)
                        .id_salt(field::GUIDANCE)
                        .desired_width(f32::INFINITY)
                        .hint_text("e.g. investor pitch, 8 slides max"),
                );
                ui.end_row();

                ui.label("Provider");
                ui.add_enabled_ui(enabled, |ui| {
                    egui::ComboBox::from_id_salt(field::PROVIDER)
                        .selected_text(state.provider.to_string())
                        .show_ui(ui, |ui| {
                            for provider in Provider::ALL {
                                ui.selectable_value(
                                    &mut state.provider,
                                    provider,
                                    provider.to_string(),
                                );
                            }
                        });
                });
                ui.end_row();

                ui.label("Model");
                ui.add_enabled(
                    enabled,
                    egui::TextEdit::singleline(&mut state.model)
                        .id_salt(field::MODEL)
                        .desired_width(f32::INFINITY),
                );
                ui.end_row();

                ui.label("API key");
                ui.add_enabled(
                    enabled,
                    egui::TextEdit::singleline(&mut state.api_key)
                        .id_salt(field::API_KEY)
                        .password(true)
                        .desired_width(f32::INFINITY),
                );
                ui.end_row();

                ui.label("Template");
                ui.horizontal(|ui| {
                    if ui
                        .add_enabled(enabled, egui::Button::new("Browse…"))
                        .clicked()
                    {
                        actions.browse = true;
                    }
                    match &state.template {
                        Some(template) => ui.label(format!(
                            "{} ({} KB)",
                            template.file_name,
                            template.bytes.len().div_ceil(1024)
                        )),
                        None => ui.weak("No file selected"),
                    };
                });
                ui.end_row();
            });

        if self.show_preview {
            ui.separator();
            egui::Frame::group(ui.style()).show(ui, |ui| {
                let text = if state.text.trim().is_empty() {
                    "*Nothing to preview yet.*"
                } else {
                    state.text.as_str()
                };
                CommonMarkViewer::new().show(ui, &mut self.markdown_cache, text);
            });
        }

        ui.add_space(10.0);
        egui::CollapsingHeader::new("Settings").show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label("Server URL");
                ui.add_enabled(
                    enabled,
                    egui::TextEdit::singleline(&mut self.server_url_draft).desired_width(260.0),
                );
                let changed = self.server_url_draft.trim() != self.config.server_url;
                if ui
                    .add_enabled(enabled && changed, egui::Button::new("Apply"))
                    .clicked()
                {
                    actions.apply_settings = true;
                }
            });
            ui.weak(format!("Requests go to {}", self.handler.endpoint()));
            #[cfg(not(target_arch = "wasm32"))]
            ui.weak(format!(
                "Decks are saved in {}",
                self.config.resolved_output_dir().display()
            ));
        });

        actions
    }
}

#[derive(Default)]
struct FormActions {
    browse: bool,
    apply_settings: bool,
}

impl eframe::App for DeckgenApp {
    /// Called by the frame work to save state before shutdown.
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        self.config.save(storage);
    }

    /// Called each time the UI needs repainting.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_submit_promise();
        #[cfg(target_arch = "wasm32")]
        self.poll_template_promise();

        let is_submitting = self.is_submitting();

        // --- Top Panel ---
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.heading("Deck Generator");
            });
        });

        // --- Bottom Panel (Status/Generate) ---
        let mut generate_clicked = false;
        egui::TopBottomPanel::bottom("status_panel")
            .resizable(false)
            .show(ctx, |ui| {
                ui.add_space(5.0);
                let panel_frame = egui::Frame::NONE.inner_margin(egui::Margin::symmetric(10, 5));
                panel_frame.show(ui, |ui| {
                    ui.horizontal(|ui| {
                        let button_text = if is_submitting { "..." } else { "Generate" };
                        let button =
                            egui::Button::new(button_text).min_size(egui::vec2(120.0, 35.0));
                        if ui.add_enabled(!is_submitting, button).clicked() {
                            generate_clicked = true;
                        }
                        if is_submitting {
                            ui.add(egui::Spinner::new());
                        }

                        let status = self.form.lock().status.clone();
                        if status.starts_with("Error: ") {
                            ui.colored_label(egui::Color32::RED, status);
                        } else {
                            ui.label(status);
                        }
                    });

                    // --- Footer Row ---
                    ui.horizontal(|ui| {
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            ui.add_space(10.0);
                            egui::widgets::global_theme_preference_buttons(ui);
                            let is_web = cfg!(target_arch = "wasm32");
                            if !is_web && ui.button("Quit").clicked() {
                                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                            }
                        });
                    });
                });
                ui.add_space(5.0);
            });

        // --- Central Panel (Form) ---
        let actions = egui::CentralPanel::default()
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .show(ui, |ui| self.form_panel(ui))
                    .inner
            })
            .inner;

        self.notice_modal(ctx);

        // Form lock is released by now; these may block or re-enter it.
        if actions.browse {
            self.browse_template();
        }
        if actions.apply_settings {
            self.apply_settings();
        }
        if generate_clicked {
            self.trigger_submit();
        }
    }
}

fn build_handler(config: &AppConfig) -> Handler {
    SubmitHandler::new(
        ReqwestTransport::default(),
        platform_saver(config),
        config.generate_url(),
    )
}

#[cfg(not(target_arch = "wasm32"))]
fn platform_saver(config: &AppConfig) -> PlatformSaver {
    crate::download::DirectorySaver::new(config.resolved_output_dir())
}

#[cfg(target_arch = "wasm32")]
fn platform_saver(_config: &AppConfig) -> PlatformSaver {
    crate::download::BrowserSaver
}

// --- Helper function to spawn the generate promise ---
fn spawn_submit(app: &DeckgenApp) -> Promise<SubmitOutcome> {
    let handler = Arc::clone(&app.handler);
    let form = app.form.clone();

    #[cfg(not(target_arch = "wasm32"))]
    {
        let runtime = Arc::clone(&app.runtime);
        Promise::spawn_thread("deckgen_generate", move || {
            runtime.block_on(async move { handler.handle_submit(&form).await })
        })
    }
    #[cfg(target_arch = "wasm32")]
    {
        Promise::spawn_local(async move { handler.handle_submit(&form).await })
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn filled_form() -> SharedForm {
        let form = SharedForm::new(egui::Context::default());
        {
            let mut state = form.lock();
            state.text = "## Agenda".to_owned();
            state.guidance = "formal tone".to_owned();
            state.provider = Provider::Gemini;
            state.model = "gemini-1.5-pro".to_owned();
            state.api_key = "sk-form".to_owned();
            state.template = Some(TemplateFile {
                file_name: "brand.pptx".to_owned(),
                bytes: vec![7, 8, 9],
            });
        }
        form
    }

    #[test]
    fn fields_map_to_form_state() {
        let form = filled_form();

        assert_eq!(form.get_field(field::TEXT), "## Agenda");
        assert_eq!(form.get_field(field::GUIDANCE), "formal tone");
        assert_eq!(form.get_field(field::PROVIDER), "gemini");
        assert_eq!(form.get_field(field::MODEL), "gemini-1.5-pro");
        assert_eq!(form.get_field(field::API_KEY), "sk-form");
        assert_eq!(
            form.get_file(field::TEMPLATE),
            Some(TemplateFile {
                file_name: "brand.pptx".to_owned(),
                bytes: vec![7, 8, 9],
            })
        );
    }

    #[test]
    fn unknown_names_are_empty() {
        let form = filled_form();

        assert_eq!(form.get_field("status"), "");
        assert_eq!(form.get_field(field::TEMPLATE), "");
        assert_eq!(form.get_file(field::TEXT), None);
        assert_eq!(form.get_file("attachment"), None);
    }

    #[test]
    fn provider_values_are_lowercase_identifiers() {
        let form = SharedForm::new(egui::Context::default());
        assert_eq!(form.get_field(field::PROVIDER), "openai");
        assert_eq!(form.get_field(field::MODEL), DEFAULT_MODEL);
        assert_eq!(Provider::Gemini.form_value(), "gemini");
    }

    #[test]
    fn status_and_notice_land_in_state() {
        let form = SharedForm::new(egui::Context::default());

        form.set_status("Error: bad request");
        form.show_blocking_notice("Please provide text, API key and a template file.");

        let state = form.lock();
        assert_eq!(state.status, "Error: bad request");
        assert_eq!(
            state.notice.as_deref(),
            Some("Please provide text, API key and a template file.")
        );
    }
}
