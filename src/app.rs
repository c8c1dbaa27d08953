//! The three-screen egui shell: paste a url, pick a format, watch the download.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use eframe::{egui, App, Frame};
use egui::{Align2, RichText, TextureOptions};
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use tokio::runtime::Handle;
use tracing::warn;

use crate::config::AppConfig;
use crate::controller::{NoticeKind, Session};
use crate::downloader::{run_discover, run_fetch, DownloadJob, MediaBackend, YtDlpBackend};
use crate::model::{DownloadState, Stage};
use crate::thumbnail::{self, ThumbnailInbox};

const APP_TITLE: &str = "Video Downloader";

/// What the user clicked this frame
enum Action {
    Fetch,
    Download,
    Back,
    Cancel,
    Dismiss,
    OpenFolder(PathBuf),
}

/// Application state for the GUI
pub struct DownloaderApp {
    config: AppConfig,
    runtime: Handle,
    session: Session,
    /// Input field for the video URL
    url_input: String,
    /// Destination folder for downloads
    download_folder: String,
    /// Picker label of the chosen format
    selected_label: String,
    thumbnail: Option<egui::TextureHandle>,
    /// Incoming thumbnail fetch results
    thumbnails: ThumbnailInbox,
    window_title: String,
}

impl DownloaderApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig, runtime: Handle) -> Self {
        let ctx = cc.egui_ctx.clone();
        let session = Session::new(Some(Arc::new(move || ctx.request_repaint())));
        let download_folder = config.default_download_dir().display().to_string();

        Self {
            config,
            runtime,
            session,
            url_input: String::new(),
            download_folder,
            selected_label: String::new(),
            thumbnail: None,
            thumbnails: ThumbnailInbox::default(),
            window_title: APP_TITLE.to_string(),
        }
    }

    fn backend(&mut self) -> Option<Arc<dyn MediaBackend>> {
        match YtDlpBackend::from_config(&self.config) {
            Ok(backend) => Some(Arc::new(backend)),
            Err(e) => {
                self.session.report(&e);
                None
            }
        }
    }

    fn start_discover(&mut self) {
        let Some(backend) = self.backend() else { return };
        match self.session.begin_discover(&self.url_input) {
            Ok((url, sink)) => {
                self.runtime.spawn(run_discover(backend, url, sink));
            }
            Err(e) => self.session.report(&e),
        }
    }

    fn start_download(&mut self) {
        let request = match self.session.prepare_fetch(
            &self.url_input,
            &self.selected_label,
            &self.download_folder,
            &self.config,
        ) {
            Ok(request) => request,
            Err(e) => return self.session.report(&e),
        };
        let Some(backend) = self.backend() else { return };
        // ffmpeg is checked here, before yt-dlp touches the network
        let job = match DownloadJob::prepare(&request, &self.config) {
            Ok(job) => job,
            Err(e) => return self.session.report(&e),
        };

        self.download_folder = request.destination.display().to_string();
        match self.session.begin_fetch() {
            Ok((sink, cancel)) => {
                self.runtime.spawn(run_fetch(backend, job, sink, cancel));
            }
            Err(e) => self.session.report(&e),
        }
    }

    fn fetch_thumbnail(&mut self, ctx: &egui::Context) {
        let url = self.session.info().and_then(|info| info.thumbnail.clone());
        let inbox = self.thumbnails.clone();
        let request = inbox.begin();
        let ctx = ctx.clone();
        self.runtime.spawn_blocking(move || {
            if let Some(img) = thumbnail::fetch_thumbnail(url.as_deref()) {
                if inbox.deliver(request, img) {
                    ctx.request_repaint();
                }
            }
        });
    }

    /// Back to an empty first screen
    fn reset_fields(&mut self) {
        self.url_input.clear();
        self.download_folder = self.config.default_download_dir().display().to_string();
        self.selected_label.clear();
        self.thumbnail = None;
        // A fetch still in flight belongs to the previous video
        self.thumbnails.begin();
    }

    fn handle(&mut self, action: Action) {
        match action {
            Action::Fetch => self.start_discover(),
            Action::Download => self.start_download(),
            Action::Cancel => {
                self.session.request_cancel();
            }
            Action::Back => {
                if self.session.reset().is_ok() {
                    self.reset_fields();
                }
            }
            Action::Dismiss => {
                self.session.dismiss_notice();
                if self.session.state() == DownloadState::Idle {
                    self.reset_fields();
                }
            }
            Action::OpenFolder(path) => open_folder(&path),
        }
    }

    fn input_stage(&mut self, ui: &mut egui::Ui) -> Option<Action> {
        let mut action = None;
        let fetching = self.session.state() == DownloadState::Fetching;

        ui.add_space(120.0);
        ui.label(RichText::new("Enter Video URL:").size(16.0));
        ui.add_space(12.0);
        let field = ui.add_enabled(
            !fetching,
            egui::TextEdit::singleline(&mut self.url_input)
                .hint_text("https://www.youtube.com/watch?v=...")
                .desired_width(420.0),
        );
        ui.add_space(12.0);

        if fetching {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(self.session.status());
            });
        } else {
            let submitted = field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Fetch Video").clicked() || submitted {
                action = Some(Action::Fetch);
            }
        }
        action
    }

    fn selection_stage(&mut self, ui: &mut egui::Ui) -> Option<Action> {
        let mut action = None;

        ui.add_space(20.0);
        if let Some(tex) = &self.thumbnail {
            ui.image(tex);
        } else {
            ui.spinner();
        }
        if let Some(info) = self.session.info() {
            ui.add_space(10.0);
            ui.label(RichText::new(&info.title).italics().color(egui::Color32::from_gray(0xbb)));
        }

        ui.add_space(10.0);
        ui.label("Select Format:");
        if let Some(catalog) = self.session.catalog() {
            egui::ComboBox::from_id_source("format_picker")
                .selected_text(&self.selected_label)
                .width(440.0)
                .show_ui(ui, |ui| {
                    for entry in catalog.entries() {
                        ui.selectable_value(&mut self.selected_label, entry.label.clone(), &entry.label);
                    }
                });
        }

        ui.add_space(10.0);
        ui.horizontal(|ui| {
            ui.label("Save to:");
            ui.add(egui::TextEdit::singleline(&mut self.download_folder).desired_width(330.0));
            if ui.button("Browse…").clicked() {
                if let Some(folder) = FileDialog::new().set_directory(&self.download_folder).pick_folder() {
                    self.download_folder = folder.display().to_string();
                }
            }
        });

        ui.add_space(15.0);
        ui.horizontal(|ui| {
            if ui.button("Back").clicked() {
                action = Some(Action::Back);
            }
            let download = egui::Button::new(RichText::new("Download").strong()).fill(egui::Color32::from_rgb(0x10, 0xb9, 0x81));
            if ui.add(download).clicked() {
                action = Some(Action::Download);
            }
        });
        action
    }

    fn progress_stage(&mut self, ui: &mut egui::Ui) -> Option<Action> {
        let mut action = None;

        ui.add_space(120.0);
        ui.label(RichText::new("Download Progress").size(16.0));
        ui.add_space(15.0);
        ui.add(
            egui::ProgressBar::new(self.session.percent() / 100.0)
                .desired_width(400.0)
                .show_percentage(),
        );
        ui.add_space(10.0);
        ui.label(RichText::new(self.session.status()).monospace());
        ui.add_space(10.0);

        let can_cancel = self.session.state() == DownloadState::Downloading && !self.session.cancel_requested();
        if ui.add_enabled(can_cancel, egui::Button::new("Cancel")).clicked() {
            action = Some(Action::Cancel);
        }
        action
    }

    fn notice_window(&self, ctx: &egui::Context) -> Option<Action> {
        let notice = self.session.notice()?;
        let mut action = None;

        let heading = match notice.kind {
            NoticeKind::Info => RichText::new(&notice.title),
            NoticeKind::Warning => RichText::new(&notice.title).color(egui::Color32::YELLOW),
            NoticeKind::Error => RichText::new(&notice.title).color(egui::Color32::LIGHT_RED),
        };

        egui::Window::new(heading)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&notice.message);
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("OK").clicked() {
                        action = Some(Action::Dismiss);
                    }
                    if notice.kind == NoticeKind::Info {
                        if let Some(dir) = self.session.last_output().and_then(Path::parent) {
                            if ui.button("Open Folder").clicked() {
                                action = Some(Action::OpenFolder(dir.to_path_buf()));
                            }
                        }
                    }
                });
            });
        action
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // Apply worker events queued since the last frame
        for transition in self.session.poll() {
            match transition.to {
                DownloadState::AwaitingSelection => {
                    if let Some(catalog) = self.session.catalog() {
                        self.selected_label = catalog.default_entry().label.clone();
                    }
                    self.fetch_thumbnail(ctx);
                }
                DownloadState::Idle => self.reset_fields(),
                _ => {}
            }
        }

        // Handle completed thumbnail fetches
        if let Some(img) = self.thumbnails.take() {
            if self.session.state() == DownloadState::AwaitingSelection {
                self.thumbnail = Some(ctx.load_texture("thumbnail", img, TextureOptions::default()));
            }
        }

        let title = format!("{} - {}", APP_TITLE, self.session.status());
        if title != self.window_title {
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title.clone()));
            self.window_title = title;
        }

        let stage = self.session.state().stage();
        let stage_action = egui::CentralPanel::default()
            .show(ctx, |ui| {
                ui.vertical_centered(|ui| match stage {
                    Stage::Input => self.input_stage(ui),
                    Stage::Selection => self.selection_stage(ui),
                    Stage::Progress => self.progress_stage(ui),
                })
                .inner
            })
            .inner;

        let notice_action = self.notice_window(ctx);

        // A notice is modal: stage buttons are ignored while one is shown
        if let Some(action) = notice_action {
            self.handle(action);
        } else if let (Some(action), None) = (stage_action, self.session.notice()) {
            self.handle(action);
        }

        if self.session.state().is_busy() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

/// Opens `folder` in the platform file manager
fn open_folder(folder: &Path) {
    let folder = folder.to_path_buf();
    std::thread::spawn(move || {
        #[cfg(target_os = "windows")]
        let opener = "explorer";
        #[cfg(target_os = "macos")]
        let opener = "open";
        #[cfg(all(unix, not(target_os = "macos")))]
        let opener = "xdg-open";

        if let Err(e) = std::process::Command::new(opener).arg(&folder).spawn() {
            warn!("Could not open {}: {}", folder.display(), e);
        }
    });
}
