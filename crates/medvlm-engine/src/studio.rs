use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use medvlm_contracts::analysis::{AnalysisResult, GeneratedImage};
use medvlm_contracts::events::EventWriter;
use medvlm_contracts::views::{MenuEntry, ViewController, ViewState};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::client::MedVlmClient;
use crate::error::{error_chain_text, EngineError, ErrorKind};
use crate::imaging::{self, sha256_hex};
use crate::screens::dashboard::render_dashboard;
use crate::screens::diagnosis::{AnalysisTicket, DiagnosisLab};
use crate::screens::generator::{Generator, GenerationTicket, GENERATOR_PRESETS};
use crate::screens::{Completion, StartRefusal};

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// How a request to start a remote call was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Launch {
    Started,
    Refused(StartRefusal),
    /// Failed before any network traffic; the error is already on screen.
    Failed(EngineError),
}

enum Finished {
    Analysis {
        ticket: AnalysisTicket,
        outcome: Result<AnalysisResult, EngineError>,
    },
    Generation {
        ticket: GenerationTicket,
        outcome: Result<GeneratedImage, EngineError>,
    },
}

/// One interactive session: the active view, both working screens and the
/// worker threads carrying their remote calls.
///
/// Screens are only mutated here, on the caller's thread. Workers hand their
/// outcome back over a channel that [`Studio::poll`] and [`Studio::wait`]
/// drain.
pub struct Studio {
    views: ViewController,
    diagnosis: DiagnosisLab,
    generator: Generator,
    client: Arc<MedVlmClient>,
    events: EventWriter,
    tx: mpsc::Sender<Finished>,
    rx: mpsc::Receiver<Finished>,
    workers: Vec<thread::JoinHandle<()>>,
    outstanding: usize,
}

impl Studio {
    pub fn new(client: MedVlmClient, events: EventWriter) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let studio = Self {
            views: ViewController::new(),
            diagnosis: DiagnosisLab::new(),
            generator: Generator::new(),
            client: Arc::new(client),
            events,
            tx,
            rx,
            workers: Vec::new(),
            outstanding: 0,
        };
        studio.events.emit(
            "session_started",
            map_object(json!({
                "view": studio.views.active().key(),
                "analysis_model": studio.client.analysis_model().name,
                "image_model": studio.client.image_model().name,
                "credential": studio.client.has_credential(),
                "warnings": studio.client.warnings(),
            })),
        )?;
        Ok(studio)
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn client(&self) -> &MedVlmClient {
        &self.client
    }

    pub fn diagnosis(&self) -> &DiagnosisLab {
        &self.diagnosis
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn active_view(&self) -> ViewState {
        self.views.active()
    }

    pub fn menu(&self) -> Vec<MenuEntry> {
        self.views.menu()
    }

    pub fn select_view(&mut self, view: ViewState) -> Result<()> {
        let previous = self.views.select(view);
        self.events.emit(
            "view_changed",
            map_object(json!({ "from": previous.key(), "to": view.key() })),
        )?;
        Ok(())
    }

    pub fn load_image(&mut self, path: &Path) -> Result<()> {
        let image = imaging::load_image(path)?;
        let payload = map_object(json!({
            "path": path.to_string_lossy().to_string(),
            "media_type": image.media_type(),
            "bytes": image.bytes().len(),
            "sha256": sha256_hex(image.bytes()),
        }));
        self.diagnosis.load(image);
        self.events.emit("image_loaded", payload)?;
        Ok(())
    }

    pub fn clear_image(&mut self) -> Result<()> {
        self.diagnosis.clear();
        self.events.emit("image_cleared", Map::new())?;
        Ok(())
    }

    pub fn set_prompt(&mut self, prompt: &str) {
        self.generator.set_prompt(prompt);
    }

    pub fn apply_preset(&mut self, name: &str) -> Result<&'static str> {
        self.generator.apply_preset(name).ok_or_else(|| {
            let known = GENERATOR_PRESETS
                .iter()
                .map(|(key, _)| *key)
                .collect::<Vec<_>>()
                .join(", ");
            anyhow!("unknown preset '{}' (expected one of: {known})", name.trim())
        })
    }

    pub fn run_analysis(&mut self) -> Result<Launch> {
        let ticket = match self.diagnosis.begin() {
            Ok(ticket) => ticket,
            Err(refusal) => return Ok(Launch::Refused(refusal)),
        };
        let logged = self.events.emit(
            "analysis_started",
            map_object(json!({
                "model": self.client.analysis_model().name,
                "sha256": sha256_hex(ticket.image().bytes()),
            })),
        );
        if let Err(err) = logged {
            let failure = EngineError::EventLog(error_chain_text(&err, 512));
            self.diagnosis.complete(&ticket, Err(failure));
            return Err(err);
        }
        let credential = self.client.ensure_credential().map(|_| ());
        if let Err(err) = credential {
            self.apply(Finished::Analysis {
                ticket,
                outcome: Err(err.clone()),
            })?;
            return Ok(Launch::Failed(err));
        }

        let client = Arc::clone(&self.client);
        let job_ticket = ticket.clone();
        let on_panic = Finished::Analysis {
            ticket: ticket.clone(),
            outcome: Err(EngineError::Transport("analysis worker panicked".to_string())),
        };
        let spawned = self.spawn_worker("medvlm-analysis", on_panic, move || {
            let outcome = client.analyze_image(job_ticket.image());
            Finished::Analysis {
                ticket: job_ticket,
                outcome,
            }
        });
        if let Err(err) = spawned {
            let err = EngineError::Transport(format!("worker spawn failed: {err}"));
            self.apply(Finished::Analysis {
                ticket,
                outcome: Err(err.clone()),
            })?;
            return Ok(Launch::Failed(err));
        }
        Ok(Launch::Started)
    }

    pub fn generate(&mut self) -> Result<Launch> {
        let ticket = match self.generator.begin() {
            Ok(ticket) => ticket,
            Err(refusal) => return Ok(Launch::Refused(refusal)),
        };
        let logged = self.events.emit(
            "generation_started",
            map_object(json!({
                "model": self.client.image_model().name,
                "prompt": ticket.prompt(),
            })),
        );
        if let Err(err) = logged {
            let failure = EngineError::EventLog(error_chain_text(&err, 512));
            self.generator.complete(&ticket, Err(failure));
            return Err(err);
        }
        let credential = self.client.ensure_credential().map(|_| ());
        if let Err(err) = credential {
            self.apply(Finished::Generation {
                ticket,
                outcome: Err(err.clone()),
            })?;
            return Ok(Launch::Failed(err));
        }

        let client = Arc::clone(&self.client);
        let job_ticket = ticket.clone();
        let on_panic = Finished::Generation {
            ticket: ticket.clone(),
            outcome: Err(EngineError::Transport("generation worker panicked".to_string())),
        };
        let spawned = self.spawn_worker("medvlm-generation", on_panic, move || {
            let outcome = client.generate_image(job_ticket.prompt());
            Finished::Generation {
                ticket: job_ticket,
                outcome,
            }
        });
        if let Err(err) = spawned {
            let err = EngineError::Transport(format!("worker spawn failed: {err}"));
            self.apply(Finished::Generation {
                ticket,
                outcome: Err(err.clone()),
            })?;
            return Ok(Launch::Failed(err));
        }
        Ok(Launch::Started)
    }

    /// Writes the last generated image, byte for byte.
    pub fn save_generated(&mut self, target: &Path) -> Result<PathBuf> {
        let Some(image) = self.generator.last_image() else {
            bail!("no generated image to save");
        };
        let path = imaging::save_generated(image, target)?;
        self.events.emit(
            "image_saved",
            map_object(json!({
                "path": path.to_string_lossy().to_string(),
                "media_type": image.media_type(),
                "bytes": image.bytes().len(),
                "sha256": sha256_hex(image.bytes()),
            })),
        )?;
        Ok(path)
    }

    pub fn in_flight(&self) -> bool {
        self.outstanding > 0
    }

    /// Applies every finished call without blocking. Returns how many were
    /// drained.
    pub fn poll(&mut self) -> Result<usize> {
        let mut drained = 0;
        while let Ok(finished) = self.rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            self.apply(finished)?;
            drained += 1;
        }
        self.reap_workers();
        Ok(drained)
    }

    /// Blocks until no call is outstanding.
    pub fn wait(&mut self) -> Result<usize> {
        let mut drained = 0;
        while self.outstanding > 0 {
            let finished = self
                .rx
                .recv()
                .map_err(|_| anyhow!("worker channel closed with calls outstanding"))?;
            self.outstanding -= 1;
            self.apply(finished)?;
            drained += 1;
        }
        self.reap_workers();
        Ok(drained)
    }

    pub fn render(&self) -> String {
        let view = self.views.active();
        match view {
            ViewState::Overview | ViewState::Experiments => render_dashboard(view),
            ViewState::Diagnosis => {
                let panel = self.diagnosis.render(&self.client.analysis_model().display_name);
                let shows_config_error = self
                    .diagnosis
                    .error()
                    .is_some_and(|err| err.kind() == ErrorKind::Configuration);
                if self.client.has_credential() || shows_config_error {
                    return panel;
                }
                format!("Configuration error: {}\n\n{panel}", EngineError::MissingCredential)
            }
            ViewState::Generation => self.generator.render(&self.client.image_model().display_name),
        }
    }

    pub fn finish(mut self) -> Result<()> {
        self.wait()?;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.events.emit("session_finished", Map::new())?;
        Ok(())
    }

    /// Runs `job` on a named thread. A panicking job reports `on_panic`
    /// instead, so every dispatched call sends exactly one completion.
    fn spawn_worker(
        &mut self,
        name: &str,
        on_panic: Finished,
        job: impl FnOnce() -> Finished + Send + 'static,
    ) -> Result<()> {
        let tx = self.tx.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let finished = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                    log::error!("worker thread panicked; reporting a transport failure");
                    on_panic
                });
                let _ = tx.send(finished);
            })
            .with_context(|| format!("failed to spawn {name} thread"))?;
        log::debug!("dispatched {name} worker");
        self.workers.push(handle);
        self.outstanding += 1;
        Ok(())
    }

    fn reap_workers(&mut self) {
        self.workers.retain(|handle| !handle.is_finished());
    }

    fn apply(&mut self, finished: Finished) -> Result<()> {
        match finished {
            Finished::Analysis { ticket, outcome } => {
                let event = match &outcome {
                    Ok(result) => (
                        "analysis_finished",
                        json!({
                            "diagnosis": result.diagnosis.as_str(),
                            "confidence": result.confidence,
                            "latency_ms": result.latency_ms,
                        }),
                    ),
                    Err(err) => (
                        "analysis_failed",
                        json!({ "kind": err.kind().as_str(), "error": err.to_string() }),
                    ),
                };
                let completion = self.diagnosis.complete(&ticket, outcome);
                self.record(completion, ticket.id(), event)
            }
            Finished::Generation { ticket, outcome } => {
                let event = match &outcome {
                    Ok(image) => (
                        "generation_finished",
                        json!({
                            "media_type": image.media_type(),
                            "bytes": image.bytes().len(),
                            "sha256": sha256_hex(image.bytes()),
                        }),
                    ),
                    Err(err) => (
                        "generation_failed",
                        json!({ "kind": err.kind().as_str(), "error": err.to_string() }),
                    ),
                };
                let completion = self.generator.complete(&ticket, outcome);
                self.record(completion, ticket.id(), event)
            }
        }
    }

    fn record(&self, completion: Completion, ticket_id: u64, event: (&str, Value)) -> Result<()> {
        let (event_type, payload) = event;
        match completion {
            Completion::Applied => {
                self.events.emit(event_type, map_object(payload))?;
            }
            Completion::Stale => {
                log::info!("{event_type} for ticket {ticket_id} arrived after its image changed; discarded");
            }
            Completion::Ignored => {
                log::warn!("{event_type} for unknown ticket {ticket_id}; ignored");
            }
        }
        Ok(())
    }
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use medvlm_contracts::events::EventWriter;
    use medvlm_contracts::views::ViewState;
    use serde_json::{json, Value};

    use super::{Launch, Studio};
    use crate::client::testing::{analysis_reply, image_reply, MockService};
    use crate::client::{ContentService, MedVlmClient};
    use crate::error::EngineError;
    use crate::imaging::fixtures::black_square_png;
    use crate::error::ErrorKind;
    use crate::screens::diagnosis::DiagnosisPhase;
    use crate::screens::StartRefusal;

    fn studio_with(service: Arc<MockService>, api_key: Option<&str>, events: &Path) -> anyhow::Result<Studio> {
        let client = MedVlmClient::new(service, api_key.map(str::to_string), None, None)?;
        Studio::new(client, EventWriter::new(events, "test-session"))
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(path)?;
        let mut types = Vec::new();
        for line in raw.lines() {
            let event: Value = serde_json::from_str(line)?;
            types.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        Ok(types)
    }

    fn pneumonia_reply() -> Value {
        analysis_reply(json!({
            "diagnosis": "PNEUMONIA",
            "confidence": 0.73,
            "report": "Patchy consolidation in the right lower zone.",
            "heatmapExplanation": "right lower lobe",
        }))
    }

    #[test]
    fn analysis_runs_on_worker_and_renders_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let scan = temp.path().join("scan.png");
        fs::write(&scan, black_square_png()?)?;
        let events = temp.path().join("events.jsonl");
        let service = Arc::new(MockService::replying(vec![Ok(pneumonia_reply())]));
        let mut studio = studio_with(Arc::clone(&service), Some("key"), &events)?;

        studio.select_view(ViewState::Diagnosis)?;
        studio.load_image(&scan)?;
        assert_eq!(studio.run_analysis()?, Launch::Started);
        assert!(studio.in_flight());
        assert_eq!(studio.wait()?, 1);
        assert!(!studio.in_flight());

        let panel = studio.render();
        assert!(panel.contains("PNEUMONIA"));
        assert!(panel.contains("73.0%"));
        assert!(panel.contains("Patchy consolidation"));
        assert!(panel.contains("right lower lobe"));

        studio.finish()?;
        assert_eq!(
            event_types(&events)?,
            vec![
                "session_started",
                "view_changed",
                "image_loaded",
                "analysis_started",
                "analysis_finished",
                "session_finished",
            ]
        );
        Ok(())
    }

    #[test]
    fn run_while_in_flight_makes_one_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let scan = temp.path().join("scan.png");
        fs::write(&scan, black_square_png()?)?;
        let (service, release) = MockService::gated(vec![Ok(pneumonia_reply())]);
        let service = Arc::new(service);
        let mut studio = studio_with(Arc::clone(&service), Some("key"), &temp.path().join("e.jsonl"))?;

        studio.load_image(&scan)?;
        assert_eq!(studio.run_analysis()?, Launch::Started);
        assert_eq!(studio.run_analysis()?, Launch::Refused(StartRefusal::Busy));
        assert_eq!(studio.poll()?, 0);
        assert_eq!(studio.diagnosis().phase(), DiagnosisPhase::Analyzing);

        release.send(())?;
        studio.wait()?;
        assert_eq!(service.calls(), 1);
        assert_eq!(studio.diagnosis().phase(), DiagnosisPhase::Succeeded);
        Ok(())
    }

    #[test]
    fn outcome_for_replaced_image_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let scan = temp.path().join("scan.png");
        fs::write(&scan, black_square_png()?)?;
        let (service, release) = MockService::gated(vec![Ok(pneumonia_reply())]);
        let mut studio = studio_with(Arc::new(service), Some("key"), &temp.path().join("e.jsonl"))?;

        studio.load_image(&scan)?;
        studio.run_analysis()?;
        studio.load_image(&scan)?;
        assert_eq!(studio.run_analysis()?, Launch::Refused(StartRefusal::Busy));

        release.send(())?;
        studio.wait()?;
        assert_eq!(studio.diagnosis().phase(), DiagnosisPhase::Loaded);
        assert!(studio.diagnosis().result().is_none());
        Ok(())
    }

    #[test]
    fn missing_credential_fails_before_any_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let scan = temp.path().join("scan.png");
        fs::write(&scan, black_square_png()?)?;
        let events = temp.path().join("events.jsonl");
        let service = Arc::new(MockService::replying(vec![]));
        let mut studio = studio_with(Arc::clone(&service), None, &events)?;

        studio.select_view(ViewState::Diagnosis)?;
        assert!(studio.render().starts_with("Configuration error: API key is missing"));
        studio.load_image(&scan)?;
        assert!(matches!(
            studio.run_analysis()?,
            Launch::Failed(EngineError::MissingCredential)
        ));
        assert!(!studio.in_flight());
        assert!(matches!(studio.generate()?, Launch::Failed(EngineError::MissingCredential)));
        assert_eq!(service.calls(), 0);
        assert_eq!(studio.render().matches("API key is missing").count(), 1);
        assert!(event_types(&events)?.contains(&"analysis_failed".to_string()));
        Ok(())
    }

    #[test]
    fn failed_start_event_releases_the_screen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let scan = temp.path().join("scan.png");
        fs::write(&scan, black_square_png()?)?;
        let events = temp.path().join("events.jsonl");
        let service = Arc::new(MockService::replying(vec![
            Ok(pneumonia_reply()),
            Ok(image_reply(&BASE64.encode(black_square_png()?))),
        ]));
        let mut studio = studio_with(Arc::clone(&service), Some("key"), &events)?;
        studio.load_image(&scan)?;

        fs::remove_file(&events)?;
        fs::create_dir(&events)?;
        assert!(studio.run_analysis().is_err());
        assert!(studio.generate().is_err());
        assert!(!studio.in_flight());
        assert_eq!(studio.diagnosis().phase(), DiagnosisPhase::Failed);
        assert_eq!(
            studio.diagnosis().error().map(|err| err.kind()),
            Some(ErrorKind::Configuration)
        );
        assert!(!studio.generator().is_generating());
        assert!(studio.generator().last_error().is_some());
        assert_eq!(service.calls(), 0);

        fs::remove_dir(&events)?;
        assert_eq!(studio.run_analysis()?, Launch::Started);
        studio.wait()?;
        assert_eq!(studio.generate()?, Launch::Started);
        studio.wait()?;
        assert_eq!(studio.diagnosis().phase(), DiagnosisPhase::Succeeded);
        assert!(studio.generator().last_image().is_some());
        Ok(())
    }

    struct Exploding;

    impl ContentService for Exploding {
        fn generate_content(&self, _api_key: &str, _model: &str, _payload: &Value) -> anyhow::Result<Value> {
            panic!("service exploded");
        }
    }

    #[test]
    fn panicking_worker_still_completes_the_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let scan = temp.path().join("scan.png");
        fs::write(&scan, black_square_png()?)?;
        let client = MedVlmClient::new(Arc::new(Exploding), Some("key".to_string()), None, None)?;
        let mut studio = Studio::new(client, EventWriter::disabled("test-session"))?;

        studio.load_image(&scan)?;
        assert_eq!(studio.run_analysis()?, Launch::Started);
        assert_eq!(studio.generate()?, Launch::Started);
        assert_eq!(studio.wait()?, 2);
        assert!(!studio.in_flight());
        assert_eq!(studio.diagnosis().phase(), DiagnosisPhase::Failed);
        assert!(matches!(
            studio.diagnosis().error(),
            Some(EngineError::Transport(message)) if message.contains("panicked")
        ));
        assert!(matches!(
            studio.generator().last_error(),
            Some(EngineError::Transport(message)) if message.contains("panicked")
        ));
        studio.finish()?;
        Ok(())
    }

    #[test]
    fn run_without_image_is_refused() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = Arc::new(MockService::replying(vec![]));
        let mut studio = studio_with(Arc::clone(&service), Some("key"), &temp.path().join("e.jsonl"))?;
        assert_eq!(studio.run_analysis()?, Launch::Refused(StartRefusal::NoImage));
        assert_eq!(service.calls(), 0);
        Ok(())
    }

    #[test]
    fn generated_image_saves_the_bytes_its_data_uri_carries() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let png = black_square_png()?;
        let service = Arc::new(MockService::replying(vec![Ok(image_reply(&BASE64.encode(&png)))]));
        let mut studio = studio_with(Arc::clone(&service), Some("key"), &temp.path().join("e.jsonl"))?;

        studio.set_prompt("  ");
        assert_eq!(studio.generate()?, Launch::Refused(StartRefusal::EmptyPrompt));
        assert_eq!(service.calls(), 0);

        studio.apply_preset("normal")?;
        assert!(studio.apply_preset("covid").is_err());
        assert_eq!(studio.generate()?, Launch::Started);
        studio.wait()?;

        let saved = studio.save_generated(temp.path())?;
        assert!(saved.ends_with("synthetic_xray.png"));
        let on_disk = fs::read(&saved)?;
        assert_eq!(on_disk, png);

        let data_uri = studio
            .generator()
            .last_image()
            .map(|image| image.data_uri())
            .unwrap_or_default();
        let encoded = data_uri
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default();
        assert_eq!(BASE64.decode(encoded)?, on_disk);

        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].1.to_string().contains("normal healthy lungs"));
        Ok(())
    }

    #[test]
    fn save_without_image_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut studio = studio_with(
            Arc::new(MockService::replying(vec![])),
            Some("key"),
            &temp.path().join("e.jsonl"),
        )?;
        assert!(studio.save_generated(temp.path()).is_err());
        Ok(())
    }

    #[test]
    fn render_follows_active_view() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut studio = studio_with(
            Arc::new(MockService::replying(vec![])),
            Some("key"),
            &temp.path().join("e.jsonl"),
        )?;
        assert!(studio.render().starts_with("Research Dashboard"));
        studio.select_view(ViewState::Generation)?;
        assert!(studio.render().starts_with("Synthetic Data Generator"));
        studio.select_view(ViewState::Experiments)?;
        studio.select_view(ViewState::Experiments)?;
        assert_eq!(studio.active_view(), ViewState::Experiments);
        assert!(studio.render().starts_with("Experiments"));
        Ok(())
    }
}
