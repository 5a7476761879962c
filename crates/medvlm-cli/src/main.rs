use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use medvlm_contracts::chat::{parse_intent, Intent, STUDIO_HELP_COMMANDS};
use medvlm_contracts::events::EventWriter;
use medvlm_contracts::views::ViewState;
use medvlm_engine::screens::dashboard::render_dashboard;
use medvlm_engine::screens::generator::GENERATOR_PRESETS;
use medvlm_engine::{new_session_id, EngineConfig, Launch, MedVlmClient, Studio};

#[derive(Debug, Parser)]
#[command(
    name = "medvlm",
    version,
    about = "Chest X-ray diagnosis and synthetic radiograph studio"
)]
struct Cli {
    /// Append session events as JSON lines to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    analysis_model: Option<String>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session with slash commands.
    Studio,
    Analyze(AnalyzeArgs),
    Generate(GenerateArgs),
    Dashboard(DashboardArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    /// Print the result as JSON instead of the report panel.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, conflicts_with = "preset", required_unless_present = "preset")]
    prompt: Option<String>,
    #[arg(long)]
    preset: Option<String>,
    /// File or directory to write the image to.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct DashboardArgs {
    #[arg(long, default_value = "overview")]
    view: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("medvlm error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Studio => {
            run_studio(open_studio(&cli)?)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze(open_studio(&cli)?, args),
        Command::Generate(args) => run_generate(open_studio(&cli)?, args),
        Command::Dashboard(args) => run_dashboard(args),
    }
}

fn open_studio(cli: &Cli) -> Result<Studio> {
    let config = EngineConfig::from_env()
        .with_analysis_model(cli.analysis_model.clone())
        .with_image_model(cli.image_model.clone());
    log::debug!("engine config: {config:?}");
    let client = MedVlmClient::from_config(&config).context("failed to set up the model client")?;
    for warning in client.warnings() {
        log::warn!("{warning}");
    }
    if !client.has_credential() {
        log::warn!("no API key configured; remote calls will fail");
    }
    let session_id = new_session_id();
    let events = match cli.events.as_ref() {
        Some(path) => EventWriter::new(path, session_id),
        None => EventWriter::disabled(session_id),
    };
    Studio::new(client, events)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn run_studio(mut studio: Studio) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    println!(
        "MedVLM studio started (session {}). Type /help for commands.",
        studio.session_id()
    );
    println!("{}", studio.render());

    loop {
        if studio.poll()? > 0 {
            println!("{}", studio.render());
        }
        print!("medvlm> ");
        stdout.flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        if handle_intent(&mut studio, &intent, &mut stdout)? == Flow::Quit {
            break;
        }
    }

    if studio.in_flight() {
        println!("Waiting for outstanding requests...");
    }
    studio.finish()
}

fn handle_intent(studio: &mut Studio, intent: &Intent, out: &mut impl Write) -> Result<Flow> {
    match intent.action.as_str() {
        "help" => {
            writeln!(out, "Commands: {}", STUDIO_HELP_COMMANDS.join(" "))?;
            writeln!(out, "Any other text sets the generator prompt.")?;
        }
        "menu" => {
            for entry in studio.menu() {
                let marker = if entry.active { '*' } else { ' ' };
                writeln!(out, "{marker} {}. {}", entry.index, entry.view.label())?;
            }
        }
        "set_view" => {
            let requested = intent.arg("view").unwrap_or_default();
            match ViewState::parse(requested) {
                Some(view) => {
                    studio.select_view(view)?;
                    writeln!(out, "{}", studio.render())?;
                }
                None => writeln!(out, "Unknown view '{requested}'. Try /menu.")?,
            }
        }
        "load_image" => {
            let Some(path) = intent.arg("path") else {
                writeln!(out, "/load requires a path")?;
                return Ok(Flow::Continue);
            };
            match studio.load_image(Path::new(path)) {
                Ok(()) => {
                    if studio.active_view() != ViewState::Diagnosis {
                        studio.select_view(ViewState::Diagnosis)?;
                    }
                    writeln!(out, "{}", studio.render())?;
                }
                Err(err) => writeln!(out, "Load failed: {err:#}")?,
            }
        }
        "clear_image" => {
            studio.clear_image()?;
            writeln!(out, "Image cleared.")?;
        }
        "set_prompt" => {
            match intent.prompt.as_deref().or_else(|| intent.arg("prompt")) {
                Some(prompt) => {
                    studio.set_prompt(prompt);
                    writeln!(out, "Prompt: {prompt}")?;
                }
                None => writeln!(out, "/prompt requires text")?,
            }
        }
        "apply_preset" => match intent.arg("preset") {
            Some(name) => match studio.apply_preset(name) {
                Ok(prompt) => writeln!(out, "Prompt: {prompt}")?,
                Err(err) => writeln!(out, "{err}")?,
            },
            None => {
                for (name, prompt) in GENERATOR_PRESETS {
                    writeln!(out, "  {name:<10} {prompt}")?;
                }
            }
        },
        "run_analysis" => report_launch(out, "Analysis", studio.run_analysis()?)?,
        "generate_image" => report_launch(out, "Generation", studio.generate()?)?,
        "save_image" => {
            let target = intent.arg("path").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            match studio.save_generated(&target) {
                Ok(path) => writeln!(out, "Saved {}", path.display())?,
                Err(err) => writeln!(out, "Save failed: {err:#}")?,
            }
        }
        "wait" => {
            studio.wait()?;
            writeln!(out, "{}", studio.render())?;
        }
        "status" => writeln!(out, "{}", studio.render())?,
        "quit" => return Ok(Flow::Quit),
        "unknown" => {
            let command = intent.arg("command").unwrap_or_default();
            writeln!(out, "Unknown command /{command}. Type /help.")?;
        }
        _ => {}
    }
    Ok(Flow::Continue)
}

fn report_launch(out: &mut impl Write, label: &str, launch: Launch) -> Result<()> {
    match launch {
        Launch::Started => writeln!(out, "{label} started; /wait or keep working.")?,
        Launch::Refused(refusal) => writeln!(out, "{label} not started: {refusal}.")?,
        Launch::Failed(err) => writeln!(out, "{label} failed: {err}")?,
    }
    Ok(())
}

fn run_analyze(mut studio: Studio, args: &AnalyzeArgs) -> Result<i32> {
    studio.load_image(&args.image)?;
    if let Launch::Refused(refusal) = studio.run_analysis()? {
        bail!("analysis not started: {refusal}");
    }
    studio.wait()?;

    if let Some(err) = studio.diagnosis().error().cloned() {
        studio.finish()?;
        return Err(anyhow::Error::new(err).context("analysis failed"));
    }
    let Some(result) = studio.diagnosis().result().cloned() else {
        bail!("analysis produced no result");
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", studio.diagnosis().render(&studio.client().analysis_model().display_name));
    }
    studio.finish()?;
    Ok(0)
}

fn run_generate(mut studio: Studio, args: &GenerateArgs) -> Result<i32> {
    match (args.prompt.as_deref(), args.preset.as_deref()) {
        (Some(prompt), _) => studio.set_prompt(prompt),
        (None, Some(preset)) => {
            studio.apply_preset(preset)?;
        }
        (None, None) => bail!("either --prompt or --preset is required"),
    }
    if let Launch::Refused(refusal) = studio.generate()? {
        bail!("generation not started: {refusal}");
    }
    studio.wait()?;

    if let Some(err) = studio.generator().last_error().cloned() {
        studio.finish()?;
        return Err(anyhow::Error::new(err).context("generation failed"));
    }
    let path = studio.save_generated(&args.out)?;
    println!("{}", path.display());
    studio.finish()?;
    Ok(0)
}

fn run_dashboard(args: &DashboardArgs) -> Result<i32> {
    let view = match ViewState::parse(&args.view) {
        Some(view @ (ViewState::Overview | ViewState::Experiments)) => view,
        _ => bail!(
            "--view must be overview or experiments (got '{}')",
            args.view
        ),
    };
    println!("{}", render_dashboard(view));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use anyhow::anyhow;
    use clap::Parser;
    use medvlm_contracts::chat::parse_intent;
    use medvlm_contracts::events::EventWriter;
    use medvlm_contracts::views::ViewState;
    use medvlm_engine::{ContentService, MedVlmClient, Studio};
    use serde_json::Value;

    use super::{handle_intent, Cli, Command, Flow};

    struct Offline;

    impl ContentService for Offline {
        fn generate_content(&self, _api_key: &str, _model: &str, _payload: &Value) -> anyhow::Result<Value> {
            Err(anyhow!("offline"))
        }
    }

    fn studio(api_key: Option<&str>) -> anyhow::Result<Studio> {
        let client = MedVlmClient::new(Arc::new(Offline), api_key.map(str::to_string), None, None)?;
        Studio::new(client, EventWriter::disabled("cli-test"))
    }

    fn drive(studio: &mut Studio, line: &str) -> anyhow::Result<(Flow, String)> {
        let mut out = Vec::new();
        let flow = handle_intent(studio, &parse_intent(line), &mut out)?;
        Ok((flow, String::from_utf8(out)?))
    }

    #[test]
    fn view_commands_switch_screens() -> anyhow::Result<()> {
        let mut studio = studio(Some("key"))?;
        let (_, text) = drive(&mut studio, "/lab")?;
        assert_eq!(studio.active_view(), ViewState::Diagnosis);
        assert!(text.contains("Diagnosis Lab"));

        drive(&mut studio, "/view 3")?;
        assert_eq!(studio.active_view(), ViewState::Generation);

        let (_, text) = drive(&mut studio, "/view radiology")?;
        assert!(text.contains("Unknown view 'radiology'"));
        assert_eq!(studio.active_view(), ViewState::Generation);

        let (_, menu) = drive(&mut studio, "/menu")?;
        assert!(menu.contains("* 3. Data Generator"));
        Ok(())
    }

    #[test]
    fn prompt_and_preset_commands_edit_generator_prompt() -> anyhow::Result<()> {
        let mut studio = studio(Some("key"))?;
        drive(&mut studio, "bilateral effusion")?;
        assert_eq!(studio.generator().prompt(), "bilateral effusion");

        drive(&mut studio, "/preset viral")?;
        assert_eq!(
            studio.generator().prompt(),
            "severe viral pneumonia, diffuse interstitial markings"
        );
        let (_, text) = drive(&mut studio, "/preset covid")?;
        assert!(text.contains("unknown preset 'covid'"));
        Ok(())
    }

    #[test]
    fn failed_actions_report_without_aborting() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut studio = studio(None)?;

        let (flow, text) = drive(&mut studio, "/run")?;
        assert_eq!(flow, Flow::Continue);
        assert!(text.contains("Analysis not started: load an image first."));

        let missing = temp.path().join("missing.png");
        let (_, text) = drive(&mut studio, &format!("/load \"{}\"", missing.display()))?;
        assert!(text.starts_with("Load failed"));

        let (_, text) = drive(&mut studio, "/generate")?;
        assert!(text.contains("Generation failed: API key is missing"));

        let (_, text) = drive(&mut studio, &format!("/save {}", temp.path().display()))?;
        assert!(text.contains("Save failed: no generated image to save"));
        assert!(fs::read_dir(temp.path())?.next().is_none());

        let (_, text) = drive(&mut studio, "/frobnicate now")?;
        assert!(text.contains("Unknown command /frobnicate"));
        Ok(())
    }

    #[test]
    fn quit_ends_the_loop() -> anyhow::Result<()> {
        let mut studio = studio(Some("key"))?;
        assert_eq!(drive(&mut studio, "/exit")?.0, Flow::Quit);
        Ok(())
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "medvlm",
            "generate",
            "--preset",
            "normal",
            "--out",
            "out.png",
            "--image-model",
            "gemini-2.5-flash-image",
        ])?;
        assert_eq!(cli.image_model.as_deref(), Some("gemini-2.5-flash-image"));
        let Command::Generate(args) = cli.command else {
            return Err(anyhow!("expected generate"));
        };
        assert_eq!(args.preset.as_deref(), Some("normal"));

        assert!(Cli::try_parse_from(["medvlm", "generate", "--out", "x.png"]).is_err());
        assert!(Cli::try_parse_from([
            "medvlm", "generate", "--prompt", "a", "--preset", "normal", "--out", "x.png"
        ])
        .is_err());
        Ok(())
    }
}
