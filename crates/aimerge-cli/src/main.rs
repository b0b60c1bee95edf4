use aimerge_core::logging::init_logging;
use aimerge_core::markers::{self, Conflict};
use aimerge_core::{
    BackendKind, Document, FileDocument, FileSecretStore, GitWorkspace, NoPrompt, SecretPrompt, Settings,
    Workspace,
};
use aimerge_inference::{
    BackendSelector, BatchSummary, CancelFlag, ResolutionOrchestrator, ResolutionResponse,
    ALTERNATIVE_TEMPERATURES,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "aimerge", about = "Resolve git merge conflicts with a language model")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to .aimerge data directory
    #[arg(long, default_value = ".aimerge")]
    data_dir: PathBuf,

    /// Repository root to scan for conflicted files
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Never prompt for API keys
    #[arg(long)]
    non_interactive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run interactive setup wizard
    Setup,
    /// Show configuration and conflicted files
    Status,
    /// List the conflicts in a file
    Detect {
        file: PathBuf,
    },
    /// Resolve one conflict in a file
    Resolve {
        file: PathBuf,
        /// 1-based line inside the conflict (defaults to the first conflict)
        #[arg(long)]
        line: Option<usize>,
    },
    /// Suggest alternative resolutions and apply the one you pick
    Alternatives {
        file: PathBuf,
        #[arg(long)]
        line: Option<usize>,
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
    /// Resolve and apply every conflict in the repository
    ResolveAll,
    /// Show or switch the resolution backend
    Backend {
        /// local, openai or anthropic
        kind: Option<BackendKind>,
    },
    /// List models offered by the active backend
    Models,
    /// Check that the active backend is reachable and configured
    Validate,
    /// Store an API key for a hosted backend
    SetKey {
        kind: BackendKind,
    },
    /// Forget the API key of a hosted backend
    ClearKey {
        kind: BackendKind,
    },
}

fn settings_path(cli: &Cli) -> PathBuf {
    cli.data_dir.join("settings.json")
}

/// Asks for API keys on the terminal.
struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn prompt_for_secret(&self, kind: BackendKind) -> Option<String> {
        println!();
        println!("The {} backend needs an API key.", kind);
        match dialoguer::Password::new()
            .with_prompt("API key (leave empty to skip)")
            .allow_empty_password(true)
            .interact()
        {
            Ok(key) if !key.trim().is_empty() => Some(key),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read API key");
                None
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.data_dir.join("logs"))?;

    match &cli.command {
        Commands::Setup => cmd_setup(&cli).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Detect { file } => cmd_detect(&cli, file).await,
        Commands::Resolve { file, line } => cmd_resolve(&cli, file, *line).await,
        Commands::Alternatives { file, line, count } => cmd_alternatives(&cli, file, *line, *count).await,
        Commands::ResolveAll => cmd_resolve_all(&cli).await,
        Commands::Backend { kind } => cmd_backend(&cli, *kind).await,
        Commands::Models => cmd_models(&cli).await,
        Commands::Validate => cmd_validate(&cli).await,
        Commands::SetKey { kind } => cmd_set_key(&cli, *kind).await,
        Commands::ClearKey { kind } => cmd_clear_key(&cli, *kind).await,
    }
}

fn selector(cli: &Cli, settings: Settings) -> BackendSelector {
    let secrets = Arc::new(FileSecretStore::new(cli.data_dir.join("secrets.json")));
    let prompt: Arc<dyn SecretPrompt> = if cli.non_interactive {
        Arc::new(NoPrompt)
    } else {
        Arc::new(TerminalPrompt)
    };
    BackendSelector::new(settings, secrets, prompt)
}

/// Build an orchestrator with the configured backend already selected.
async fn orchestrator(cli: &Cli) -> anyhow::Result<ResolutionOrchestrator> {
    let settings = Settings::load_or_default(&settings_path(cli))?;
    let kind = settings.backend;
    let mut selector = selector(cli, settings);
    let outcome = selector.switch_to(kind).await?;
    if !outcome.valid {
        eprintln!(
            "Warning: the {} backend did not validate. Check the endpoint, model and API key.",
            outcome.kind
        );
    }
    let workspace = Arc::new(GitWorkspace::new(&cli.root));
    Ok(ResolutionOrchestrator::new(selector, workspace))
}

async fn open_document(cli: &Cli, file: &Path) -> anyhow::Result<FileDocument> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        cli.root.join(file)
    };
    FileDocument::open(path).await
}

/// Find the conflict containing the 1-based `line`, or the first one.
fn pick_conflict(document: &dyn Document, line: Option<usize>) -> anyhow::Result<Conflict> {
    let conflicts = markers::detect(&document.text(), document.path());
    let conflict = match line {
        Some(line) => markers::conflict_at(&conflicts, line.saturating_sub(1)).cloned(),
        None => conflicts.into_iter().next(),
    };
    conflict.ok_or_else(|| anyhow::anyhow!("no conflict found in {}", document.path().display()))
}

fn print_resolution(response: &ResolutionResponse) {
    println!("{}", response.resolution);
    println!();
    println!("Confidence: {:.0}%", response.confidence * 100.0);
    println!("Explanation: {}", response.explanation);
}

async fn cmd_setup(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.data_dir)?;
    let path = settings_path(cli);
    let mut settings = Settings::load_or_default(&path)?;

    println!();
    println!("aimerge - Setup Wizard");
    println!("======================");
    println!();

    let kinds: Vec<&str> = BackendKind::ALL.iter().map(|k| k.as_str()).collect();
    let current = BackendKind::ALL
        .iter()
        .position(|k| *k == settings.backend)
        .unwrap_or(0);
    let kind_idx = dialoguer::Select::new()
        .with_prompt("Resolution backend")
        .items(&kinds)
        .default(current)
        .interact()?;
    let kind = BackendKind::ALL[kind_idx];
    settings.backend = kind;

    let model: String = dialoguer::Input::new()
        .with_prompt("Model")
        .default(settings.model_for(kind).to_string())
        .interact_text()?;
    settings.set_model(kind, model);

    let endpoint: String = dialoguer::Input::new()
        .with_prompt("Endpoint")
        .default(settings.endpoint_for(kind).to_string())
        .interact_text()?;
    match kind {
        BackendKind::Local => settings.local.endpoint = endpoint,
        BackendKind::OpenAi => settings.openai.endpoint = endpoint,
        BackendKind::Anthropic => settings.anthropic.endpoint = endpoint,
    }

    println!();
    settings.auto_apply = dialoguer::Confirm::new()
        .with_prompt("Apply resolutions without asking?")
        .default(settings.auto_apply)
        .interact()?;

    settings.context_lines = dialoguer::Input::new()
        .with_prompt("Context lines around each conflict")
        .default(settings.context_lines)
        .interact_text()?;

    settings.save(&path)?;
    println!();
    println!("Configuration saved to {}", path.display());

    // Ask for the key now rather than on the first resolve.
    let mut selector = selector(cli, settings);
    let outcome = selector.switch_to(kind).await?;
    if outcome.valid {
        println!("The {} backend is ready.", kind);
    } else {
        println!("The {} backend did not validate yet. Run 'aimerge validate' once it is reachable.", kind);
    }
    println!();

    Ok(())
}

async fn cmd_status(cli: &Cli) -> anyhow::Result<()> {
    println!("aimerge Status");
    println!("==============");
    println!();

    match Settings::load(&settings_path(cli)) {
        Ok(settings) => {
            println!("Configuration: Found");
            println!("  Backend: {}", settings.backend);
            println!("  Model: {}", settings.model_for(settings.backend));
            println!("  Endpoint: {}", settings.endpoint_for(settings.backend));
            println!("  Auto-apply: {}", settings.auto_apply);
            println!("  Context lines: {}", settings.context_lines);
        }
        Err(_) => {
            println!("Configuration: Not found (using defaults)");
            println!("  Run 'aimerge setup' to configure");
        }
    }

    println!();
    let documents = GitWorkspace::new(&cli.root).find_conflicted_documents().await?;
    if documents.is_empty() {
        println!("No conflicted files.");
    } else {
        println!("Conflicted files:");
        for document in &documents {
            let count = markers::detect(&document.text(), document.path()).len();
            println!("  {} ({} conflicts)", document.path().display(), count);
        }
    }

    Ok(())
}

async fn cmd_detect(cli: &Cli, file: &Path) -> anyhow::Result<()> {
    let document = open_document(cli, file).await?;
    let conflicts = markers::detect(&document.text(), document.path());

    if conflicts.is_empty() {
        println!("No conflicts in {}", document.path().display());
        return Ok(());
    }

    for (i, conflict) in conflicts.iter().enumerate() {
        println!(
            "#{} lines {}-{}{}",
            i + 1,
            conflict.start_line + 1,
            conflict.end_line + 1,
            if conflict.is_three_way() { " (with base)" } else { "" }
        );
        println!("  ours:   {} lines", conflict.current_content.lines().count());
        println!("  theirs: {} lines", conflict.incoming_content.lines().count());
    }

    Ok(())
}

async fn cmd_resolve(cli: &Cli, file: &Path, line: Option<usize>) -> anyhow::Result<()> {
    let orchestrator = orchestrator(cli).await?;
    let mut document = open_document(cli, file).await?;
    let conflict = pick_conflict(&document, line)?;

    println!("Resolving conflict at lines {}-{}...", conflict.start_line + 1, conflict.end_line + 1);
    let response = orchestrator.resolve_one(&document, &conflict).await?;
    println!();
    print_resolution(&response);
    println!();

    let apply = orchestrator.auto_apply()
        || dialoguer::Confirm::new()
            .with_prompt("Apply this resolution?")
            .default(true)
            .interact()?;
    if !apply {
        println!("Left unchanged.");
        return Ok(());
    }

    if orchestrator.apply(&mut document, &conflict, &response.resolution).await {
        println!("Applied.");
    } else {
        anyhow::bail!("failed to apply the resolution to {}", document.path().display());
    }
    Ok(())
}

async fn cmd_alternatives(cli: &Cli, file: &Path, line: Option<usize>, count: usize) -> anyhow::Result<()> {
    let orchestrator = orchestrator(cli).await?;
    let mut document = open_document(cli, file).await?;
    let conflict = pick_conflict(&document, line)?;

    let count = count.clamp(1, ALTERNATIVE_TEMPERATURES.len());
    println!("Asking for {} alternatives...", count);
    let suggestions = orchestrator.suggest_alternatives(&document, &conflict, count).await?;
    if suggestions.is_empty() {
        anyhow::bail!("the backend returned no suggestions");
    }

    for (i, suggestion) in suggestions.iter().enumerate() {
        println!();
        println!("--- Option {} ---", i + 1);
        print_resolution(suggestion);
    }
    println!();

    let mut items: Vec<String> = (1..=suggestions.len()).map(|i| format!("Option {}", i)).collect();
    items.push("Keep the conflict".to_string());
    let choice = dialoguer::Select::new()
        .with_prompt("Apply which resolution?")
        .items(&items)
        .default(0)
        .interact()?;

    let Some(chosen) = suggestions.get(choice) else {
        println!("Left unchanged.");
        return Ok(());
    };
    if orchestrator.apply(&mut document, &conflict, &chosen.resolution).await {
        println!("Applied option {}.", choice + 1);
    } else {
        anyhow::bail!("failed to apply the resolution to {}", document.path().display());
    }
    Ok(())
}

async fn cmd_resolve_all(cli: &Cli) -> anyhow::Result<()> {
    let orchestrator = orchestrator(cli).await?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Cancellation requested");
                cancel.cancel();
            }
        });
    }

    println!("Resolving all conflicts. Press Ctrl+C to stop after the current one.");
    let started_at = chrono::Utc::now();
    let results = orchestrator.resolve_all_in_workspace(&cancel).await;
    let summary = BatchSummary::from_results(&results, started_at);

    println!();
    println!(
        "Applied {} of {} conflicts across {} files in {}s.",
        summary.applied,
        summary.attempted,
        summary.files,
        (summary.finished_at - summary.started_at).num_seconds()
    );
    if cancel.is_cancelled() {
        println!("Stopped early; remaining conflicts were left untouched.");
    }

    let failures: Vec<_> = results.iter().filter(|r| !r.applied).collect();
    if !failures.is_empty() {
        println!();
        println!("Failures:");
        for result in failures {
            println!(
                "  {}:{}: {}",
                result.file_path.display(),
                result.conflict.start_line + 1,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

async fn cmd_backend(cli: &Cli, kind: Option<BackendKind>) -> anyhow::Result<()> {
    let path = settings_path(cli);
    let settings = Settings::load_or_default(&path)?;

    let Some(kind) = kind else {
        println!("Current backend: {}", settings.backend);
        println!("Model: {}", settings.model_for(settings.backend));
        println!();
        println!("Switch with: aimerge backend <local|openai|anthropic>");
        return Ok(());
    };

    let mut selector = selector(cli, settings);
    let outcome = selector.switch_to(kind).await?;
    std::fs::create_dir_all(&cli.data_dir)?;
    selector.settings().save(&path)?;

    println!("Backend switched to: {}", kind);
    if !outcome.valid {
        println!("Warning: the backend did not validate. Check the endpoint, model and API key.");
    }
    Ok(())
}

async fn cmd_models(cli: &Cli) -> anyhow::Result<()> {
    let orchestrator = orchestrator(cli).await?;
    let backend = orchestrator.selector().current()?;
    let models = backend.list_models().await;

    if models.is_empty() {
        println!("No models reported by the {} backend.", backend.kind());
        return Ok(());
    }
    println!("Models available on {}:", backend.kind());
    for model in models {
        let marker = if model == backend.model() { "*" } else { " " };
        println!(" {} {}", marker, model);
    }
    Ok(())
}

async fn cmd_validate(cli: &Cli) -> anyhow::Result<()> {
    let orchestrator = orchestrator(cli).await?;
    let backend = orchestrator.selector().current()?;
    if backend.validate_config().await {
        println!("The {} backend is configured correctly ({}).", backend.kind(), backend.model());
    } else {
        println!("The {} backend is not usable. Check the endpoint, model and API key.", backend.kind());
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_set_key(cli: &Cli, kind: BackendKind) -> anyhow::Result<()> {
    if !kind.needs_credential() {
        anyhow::bail!("the {} backend does not use an API key", kind);
    }
    let key = dialoguer::Password::new()
        .with_prompt(format!("{} API key", kind))
        .interact()?;

    std::fs::create_dir_all(&cli.data_dir)?;
    let settings = Settings::load_or_default(&settings_path(cli))?;
    let mut selector = selector(cli, settings);
    selector.update_credential(kind, &key).await?;
    println!("API key for {} stored.", kind);
    Ok(())
}

async fn cmd_clear_key(cli: &Cli, kind: BackendKind) -> anyhow::Result<()> {
    let settings = Settings::load_or_default(&settings_path(cli))?;
    let mut selector = selector(cli, settings);
    selector.clear_credential(kind).await?;
    println!("API key for {} removed.", kind);
    Ok(())
}
