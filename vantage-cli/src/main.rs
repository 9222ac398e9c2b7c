//! Vantage command line
//!
//! Usage:
//!   vantage create "a pomodoro timer" --save
//!   vantage fix <APP_ID>
//!   vantage verify --file app.jsx

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use vantage::config::LlmProviderType;
use vantage::sandbox::NodeSandbox;
use vantage::vantage_source::{repair, validate, validate_raw, AppPreamble};
use vantage::{
    create_backend, AppLibrary, AppMetadata, EmbedDocument, Forge, ForgeOutcome, SandboxVerifier,
    SavedApp, SecretStore, TestStatus, VantageConfig, VerificationMode,
};

#[derive(Parser, Debug)]
#[command(name = "vantage")]
#[command(about = "Generate, repair and verify React mini-apps")]
struct Cli {
    /// Path to configuration file (TOML format)
    #[arg(long, env = "VANTAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Project directory holding `.vantage/` (secrets, saved apps)
    #[arg(long, env = "VANTAGE_PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Use the built-in offline backend instead of Gemini
    #[arg(long)]
    offline: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new app from a description
    Create {
        description: String,
        /// Store the result in the app library
        #[arg(long)]
        save: bool,
        /// Skip the sandbox run
        #[arg(long)]
        no_verify: bool,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repair a saved app that fails at runtime
    Fix {
        id: String,
        /// Errors to report; defaults to the app's last test errors
        #[arg(long = "error")]
        errors: Vec<String>,
        #[arg(long)]
        no_verify: bool,
    },

    /// Apply a change request to a saved app
    Update {
        id: String,
        change_request: String,
        #[arg(long)]
        no_verify: bool,
    },

    /// Run the static repair pipeline over a file and print the result
    Repair { file: PathBuf },

    /// Run the structural validator over a file
    Validate {
        file: PathBuf,
        /// Repair before validating
        #[arg(long)]
        repair: bool,
    },

    /// Execute a file or saved app in the sandbox
    Verify {
        /// Saved app id
        #[arg(conflicts_with = "file")]
        id: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Use the live-embedding timeout
        #[arg(long)]
        live: bool,
    },

    /// Print an embedding document for a file or saved app
    Embed {
        #[arg(conflicts_with = "file")]
        id: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Print an iframe element instead of the raw document
        #[arg(long)]
        iframe: bool,
    },

    /// Ask the backend for display metadata
    Metadata { description: String },

    /// Manage saved apps
    #[command(subcommand)]
    Apps(AppsCommands),

    /// Manage locally stored secrets
    #[command(subcommand)]
    Secrets(SecretsCommands),
}

#[derive(Subcommand, Debug)]
enum AppsCommands {
    /// List saved apps
    List,
    /// Print an app's code
    Show { id: String },
    /// Delete an app
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum SecretsCommands {
    /// Store a secret in .vantage/secrets.toml (value read from stdin when omitted)
    Set { name: String, value: Option<String> },
    /// Delete a stored secret
    Remove { name: String },
    /// List stored secret names
    List,
}

struct Workspace {
    config: VantageConfig,
    secrets: SecretStore,
}

impl Workspace {
    fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = VantageConfig::load(cli.config.as_deref())?;
        if cli.offline {
            config.llm.provider = LlmProviderType::Stub;
        }
        if config.storage.data_dir.is_relative() {
            config.storage.data_dir = cli.project_dir.join(&config.storage.data_dir);
        }
        let secrets = SecretStore::new(Some(cli.project_dir.clone()))?;
        Ok(Self { config, secrets })
    }

    async fn library(&self) -> anyhow::Result<AppLibrary> {
        Ok(AppLibrary::open(self.config.storage.apps_path()).await?)
    }

    async fn verifier(&self, skip: bool) -> Option<SandboxVerifier> {
        if skip || !self.config.sandbox.enabled {
            return None;
        }
        if !NodeSandbox::is_available(&self.config.sandbox.node_binary).await {
            warn!(
                binary = %self.config.sandbox.node_binary,
                "Node binary not found; skipping sandbox verification"
            );
            return None;
        }
        Some(SandboxVerifier::node(self.config.sandbox.clone()))
    }

    async fn forge(&self, skip_verify: bool) -> anyhow::Result<Forge> {
        let backend = create_backend(&self.config.llm, &self.secrets)?;
        let forge = Forge::new(self.config.clone(), backend)?;
        Ok(match self.verifier(skip_verify).await {
            Some(verifier) => forge.with_verifier(verifier),
            None => forge,
        })
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn source_for(
    ctx: &Workspace,
    id: Option<&str>,
    file: Option<&Path>,
) -> anyhow::Result<(String, String)> {
    match (id, file) {
        (Some(id), _) => {
            let library = ctx.library().await?;
            let app = library
                .get(id)
                .with_context(|| format!("No saved app with id '{}'", id))?;
            Ok((app.code.clone(), app.name.clone()))
        }
        (None, Some(path)) => {
            let code = read_source(path)?;
            let name = AppPreamble::parse(&code)
                .name
                .unwrap_or_else(|| path.display().to_string());
            Ok((code, name))
        }
        (None, None) => bail!("Pass an app id or --file"),
    }
}

fn print_outcome(outcome: &ForgeOutcome) {
    for record in &outcome.attempts {
        eprintln!(
            "attempt {} failed at {} ({}): {}",
            record.attempt, record.stage, record.kind, record.message
        );
    }
    if !outcome.fix_report.is_empty() {
        eprintln!("repairs: {}", outcome.fix_report.summary());
    }
    if let Some(runtime) = &outcome.runtime {
        eprintln!(
            "sandbox: {} in {} ms",
            runtime.phase, runtime.elapsed_ms
        );
        for warning in &runtime.warnings {
            eprintln!("  warning: {}", warning);
        }
    }
    if outcome.is_fallback {
        eprintln!("all attempts failed; returning the fallback component");
    }
    println!("{}", outcome.code());
}

fn test_status(outcome: &ForgeOutcome) -> (TestStatus, Vec<String>) {
    match &outcome.runtime {
        Some(runtime) if runtime.success => (TestStatus::Passed, Vec::new()),
        Some(runtime) => (TestStatus::Failed, runtime.errors.clone()),
        None => (TestStatus::Untested, Vec::new()),
    }
}

/// Run a fix request against a saved app and store the result. The app is
/// only marked healing once a forge exists to heal it.
async fn heal(
    ctx: &Workspace,
    library: &mut AppLibrary,
    id: &str,
    errors: Vec<String>,
    no_verify: bool,
) -> anyhow::Result<ForgeOutcome> {
    let app = library
        .get(id)
        .cloned()
        .with_context(|| format!("No saved app with id '{}'", id))?;
    let errors = if errors.is_empty() {
        app.last_test_errors.clone()
    } else {
        errors
    };

    let forge = ctx.forge(no_verify).await?;
    library
        .record_test(&app.id, TestStatus::Healing, errors.clone())
        .await?;

    match forge.fix(&app.description, &app.code, errors.clone()).await {
        Ok(outcome) => {
            library.update_code(&app.id, outcome.code().to_string()).await?;
            let (status, errors) = test_status(&outcome);
            library.record_test(&app.id, status, errors).await?;
            Ok(outcome)
        }
        Err(e) => {
            library
                .record_test(&app.id, TestStatus::Failed, errors)
                .await?;
            Err(e.into())
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Workspace::load(&cli)?;

    match cli.command {
        Commands::Create {
            description,
            save,
            no_verify,
            json,
        } => {
            let forge = ctx.forge(no_verify).await?;
            let outcome = forge.create(&description).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            if save {
                let metadata = if outcome.preamble.is_complete() {
                    AppMetadata::from_preamble(&outcome.preamble, &description)
                } else {
                    match forge.suggest_metadata(&description).await {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            warn!("Metadata suggestion failed: {}", e);
                            AppMetadata::from_preamble(&outcome.preamble, &description)
                        }
                    }
                };
                let (status, errors) = test_status(&outcome);
                let mut app = SavedApp::new(metadata, outcome.code());
                app.is_fallback = outcome.is_fallback;
                app.test_status = status;
                app.last_test_errors = errors;
                let id = app.id.clone();
                let mut library = ctx.library().await?;
                library.add(app).await?;
                eprintln!("saved as {}", id);
            }
        }

        Commands::Fix {
            id,
            errors,
            no_verify,
        } => {
            let mut library = ctx.library().await?;
            let outcome = heal(&ctx, &mut library, &id, errors, no_verify).await?;
            print_outcome(&outcome);
        }

        Commands::Update {
            id,
            change_request,
            no_verify,
        } => {
            let mut library = ctx.library().await?;
            let app = library
                .get(&id)
                .cloned()
                .with_context(|| format!("No saved app with id '{}'", id))?;
            let forge = ctx.forge(no_verify).await?;
            let outcome = forge.update(&app.code, &change_request).await?;
            print_outcome(&outcome);
            library.update_code(&app.id, outcome.code().to_string()).await?;
            let (status, errors) = test_status(&outcome);
            library.record_test(&app.id, status, errors).await?;
        }

        Commands::Repair { file } => {
            let outcome = repair(&read_source(&file)?);
            for record in &outcome.report.records {
                eprintln!(
                    "{} [{:?}] {:?} -> {:?}",
                    record.rule, record.severity, record.matched, record.replacement
                );
            }
            println!("{}", outcome.source.text());
        }

        Commands::Validate { file, repair: fix } => {
            let text = read_source(&file)?;
            let raw = validate_raw(&text);
            let text = if fix { repair(&text).source.into_text() } else { text };
            let outcome = validate(&text);
            for issue in raw.errors.iter().chain(outcome.errors.iter()) {
                println!("error[{}]: {}", issue.kind.as_str(), issue.message);
            }
            for issue in &outcome.warnings {
                println!("warning[{}]: {}", issue.kind.as_str(), issue.message);
            }
            if !raw.valid || !outcome.valid {
                bail!("{} failed validation", file.display());
            }
            println!("ok");
        }

        Commands::Verify { id, file, live } => {
            let (code, _) = source_for(&ctx, id.as_deref(), file.as_deref()).await?;
            let Some(verifier) = ctx.verifier(false).await else {
                bail!("Sandbox is disabled or node is not available");
            };
            let repaired = repair(&code);
            let validation = validate(repaired.source.text());
            if !validation.valid {
                bail!(
                    "Validation failed: {}",
                    validation.error_messages().join("; ")
                );
            }
            let candidate = repaired.source.promote()?;
            let mode = if live {
                VerificationMode::Live
            } else {
                VerificationMode::Validation
            };
            let result = verifier.verify(&candidate, mode).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if let Some(id) = id {
                let mut library = ctx.library().await?;
                let status = if result.success {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                };
                library.record_test(&id, status, result.errors.clone()).await?;
            }
            if !result.success {
                bail!("Sandbox run failed");
            }
        }

        Commands::Embed { id, file, iframe } => {
            let (code, name) = source_for(&ctx, id.as_deref(), file.as_deref()).await?;
            let document = EmbedDocument::render(&code, &name, &ctx.config.sandbox);
            if iframe {
                println!("{}", document.iframe_tag(&name));
            } else {
                println!("{}", document.html());
            }
        }

        Commands::Metadata { description } => {
            let forge = ctx.forge(true).await?;
            let metadata = forge.suggest_metadata(&description).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }

        Commands::Apps(command) => {
            let mut library = ctx.library().await?;
            match command {
                AppsCommands::List => {
                    for app in library.list() {
                        println!(
                            "{}  {} {}  [{}]{}",
                            &app.id[..8.min(app.id.len())],
                            app.icon,
                            app.name,
                            app.test_status.as_str(),
                            if app.is_fallback { " (fallback)" } else { "" }
                        );
                    }
                }
                AppsCommands::Show { id } => {
                    let app = library
                        .get(&id)
                        .with_context(|| format!("No saved app with id '{}'", id))?;
                    println!("{}", app.code);
                }
                AppsCommands::Remove { id } => {
                    if !library.remove(&id).await? {
                        bail!("No saved app with id '{}'", id);
                    }
                    eprintln!("removed {}", id);
                }
            }
        }

        Commands::Secrets(command) => {
            let mut secrets = ctx.secrets;
            match command {
                SecretsCommands::Set { name, value } => {
                    let value = match value {
                        Some(value) => value,
                        None => {
                            let mut line = String::new();
                            std::io::stdin()
                                .read_line(&mut line)
                                .context("Failed to read secret from stdin")?;
                            line.trim().to_string()
                        }
                    };
                    if value.is_empty() {
                        bail!("Refusing to store an empty secret");
                    }
                    secrets.set_local(&name, value)?;
                    eprintln!("stored {}", name);
                }
                SecretsCommands::Remove { name } => {
                    if !secrets.remove(&name)? {
                        bail!("No stored secret named '{}'", name);
                    }
                }
                SecretsCommands::List => {
                    for name in secrets.list_local() {
                        println!("{}", name);
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("vantage={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!(project_dir = %cli.project_dir.display(), "vantage starting");
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn workspace(provider: LlmProviderType) -> Workspace {
        let mut config = VantageConfig::default();
        config.llm.provider = provider;
        config.llm.api_key_env = "VANTAGE_CLI_TEST_UNSET_KEY".to_string();
        config.sandbox.enabled = false;
        Workspace {
            config,
            secrets: SecretStore::new(None).unwrap(),
        }
    }

    async fn library_with_failed_app(dir: &Path) -> (AppLibrary, String) {
        let mut library = AppLibrary::open(dir.join("apps.json")).await.unwrap();
        let mut app = SavedApp::new(
            AppMetadata {
                name: "Counter".to_string(),
                icon: "🔢".to_string(),
                description: "a counter".to_string(),
            },
            "function App() { return <div>{count}</div>; }",
        );
        app.test_status = TestStatus::Failed;
        app.last_test_errors = vec!["ReferenceError: count is not defined".to_string()];
        let id = app.id.clone();
        library.add(app).await.unwrap();
        (library, id)
    }

    #[tokio::test]
    async fn heal_without_a_backend_leaves_the_app_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (mut library, id) = library_with_failed_app(dir.path()).await;
        let ctx = workspace(LlmProviderType::Gemini);

        let err = heal(&ctx, &mut library, &id, Vec::new(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("VANTAGE_CLI_TEST_UNSET_KEY"), "{err}");

        let reopened = AppLibrary::open(dir.path().join("apps.json")).await.unwrap();
        let app = reopened.get(&id).unwrap();
        assert_eq!(app.test_status, TestStatus::Failed);
        assert_eq!(
            app.last_test_errors,
            vec!["ReferenceError: count is not defined".to_string()]
        );
    }

    #[tokio::test]
    async fn heal_stores_the_fixed_code() {
        let dir = tempfile::tempdir().unwrap();
        let (mut library, id) = library_with_failed_app(dir.path()).await;
        let ctx = workspace(LlmProviderType::Stub);

        let outcome = heal(&ctx, &mut library, &id, Vec::new(), true)
            .await
            .unwrap();

        let reopened = AppLibrary::open(dir.path().join("apps.json")).await.unwrap();
        let app = reopened.get(&id).unwrap();
        assert_eq!(app.code, outcome.code());
        assert_eq!(app.test_status, TestStatus::Untested);
        assert!(app.last_test_errors.is_empty());
    }
}
