//! QuantumVault CLI: personal cloud file vault
//!
//! Usage:
//!   quantumvault-cli status                 Landing view
//!   quantumvault-cli login --email <e>      Sign in
//!   quantumvault-cli ls [--search <s>]      List files
//!   quantumvault-cli put <path>             Upload a file
//!   quantumvault-cli rm <name> [--yes]      Delete a file
//!   quantumvault-cli get <name> [dest]      Download a file
//!   quantumvault-cli preview <name>         Preview a file
//!   quantumvault-cli shell                  Interactive session

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use quantumvault::config::{load_config, AppConfig};
use quantumvault::logging;
use quantumvault::providers::{ProgressFn, ProviderFactory, ProviderType};
use quantumvault::registry::{FileRegistry, NoticeKind, Preview, PREVIEW_UNAVAILABLE};
use quantumvault::session::{LoginForm, LoginOutcome, Route, SessionGate};
use quantumvault::upload::LocalFile;

#[derive(Parser)]
#[command(
    name = "quantumvault-cli",
    about = "QuantumVault CLI: personal cloud file vault",
    version,
    long_about = "Upload, list, preview, download and delete files in your vault.\n\
                  Configuration is read from the config directory or --config."
)]
struct Cli {
    /// Config file (default: <config dir>/quantumvault/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend to use (firebase, memory)
    #[arg(long, global = true)]
    backend: Option<ProviderType>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether you are signed in
    Status,
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out
    Logout,
    /// List files in the vault
    Ls {
        /// Only show names containing this text (case-insensitive)
        #[arg(long, short)]
        search: Option<String>,
    },
    /// Upload a local file
    Put {
        /// Local file path
        path: PathBuf,
    },
    /// Delete a file
    Rm {
        /// File name
        name: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Download a file
    Get {
        /// File name
        name: String,
        /// Local destination (default: file name in the current directory)
        dest: Option<PathBuf>,
    },
    /// Show a preview link for an image, or why there is none
    Preview {
        /// File name
        name: String,
    },
    /// Run commands interactively in one session
    Shell,
}

/// One line typed into the shell
#[derive(Parser)]
#[command(no_binary_name = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Commands,
}

struct App {
    gate: SessionGate,
    login: LoginForm,
    registry: Arc<FileRegistry>,
}

impl App {
    fn new(config: &AppConfig) -> Result<Self> {
        let backend = ProviderFactory::create(config).context("Failed to initialise backend")?;
        Ok(Self {
            gate: SessionGate::new(backend.auth.clone()),
            login: LoginForm::new(backend.auth),
            registry: Arc::new(FileRegistry::new(backend.storage, &config.folder)),
        })
    }

    fn require_dashboard(&self) -> Result<()> {
        match self.gate.resolve(Route::Dashboard) {
            Route::Dashboard => Ok(()),
            other => bail!("Not signed in (redirected to {}). Run `login` first.", other),
        }
    }

    /// Print pending notices; `Err` when any of them is an error
    async fn flush_notices(&self) -> Result<()> {
        let mut failed = None;
        for notice in self.registry.take_notices().await {
            match notice.kind {
                NoticeKind::Success => println!("{}", notice.message),
                NoticeKind::Error => {
                    eprintln!("{}", notice.message);
                    failed = Some(notice.message);
                }
            }
        }
        match failed {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Status => self.status(),
            Commands::Login { email, password } => self.login(&email, password).await,
            Commands::Logout => {
                let route = self.gate.logout().await.context("Failed to sign out")?;
                println!("Signed out. Back to {}", route);
                Ok(())
            }
            Commands::Ls { search } => self.list(search.as_deref()).await,
            Commands::Put { path } => self.put(path).await,
            Commands::Rm { name, yes } => self.remove(&name, yes).await,
            Commands::Get { name, dest } => self.get(&name, dest).await,
            Commands::Preview { name } => self.preview(&name).await,
            Commands::Shell => bail!("Already in a shell"),
        }
    }

    fn status(&self) -> Result<()> {
        println!("Vault: {}", self.registry.location());
        match self.gate.identity() {
            Some(identity) => println!("Signed in as {}", identity.email),
            None => println!("Not signed in"),
        }
        let action = self.gate.landing_action();
        println!("{} -> {}", action.label(), action.target());
        Ok(())
    }

    async fn login(&self, email: &str, password: Option<String>) -> Result<()> {
        let password = match password {
            Some(p) => p,
            None => dialoguer::Password::new()
                .with_prompt("Password")
                .interact()
                .context("Failed to read password")?,
        };

        match self.login.submit(email, &password).await {
            LoginOutcome::Navigate(route) => {
                println!("Signed in as {}", email);
                println!("Continue at {}", route);
                Ok(())
            }
            LoginOutcome::Failed(message) => bail!(message),
            LoginOutcome::Busy => bail!("A login is already in progress"),
        }
    }

    /// Dashboard entry: fetch the listing, surfacing a listing failure
    async fn load(&self) -> Result<()> {
        self.require_dashboard()?;
        if self.registry.refresh().await.is_err() {
            self.flush_notices().await?;
        }
        Ok(())
    }

    async fn list(&self, search: Option<&str>) -> Result<()> {
        self.load().await?;
        self.registry.search(search.unwrap_or_default()).await;

        let files = self.registry.filtered().await;
        if files.is_empty() {
            println!("{}", self.registry.empty_message().await);
            return Ok(());
        }

        let width = files.iter().map(|f| f.name.len()).max().unwrap_or(4).max(4);
        println!("{:<width$}  {:>12}  {:>10}  {}", "NAME", "SIZE", "UPLOADED", "TYPE");
        for file in files {
            println!(
                "{:<width$}  {:>12}  {:>10}  {}",
                file.name,
                file.size,
                file.upload_date,
                file.content_type.as_deref().unwrap_or("-")
            );
        }
        Ok(())
    }

    async fn put(&self, path: PathBuf) -> Result<()> {
        self.require_dashboard()?;
        let file = LocalFile::open(&path).await?;

        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(file.name.clone());

        let follower = {
            let mut uploads = self.registry.subscribe_uploads();
            let bar = bar.clone();
            tokio::spawn(async move {
                while uploads.changed().await.is_ok() {
                    let current = uploads.borrow_and_update().clone();
                    let Some(mut progress) = current else {
                        continue;
                    };
                    while progress.changed().await.is_ok() {
                        let pct = *progress.borrow_and_update();
                        if pct > 0.0 {
                            bar.set_position(pct.round() as u64);
                        }
                    }
                }
            })
        };

        let result = self.registry.upload(Some(file)).await;
        follower.abort();
        match result {
            Ok(_) => bar.finish(),
            Err(_) => bar.abandon(),
        }
        self.flush_notices().await
    }

    async fn remove(&self, name: &str, yes: bool) -> Result<()> {
        self.require_dashboard()?;
        let confirm = move |prompt: &str| {
            yes || dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .unwrap_or(false)
        };

        let deleted = self.registry.delete(name, &confirm).await;
        self.flush_notices().await?;
        if let Ok(false) = deleted {
            println!("Cancelled");
        }
        Ok(())
    }

    async fn get(&self, name: &str, dest: Option<PathBuf>) -> Result<()> {
        self.load().await?;
        let dest = dest.unwrap_or_else(|| PathBuf::from(name));

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(name.to_string());

        let reporter = bar.clone();
        let on_progress: ProgressFn = Box::new(move |done: u64, total: u64| {
            reporter.set_length(total);
            reporter.set_position(done);
        });

        match self.registry.download(name, &dest, Some(on_progress)).await {
            Ok(bytes) => {
                bar.finish();
                println!("Saved {} ({} bytes) to {}", name, bytes, dest.display());
                Ok(())
            }
            Err(e) => {
                bar.abandon();
                Err(e.into())
            }
        }
    }

    async fn preview(&self, name: &str) -> Result<()> {
        self.load().await?;
        let preview = self.registry.preview(name).await?;
        println!("{}", preview.name());
        match preview {
            Preview::Image { url, .. } => println!("{}", url),
            Preview::Unavailable { .. } => println!("{}", PREVIEW_UNAVAILABLE),
        }
        Ok(())
    }

    async fn shell(&self) -> Result<()> {
        println!("QuantumVault shell. Type `help` for commands, `exit` to quit.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            match line {
                "" => continue,
                "exit" | "quit" => break,
                _ => {}
            }

            match ShellLine::try_parse_from(line.split_whitespace()) {
                Ok(parsed) => {
                    if let Err(e) = self.run(parsed.command).await {
                        eprintln!("Error: {:#}", e);
                    }
                }
                Err(e) => {
                    let _ = e.print();
                }
            }
        }
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    logging::init(&config.log_level, cli.verbose);
    config.validate()?;

    let app = App::new(&config)?;
    match cli.command {
        Commands::Shell => app.shell().await,
        command => app.run(command).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
