use anyhow::Context;
use dotenvy::dotenv;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use teletweet_core::config::{LogSection, Settings, SettingsStore};
use teletweet_core::error::FlowError;
use teletweet_transport_telegram::runner::run_bot;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "teletweet_core=info,teletweet_transport_telegram=info,teletweet_bot=info,hyper=warn,reqwest=warn";

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    oauth: Regex,
    secrets: RwLock<Vec<Regex>>,
}

const MIN_SECRET_LEN: usize = 8;

fn literal_patterns(secrets: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    secrets
        .iter()
        .filter(|s| s.len() >= MIN_SECRET_LEN)
        .map(|s| Regex::new(&regex::escape(s)))
        .collect()
}

impl RedactionPatterns {
    /// Initialize all regex patterns. `secrets` are masked verbatim wherever
    /// they appear.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new(secrets: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            oauth: Regex::new(r#"(oauth_(?:token_secret|token|signature|verifier))=("?)[^\s&",]+"#)?,
            secrets: RwLock::new(literal_patterns(secrets)?),
        })
    }

    /// Start masking `secrets` too, e.g. credentials linked after startup.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern cannot be compiled
    fn add_secrets(&self, secrets: &[&str]) -> Result<(), regex::Error> {
        let added = literal_patterns(secrets)?;
        let mut current = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        for pattern in added {
            if !current.iter().any(|p| p.as_str() == pattern.as_str()) {
                current.push(pattern);
            }
        }
        Ok(())
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .oauth
            .replace_all(&output, "${1}=${2}[MASKED]")
            .to_string();
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        for secret in secrets.iter() {
            output = secret.replace_all(&output, "[MASKED]").to_string();
        }
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full even though fewer or more
        // bytes may have been written.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    let path = Settings::default_path();
    let loaded = load_settings(&path);

    // Logging needs the log section and the secrets to mask, so it is set up
    // after the settings are read but before anything is reported.
    let (log, secrets) = match &loaded {
        Ok(settings) => (settings.log.clone(), secrets_of(settings)),
        Err(_) => (LogSection::default(), Vec::new()),
    };
    let secret_refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
    let patterns = Arc::new(
        RedactionPatterns::new(&secret_refs).context("Failed to compile regex patterns")?,
    );
    init_logging(patterns.clone(), &log);

    info!("Starting TeleTweet bot...");

    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!("Configuration loaded from {}.", path.display());

    let store = Arc::new(SettingsStore::new(path, settings));
    spawn_secret_watch(&store, patterns);
    if let Err(e) = run_bot(store).await {
        error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}

fn load_settings(path: &Path) -> Result<Settings, FlowError> {
    Ok(Settings::load(path)?)
}

/// Mask credentials linked through the PIN flow from then on.
fn spawn_secret_watch(store: &SettingsStore, patterns: Arc<RedactionPatterns>) {
    let mut linked = store.watch_credentials();
    tokio::spawn(async move {
        while linked.changed().await.is_ok() {
            let secrets: Vec<String> = linked
                .borrow_and_update()
                .as_ref()
                .map(|c| vec![c.access_token().to_string(), c.access_token_secret().to_string()])
                .unwrap_or_default();
            let refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
            if let Err(e) = patterns.add_secrets(&refs) {
                error!("Failed to mask new credentials: {e}");
            }
        }
    });
}

fn secrets_of(settings: &Settings) -> Vec<String> {
    [
        Some(settings.telegram.token.clone()),
        Some(settings.twitter.consumer_secret.clone()),
        settings.twitter.access_token.clone(),
        settings.twitter.access_token_secret.clone(),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn log_filter(log: &LogSection) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| match log.level.as_deref() {
            Some(level) => EnvFilter::try_new(level),
            None => EnvFilter::try_new(DEFAULT_LOG_FILTER),
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn open_log_file(log: &LogSection) -> Option<Arc<File>> {
    let path = log.file.as_ref()?;
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(Arc::new(file)),
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", path.display());
            None
        }
    }
}

fn init_logging(patterns: Arc<RedactionPatterns>, log: &LogSection) {
    let stderr_writer = RedactingMakeWriter::new(io::stderr, patterns.clone());
    let file_layer = open_log_file(log).map(|file| {
        let writer = RedactingMakeWriter::new(move || file.clone(), patterns);
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(log_filter(log))
        .with(tracing_subscriber::fmt::layer().with_writer(stderr_writer))
        .with(file_layer)
        .init();
}
