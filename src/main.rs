use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use http_retry::{
    ErrorKind, ExponentialBackoff, FibonacciBackoff, JitterBackoff, ListBackoff, RandomBackoff,
    RetryClient, RetryConfig, RetryOptions,
};
use reqwest::{Method, Url};
use std::path::PathBuf;
use std::time::Duration;

/// http-retry - fetch a URL, retrying failed attempts
///
/// Sends one logical HTTP request and prints the response body. Server errors
/// are retried by default; use --status and --retry-on to retry more.
///
/// Examples:
///   http-retry https://example.com/ping
///   http-retry -X POST -d '{"a": 1}' --attempts 5 https://example.com/items
///   http-retry --strategy list --timeouts 1,2,4 https://example.com/a https://example.com/b
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// URL to fetch; more than one URL switches URL on each retry
    #[arg(value_name = "URL", required = true)]
    urls: Vec<String>,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    method: String,

    /// Extra request header, as "Name: value"
    #[arg(long = "header", short = 'H', value_name = "HEADER")]
    headers: Vec<String>,

    /// Raw request body
    #[arg(long, short = 'd')]
    data: Option<String>,

    /// Retry settings file (JSON); flags below override it
    #[arg(long, short = 'c', env = "HTTP_RETRY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Total number of attempts, including the first
    #[arg(long, short = 'n')]
    attempts: Option<u32>,

    /// Wait strategy between attempts
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Waits in seconds for the list strategy
    #[arg(long, value_delimiter = ',', value_name = "SECS")]
    timeouts: Vec<f64>,

    /// Additional status code to retry on (repeatable)
    #[arg(long = "status", value_name = "CODE")]
    statuses: Vec<u16>,

    /// Error kind to retry on: connect, timeout, request, body, decode, redirect, closed, status, other
    #[arg(long = "retry-on", value_name = "KIND")]
    retry_on: Vec<ErrorKind>,

    /// Do not retry on 5xx responses unless listed with --status
    #[arg(long)]
    no_retry_server_errors: bool,

    /// Fail when the final response is 4xx or 5xx
    #[arg(long, short = 'f')]
    raise_for_status: bool,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Exponential,
    Random,
    List,
    Fibonacci,
    Jitter,
}

impl Cli {
    fn retry_options(&self) -> Result<(RetryOptions, bool)> {
        let config = match &self.config {
            Some(path) => RetryConfig::from_file(path)?,
            None => RetryConfig::default(),
        };
        let raise_for_status = self.raise_for_status || config.raise_for_status;
        let mut options = config.into_options().context("Invalid retry configuration")?;

        if let Some(strategy) = self.strategy {
            let attempts = options.attempts();
            options = match strategy {
                Strategy::Exponential => RetryOptions::new(ExponentialBackoff::default()),
                Strategy::Random => RetryOptions::new(RandomBackoff::default()),
                Strategy::List => {
                    if self.timeouts.is_empty() {
                        bail!("--strategy list requires --timeouts");
                    }
                    RetryOptions::new(ListBackoff::from_secs_f64(&self.timeouts)?)
                }
                Strategy::Fibonacci => RetryOptions::new(FibonacciBackoff::default()),
                Strategy::Jitter => RetryOptions::new(JitterBackoff::default()),
            }
            .with_statuses(options.statuses().iter().copied())
            .with_exceptions(options.exceptions().iter().copied())
            .with_methods(options.methods().iter().cloned())
            .with_retry_all_server_errors(options.retry_all_server_errors());
            if strategy != Strategy::List {
                options = options.with_attempts(attempts);
            }
        }

        if let Some(attempts) = self.attempts {
            options = options.with_attempts(attempts);
        }
        if !self.statuses.is_empty() {
            let statuses = options
                .statuses()
                .iter()
                .copied()
                .chain(self.statuses.iter().copied())
                .collect::<Vec<_>>();
            options = options.with_statuses(statuses);
        }
        if !self.retry_on.is_empty() {
            let kinds = options
                .exceptions()
                .iter()
                .copied()
                .chain(self.retry_on.iter().copied())
                .collect::<Vec<_>>();
            options = options.with_exceptions(kinds);
        }
        if self.no_retry_server_errors {
            options = options.with_retry_all_server_errors(false);
        }

        Ok((options, raise_for_status))
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Invalid header '{}', expected 'Name: value'", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", cli.method))?;
    let urls = cli
        .urls
        .iter()
        .map(|u| Url::parse(u).with_context(|| format!("Invalid URL '{}'", u)))
        .collect::<Result<Vec<_>>>()?;
    let (retry_options, raise_for_status) = cli.retry_options()?;

    let client = RetryClient::builder()
        .retry_options(retry_options)
        .raise_for_status(raise_for_status)
        .build();

    let mut request = client.request(method, urls);
    for raw in &cli.headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }
    if let Some(data) = &cli.data {
        request = request.body(data.as_str());
    }
    if let Some(timeout) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(timeout).context("Invalid --timeout")?;
        request = request.timeout(timeout);
    }

    let result = request.await;
    client.close().await;

    let mut response = result.context("Request failed")?;
    let body = response
        .text()
        .await
        .context("Failed to read response body")?;
    print!("{}", body);

    if !response.status().is_success() {
        eprintln!("HTTP {}", response.status());
    }
    Ok(())
}
