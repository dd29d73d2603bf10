//! `blurdev`: protocol URL handler, child-process entry point, and a small
//! parent-side sender.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::time::{Instant, MissedTickBehavior};

use blurdev_bus::logging::{self, LogTarget};
use blurdev_bus::supervisor::CHILD_APP_NAME;
use blurdev_bus::{
    BusConfig, Channel, ConsoleHost, Dispatcher, HandlerRegistry, Host, LaunchArgs, SessionId,
    Supervisor,
};

/// How long a child waits for queued frames to reach the parent on exit.
const CHILD_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "blurdev", version, about = "blurdev protocol handler and command bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle one blurdev:// URL in this process
    Protocol {
        /// e.g. blurdev://treegrunt/DailyTool?date=today
        url: String,
    },

    /// Run as the child of a supervising process (stdin/stdout are the channel)
    #[command(hide = true)]
    Child(ChildArgs),

    /// Start a child process and send it one or more URLs
    Send {
        #[arg(required = true)]
        urls: Vec<String>,

        /// How long to keep polling for replies after sending
        #[arg(long, default_value_t = 500)]
        linger_ms: u64,

        /// How long the child gets to exit before it is killed
        #[arg(long, default_value_t = 2000)]
        grace_ms: u64,
    },
}

#[derive(Args, Debug)]
struct ChildArgs {
    #[arg(long, value_parser = SessionId::parse)]
    session: SessionId,

    #[arg(long)]
    parent_pid: u32,

    #[arg(long, default_value = "")]
    parent_name: String,

    #[arg(long)]
    core_name: String,

    #[arg(long)]
    window_handle: Option<u64>,
}

impl From<ChildArgs> for LaunchArgs {
    fn from(args: ChildArgs) -> Self {
        LaunchArgs {
            session: args.session,
            parent_pid: args.parent_pid,
            parent_name: args.parent_name,
            core_name: args.core_name,
            window_handle: args.window_handle,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BusConfig::from_env().context("invalid blurdev configuration")?;

    match cli.command {
        Commands::Protocol { url } => protocol(&config, &url),
        Commands::Child(args) => {
            let runtime = runtime()?;
            let result = runtime.block_on(child(&config, args.into()));
            // The stdin reader is a blocking read that cannot be cancelled.
            runtime.shutdown_background();
            result
        }
        Commands::Send {
            urls,
            linger_ms,
            grace_ms,
        } => runtime()?.block_on(send(
            &config,
            &urls,
            Duration::from_millis(linger_ms),
            Duration::from_millis(grace_ms),
        )),
    }
}

/// Dispatch stays on one thread.
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

fn protocol(config: &BusConfig, url: &str) -> Result<()> {
    let log_path = config.protocol_log_path();
    logging::init(&LogTarget::File(log_path.clone()))
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let host: Arc<dyn Host> = Arc::new(ConsoleHost::new(config.load_tools()?));
    let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::with_builtins()), host);
    dispatcher
        .run_url(url)
        .with_context(|| format!("failed to handle {url}"))?;
    Ok(())
}

async fn child(config: &BusConfig, args: LaunchArgs) -> Result<()> {
    logging::init(&LogTarget::Stderr).context("failed to initialise logging")?;

    let host = Arc::new(ConsoleHost::new(config.load_tools()?).with_stdout_to_stderr(true));
    host.set_active_app_name(CHILD_APP_NAME);
    let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::with_builtins()), host);

    let channel = Channel::spawn(tokio::io::stdin(), tokio::io::stdout());
    let mut supervisor = Supervisor::attach_child(&args, channel, config);
    dispatcher.run(&mut supervisor, config.poll_interval).await;
    supervisor.drain(CHILD_FLUSH_TIMEOUT).await;
    tracing::info!("Child exiting");
    Ok(())
}

async fn send(config: &BusConfig, urls: &[String], linger: Duration, grace: Duration) -> Result<()> {
    logging::init(&LogTarget::Stderr).context("failed to initialise logging")?;

    let host: Arc<dyn Host> = Arc::new(ConsoleHost::new(config.load_tools()?));
    let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::with_builtins()), host);

    let mut supervisor = Supervisor::parent(config);
    let handle = supervisor
        .ensure_child()
        .await
        .context("failed to start child process")?;
    if let Some(handle) = handle {
        tracing::info!(pid = handle.pid, session = %handle.session, "Child started");
    }

    for url in urls {
        let command = blurdev_bus::parse(url).into_command();
        if !supervisor.send_command(&command) {
            bail!("channel to child closed before {url} could be sent");
        }
        tracing::debug!(%url, "Sent command");
    }

    let mut failures = 0usize;
    let deadline = Instant::now() + linger;
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    while Instant::now() < deadline {
        interval.tick().await;
        loop {
            match dispatcher.tick(&mut supervisor) {
                Ok(_) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Child reported a failure");
                    failures += 1;
                }
            }
        }
    }

    let status = supervisor
        .shutdown_child(grace)
        .await
        .context("failed to stop child process")?;
    tracing::debug!(?status, "Child stopped");

    if failures > 0 {
        bail!("{failures} command(s) failed");
    }
    Ok(())
}
