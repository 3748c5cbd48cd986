use parley_console::error::ConsoleError;
use parley_console::loader::{load_flows, load_module_config};
use parley_console::sweep::spawn_session_sweep;
use parley_console::transport::{REPLY_PRINTER, ReplyPrinter, run_lines};
use parley_dialog::ActionRegistry;
use parley_events::MiddlewareDefinition;
use parley_sdk::{Collaborators, ParleyConfig, assemble};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> parley_core::Result<(), ConsoleError> {
    // Replies own stdout; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ParleyConfig::from_env().map_err(|e| ConsoleError::Config {
        details: e.to_string(),
    })?;
    let settings = config.runtime_settings().map_err(|e| ConsoleError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let flows = load_flows(&config.flows_dir)?;
    let module_config = load_module_config(config.module_config_file.as_deref())?;

    let collaborators =
        Collaborators::new(Arc::new(flows), Arc::new(ActionRegistry::with_builtins()))
            .with_config(Arc::new(module_config));
    let runtime = assemble(settings, collaborators).map_err(|e| ConsoleError::Assembly {
        details: e.to_string(),
    })?;

    // Printing runs after every other outgoing middleware.
    runtime
        .api()
        .events
        .register(
            MiddlewareDefinition::outgoing(
                REPLY_PRINTER,
                Arc::new(ReplyPrinter::new(Arc::new(Mutex::new(tokio::io::stdout())))),
            )
            .with_priority(i32::MAX)
            .with_description("Prints replies to stdout"),
        )
        .map_err(|e| ConsoleError::Assembly {
            details: e.to_string(),
        })?;

    let sweep = spawn_session_sweep(
        Arc::clone(runtime.sessions()),
        config.idle_timeout(),
        config.sweep_interval(),
    );

    tracing::info!("reading '<bot> <session> <text>' lines from stdin");
    tokio::select! {
        stats = run_lines(runtime.api(), BufReader::new(tokio::io::stdin())) => {
            let stats = stats?;
            tracing::info!(
                processed = stats.processed,
                failed = stats.failed,
                malformed = stats.malformed,
                "input closed"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    sweep.abort();
    Ok(())
}
