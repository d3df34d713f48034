//! skylog-forms - aircraft identity form driver
//!
//! Opens an aircraft record, applies edits, runs a registry lookup and
//! reports (or resolves) the resulting conflicts. Also exposes the
//! registration autocomplete search.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use skylog_common::config::{CliOverrides, Settings};
use skylog_common::events::EventBus;
use skylog_forms::overlay::OverlayRecordStore;
use skylog_forms::reconcile::{aircraft_identity, CanadianRegistration, FieldOrigin};
use skylog_forms::services::{
    DebouncedSearch, HttpRecordClient, HttpRegistryClient, SearchOutcome,
};
use skylog_forms::{configure_schema, FetchReport, FormContext, FormSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skylog-forms")]
#[command(about = "Aircraft record forms with registry reconciliation")]
#[command(version)]
struct Args {
    /// Config file (default: <config dir>/skylog/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend record API base URL
    #[arg(long, global = true)]
    record_api: Option<String>,

    /// Registry API base URL
    #[arg(long, global = true)]
    registry_api: Option<String>,

    /// Device-local database path
    #[arg(long, global = true)]
    local_db: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up a registration and merge it into an aircraft record
    Lookup {
        /// Aircraft record id
        #[arg(long)]
        record: String,

        /// Registration mark (e.g. C-FABC)
        #[arg(long)]
        registration: String,

        /// Field edits as field=value; registry values never silently replace them
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,

        /// Replace conflicting user values with registry values
        #[arg(long, conflicts_with = "keep_mine")]
        accept_external: bool,

        /// Keep user values for every conflict
        #[arg(long)]
        keep_mine: bool,

        /// Save the record after reconciliation
        #[arg(long)]
        save: bool,
    },

    /// Autocomplete registration marks
    Search {
        prefix: String,
    },
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got {:?}", raw))?;
    if field.trim().is_empty() {
        return Err(format!("missing field name in {:?}", raw));
    }
    Ok((field.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::resolve(&CliOverrides {
        config_path: args.config.clone(),
        log_level: args.log_level.clone(),
        record_api_url: args.record_api.clone(),
        registry_api_url: args.registry_api.clone(),
        local_db_path: args.local_db.clone(),
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&settings.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting skylog-forms v{}", env!("CARGO_PKG_VERSION"));
    info!("Record API: {}", settings.record_api_url);
    info!("Registry API: {}", settings.registry_api_url);

    match args.command {
        Command::Lookup {
            record,
            registration,
            set,
            accept_external,
            keep_mine,
            save,
        } => {
            run_lookup(
                &settings,
                &record,
                &registration,
                &set,
                Resolution::from_flags(accept_external, keep_mine),
                save,
            )
            .await
        }
        Command::Search { prefix } => run_search(&settings, &prefix).await,
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    AcceptExternal,
    KeepMine,
    Report,
}

impl Resolution {
    fn from_flags(accept_external: bool, keep_mine: bool) -> Self {
        if accept_external {
            Resolution::AcceptExternal
        } else if keep_mine {
            Resolution::KeepMine
        } else {
            Resolution::Report
        }
    }
}

async fn run_lookup(
    settings: &Settings,
    record_id: &str,
    registration: &str,
    edits: &[(String, String)],
    resolution: Resolution,
    save: bool,
) -> Result<()> {
    let schema = Arc::new(configure_schema(aircraft_identity(), settings)?);

    let db = skylog_forms::db::init_database_pool(&settings.local_db_path).await?;
    let remote = Arc::new(HttpRecordClient::new(
        &settings.record_api_url,
        settings.request_timeout,
    )?);
    let registry = Arc::new(HttpRegistryClient::new(
        &settings.registry_api_url,
        settings.request_timeout,
    )?);

    let events = EventBus::new(100);
    let mut rx = events.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            tracing::debug!(event = event.event_type(), "Form event");
        }
    });

    let context = FormContext {
        records: Arc::new(OverlayRecordStore::new(remote, db, schema.clone())),
        registry,
        events,
    };
    let session = FormSession::open(context, schema, Arc::new(CanadianRegistration), record_id)
        .await
        .with_context(|| format!("Failed to open record {}", record_id))?;

    match reconcile_edits(&session, registration, edits, resolution).await? {
        FetchReport::Applied(outcome) => {
            println!("Registry data applied for {}", registration);
            for field in &outcome.changed {
                println!("  updated   {}", field);
            }
            for field in &outcome.conflicts {
                println!("  conflict  {}", field);
            }
        }
        FetchReport::Failed(reason) => {
            // Informational: the record can still be saved as entered
            println!("Registry lookup unsuccessful: {}", reason);
        }
        FetchReport::Stale | FetchReport::Cancelled => bail!("Lookup did not complete"),
    }

    let state = session.state().await;
    for (name, field) in &state.fields {
        let value = field
            .current_value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let marker = match field.origin {
            FieldOrigin::Unset => " ",
            FieldOrigin::External => "R",
            FieldOrigin::User => "U",
        };
        println!("{} {:<22} {}", marker, name, value);
    }
    let pending = session.conflicts().await;
    if !pending.is_empty() {
        println!("Unresolved conflicts: {}", pending.join(", "));
    }

    if save {
        session.save().await?;
        println!("Record {} saved", record_id);
    }

    session.close();
    event_log.abort();
    Ok(())
}

/// Look up `registration`, apply the user's edits and resolve conflicts
///
/// Edits only count as the user's own once a lookup has completed, so they
/// are applied after the first lookup. The same key is then fetched again:
/// every edit that disagrees with the registry comes back as a conflict and
/// is settled by `resolution`. Returns the report of the last lookup.
async fn reconcile_edits(
    session: &FormSession,
    registration: &str,
    edits: &[(String, String)],
    resolution: Resolution,
) -> Result<FetchReport> {
    let mut report = session
        .lookup(registration)
        .await
        .with_context(|| format!("Registration {:?} not accepted", registration))?
        .wait()
        .await;

    for (field, value) in edits {
        session
            .set_field(field, serde_json::Value::String(value.clone()))
            .await
            .with_context(|| format!("Rejected edit {}={}", field, value))?;
    }

    if !edits.is_empty() && matches!(report, FetchReport::Applied(_)) {
        report = session
            .lookup(registration)
            .await
            .with_context(|| format!("Registration {:?} not accepted", registration))?
            .wait()
            .await;
    }

    for field in session.conflicts().await {
        match resolution {
            Resolution::AcceptExternal => session.resolve_conflict(&field, true).await?,
            Resolution::KeepMine => session.resolve_conflict(&field, false).await?,
            Resolution::Report => {}
        }
    }

    Ok(report)
}

async fn run_search(settings: &Settings, prefix: &str) -> Result<()> {
    let registry = Arc::new(HttpRegistryClient::new(
        &settings.registry_api_url,
        settings.request_timeout,
    )?);
    let search = DebouncedSearch::new(registry, settings.search.clone());

    match search.search(prefix).await? {
        SearchOutcome::Completed(keys) => {
            for key in keys {
                println!("{}", key);
            }
        }
        SearchOutcome::Superseded => {}
    }
    Ok(())
}
