//! `glyph-session` command line: interactive editing and template lookup

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use glyph_history::{DocumentSnapshot, SessionId};
use glyph_session::{
    telemetry, HttpModificationService, ModificationSession, SessionConfig, SessionNotice,
    SubmitOutcome, ValidationNotice,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const HELP: &str = "Commands: :undo :redo :save <name> :versions :restore <id> :retry :show :quit\n\
                    Anything else is sent as an instruction. Ctrl-C cancels a running edit.";

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file");

    Command::new("glyph-session")
        .version(glyph_session::VERSION)
        .about("Interactive instruction-driven document editing")
        .arg_required_else_help(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("edit")
                .about("Edit a document interactively")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("HTML document to edit"),
                )
                .arg(
                    Arg::new("session")
                        .long("session")
                        .required(true)
                        .help("Server-side session ID"),
                )
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("templates")
                .about("List available templates")
                .arg(Arg::new("category").long("category").help("Filter by category"))
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("schema")
                .about("Print a template's data schema")
                .arg(Arg::new("template").required(true).help("Template ID"))
                .arg(config_arg),
        )
}

fn load_config(matches: &ArgMatches) -> Result<SessionConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if config.api_key.is_none() {
        config.api_key = std::env::var("GLYPH_API_KEY").ok();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    telemetry::init_tracing("warn,glyph_session=info", matches.get_flag("json-logs"))
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    match matches.subcommand() {
        Some(("edit", sub)) => edit(sub).await,
        Some(("templates", sub)) => {
            let client = HttpModificationService::from_config(&load_config(sub)?);
            let category = sub.get_one::<String>("category").map(String::as_str);
            for template in client.templates(category).await? {
                println!(
                    "{:<24} {:<12} {}",
                    template.id,
                    template.category.unwrap_or_default(),
                    template.name
                );
            }
            Ok(())
        }
        Some(("schema", sub)) => {
            let client = HttpModificationService::from_config(&load_config(sub)?);
            let template = sub
                .get_one::<String>("template")
                .context("template is required")?;
            let schema = client.template_schema(template).await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        _ => bail!("unknown command"),
    }
}

async fn edit(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let file = matches.get_one::<PathBuf>("file").context("--file is required")?;
    let session_id = matches
        .get_one::<String>("session")
        .context("--session is required")?;

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let service = Arc::new(HttpModificationService::from_config(&config));
    let session = ModificationSession::builder(
        DocumentSnapshot::new(content, SessionId::new(session_id.as_str())),
        service,
    )
    .config(config)
    .build();

    let mut notices = session.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => print_notice(&notice),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    eprintln!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            (":quit" | ":q", _) => break,
            (":help", _) => eprintln!("{HELP}"),
            (":show", _) => println!("{}", session.document().content),
            (":undo", _) => report(session.undo().map(|_| "Undone")),
            (":redo", _) => report(session.redo().map(|_| "Redone")),
            (":save", name) => report(
                session
                    .save_version(name)
                    .map(|v| format!("Saved '{}' ({})", v.name, v.id)),
            ),
            (":versions", _) => {
                for version in session.versions() {
                    println!("{}  {}  {}", version.id, version.timestamp, version.name);
                }
            }
            (":restore", id) => match id.trim().parse() {
                Ok(id) => report(session.restore_version(id).map(|_| "Restored")),
                Err(_) => eprintln!("Not a version ID: {id}"),
            },
            (":retry", _) => {
                let result = session.retry_last().await;
                match result {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => eprintln!("{e}"),
                }
            }
            _ => {
                let submit = session.submit(line);
                tokio::pin!(submit);
                let result = loop {
                    tokio::select! {
                        result = &mut submit => break result,
                        _ = tokio::signal::ctrl_c() => {
                            session.cancel();
                        }
                    }
                };
                match result {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => eprintln!("{}", e.user_message()),
                }
            }
        }
    }

    session.stop_validation();
    Ok(())
}

fn report<T: std::fmt::Display, E: std::fmt::Display>(result: std::result::Result<T, E>) {
    match result {
        Ok(message) => eprintln!("{message}"),
        Err(e) => eprintln!("{e}"),
    }
}

fn print_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Instant { rule, .. } => eprintln!("Applied instantly ({rule})"),
        SubmitOutcome::Modified {
            changed_regions,
            attempts,
            ..
        } => {
            let regions: Vec<_> = changed_regions.iter().map(String::as_str).collect();
            eprintln!("Updated after {attempts} attempt(s); changed: {}", regions.join(", "));
        }
        SubmitOutcome::Busy => eprintln!("Still working on the previous instruction"),
        SubmitOutcome::Cancelled => eprintln!("Cancelled"),
    }
}

fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::SlowResponse { elapsed } => {
            eprintln!("Still working ({}s)...", elapsed.as_secs());
        }
        SessionNotice::RetryScheduled {
            attempt, delay, class, ..
        } => eprintln!("{class} error, retry {attempt} in {}s", delay.as_secs()),
        SessionNotice::SessionRefreshed { session_id } => {
            eprintln!("Session refreshed ({session_id})");
        }
        SessionNotice::Warning { message } | SessionNotice::StorageDegraded { message } => {
            eprintln!("Warning: {message}");
        }
        SessionNotice::Failed { suggestions, .. } if !suggestions.is_empty() => {
            eprintln!("Try instead: {}", suggestions.join(" | "));
        }
        SessionNotice::Validation(ValidationNotice::IssuesFound(report)) => {
            eprintln!(
                "Validation found {} critical issue(s){}",
                report.critical_count,
                if report.has_auto_fix { "; auto-fix available" } else { "" }
            );
        }
        SessionNotice::Validation(ValidationNotice::Passed { warnings }) => {
            eprintln!("Validation passed ({warnings} warning(s))");
        }
        SessionNotice::Validation(ValidationNotice::StillVerifying) => {
            eprintln!("Validation is still running");
        }
        SessionNotice::FirstSuccess => eprintln!("First edit applied. Use :undo to step back."),
        _ => {}
    }
}
