use std::sync::Arc;

use anyhow::{Context, anyhow};

use mailpilot::campaign::{Customer, TemplateSet, load_customers, unsent_recipients};
use mailpilot::channels::cli::{print_summary, render_threads};
use mailpilot::channels::{ConsoleApproval, EmailConfig, EmailProvider, MenuChoice};
use mailpilot::config::AppConfig;
use mailpilot::error::{ConfigError, Error};
use mailpilot::ledger::{Ledgers, StateStores, ThreadRecord};
use mailpilot::llm::create_provider;
use mailpilot::logging;
use mailpilot::pipeline::filter::SenderFilter;
use mailpilot::pipeline::{Orchestrator, OrchestratorDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env()?;
    let _log_guard = logging::init(&config.log_dir)
        .with_context(|| format!("creating log directory {}", config.log_dir.display()))?;

    let email_config = EmailConfig::from_env()?
        .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".to_string()))?;
    let own_address = email_config.from_address.clone();
    let llm = create_provider(&config.llm_config()?)?;

    let templates = match &config.templates_file {
        Some(path) => TemplateSet::load(path).await?,
        None => TemplateSet::builtin(),
    };
    let customers = read_customers(&config).await;

    // A corrupt ledger file stops the process here; nothing is overwritten.
    let mut ledgers = Ledgers::open(StateStores::json_dir(&config.data_dir))
        .await
        .with_context(|| format!("opening ledgers in {}", config.data_dir.display()))?;

    eprintln!("📬 MailPilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm.model_name());
    eprintln!("   Mailbox: {} ({})", own_address, email_config.imap_host);
    eprintln!("   Data: {}", config.data_dir.display());
    eprintln!("   Customers: {}", customers.len());
    eprintln!("   Active threads: {}", ledgers.threads().active_threads().len());

    let console = Arc::new(ConsoleApproval::new());
    let orchestrator = Orchestrator::new(
        OrchestratorDeps {
            mail: Arc::new(EmailProvider::new(email_config)),
            llm,
            approval: console.clone(),
        },
        config.send_policy(),
        SenderFilter::new(
            customers.iter().map(|c| c.email.clone()).collect(),
            Some(&own_address),
        ),
        config.run_settings(),
    );

    loop {
        match console.menu().await {
            MenuChoice::SendMarketing => {
                let Some(template) = templates.get(&config.campaign) else {
                    let known: Vec<&str> = templates.campaigns().collect();
                    eprintln!(
                        "Unknown campaign '{}'. Known: {}",
                        config.campaign,
                        known.join(", ")
                    );
                    continue;
                };
                let pending = unsent_recipients(&config.campaign, &customers, &ledgers.snapshot()).len();
                eprintln!("{pending} of {} customers not yet sent '{}'", customers.len(), config.campaign);
                let summary = orchestrator
                    .send_campaign(&mut ledgers, &config.campaign, template, &customers)
                    .await;
                report("Campaign run", summary)?;
            }
            MenuChoice::CheckInbox => {
                let summary = orchestrator.check_inbox(&mut ledgers).await;
                report("Inbox run", summary)?;
            }
            MenuChoice::ViewThreads => {
                let mut threads: Vec<&ThreadRecord> = ledgers.threads().active_threads();
                threads.sort_by_key(|t| std::cmp::Reverse(t.last_activity()));
                let rows: Vec<_> = threads.iter().map(|t| t.summary()).collect();
                println!("\n{}", render_threads(&rows));
            }
            MenuChoice::ResetScheduling => {
                let Some(input) = console.read_line("Thread id (or prefix): ").await else {
                    continue;
                };
                let Some(thread_id) = ledgers.threads().resolve_thread_id(&input).map(String::from)
                else {
                    eprintln!("No single thread matches '{input}'");
                    continue;
                };
                if let Some(previous) = ledgers.threads_mut().reset_scheduling(&thread_id) {
                    ledgers.flush().await?;
                    eprintln!("Scheduling for {thread_id} reset ({previous} → none)");
                }
            }
            MenuChoice::Exit => break,
        }
    }

    ledgers.flush().await?;
    eprintln!("Goodbye.");
    Ok(())
}

/// Customer list, or an empty list (and so an empty allowlist) if the file
/// cannot be read.
async fn read_customers(config: &AppConfig) -> Vec<Customer> {
    match load_customers(&config.customer_list).await {
        Ok(customers) => customers,
        Err(e) => {
            tracing::warn!(
                path = %config.customer_list.display(),
                error = %e,
                "Customer list unavailable; no senders will be answered"
            );
            Vec::new()
        }
    }
}

/// Print a run summary. Mail and LLM failures end the run, not the process;
/// store failures are fatal.
fn report(title: &str, result: Result<mailpilot::pipeline::RunSummary, Error>) -> anyhow::Result<()> {
    match result {
        Ok(summary) => {
            print_summary(title, &summary);
            Ok(())
        }
        Err(e @ (Error::Mail(_) | Error::Llm(_))) => {
            tracing::error!(error = %e, "{title} aborted");
            eprintln!("{title} aborted: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
