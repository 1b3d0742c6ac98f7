use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{error, info};

use autoreply::analysis::TextAnalyticsClient;
use autoreply::config::AutoreplyConfig;
use autoreply::dispatch::{DispatchScheduler, UniformDelay};
use autoreply::mail::{ImapMailStore, SmtpMailSender};
use autoreply::monitor::{MailboxMonitor, MonitorConfig};
use autoreply::reply::{ReplyGenerator, ReplyTemplates, SenderIdentity};
use autoreply::Error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AutoreplyConfig::from_env().context("Failed to load configuration")?;
    let responder = &config.responder;
    info!(
        host = %config.mailbox.host,
        imap_port = config.mailbox.imap_port,
        smtp_port = config.mailbox.smtp_port,
        address = %config.mailbox.sender_address,
        min_delay_secs = responder.min_delay.as_secs(),
        max_delay_secs = responder.max_delay.as_secs(),
        seeded = responder.rng_seed.is_some(),
        "Configuration loaded"
    );

    // One seed drives every random choice so a seeded run is reproducible.
    let mut seeder = match responder.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut monitor = build_monitor(&config, &mut seeder).context("Failed to build monitor")?;

    tokio::select! {
        result = monitor.run() => {
            let Err(e) = result;
            error!(error = ?e, "Mailbox monitor stopped: {e}");
            Err(Error::from(e).into())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

/// Wire the IMAP store, SMTP sender, analysis client and scheduler together.
fn build_monitor(
    config: &AutoreplyConfig,
    seeder: &mut StdRng,
) -> autoreply::Result<MailboxMonitor<ImapMailStore>> {
    let responder = &config.responder;
    let generator_rng = StdRng::seed_from_u64(seeder.next_u64());
    let delay_rng = StdRng::seed_from_u64(seeder.next_u64());

    let analysis = TextAnalyticsClient::new(&config.analysis)?;
    let sender = SmtpMailSender::new(&config.mailbox);
    let generator = ReplyGenerator::new(
        ReplyTemplates::with_closing_name(responder.closing_name.clone()),
        generator_rng,
    );
    let delays = UniformDelay::new(responder.min_delay, responder.max_delay, delay_rng);
    let identity = SenderIdentity::new(
        config.mailbox.sender_name.clone(),
        config.mailbox.sender_address.clone(),
    );

    let scheduler = DispatchScheduler::new(
        Arc::new(analysis),
        Arc::new(sender),
        Arc::new(generator),
        Arc::new(delays),
        identity,
    );
    let store = ImapMailStore::new(&config.mailbox, responder.idle_timeout);
    Ok(MailboxMonitor::new(store, scheduler, MonitorConfig::from(responder)))
}
