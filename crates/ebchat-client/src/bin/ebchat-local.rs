//! Local sandbox: one user chatting with the assistant over an in-process
//! realtime server, with profiles and uploads on disk.
//!
//! ```text
//! ebchat-local <uid>
//! ```
//!
//! Every line read from stdin is sent to the assistant; the conversation is
//! printed after each reply. EOF signs out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use ebchat_client::{
    init_tracing, Backends, ClientConfig, ConversationView, LocalIdentity, NoticeSink,
    ProfileSetup, SessionManager,
};
use ebchat_shared::UserId;
use ebchat_store::RealtimeServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    init_tracing(&config);
    info!(?config, "Loaded configuration");

    let Some(uid) = std::env::args().nth(1) else {
        bail!("usage: ebchat-local <uid>");
    };
    let uid = UserId::new(uid).context("invalid user id")?;

    let server = RealtimeServer::new();
    let backends = Backends::open_local(&config, Arc::new(server.connect()), None).await?;

    let (notices, mut notice_rx) = NoticeSink::channel();
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            eprintln!("[{}] {}", if notice.is_error() { "error" } else { "info" }, notice.text());
        }
    });

    let identity = Arc::new(LocalIdentity::new());
    let manager = SessionManager::start(identity.clone(), backends, Arc::new(config), notices);
    let mut sessions = manager.watch();

    identity.sign_in(uid.clone(), None);
    let session = tokio::time::timeout(Duration::from_secs(5), sessions.wait_for(Option::is_some))
        .await
        .context("sign-in timed out")??
        .clone()
        .context("session vanished")?;

    if session.needs_profile_setup() {
        session
            .ctx
            .complete_profile_setup(ProfileSetup {
                name: uid.to_string(),
                ..ProfileSetup::default()
            })
            .await?;
    }

    let view = ConversationView::open(session.ctx.clone(), UserId::assistant());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let sent = match view.send(&line, None).await {
            Ok(sent) => sent,
            Err(e) => {
                eprintln!("not sent: {e}");
                continue;
            }
        };
        if let Some(reply) = sent.reply {
            reply.await?;
        }
        // Let the listener deliver the reply before printing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        for message in view.messages() {
            println!("{:>20} | {}", message.sender_id, message.text);
        }
    }

    view.close();
    identity.sign_out();
    tokio::time::timeout(Duration::from_secs(5), sessions.wait_for(Option::is_none))
        .await
        .context("sign-out timed out")??;
    info!("Signed out");
    Ok(())
}
