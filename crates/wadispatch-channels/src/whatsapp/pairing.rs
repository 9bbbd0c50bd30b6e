//! QR rendering and the interactive pairing flow that produces credentials.

use super::bot::{self, Link, LinkState};
use super::session::encode_session;
use crate::whatsapp_store::SqlxWhatsAppStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use wadispatch_core::error::DispatchError;

/// How long to wait for the phone to scan a QR code.
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(180);

/// Post-connect grace so the library finishes persisting fresh keys.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Render a QR code for terminal display using Unicode half-blocks.
///
/// Two module rows share one text line, so the code is about half as tall
/// as a one-character-per-module rendering.
pub fn render_qr_terminal(qr_data: &str) -> Result<String, DispatchError> {
    use qrcode::{Color, EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| DispatchError::Transport(format!("QR generation failed: {e}")))?;

    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2));
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Pair a new linked device and return its credential blob as JSON text.
///
/// Each QR code WhatsApp rotates in is handed to `on_qr`. The scratch
/// session directory is removed whether pairing succeeds or not.
pub async fn pair<F>(sessions_dir: &Path, mut on_qr: F) -> Result<String, DispatchError>
where
    F: FnMut(&str),
{
    let work_dir = sessions_dir.join(format!("pair-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&work_dir)?;

    let result = run_pairing(&work_dir, &mut on_qr).await;
    if let Err(e) = std::fs::remove_dir_all(&work_dir) {
        tracing::warn!("failed to remove pairing dir {}: {e}", work_dir.display());
    }
    result
}

async fn run_pairing<F>(work_dir: &Path, on_qr: &mut F) -> Result<String, DispatchError>
where
    F: FnMut(&str),
{
    let store = Arc::new(
        SqlxWhatsAppStore::open(&work_dir.join("whatsapp.db"))
            .await
            .map_err(|e| DispatchError::Transport(format!("whatsapp store init failed: {e}")))?,
    );

    let (qr_tx, mut qr_rx) = mpsc::channel::<String>(4);
    let link = bot::launch(store.clone(), Some(qr_tx)).await?;

    if let Err(e) = await_scan(&link, &mut qr_rx, on_qr).await {
        link.shutdown().await;
        return Err(e);
    }

    info!("WhatsApp paired, exporting session");
    tokio::time::sleep(SETTLE_DELAY).await;
    // Export before shutdown closes the pool.
    let snapshot = store.snapshot(&work_dir.join("snapshot.db")).await;
    link.shutdown().await;

    let snapshot =
        snapshot.map_err(|e| DispatchError::Transport(format!("session export failed: {e}")))?;
    encode_session(&snapshot)
}

/// Forward QR codes until the phone links the device or pairing fails.
async fn await_scan<F>(
    link: &Link,
    qr_rx: &mut mpsc::Receiver<String>,
    on_qr: &mut F,
) -> Result<(), DispatchError>
where
    F: FnMut(&str),
{
    let mut state = link.state_rx.clone();

    let deadline = tokio::time::sleep(PAIRING_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(code) = qr_rx.recv() => on_qr(&code),
            changed = state.changed() => {
                if changed.is_err() {
                    return Err(DispatchError::Transport("WhatsApp bot stopped during pairing".into()));
                }
                let current = *state.borrow();
                match current {
                    LinkState::Connected => return Ok(()),
                    LinkState::LoggedOut | LinkState::Closed => {
                        return Err(DispatchError::Transport("pairing was rejected".into()));
                    }
                    _ => {}
                }
            }
            _ = &mut deadline => {
                return Err(DispatchError::Transport(format!(
                    "no QR scan within {}s", PAIRING_TIMEOUT.as_secs()
                )));
            }
        }
    }
}
