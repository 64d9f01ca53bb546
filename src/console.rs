//! Console session driver.
//!
//! Runs one session per client connection:
//!
//! ```text
//! run_session
//!     ├─► input task    inbound text → parse_client_message → send_input (in order)
//!     └─► tick loop     interval(tick)
//!             ├─► Announcing: one status line per tick
//!             └─► Live:       screenshot → screen frame (nothing when absent)
//! ```
//!
//! The driver is transport-agnostic: the WebSocket route in [`crate::server`]
//! adapts a socket into the sink/stream pair, and tests drive it with
//! channels.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use statig::prelude::*;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::protocol::{ServerMessage, parse_client_message};
use crate::state_machine::console_sm::{ConsoleSession, SessionEvent, is_live, pending_stage};
use crate::vm::ControlPlane;

/// Status lines sent before the first frame.
pub const STATUS_STAGE_COUNT: usize = 5;

/// The status lines announced to a client opening `vm_name`'s console, in
/// order.
pub fn status_stages(vm_name: &str) -> [String; STATUS_STAGE_COUNT] {
    [
        "Opening console channel...".to_string(),
        format!("Locating instance {vm_name}..."),
        "Checking virtualization rights...".to_string(),
        "Negotiating display stream...".to_string(),
        format!("Connected to display of {vm_name}"),
    ]
}

/// Drive a console session until the client goes away.
///
/// Returns when `inbound` ends or a send on `outbound` fails. Input already
/// being injected when the session ends is abandoned.
pub async fn run_session<O, I>(
    plane: Arc<ControlPlane>,
    vm_name: String,
    tick: Duration,
    outbound: O,
    inbound: I,
) where
    O: Sink<ServerMessage> + Send,
    I: Stream<Item = String> + Send + 'static,
{
    info!(vm = %vm_name, "Console session opened");

    let (closed_tx, mut closed_rx) = oneshot::channel::<()>();
    let input_task = tokio::spawn(forward_input(
        Arc::clone(&plane),
        vm_name.clone(),
        inbound,
        closed_tx,
    ));

    let stages = status_stages(&vm_name);
    let mut sm = ConsoleSession::new(vm_name.clone(), STATUS_STAGE_COUNT).state_machine();
    sm.handle(&SessionEvent::Opened);

    let mut outbound = pin!(outbound);
    let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut closed_rx => {
                debug!(vm = %vm_name, "Console client disconnected");
                break;
            }
            _ = ticker.tick() => {
                let due = pending_stage(sm.state());
                sm.handle(&SessionEvent::Tick);

                if let Some(line) = due.and_then(|stage| stages.get(stage)) {
                    if outbound.send(ServerMessage::Status(line.clone())).await.is_err() {
                        debug!(vm = %vm_name, "Console send failed");
                        break;
                    }
                }

                if is_live(sm.state()) {
                    if let Some(frame) = plane.screenshot(&vm_name).await {
                        if outbound.send(ServerMessage::Screen(frame)).await.is_err() {
                            debug!(vm = %vm_name, "Console send failed");
                            break;
                        }
                    }
                }
            }
        }
    }

    sm.handle(&SessionEvent::Disconnected);
    input_task.abort();
    let _ = outbound.close().await;

    info!(vm = %vm_name, "Console session closed");
}

/// Forward input messages in arrival order; signal `closed` when the client's
/// stream ends.
async fn forward_input<I>(
    plane: Arc<ControlPlane>,
    vm_name: String,
    inbound: I,
    closed: oneshot::Sender<()>,
) where
    I: Stream<Item = String> + Send + 'static,
{
    let mut inbound = pin!(inbound);
    while let Some(text) = inbound.next().await {
        match parse_client_message(&text) {
            Some(input) => plane.send_input(&vm_name, &input).await,
            None => debug!(vm = %vm_name, "Ignoring console message"),
        }
    }
    let _ = closed.send(());
}
