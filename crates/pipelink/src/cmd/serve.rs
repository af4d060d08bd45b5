use pipelink_peer::{HandlerError, HandlerResult, PeerEvent, RequestContext, ServiceConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::cmd::{build_service, load_config, runtime, GlobalArgs, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};

/// Request understood by the demo handler.
#[derive(Debug, Deserialize)]
struct DemoRequest {
    op: String,
    #[serde(default)]
    data: Value,
    code: Option<i32>,
    message: Option<String>,
}

pub fn run(args: ServeArgs, global: &GlobalArgs) -> CliResult<i32> {
    let config = load_config(global, args.name.as_deref())?;
    let stop = CancellationToken::new();
    install_ctrlc_handler(stop.clone())?;

    let runtime = runtime()?;
    runtime.block_on(serve(config, stop))
}

async fn serve(config: ServiceConfig, stop: CancellationToken) -> CliResult<i32> {
    let service = build_service(config)?;
    service
        .start(demo_handler)
        .map_err(|err| peer_error("listen failed", err))?;
    let endpoint = service
        .local_endpoint()
        .map_err(|err| peer_error("listen failed", err))?;
    tracing::info!(endpoint = %endpoint, "serving demo handler, Ctrl-C to stop");

    let mut events = service.subscribe();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "peer events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.shutdown().await;
    Ok(SUCCESS)
}

async fn demo_handler(ctx: RequestContext) -> HandlerResult {
    let request: DemoRequest = ctx.json()?;
    if request.op == "whoami" {
        let peer = ctx.peer();
        return Ok(Some(json!({
            "host": peer.host_name,
            "app": peer.app_name,
            "version": peer.app_version,
            "pipe": peer.pipe_name,
        })));
    }
    respond(request)
}

fn respond(request: DemoRequest) -> HandlerResult {
    match request.op.as_str() {
        "echo" => Ok(Some(request.data)),
        "fail" => Err(HandlerError::new(
            request.code.unwrap_or(pipelink_frame::CODE_INTERNAL_ERROR),
            request.message.unwrap_or_else(|| "failed".to_string()),
        )),
        other => Err(HandlerError::bad_request(format!("unknown op '{other}'"))),
    }
}

fn log_event(event: &PeerEvent) {
    match event {
        PeerEvent::PeerConnected { peer } => tracing::info!(peer = %peer, "peer connected"),
        PeerEvent::PeerDisconnected { peer } => {
            tracing::info!(peer = %peer, "peer disconnected")
        }
        PeerEvent::ChannelConnected { peer, channel_id }
        | PeerEvent::ChannelClosed { peer, channel_id } => {
            tracing::debug!(peer = %peer, channel = channel_id, ?event, "channel event")
        }
    }
}

fn install_ctrlc_handler(stop: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || stop.cancel())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
