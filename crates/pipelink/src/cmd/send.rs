use crate::cmd::{
    build_service, load_config, parse_json, parse_timeout, runtime, CallArgs, GlobalArgs,
};
use crate::exit::{peer_error, CliResult, SUCCESS};

pub fn run(args: CallArgs, global: &GlobalArgs) -> CliResult<i32> {
    let mut config = load_config(global, None)?;
    if let Some(raw) = &args.timeout {
        config.send_timeout = parse_timeout(raw)?;
    }
    let payload = parse_json(&args.json)?;
    let service = build_service(config)?;

    let runtime = runtime()?;
    runtime
        .block_on(async {
            let sent = service.send(&args.host, &args.name, &payload).await;
            service.shutdown().await;
            sent
        })
        .map_err(|err| peer_error("send failed", err))?;

    tracing::info!(endpoint = %format!("{}@{}", args.name, args.host), "delivered");
    Ok(SUCCESS)
}
