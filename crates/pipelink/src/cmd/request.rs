use std::time::Instant;

use crate::cmd::{
    build_service, load_config, parse_json, parse_timeout, runtime, CallArgs, GlobalArgs,
};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: CallArgs, global: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    let config = load_config(global, None)?;
    let payload = parse_json(&args.json)?;
    let timeout = match &args.timeout {
        Some(raw) => parse_timeout(raw)?,
        None => config.send_timeout,
    };
    let service = build_service(config)?;

    let runtime = runtime()?;
    let started = Instant::now();
    let result = runtime.block_on(async {
        let reply = service
            .request_with_timeout(&args.host, &args.name, &payload, timeout)
            .await;
        service.shutdown().await;
        reply
    });
    let value = result.map_err(|err| peer_error("request failed", err))?;

    let endpoint = format!("{}@{}", args.name, args.host);
    print_reply(&endpoint, &value, started.elapsed().as_millis(), format);
    Ok(SUCCESS)
}
