use crate::cmd::{VersionArgs, APP_NAME};
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("{APP_NAME} {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: {APP_NAME}");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("PIPELINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "transport: {}",
        if cfg!(windows) { "named-pipe" } else { "unix-socket" }
    );
    println!("host: {}", pipelink_transport::local_host_name());
    println!("frame_chunk_size: {}", pipelink_frame::MAX_CHUNK_SIZE);
    println!("envelope_version: {}", pipelink_frame::ENVELOPE_VERSION);

    Ok(SUCCESS)
}
