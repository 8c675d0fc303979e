use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("procbus {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: procbus");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("PROCBUS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "wire: max_frame={} header={} max_payload={}",
        procbus_frame::MAX_FRAME_SIZE,
        procbus_frame::HEADER_SIZE,
        procbus_frame::MAX_PAYLOAD
    );
    println!("default_addr: {}", procbus_transport::DEFAULT_BUS_ADDRESS);

    Ok(SUCCESS)
}
