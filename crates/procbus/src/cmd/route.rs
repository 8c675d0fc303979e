use procbus::BusConfig;
use procbus_routing::{Routing, RoutingTable};

use crate::cmd::RouteArgs;
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::output::{print_routes, print_rules, OutputFormat, RouteOutput};

pub fn run(args: RouteArgs, format: OutputFormat) -> CliResult<i32> {
    let config = BusConfig::load(&args.config).map_err(|err| {
        config_error(&format!("failed to load {}", args.config.display()), err)
    })?;
    let table = RoutingTable::from_update(&config.routing);

    if args.destinations.is_empty() {
        print_rules(&table.rules(), format);
        return Ok(SUCCESS);
    }

    let routes: Vec<RouteOutput> = args
        .destinations
        .into_iter()
        .map(|destination| RouteOutput {
            targets: table.route(&destination),
            destination,
        })
        .collect();
    print_routes(&routes, format);
    Ok(SUCCESS)
}
