//! Runs one council election and prints the president.

use std::process;

use council::behavior::BehaviorRegistry;
use council::election::{ElectionConfig, ElectionDriver};
use council::node::NodeConfig;
use council::topology::{load_topology, setup_nodes, Topology};

struct Args {
    topology_path: Option<String>,
    simultaneous: bool,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let Args {
        topology_path,
        simultaneous,
    } = parse_args();

    let topology = match topology_path {
        Some(path) => match load_topology(&path) {
            Ok(topology) => topology,
            Err(err) => {
                log::error!("could not load {}: {}", path, err);
                process::exit(1);
            }
        },
        None => Topology::local(),
    };

    let nodes = match setup_nodes(&topology, &BehaviorRegistry::with_defaults(), &NodeConfig::default()) {
        Ok(nodes) => nodes,
        Err(err) => {
            log::error!("could not set up the council: {}", err);
            process::exit(1);
        }
    };

    let driver = ElectionDriver::new(nodes, ElectionConfig::default());
    let started = if simultaneous {
        driver.run_election_with_simultaneous_proposals()
    } else {
        driver.run_election()
    };
    if let Err(err) = started {
        log::error!("could not run the election: {}", err);
        process::exit(1);
    }

    match driver.wait_for_election_to_end() {
        Ok(president) => println!("{}", president),
        Err(err) => {
            log::error!("{}", err);
            process::exit(1);
        }
    }
}

fn parse_args() -> Args {
    let mut args = std::env::args();
    let executable_name = args.next().unwrap_or_default();

    let mut parsed = Args {
        topology_path: None,
        simultaneous: false,
    };

    for arg in args {
        if arg == "-s" || arg == "--simultaneous" {
            parsed.simultaneous = true;
        } else if arg.starts_with('-') || parsed.topology_path.is_some() {
            usage(&executable_name);
        } else {
            parsed.topology_path = Some(arg);
        }
    }

    parsed
}

fn usage(executable_name: &str) -> ! {
    eprint!(
        concat!(
            "Usage: {} [-h] [-s] [topology]\n",
            "\n",
            "-s, --simultaneous - let every proposer start a round at once\n",
            "topology           - a file of `address,port,profile,id,role` lines;\n",
            "                     defaults to three instant members on 127.0.0.1:4570-4572\n",
        ),
        executable_name
    );
    process::exit(1)
}
