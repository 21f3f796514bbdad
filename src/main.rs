use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, LevelFilter};
use toml::Table;

use simt_memsim::sim::config::{Config, MemConfig, SimConfig};
use simt_memsim::sim::top::Sim;
use simt_memsim::timeflow::dcache::CacheConfig;
use simt_memsim::timeflow::lsu::LsuConfig;
use simt_memsim::traffic::config::TrafficConfig;

#[derive(Parser)]
#[command(version, about)]
struct MemsimArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help = "Override instructions per traffic pattern")]
    num_instrs: Option<u32>,
    #[arg(long, help = "Override the store data seed")]
    seed: Option<u64>,
    #[arg(long, help = "Write a CSV trace of cache events")]
    trace: Option<PathBuf>,
    #[arg(long, help = "Write the final statistics as JSON")]
    stats_json: Option<PathBuf>,
}

fn level_filter(level: u64) -> LevelFilter {
    match level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

fn run(argv: MemsimArgs) -> anyhow::Result<()> {
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;

    let mut sim_config = SimConfig::from_section(config_table.get("sim"))?;
    let cache_config = CacheConfig::from_section(config_table.get("dcache"))?;
    let lsu_config = LsuConfig::from_section(config_table.get("lsu"))?;
    let mem_config = MemConfig::from_section(config_table.get("mem"))?;
    let mut traffic_config = TrafficConfig::from_section(config_table.get("traffic"))?;

    // override toml configs with argv
    sim_config.log_level = argv.log.unwrap_or(sim_config.log_level);
    sim_config.trace = argv.trace.or(sim_config.trace);
    sim_config.stats_json = argv.stats_json.or(sim_config.stats_json);
    traffic_config.instrs_per_pattern = argv.num_instrs.unwrap_or(traffic_config.instrs_per_pattern);
    traffic_config.seed = argv.seed.unwrap_or(traffic_config.seed);

    log::set_max_level(level_filter(sim_config.log_level));

    let stats_path = sim_config.stats_json.clone();
    let mut sim = Sim::new(sim_config, cache_config, lsu_config, mem_config, &traffic_config)?;
    let report = sim.simulate()?;

    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");
    if let Some(path) = stats_path {
        fs::write(&path, &json)
            .with_context(|| format!("cannot write stats to {}", path.display()))?;
    }
    Ok(())
}

pub fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    match run(MemsimArgs::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
