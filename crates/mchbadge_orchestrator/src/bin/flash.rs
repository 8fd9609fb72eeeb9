use mchbadge_orchestrator::{flash, resolve_bitstream, OrchestratorConfig};

fn usage() -> ! {
    eprintln!(
        "Usage: flash <badge_config.toml> <bitstream.bin | build_name>\n\
         \n\
         Examples:\n\
           cargo run -p mchbadge_orchestrator --bin flash -- config/badge_serial.toml build/top.bin\n\
           cargo run -p mchbadge_orchestrator --bin flash -- config/badge_serial.toml top\n\
         \n\
         Notes:\n\
         - A build name is looked up as <artifacts.build_dir>/<name>.bin.\n\
         - Set RUST_LOG=debug to trace every chunk."
    );
    std::process::exit(2)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| usage());
    let target = args.next().unwrap_or_else(|| usage());
    if args.next().is_some() {
        usage();
    }

    let config = OrchestratorConfig::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1)
    });

    let bitstream = resolve_bitstream(&config, &target).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1)
    });

    match flash(&config, &bitstream) {
        Ok(report) => println!(
            "Loaded {} bytes onto the badge in {} chunks",
            report.payload_len, report.chunks
        ),
        Err(e) => {
            eprintln!("Flash failed: {e}");
            std::process::exit(1);
        }
    }
}
