use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use castbridge::{Caster, Config};
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "castbridge-server",
    about = "RTSP publish ingest bridge — re-muxes incoming RTSP/RTP to outbound RTMP"
)]
struct Args {
    /// Path to a TOML config file. CLI flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// RTSP listen address (host:port).
    #[arg(long, short)]
    bind: Option<String>,

    /// Outbound RTMP URL template, with `[app]`/`[stream]` placeholders.
    #[arg(long)]
    output: Option<String>,
}

fn load_config(args: &Args) -> Config {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read config file {}: {e}", path.display()));
            Config::from_toml_str(&raw)
                .unwrap_or_else(|e| panic!("invalid config file {}: {e}", path.display()))
        }
        None => Config::default(),
    };

    if let Some(bind) = &args.bind {
        config.rtsp_listen_addr = bind.clone();
    }
    if let Some(output) = &args.output {
        config.output_url_template = output.clone();
    }
    config
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(&args);
    let listen_addr = config.rtsp_listen_addr.clone();

    let caster = Arc::new(Caster::new(&config));
    if let Err(e) = caster.start() {
        eprintln!("failed to start caster: {e}");
        std::process::exit(1);
    }

    println!("castbridge listening on {listen_addr} — press Enter to stop");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    caster.stop();
}
