//! Binary entrypoint for `coral-server`.

mod app;
mod blocking;
mod ingress;
mod reactor;

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = app::run() {
        eprintln!("failed to start coral-server: {err}");
        std::process::exit(1);
    }
}
