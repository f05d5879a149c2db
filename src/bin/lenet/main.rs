use burn_mnist_nets::backend::{MainAutoBackend, MainBackend};
use burn_mnist_nets::cli::AppArgs;
use burn_mnist_nets::launch::launch;

mod model;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_args = AppArgs::parse(std::env!("CARGO_BIN_NAME"))?;
    launch::<MainBackend, MainAutoBackend, _>(
        &app_args,
        model::model_config,
        model::training_config,
    )
}
