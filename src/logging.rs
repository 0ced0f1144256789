/// Initializes the logger with the `env_logger` crate.
///
/// Filtering is controlled through the `RUST_LOG` environment variable,
/// e.g. `RUST_LOG=rfm69_rs=debug`.
pub fn init_logger() {
    env_logger::init();
}
