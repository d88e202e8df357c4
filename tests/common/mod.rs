//! Shared test diagnostics: a `tracing` subscriber driven by `RUST_LOG`,
//! matching the teacher's binary-vs-library split (the library only depends
//! on `tracing`; `tracing-subscriber` lives here, in dev-dependencies).

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
