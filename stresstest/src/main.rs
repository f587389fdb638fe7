//! Load tester for the statement protocol of Trino and Presto.
//!
//! See [`gateway_stresstest::cli`] for the available commands.

fn main() -> anyhow::Result<()> {
    gateway_stresstest::cli::execute()
}
