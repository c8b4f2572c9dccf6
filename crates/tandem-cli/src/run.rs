//! One-shot commands: `run` and `schema`.

use std::path::Path;

use anyhow::Context;
use tandem_core::{Dataset, EngineKind, SandboxConfig, Session};

use crate::colors;

/// Load a dataset file, naming the file in the error.
pub fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    Dataset::from_path(path).with_context(|| format!("failed to load dataset {}", path.display()))
}

/// Run `code` once. An error result is returned as an error, so the process
/// exits non-zero.
pub async fn execute(
    data: &Path,
    mode: EngineKind,
    code: &str,
    config: SandboxConfig,
) -> anyhow::Result<()> {
    let dataset = load_dataset(data)?;
    let mut session = Session::new(dataset, config);

    let output = session
        .run_code(mode, code)
        .await
        .map_err(|e| anyhow::anyhow!("{mode} run failed: {e}"))?;
    print_output(&output);
    Ok(())
}

/// Print `name: type` for every column, then the row count.
pub fn schema(data: &Path) -> anyhow::Result<()> {
    let dataset = load_dataset(data)?;
    print_schema(&dataset);
    Ok(())
}

pub fn print_schema(dataset: &Dataset) {
    for column in dataset.schema() {
        println!("{}: {}", column.name, column.ty);
    }
    println!(
        "{}{} rows ({}){}",
        colors::DIM,
        dataset.len(),
        dataset.version(),
        colors::RESET
    );
}

/// Output is printed as-is; a missing final newline is added.
pub fn print_output(output: &str) {
    print!("{output}");
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
}
