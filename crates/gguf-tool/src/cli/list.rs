use std::fs;
use std::path::{Path, PathBuf};

use gguf_format::{GGUFReader, KEY_NAME};

use crate::cli::ListArgs;
use crate::config::ToolConfig;
use crate::display::human_size;

/// One row of the catalogue.
#[derive(Debug)]
struct ModelRow {
    name: String,
    file_size: u64,
    summary: Result<Summary, String>,
}

#[derive(Debug, PartialEq)]
struct Summary {
    version: u32,
    tensors: usize,
    metadata: usize,
}

pub fn execute(args: ListArgs) -> anyhow::Result<()> {
    let search_dir = match args.dir {
        Some(dir) => dir,
        None => ToolConfig::load_or_default()?.models_dir,
    };
    if !search_dir.is_dir() {
        anyhow::bail!("{} is not a directory", search_dir.display());
    }

    let rows = scan(&search_dir)?;
    if rows.is_empty() {
        println!("No GGUF models found in {}", search_dir.display());
        return Ok(());
    }

    println!(
        "{:<40} {:<8} {:<8} {:<8} {:<10}",
        "Name", "Version", "Tensors", "KV", "Size"
    );
    println!("{}", "-".repeat(78));
    for row in &rows {
        let size = human_size(row.file_size);
        match &row.summary {
            Ok(s) => println!(
                "{:<40} {:<8} {:<8} {:<8} {:<10}",
                row.name, s.version, s.tensors, s.metadata, size
            ),
            Err(e) => println!("{:<40} error: {e}", row.name),
        }
    }
    println!("\n{} model(s) found.", rows.len());
    Ok(())
}

fn scan(dir: &Path) -> anyhow::Result<Vec<ModelRow>> {
    let mut files = Vec::new();
    walk_dir(dir, &mut files)?;
    files.sort();

    Ok(files.iter().map(PathBuf::as_path).map(summarize).collect())
}

fn summarize(path: &Path) -> ModelRow {
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    match GGUFReader::open(path) {
        Ok(reader) => ModelRow {
            name: reader
                .metadata()
                .get_str(KEY_NAME)
                .map(str::to_owned)
                .unwrap_or(stem),
            file_size,
            summary: Ok(Summary {
                version: reader.version(),
                tensors: reader.tensors().len(),
                metadata: reader.metadata().len(),
            }),
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable model");
            ModelRow {
                name: stem,
                file_size,
                summary: Err(e.to_string()),
            }
        }
    }
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("gguf") {
            out.push(path);
        }
    }
    Ok(())
}
