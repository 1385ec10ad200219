use std::io::Write;

use anyhow::Context;
use gguf_format::{GGUFHeader, GGUFReader, MetadataStore, TensorDescriptor};
use serde::Serialize;

use crate::cli::ReadArgs;
use crate::config::ToolConfig;
use crate::display::{render_entry, shape_string};

const TENSOR_ROW_RULE: usize = 80;

pub fn execute(args: ReadArgs) -> anyhow::Result<()> {
    let path = &args.model_path;
    if !path.is_file() {
        anyhow::bail!(
            "The specified model path {} does not exist or is not a file.",
            path.display()
        );
    }

    let reader = GGUFReader::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        version = reader.version(),
        alignment = reader.alignment(),
        "opened model"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let report = Report {
            header: reader.header(),
            alignment: reader.alignment(),
            data_offset: reader.data_offset(),
            metadata: reader.metadata(),
            tensors: reader.list_tensors(),
        };
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
    } else {
        let cfg = ToolConfig::load_or_default()?;
        write_report(
            &mut out,
            reader.header(),
            reader.metadata(),
            reader.list_tensors(),
            cfg.array_preview,
        )?;
    }
    Ok(())
}

#[derive(Serialize)]
struct Report<'a> {
    header: &'a GGUFHeader,
    alignment: u32,
    data_offset: u64,
    metadata: &'a MetadataStore,
    tensors: &'a [TensorDescriptor],
}

/// Key/value listing, header fields first, followed by the tensor table.
fn write_report(
    out: &mut impl Write,
    header: &GGUFHeader,
    metadata: &MetadataStore,
    tensors: &[TensorDescriptor],
    preview: usize,
) -> std::io::Result<()> {
    let header_rows = [
        ("GGUF.version", header.version.to_string()),
        ("GGUF.tensor_count", header.tensor_count.to_string()),
        ("GGUF.kv_count", header.metadata_count.to_string()),
    ];

    writeln!(out, "Key-Value Pairs:")?;
    let width = header_rows
        .iter()
        .map(|(k, _)| k.len())
        .chain(metadata.keys().map(str::len))
        .max()
        .unwrap_or(0);
    for (key, value) in &header_rows {
        writeln!(out, "{key:width$} : {value}")?;
    }
    for (key, value) in metadata.iter() {
        writeln!(out, "{key:width$} : {}", render_entry(key, value, preview))?;
    }
    writeln!(out, "----")?;

    writeln!(out, "Tensors:")?;
    write_tensor_row(out, "Tensor Name", "Shape", "Size", "Quantization")?;
    writeln!(out, "{}", "-".repeat(TENSOR_ROW_RULE))?;
    for t in tensors {
        write_tensor_row(
            out,
            &t.name,
            &shape_string(&t.shape),
            &t.n_elements().to_string(),
            t.tensor_type.name(),
        )?;
    }
    Ok(())
}

fn write_tensor_row(
    out: &mut impl Write,
    name: &str,
    shape: &str,
    size: &str,
    quant: &str,
) -> std::io::Result<()> {
    writeln!(
        out,
        "{name:<30} | Shape: {shape:<15} | Size: {size:<12} | Quantization: {quant}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gguf_format::{TensorType, Value};

    #[test]
    fn report_layout() {
        let mut md = MetadataStore::new();
        md.insert("general.name", "xor-model").unwrap();
        md.insert("general.file_type", 0u32).unwrap();
        let tensors =
            vec![TensorDescriptor::new("fc1.weight", vec![2, 2], TensorType::F32).unwrap()];

        let header = GGUFHeader {
            version: 3,
            tensor_count: 1,
            metadata_count: 2,
        };

        let mut buf = Vec::new();
        write_report(&mut buf, &header, &md, &tensors, 8).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Key-Value Pairs:");
        assert_eq!(lines[1], "GGUF.version      : 3");
        assert_eq!(lines[2], "GGUF.tensor_count : 1");
        assert_eq!(lines[3], "GGUF.kv_count     : 2");
        assert_eq!(lines[4], "general.name      : xor-model");
        assert_eq!(lines[5], "general.file_type : 0 (F32)");
        assert_eq!(lines[6], "----");
        assert_eq!(lines[7], "Tensors:");
        assert!(lines[8].starts_with("Tensor Name                    | Shape: Shape"));
        assert_eq!(lines[9], "-".repeat(80));
        assert_eq!(
            lines[10],
            format!(
                "{:<30} | Shape: {:<15} | Size: {:<12} | Quantization: F32",
                "fc1.weight", "2x2", "4"
            )
        );
        assert_eq!(lines.len(), 11);
    }

    #[test]
    fn json_report_serializes() {
        let mut md = MetadataStore::new();
        md.insert("general.name", Value::from("m")).unwrap();
        let header = GGUFHeader {
            version: 3,
            tensor_count: 0,
            metadata_count: 1,
        };
        let report = Report {
            header: &header,
            alignment: 32,
            data_offset: 64,
            metadata: &md,
            tensors: &[],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["header"]["version"], 3);
        assert_eq!(json["header"]["metadata_count"], 1);
        assert!(json["metadata"]["general.name"].is_object());
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = ReadArgs {
            model_path: dir.path().join("absent.gguf"),
            json: false,
        };
        assert!(execute(args).is_err());
    }
}
