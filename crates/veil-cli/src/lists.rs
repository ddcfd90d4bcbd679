use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use veil_compiler::{compile_filter_lists, read_compiled, CompileReport};
use veil_core::{DomainResolver, EngineBuilder, EngineConfig, FilteringEngine};

/// Where the engine's inputs come from.
pub struct EngineSource<'a> {
    pub compiled: &'a str,
    pub dynamic_rules: Option<&'a str>,
    pub psl: Option<&'a str>,
    pub config: Option<&'a str>,
}

pub fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load_from_file(Path::new(path)).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

pub fn compile_files(inputs: &[String], verbose: bool) -> Result<(String, CompileReport, f64), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut texts = Vec::with_capacity(inputs.len());
    for (list_id, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        if verbose {
            println!(
                "  [{}] {} - {} lines",
                list_id,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                content.lines().count()
            );
        }
        texts.push(content);
    }

    let (compiled, report) = compile_filter_lists(&texts);
    Ok((compiled, report, start.elapsed().as_secs_f64() * 1000.0))
}

pub fn write_file(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, content).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}

pub fn read_file(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))
}

/// Build an engine from a compiled file plus optional dynamic rules and
/// public suffix list.
pub fn load_engine(source: &EngineSource<'_>) -> Result<FilteringEngine, String> {
    let config = load_config(source.config)?;
    let resolver = match source.psl {
        Some(path) => DomainResolver::from_list_text(&read_file(path)?).map_err(|e| e.to_string())?,
        None => DomainResolver::new(),
    };

    let compiled = read_file(source.compiled)?;
    let mut builder = EngineBuilder::new(config, Arc::new(resolver));
    read_compiled(&compiled, |rec| {
        builder.add_record(&rec);
    })
    .map_err(|e| format!("Invalid compiled file '{}': {}", source.compiled, e))?;

    if let Some(path) = source.dynamic_rules {
        let count = builder
            .add_dynamic_rules(&read_file(path)?)
            .map_err(|e| format!("Invalid rules in '{}': {}", path, e))?;
        log::info!("loaded {} dynamic rules from {}", count, path);
    }

    Ok(builder.build())
}
