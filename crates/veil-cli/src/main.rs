//! Veil CLI
//!
//! Compiles filter lists and queries the resulting engine from the shell.

mod bench;
mod lists;

use std::path::Path;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use lists::EngineSource;
use veil_compiler::read_compiled;

#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Veil filter list compiler and tools")]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct EngineArgs {
    /// Compiled filter file
    #[arg(short, long)]
    input: String,

    /// Dynamic rules file (`src des type action` per line)
    #[arg(long)]
    dynamic: Option<String>,

    /// Public suffix list file
    #[arg(long)]
    psl: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into one compiled file
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output file
        #[arg(short, long, default_value = "filters.compiled")]
        output: String,
    },

    /// Check that a compiled file loads
    Validate {
        /// Compiled filter file
        #[arg(short, long)]
        input: String,
    },

    /// Build the engine and print its statistics
    Info {
        #[command(flatten)]
        engine: EngineArgs,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Match one request
    Match {
        #[command(flatten)]
        engine: EngineArgs,

        /// Request URL
        url: String,

        /// URL of the page issuing the request
        #[arg(short, long, default_value = "")]
        page: String,

        /// Request type (image, script, sub_frame, ...)
        #[arg(short = 't', long = "type", default_value = "other")]
        request_type: String,

        /// Print the verbose result string
        #[arg(long)]
        explain: bool,
    },

    /// Cosmetic selectors for a page
    Cosmetic {
        #[command(flatten)]
        engine: EngineArgs,

        /// Page URL
        url: String,

        /// Ids and classes present in the page (`#id`, `.class`)
        #[arg(short, long)]
        candidate: Vec<String>,
    },

    /// Time request matching
    Bench {
        #[command(flatten)]
        engine: EngineArgs,

        #[arg(long, value_enum, default_value = "both")]
        mode: bench::BenchMode,

        #[arg(long, default_value_t = 100)]
        iterations: usize,

        /// Synthetic requests to generate when no trace is given
        #[arg(long, default_value_t = 1000)]
        requests: usize,

        /// JSON-lines request trace
        #[arg(long)]
        trace: Option<String>,

        #[arg(long, default_value_t = 100_000)]
        trace_limit: usize,

        #[arg(long, default_value_t = bench::DEFAULT_SEED)]
        seed: u32,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Compile { input, output } => cmd_compile(&input, &output, cli.verbose > 0),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { engine, json } => cmd_info(&engine, config, json),
        Commands::Match {
            engine,
            url,
            page,
            request_type,
            explain,
        } => cmd_match(&engine, config, &url, &page, &request_type, explain),
        Commands::Cosmetic { engine, url, candidate } => cmd_cosmetic(&engine, config, &url, &candidate),
        Commands::Bench {
            engine,
            mode,
            iterations,
            requests,
            trace,
            trace_limit,
            seed,
        } => lists::load_engine(&source(&engine, config)).and_then(|e| {
            bench::run(
                &e,
                bench::BenchOptions {
                    mode,
                    iterations,
                    requests,
                    trace_path: trace,
                    trace_limit,
                    seed,
                },
            )
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder().filter_level(level).parse_default_env().init();
}

fn source<'a>(args: &'a EngineArgs, config: Option<&'a str>) -> EngineSource<'a> {
    EngineSource {
        compiled: &args.input,
        dynamic_rules: args.dynamic.as_deref(),
        psl: args.psl.as_deref(),
        config,
    }
}

fn cmd_compile(inputs: &[String], output: &str, verbose: bool) -> Result<(), String> {
    let (compiled, report, total_ms) = lists::compile_files(inputs, verbose)?;

    read_compiled(&compiled, |_| {}).map_err(|e| format!("Compiled output failed validation: {}", e))?;
    lists::write_file(Path::new(output), &compiled)?;

    let opt = report.optimize;
    println!("Compiled {} filter lists to '{}'", report.lists, output);
    println!("  Lines:    {} ({} skipped, {} rejected)", report.parse.lines, report.parse.skipped, report.parse.rejected);
    println!(
        "  Rules:    {} -> {} (dedupe {}, badfilter {} incl {})",
        opt.before,
        opt.after,
        opt.deduped,
        opt.badfiltered_rules + opt.badfilter_rules,
        opt.badfilter_rules
    );
    println!("  Size:     {} bytes ({:.1} KB)", compiled.len(), compiled.len() as f64 / 1024.0);
    println!("  Time:     {:.1}ms", total_ms);

    Ok(())
}

fn cmd_validate(input: &str) -> Result<(), String> {
    let compiled = lists::read_file(input)?;
    let mut network = 0usize;
    let mut cosmetic = 0usize;
    read_compiled(&compiled, |rec| match rec.kind {
        veil_core::FilterKind::Network => network += 1,
        veil_core::FilterKind::Cosmetic => cosmetic += 1,
    })
    .map_err(|e| format!("Invalid compiled file: {}", e))?;

    println!("Compiled file '{}' is valid", input);
    println!("  Network:     {}", network);
    println!("  Cosmetic:    {}", cosmetic);
    println!("  Size:        {} bytes", compiled.len());
    Ok(())
}

fn cmd_info(args: &EngineArgs, config: Option<&str>, json: bool) -> Result<(), String> {
    let engine = lists::load_engine(&source(args, config))?;
    let stats = engine.stats();
    let net = stats.network;
    let cosmetic = stats.cosmetic;

    if json {
        let value = serde_json::json!({
            "network": {
                "accepted": net.accepted,
                "duplicates": net.duplicates,
                "rejected": net.rejected,
                "block": net.block,
                "allow": net.allow,
                "important": net.important,
                "hostFilters": net.host_filters,
                "tokened": net.tokened,
                "untokened": net.untokened,
                "trieBytes": net.trie.buffer_len,
                "tries": net.trie.tries,
            },
            "cosmetic": cosmetic,
            "dynamicPairs": stats.dynamic_pairs,
            "config": engine.config(),
        });
        let text = serde_json::to_string_pretty(&value).map_err(|e| format!("Failed to serialize JSON: {}", e))?;
        println!("{text}");
        return Ok(());
    }

    println!("Engine: {}", args.input);
    println!();
    println!("Network filters:");
    println!("  Accepted:    {} ({} block, {} allow, {} important)", net.accepted, net.block, net.allow, net.important);
    println!("  Duplicates:  {}", net.duplicates);
    println!("  Rejected:    {}", net.rejected);
    println!("  Host tries:  {} filters in {} tries, {} bytes", net.host_filters, net.trie.tries, net.trie.buffer_len);
    println!("  Patterns:    {} tokened, {} untokened", net.tokened, net.untokened);
    println!();
    println!("Cosmetic filters:");
    println!("  Accepted:    {} ({} duplicates, {} rejected)", cosmetic.accepted, cosmetic.duplicates, cosmetic.rejected);
    println!("  Hostname:    {}", cosmetic.hostname_filters);
    println!("  Entity:      {}", cosmetic.entity_filters);
    println!("  Generic:     {} specific, {} low, {} high", cosmetic.specific_generics, cosmetic.low_generics, cosmetic.high_generics);
    println!("  Exceptions:  {}", cosmetic.generic_exceptions);
    println!();
    println!("Dynamic rules: {} pairs", stats.dynamic_pairs);

    Ok(())
}

fn cmd_match(
    args: &EngineArgs,
    config: Option<&str>,
    url: &str,
    page: &str,
    request_type: &str,
    explain: bool,
) -> Result<(), String> {
    let engine = lists::load_engine(&source(args, config))?;
    let result = engine.match_url(url, page, request_type);

    let verdict = if result.is_blocked() {
        "block"
    } else if result.is_allowed() {
        "allow"
    } else if result.is_match() {
        "noop"
    } else {
        "no match"
    };
    println!("{verdict}");
    if result.is_match() {
        println!("  Filter:    {}", result.filter);
        println!("  Important: {}", result.is_important());
    }
    if explain {
        println!("  Result:    {:?}", result.to_result_string(true));
    }
    Ok(())
}

fn cmd_cosmetic(args: &EngineArgs, config: Option<&str>, url: &str, candidates: &[String]) -> Result<(), String> {
    let engine = lists::load_engine(&source(args, config))?;
    let page = engine.new_page(url);

    let domain = engine.cosmetic_selectors(&page);
    let generic = engine.generic_selectors(candidates);
    let value = serde_json::json!({
        "page": domain,
        "generic": {
            "hide": generic.hide,
            "donthide": generic.donthide,
        },
    });
    let text = serde_json::to_string_pretty(&value).map_err(|e| format!("Failed to serialize JSON: {}", e))?;
    println!("{text}");
    Ok(())
}
