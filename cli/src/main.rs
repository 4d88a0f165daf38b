use clap::{Parser, Subcommand};
use colored::Colorize;
use h3tm_config::{
    ConfigResolver, ConnectionReport, ConstantsLoader, DiagnosticSuite, EnvironmentSource,
    ExecutionContext, JsonFileOptionStore, LegacyAdapter, ValidationReport,
};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "h3tm-diag")]
#[command(about = "H3TM S3 configuration diagnostics", long_about = None)]
#[command(version)]
struct Cli {
    /// Option store file (overrides config)
    #[arg(long, global = true, env = "H3TM_OPTIONS")]
    options: Option<String>,

    /// Deploy-time constants YAML file (overrides config)
    #[arg(long, global = true, env = "H3TM_CONSTANTS")]
    constants: Option<String>,

    /// Execution context to resolve under
    #[arg(long, global = true, env = "H3TM_CONTEXT", default_value = "admin")]
    context: ExecutionContext,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable the cross-process configuration cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Log filter, e.g. "info" or "h3tm_config=debug"
    #[arg(long, global = true, env = "H3TM_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save default file locations
    Init {
        /// Option store file
        #[arg(long, default_value = "~/.config/h3tm/options.json")]
        options: String,
        /// Constants YAML file
        #[arg(long)]
        constants: Option<String>,
    },

    /// Show the resolved configuration (secrets masked)
    Show,

    /// Read one value by dotted path
    Get {
        /// Dotted path, e.g. s3.bucket_name
        path: String,
        /// Value printed when the path is absent
        #[arg(short, long)]
        default: Option<String>,
    },

    /// Run configuration checks
    Validate {
        /// Skip cache, context and connectivity checks
        #[arg(long)]
        quick: bool,
    },

    /// Probe the configured bucket over HTTP
    TestConnection,

    /// Persisted option management
    #[command(subcommand)]
    Option(OptionCommands),

    /// Invoke a legacy adapter method by name
    Legacy {
        method: String,
        /// JSON (or plain string) arguments
        args: Vec<String>,
    },

    /// Drop cached configuration
    ClearCache,
}

#[derive(Subcommand)]
enum OptionCommands {
    /// Read an option directly from the store
    Get { name: String },
    /// Write an option (value parsed as JSON, else taken as a string)
    Set { name: String, value: String },
    /// Delete an option
    Delete { name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Init { options, constants } => cmd_init(options, constants),
        command => match load_config(cli.options, cli.constants)
            .and_then(|config| build_resolver(&config, cli.context, !cli.no_cache))
        {
            Ok(resolver) => run(command, resolver, cli.json).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// Saved defaults overridden by command-line flags.
fn load_config(options: Option<String>, constants: Option<String>) -> Result<Config, String> {
    let mut config = Config::load_or_default()?;
    if let Some(options) = options {
        config.options = options;
    }
    if constants.is_some() {
        config.constants = constants;
    }
    Ok(config)
}

fn build_resolver(
    config: &Config,
    context: ExecutionContext,
    persistent_cache: bool,
) -> Result<Arc<ConfigResolver>, String> {
    let loader = match &config.constants {
        Some(path) => ConstantsLoader::new().with_file(path),
        None => ConstantsLoader::new(),
    };
    let constants = loader
        .load()
        .map_err(|e| format!("Failed to load constants: {}", e))?;
    let store = JsonFileOptionStore::new(config::expand(&config.options));
    tracing::debug!(options = %store.path().display(), constants = constants.len(), "Building resolver");

    Ok(Arc::new(
        ConfigResolver::new(Arc::new(store))
            .with_constants(constants)
            .with_environment(EnvironmentSource::from_process())
            .with_context(context)
            .with_persistent_cache(persistent_cache),
    ))
}

async fn run(command: Commands, resolver: Arc<ConfigResolver>, json: bool) -> Result<(), String> {
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Show => cmd_show(&resolver, json),
        Commands::Get { path, default } => cmd_get(&resolver, &path, default.as_deref(), json),
        Commands::Validate { quick } => cmd_validate(resolver, quick, json).await,
        Commands::TestConnection => cmd_test_connection(&resolver, json).await,
        Commands::Option(option_cmd) => match option_cmd {
            OptionCommands::Get { name } => cmd_option_get(&resolver, &name),
            OptionCommands::Set { name, value } => cmd_option_set(&resolver, &name, &value, json),
            OptionCommands::Delete { name } => cmd_option_delete(&resolver, &name, json),
        },
        Commands::Legacy { method, args } => cmd_legacy(resolver, &method, &args),
        Commands::ClearCache => cmd_clear_cache(&resolver, json),
    }
}

/// JSON if it parses, the raw string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize output: {}", e))?;
    println!("{}", text);
    Ok(())
}

fn cmd_init(options: String, constants: Option<String>) -> Result<(), String> {
    let config = Config { options, constants };
    config.save()?;
    println!("{} Configuration saved to {}", "✓".green(), Config::path().display());
    Ok(())
}

fn cmd_show(resolver: &Arc<ConfigResolver>, json: bool) -> Result<(), String> {
    let resolved = resolver
        .get_configuration()
        .map_err(|e| format!("Configuration unavailable: {}", e))?;
    let debug = LegacyAdapter::new(Arc::clone(resolver)).get_debug_info();

    if json {
        let mut value = resolved.to_value();
        if let (Some(s3), Some(masked)) = (value.get_mut("s3"), debug.get("s3")) {
            for key in ["access_key", "secret_key"] {
                if let Some(v) = masked.get(key) {
                    s3[key] = v.clone();
                }
            }
        }
        return print_json(&value);
    }

    let metadata = resolved.metadata();
    println!("{}", "Resolved Configuration:".bold());
    println!("  Context:     {}", metadata.context.to_string().cyan());
    println!("  Resolved at: {}", metadata.resolved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if metadata.from_persistent_cache {
        println!("  Served from: {}", "persistent cache".yellow());
    }
    println!();
    for (path, source) in &metadata.key_sources {
        let shown = match path.as_str() {
            "s3.access_key" | "s3.secret_key" => {
                let field = path.trim_start_matches("s3.");
                debug["s3"][field].clone()
            }
            _ => resolved.lookup(path).unwrap_or(Value::Null),
        };
        println!(
            "  {} {:<28} {}",
            format!("{:<26}", path).bold(),
            shown.to_string(),
            format!("({})", source).dimmed()
        );
    }
    for ignored in &metadata.ignored {
        println!(
            "  {} ignored {} value for {}: {}",
            "⚠".yellow(),
            ignored.source,
            ignored.path,
            ignored.reason
        );
    }
    Ok(())
}

fn cmd_get(
    resolver: &ConfigResolver,
    path: &str,
    default: Option<&str>,
    json: bool,
) -> Result<(), String> {
    let default = default.map(parse_value).unwrap_or(Value::Null);
    let value = resolver.get(path, default);
    if json {
        return print_json(&value);
    }
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", other),
    }
    Ok(())
}

async fn cmd_validate(resolver: Arc<ConfigResolver>, quick: bool, json: bool) -> Result<(), String> {
    let suite = DiagnosticSuite::new(resolver);
    let report = if quick {
        suite.run_quick_validation()
    } else {
        suite.run_comprehensive_validation().await
    };

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if report.all_passed() {
        Ok(())
    } else {
        Err(format!("{} of {} checks failed", report.summary.failed, report.summary.total))
    }
}

fn print_report(report: &ValidationReport) {
    println!("{}", "Configuration Diagnostics:".bold());
    for result in &report.test_results {
        let mark = if result.passed { "✓".green() } else { "✗".red() };
        println!(
            "  {} {} {}",
            mark,
            format!("{:<30}", result.name).bold(),
            result.message
        );
        for warning in &result.warnings {
            println!("      {} {}", "⚠".yellow(), warning);
        }
    }
    println!();
    let summary = &report.summary;
    let rate = format!("{:.1}%", summary.success_rate);
    println!(
        "  Passed: {}  Failed: {}  Warnings: {}  Success rate: {}",
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.warnings.to_string().yellow(),
        if summary.failed == 0 { rate.green() } else { rate.yellow() }
    );
    println!("  Run: {}", report.run_id);
}

async fn cmd_test_connection(resolver: &ConfigResolver, json: bool) -> Result<(), String> {
    let report = resolver.test_connection().await;
    if json {
        print_json(&report)?;
    } else {
        print_connection(&report);
    }
    if report.success {
        Ok(())
    } else {
        Err(report
            .reason
            .unwrap_or_else(|| "Connection test failed".to_string()))
    }
}

fn print_connection(report: &ConnectionReport) {
    println!("{}", "S3 Connection Test:".bold());
    println!("  Bucket: {}", report.bucket.cyan());
    println!("  Region: {}", report.region);
    if let Some(url) = &report.url {
        println!("  URL:    {}", url);
    }
    if let Some(status) = report.status {
        println!("  Status: {} ({}ms)", status, report.elapsed_ms);
    }
    if report.success {
        println!("{} Bucket is reachable", "✓".green());
    }
}

fn cmd_option_get(resolver: &ConfigResolver, name: &str) -> Result<(), String> {
    match resolver.get_option_with_fallback(name, Value::Null) {
        Value::Null => Err(format!("Option '{}' is not set", name)),
        value => print_json(&value),
    }
}

fn cmd_option_set(resolver: &ConfigResolver, name: &str, raw: &str, json: bool) -> Result<(), String> {
    let value = parse_value(raw);
    resolver
        .update_option(name, value.clone())
        .map_err(|e| format!("Failed to update option: {}", e))?;
    if json {
        return print_json(&serde_json::json!({ "option": name, "value": value }));
    }
    println!("{} Updated option: {}", "✓".green(), name.cyan());
    Ok(())
}

fn cmd_option_delete(resolver: &ConfigResolver, name: &str, json: bool) -> Result<(), String> {
    let removed = resolver
        .delete_option(name)
        .map_err(|e| format!("Failed to delete option: {}", e))?;
    if json {
        return print_json(&serde_json::json!({ "option": name, "deleted": removed }));
    }
    if removed {
        println!("{} Deleted option: {}", "✓".green(), name);
        Ok(())
    } else {
        Err(format!("Option '{}' not found", name))
    }
}

fn cmd_legacy(resolver: Arc<ConfigResolver>, method: &str, args: &[String]) -> Result<(), String> {
    let args: Vec<Value> = args.iter().map(|a| parse_value(a)).collect();
    let value = LegacyAdapter::new(resolver)
        .call(method, &args)
        .map_err(|e| e.to_string())?;
    print_json(&value)
}

fn cmd_clear_cache(resolver: &ConfigResolver, json: bool) -> Result<(), String> {
    resolver
        .clear_cache()
        .map_err(|e| format!("Failed to clear cache: {}", e))?;
    if json {
        return print_json(&serde_json::json!({ "cleared": true, "context": resolver.context() }));
    }
    println!("{} Configuration cache cleared", "✓".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_value_prefers_json() {
        assert_eq!(parse_value("false"), json!(false));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("tour-bucket"), json!("tour-bucket"));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "h3tm-diag",
            "validate",
            "--quick",
            "--context",
            "ajax",
            "--options",
            "/tmp/options.json",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.context, ExecutionContext::Ajax);
        assert_eq!(cli.options.as_deref(), Some("/tmp/options.json"));
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Validate { quick: true }));
    }

    #[test]
    fn cli_rejects_unknown_context() {
        assert!(Cli::try_parse_from(["h3tm-diag", "show", "--context", "desktop"]).is_err());
    }

    #[test]
    fn resolver_reads_configured_files() {
        let dir = tempfile::tempdir().unwrap();
        let constants = dir.path().join("constants.yaml");
        std::fs::write(&constants, "H3_S3_BUCKET: from-constant\n").unwrap();
        let config = Config {
            options: dir.path().join("options.json").to_string_lossy().into_owned(),
            constants: Some(constants.to_string_lossy().into_owned()),
        };

        let resolver = build_resolver(&config, ExecutionContext::Cron, true).unwrap();
        resolver.update_option("h3tm_s3_bucket", json!("from-option")).unwrap();
        assert_eq!(resolver.get("s3.bucket_name", Value::Null), json!("from-constant"));
        assert_eq!(resolver.context(), ExecutionContext::Cron);
    }
}
